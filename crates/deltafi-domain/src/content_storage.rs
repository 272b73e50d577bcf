// content_storage.rs
use crate::content::{Content, ObjectReference, Segment, STORAGE_BUCKET};
use crate::DomainError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Contrato del almacenamiento de objetos (S3/MinIO en producción).
pub trait ContentStorage: Send + Sync {
  /// Lee el rango `offset..offset+size` del objeto.
  fn get(&self, reference: &ObjectReference) -> Result<Vec<u8>, DomainError>;

  /// Escribe el objeto completo `bucket/name`.
  fn put(&self, bucket: &str, name: &str, bytes: Vec<u8>) -> Result<(), DomainError>;

  fn delete(&self, reference: &ObjectReference) -> Result<(), DomainError>;

  /// Elimina todos los objetos cuyo nombre empieza con `prefix`. Devuelve
  /// cuántos se borraron.
  fn delete_by_prefix(&self, bucket: &str, prefix: &str) -> Result<usize, DomainError>;
}

/// Guarda `bytes` como un objeto nuevo del DeltaFile `did` y devuelve la
/// referencia de contenido de un único segmento.
pub fn store_content(storage: &dyn ContentStorage,
                     did: Uuid,
                     name: &str,
                     media_type: &str,
                     bytes: Vec<u8>)
                     -> Result<Content, DomainError> {
  let segment = Segment::new(Uuid::new_v4(), 0, bytes.len() as u64, did);
  storage.put(STORAGE_BUCKET, &segment.object_name(), bytes)?;
  Ok(Content::new(name, media_type, vec![segment]))
}

/// Concatena los bytes de todos los segmentos del contenido.
pub fn load_content(storage: &dyn ContentStorage, content: &Content) -> Result<Vec<u8>, DomainError> {
  let mut out = Vec::with_capacity(content.size() as usize);
  for reference in content.object_references() {
    out.extend(storage.get(&reference)?);
  }
  Ok(out)
}

/// Elimina todo el contenido de un DeltaFile.
pub fn delete_all_content(storage: &dyn ContentStorage, did: Uuid) -> Result<usize, DomainError> {
  storage.delete_by_prefix(STORAGE_BUCKET, &format!("{}/", did))
}

/// Almacenamiento en memoria indexado por `(bucket, name)`.
#[derive(Debug, Default)]
pub struct InMemoryContentStorage {
  objects: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl InMemoryContentStorage {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<(String, String), Vec<u8>>>, DomainError> {
    self.objects.lock().map_err(|e| DomainError::ExternalError(format!("mutex poisoned: {:?}", e)))
  }

  pub fn object_count(&self) -> usize {
    self.objects.lock().map(|m| m.len()).unwrap_or(0)
  }
}

impl ContentStorage for InMemoryContentStorage {
  fn get(&self, reference: &ObjectReference) -> Result<Vec<u8>, DomainError> {
    let objects = self.lock()?;
    let bytes = objects.get(&(reference.bucket.clone(), reference.name.clone()))
                       .ok_or_else(|| DomainError::ExternalError(format!("objeto {} no encontrado", reference.name)))?;
    let start = reference.offset as usize;
    let end = start.saturating_add(reference.size as usize);
    bytes.get(start..end)
         .map(|s| s.to_vec())
         .ok_or_else(|| DomainError::ExternalError(format!("rango fuera del objeto {}", reference.name)))
  }

  fn put(&self, bucket: &str, name: &str, bytes: Vec<u8>) -> Result<(), DomainError> {
    self.lock()?.insert((bucket.to_string(), name.to_string()), bytes);
    Ok(())
  }

  fn delete(&self, reference: &ObjectReference) -> Result<(), DomainError> {
    self.lock()?.remove(&(reference.bucket.clone(), reference.name.clone()));
    Ok(())
  }

  fn delete_by_prefix(&self, bucket: &str, prefix: &str) -> Result<usize, DomainError> {
    let mut objects = self.lock()?;
    let before = objects.len();
    objects.retain(|(b, n), _| !(b == bucket && n.starts_with(prefix)));
    Ok(before - objects.len())
  }
}
