// content.rs
use crate::DomainError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bucket por defecto del almacenamiento de contenido.
pub const STORAGE_BUCKET: &str = "storage";

/// Rango de bytes dentro de un objeto del almacenamiento.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
  pub bucket: String,
  pub name: String,
  pub offset: u64,
  pub size: u64,
}

/// Porción de un objeto almacenado. El objeto vive en `{did}/{uuid}`; el
/// segmento apunta a `size` bytes a partir de `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
  pub uuid: Uuid,
  pub offset: u64,
  pub size: u64,
  pub did: Uuid,
}

impl Segment {
  pub fn new(uuid: Uuid, offset: u64, size: u64, did: Uuid) -> Self {
    Self { uuid, offset, size, did }
  }

  pub fn object_name(&self) -> String {
    format!("{}/{}", self.did, self.uuid)
  }

  pub fn object_reference(&self) -> ObjectReference {
    ObjectReference { bucket: STORAGE_BUCKET.to_string(), name: self.object_name(), offset: self.offset, size: self.size }
  }
}

/// Contenido lógico: una secuencia ordenada de segmentos. Nunca se copia ni
/// se muta; las transformaciones producen `Content` nuevos que pueden
/// reutilizar segmentos existentes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
  pub name: String,
  pub media_type: String,
  #[serde(default)]
  pub segments: Vec<Segment>,
}

impl Content {
  pub fn new(name: impl Into<String>, media_type: impl Into<String>, segments: Vec<Segment>) -> Self {
    Self { name: name.into(), media_type: media_type.into(), segments }
  }

  /// Tamaño total: suma de los segmentos.
  pub fn size(&self) -> u64 {
    self.segments.iter().map(|s| s.size).sum()
  }

  /// Vista de `size` bytes a partir de `offset`, sin copiar datos: recorta
  /// los segmentos que cruzan los límites del rango.
  pub fn subcontent(&self, offset: u64, size: u64) -> Result<Content, DomainError> {
    let total = self.size();
    let end = offset.checked_add(size)
                    .ok_or_else(|| DomainError::ValidationError("rango de subcontenido desbordado".into()))?;
    if end > total {
      return Err(DomainError::ValidationError(format!("rango {}..{} fuera del contenido de {} bytes", offset, end, total)));
    }
    let mut segments = Vec::new();
    let mut skip = offset;
    let mut remaining = size;
    for seg in &self.segments {
      if remaining == 0 {
        break;
      }
      if skip >= seg.size {
        skip -= seg.size;
        continue;
      }
      let take = (seg.size - skip).min(remaining);
      segments.push(Segment::new(seg.uuid, seg.offset + skip, take, seg.did));
      remaining -= take;
      skip = 0;
    }
    Ok(Content { name: self.name.clone(), media_type: self.media_type.clone(), segments })
  }

  /// Copia de la referencia con otro nombre (los segmentos se comparten).
  pub fn renamed(&self, name: impl Into<String>) -> Content {
    Content { name: name.into(), media_type: self.media_type.clone(), segments: self.segments.clone() }
  }

  pub fn object_references(&self) -> Vec<ObjectReference> {
    self.segments.iter().map(Segment::object_reference).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn two_segments() -> Content {
    let did = Uuid::new_v4();
    Content::new("in.txt",
                 "text/plain",
                 vec![Segment::new(Uuid::new_v4(), 0, 10, did), Segment::new(Uuid::new_v4(), 5, 10, did)])
  }

  #[test]
  fn subcontent_spans_segment_boundary() {
    let c = two_segments();
    assert_eq!(c.size(), 20);
    let sub = c.subcontent(8, 4).expect("sub");
    assert_eq!(sub.size(), 4);
    assert_eq!(sub.segments.len(), 2);
    assert_eq!((sub.segments[0].offset, sub.segments[0].size), (8, 2));
    assert_eq!((sub.segments[1].offset, sub.segments[1].size), (5, 2));
  }

  #[test]
  fn subcontent_rejects_out_of_range() {
    let c = two_segments();
    assert!(c.subcontent(15, 6).is_err());
    assert!(c.subcontent(u64::MAX, 1).is_err());
    assert!(c.subcontent(20, 0).expect("empty tail").segments.is_empty());
  }
}
