use crate::errors::{CoreError, Result};
use deltafi_domain::{DeltaFile, DeltaFileRepository, PersistResult};
use uuid::Uuid;

/// Resultado de una mutación: guardar el DeltaFile modificado o dejarlo
/// como estaba. En ambos casos se devuelve el valor calculado.
#[derive(Debug)]
pub enum Mutation<T> {
  Save(T),
  Skip(T),
}

/// Lee el DeltaFile, aplica `mutate` y guarda con la versión leída. Ante un
/// conflicto relee y vuelve a aplicar, hasta `max_attempts` veces.
///
/// `mutate` debe ser puro respecto del DeltaFile recibido: se ejecuta una
/// vez por intento sobre una copia fresca. Un error de `mutate` corta el
/// ciclo sin guardar.
pub fn with_optimistic_retry<T, F>(repo: &dyn DeltaFileRepository,
                                   did: &Uuid,
                                   max_attempts: u32,
                                   mut mutate: F)
                                   -> Result<(DeltaFile, T)>
  where F: FnMut(&mut DeltaFile) -> Result<Mutation<T>>
{
  for attempt in 1..=max_attempts {
    let mut delta_file = repo.find(did)?.ok_or(CoreError::UnknownDeltaFile(*did))?;
    let expected = delta_file.version;
    let value = match mutate(&mut delta_file)? {
      Mutation::Skip(value) => return Ok((delta_file, value)),
      Mutation::Save(value) => value,
    };
    match repo.save(&delta_file, expected)? {
      PersistResult::Ok { new_version } => {
        delta_file.version = new_version;
        return Ok((delta_file, value));
      }
      PersistResult::Conflict => {
        log::warn!("conflicto de versión en {} (intento {}/{})", did, attempt, max_attempts);
      }
    }
  }
  log::error!("reintentos optimistas agotados para {}", did);
  Err(CoreError::ConcurrentModification { did: *did, attempts: max_attempts })
}
