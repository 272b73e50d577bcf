use crate::delta_file::{DeltaFile, DeltaFileStage};
use crate::DomainError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Resultado de una escritura con control optimista.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistResult {
    Ok { new_version: i64 },
    /// La versión almacenada no coincide con la esperada: otro escritor
    /// ganó. El llamador debe releer y reaplicar.
    Conflict,
}

/// Criterios de consulta usados por el requeue y el runner de retención.
/// Los campos en `None` (o vacíos) no filtran.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaFileCriteria {
    pub stages: Vec<DeltaFileStage>,
    /// Filtro por flujo de ingreso (`data_source`).
    pub data_source: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub modified_before: Option<DateTime<Utc>>,
    /// Alguna acción QUEUED o IN_FLIGHT sin cambios desde antes de este
    /// instante (ver `DeltaFile::oldest_active_modified`).
    pub active_modified_before: Option<DateTime<Utc>>,
    pub terminal_before: Option<DateTime<Utc>>,
    pub content_deleted: Option<bool>,
    pub content_purged: Option<bool>,
    pub error_acknowledged: Option<bool>,
    pub min_bytes: Option<u64>,
    pub limit: Option<usize>,
}

impl DeltaFileCriteria {
    /// Evalúa los criterios sobre un DeltaFile ya cargado.
    pub fn matches(&self, df: &DeltaFile) -> bool {
        if !self.stages.is_empty() && !self.stages.contains(&df.stage) {
            return false;
        }
        if let Some(ds) = &self.data_source {
            if &df.data_source != ds {
                return false;
            }
        }
        if self.created_after.is_some_and(|t| df.created <= t) {
            return false;
        }
        if self.created_before.is_some_and(|t| df.created >= t) {
            return false;
        }
        if self.modified_before.is_some_and(|t| df.modified >= t) {
            return false;
        }
        if let Some(t) = self.active_modified_before {
            match df.oldest_active_modified() {
                Some(at) if at < t => {}
                _ => return false,
            }
        }
        if let Some(t) = self.terminal_before {
            match df.terminal_at {
                Some(at) if at < t => {}
                _ => return false,
            }
        }
        if self.content_deleted.is_some_and(|d| d != df.content_deleted.is_some()) {
            return false;
        }
        if self.content_purged.is_some_and(|p| p != df.content_purged) {
            return false;
        }
        if self.error_acknowledged.is_some_and(|a| a != df.error_acknowledged.is_some()) {
            return false;
        }
        if self.min_bytes.is_some_and(|m| df.total_bytes < m) {
            return false;
        }
        true
    }
}

/// Contrato del almacén de DeltaFiles. Es la única fuente de verdad y el
/// árbitro de conflictos de escritura (por versión).
pub trait DeltaFileRepository: Send + Sync {
    fn find(&self, did: &Uuid) -> Result<Option<DeltaFile>, DomainError>;

    /// Inserta un DeltaFile nuevo con versión 0. Falla si el did ya existe.
    fn insert(&self, delta_file: &DeltaFile) -> Result<i64, DomainError>;

    /// Guarda si la versión almacenada es `expected_version`; la nueva
    /// versión es `expected_version + 1`.
    fn save(&self, delta_file: &DeltaFile, expected_version: i64) -> Result<PersistResult, DomainError>;

    /// DeltaFiles que cumplen los criterios, del menos al más recientemente
    /// modificado, acotados por `criteria.limit`.
    fn query(&self, criteria: &DeltaFileCriteria) -> Result<Vec<DeltaFile>, DomainError>;

    /// Elimina el registro. Devuelve `false` si no existía.
    fn delete(&self, did: &Uuid) -> Result<bool, DomainError>;

    fn count(&self) -> Result<usize, DomainError>;
}

/// Repositorio en memoria sobre `DashMap`. La comparación de versión y el
/// reemplazo ocurren con el shard bloqueado, así que `save` es atómico.
#[derive(Debug, Default)]
pub struct InMemoryDeltaFileRepository {
    files: DashMap<Uuid, DeltaFile>,
}

impl InMemoryDeltaFileRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeltaFileRepository for InMemoryDeltaFileRepository {
    fn find(&self, did: &Uuid) -> Result<Option<DeltaFile>, DomainError> {
        Ok(self.files.get(did).map(|r| r.value().clone()))
    }

    fn insert(&self, delta_file: &DeltaFile) -> Result<i64, DomainError> {
        match self.files.entry(delta_file.did) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(DomainError::ValidationError(format!("el DeltaFile {} ya existe", delta_file.did)))
            }
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let mut stored = delta_file.clone();
                stored.version = 0;
                v.insert(stored);
                Ok(0)
            }
        }
    }

    fn save(&self, delta_file: &DeltaFile, expected_version: i64) -> Result<PersistResult, DomainError> {
        let mut current = self.files
                              .get_mut(&delta_file.did)
                              .ok_or_else(|| DomainError::ValidationError(format!("el DeltaFile {} no existe",
                                                                                  delta_file.did)))?;
        if current.version != expected_version {
            return Ok(PersistResult::Conflict);
        }
        let new_version = expected_version.saturating_add(1);
        let mut stored = delta_file.clone();
        stored.version = new_version;
        *current = stored;
        Ok(PersistResult::Ok { new_version })
    }

    fn query(&self, criteria: &DeltaFileCriteria) -> Result<Vec<DeltaFile>, DomainError> {
        let mut out: Vec<DeltaFile> = self.files
                                          .iter()
                                          .filter(|r| criteria.matches(r.value()))
                                          .map(|r| r.value().clone())
                                          .collect();
        out.sort_by(|a, b| a.modified.cmp(&b.modified));
        if let Some(limit) = criteria.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn delete(&self, did: &Uuid) -> Result<bool, DomainError> {
        Ok(self.files.remove(did).is_some())
    }

    fn count(&self) -> Result<usize, DomainError> {
        Ok(self.files.len())
    }
}
