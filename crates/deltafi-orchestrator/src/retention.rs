// Archivo: retention.rs
// Propósito: políticas de borrado por antigüedad y el runner que las aplica.
//
// Un run marca (`content_deleted`) los DeltaFiles terminales que cumplen
// alguna política, luego elimina del almacenamiento el contenido de los
// marcados y, si la política lo pide, borra el registro. Cada fase se apoya
// en lo persistido por la anterior, de modo que un run interrumpido se
// completa en el siguiente.
use crate::config::CoreConfig;
use crate::context::CoreContext;
use crate::errors::{CoreError, Result};
use crate::retry::{with_optimistic_retry, Mutation};
use chrono::{DateTime, Utc};
use deltafi_domain::{delete_all_content, DeltaFileCriteria, DeltaFileStage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Nombre de la política de sistema derivada de `DELTAFI_AGE_OFF_DAYS`.
pub const TTL_SYSTEM_POLICY: &str = "ttlSystemPolicy";

const SECONDS_PER_DAY: u64 = 86_400;

fn enabled_by_default() -> bool {
  true
}

/// Política de borrado temporizada. Exactamente uno de `after_create_seconds`
/// o `after_complete_seconds` debe estar presente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePolicy {
  pub name: String,
  #[serde(default = "enabled_by_default")]
  pub enabled: bool,
  #[serde(default)]
  pub after_create_seconds: Option<u64>,
  #[serde(default)]
  pub after_complete_seconds: Option<u64>,
  /// Sólo DeltaFiles ingresados por este flujo.
  #[serde(default)]
  pub flow: Option<String>,
  #[serde(default)]
  pub min_bytes: Option<u64>,
  /// Borra también el registro del DeltaFile tras eliminar su contenido.
  #[serde(default)]
  pub delete_metadata: bool,
  #[serde(default)]
  pub batch_size: Option<usize>,
}

impl DeletePolicy {
  pub fn after_create(name: impl Into<String>, age: Duration) -> Self {
    Self { name: name.into(),
           enabled: true,
           after_create_seconds: Some(age.as_secs()),
           after_complete_seconds: None,
           flow: None,
           min_bytes: None,
           delete_metadata: false,
           batch_size: None }
  }

  pub fn after_complete(name: impl Into<String>, age: Duration) -> Self {
    Self { after_create_seconds: None,
           after_complete_seconds: Some(age.as_secs()),
           ..Self::after_create(name, Duration::ZERO) }
  }

  /// Política de sistema: contenido y registro a los `age_off_days` días
  /// del ingreso.
  pub fn ttl_system_policy(age_off_days: u32) -> Self {
    Self { delete_metadata: true,
           ..Self::after_create(TTL_SYSTEM_POLICY,
                                Duration::from_secs(u64::from(age_off_days) * SECONDS_PER_DAY)) }
  }

  pub fn for_flow(mut self, flow: impl Into<String>) -> Self {
    self.flow = Some(flow.into());
    self
  }

  pub fn with_min_bytes(mut self, min_bytes: u64) -> Self {
    self.min_bytes = Some(min_bytes);
    self
  }

  pub fn deleting_metadata(mut self, delete_metadata: bool) -> Self {
    self.delete_metadata = delete_metadata;
    self
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = Some(batch_size);
    self
  }

  pub fn validate(&self) -> Result<()> {
    if self.name.trim().is_empty() {
      return Err(CoreError::Config("política de borrado sin nombre".into()));
    }
    match (self.after_create_seconds, self.after_complete_seconds) {
      (Some(_), None) | (None, Some(_)) => {}
      _ => {
        return Err(CoreError::Config(format!("la política '{}' requiere exactamente uno de afterCreateSeconds o \
                                              afterCompleteSeconds",
                                             self.name)))
      }
    }
    if self.batch_size == Some(0) {
      return Err(CoreError::Config(format!("la política '{}' tiene batchSize 0", self.name)));
    }
    Ok(())
  }

  /// Criterios de búsqueda de candidatos a `now`.
  pub fn criteria(&self, now: DateTime<Utc>, default_batch: usize) -> Result<DeltaFileCriteria> {
    let before = |secs: u64| cutoff(now, secs, &self.name);
    Ok(DeltaFileCriteria { stages: vec![DeltaFileStage::Complete,
                                        DeltaFileStage::Error,
                                        DeltaFileStage::Filtered,
                                        DeltaFileStage::Cancelled],
                           data_source: self.flow.clone(),
                           created_before: self.after_create_seconds.map(before).transpose()?,
                           terminal_before: self.after_complete_seconds.map(before).transpose()?,
                           content_deleted: if self.delete_metadata { None } else { Some(false) },
                           min_bytes: self.min_bytes,
                           limit: Some(self.batch_size.unwrap_or(default_batch)),
                           ..Default::default() })
  }
}

fn cutoff(now: DateTime<Utc>, secs: u64, policy: &str) -> Result<DateTime<Utc>> {
  i64::try_from(secs).ok()
                     .and_then(chrono::Duration::try_seconds)
                     .and_then(|age| now.checked_sub_signed(age))
                     .ok_or_else(|| CoreError::Config(format!("antigüedad fuera de rango en '{}'", policy)))
}

/// Lee un arreglo JSON de políticas y las valida.
pub fn load_policies(path: &Path) -> Result<Vec<DeletePolicy>> {
  let raw = std::fs::read_to_string(path).map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))?;
  let policies: Vec<DeletePolicy> = serde_json::from_str(&raw)?;
  for policy in &policies {
    policy.validate()?;
  }
  Ok(policies)
}

/// Políticas del archivo configurado (si hay) más la política de sistema
/// cuando `age_off_days` es mayor que cero.
pub fn configured_policies(config: &CoreConfig) -> Result<Vec<DeletePolicy>> {
  let mut policies = match &config.delete_policies_path {
    Some(path) => load_policies(path)?,
    None => Vec::new(),
  };
  if config.age_off_days > 0 && !policies.iter().any(|p| p.name == TTL_SYSTEM_POLICY) {
    policies.push(DeletePolicy::ttl_system_policy(config.age_off_days));
  }
  Ok(policies)
}

/// Totales de un run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeleteReport {
  /// DeltaFiles marcados en este run.
  pub marked: usize,
  /// DeltaFiles cuyo contenido se eliminó del almacenamiento.
  pub purged: usize,
  pub objects_deleted: usize,
  /// Registros eliminados por políticas con `delete_metadata`.
  pub removed: usize,
}

pub struct DeleteRunner {
  ctx: Arc<CoreContext>,
}

impl DeleteRunner {
  pub fn new(ctx: Arc<CoreContext>) -> Self {
    Self { ctx }
  }

  /// Ejecuta todas las políticas habilitadas. Repetir el run con el mismo
  /// `now` no marca nada nuevo.
  pub fn run_once(&self, now: DateTime<Utc>) -> Result<DeleteReport> {
    let mut report = DeleteReport::default();
    let mut remove_records = BTreeSet::new();
    for policy in self.ctx.delete_policies.iter().filter(|p| p.enabled) {
      let marked = self.apply_policy(policy, now, &mut remove_records)?;
      if marked > 0 {
        log::info!("política '{}': {} DeltaFiles marcados para borrado", policy.name, marked);
      }
      report.marked += marked;
    }
    self.purge(&mut report)?;
    for did in remove_records {
      match self.ctx.repo.find(&did)? {
        Some(df) if df.content_purged && df.is_terminal() => {
          if self.ctx.repo.delete(&did)? {
            report.removed += 1;
          }
        }
        _ => {}
      }
    }
    Ok(report)
  }

  fn apply_policy(&self, policy: &DeletePolicy, now: DateTime<Utc>, remove_records: &mut BTreeSet<Uuid>) -> Result<usize> {
    let criteria = policy.criteria(now, self.ctx.config.delete_batch_size)?;
    let mut marked = 0;
    for candidate in self.ctx.repo.query(&criteria)? {
      let outcome = with_optimistic_retry(self.ctx.repo.as_ref(),
                                          &candidate.did,
                                          self.ctx.config.max_optimistic_retries,
                                          |df| {
                                            // la etapa pudo cambiar desde la consulta (retry)
                                            if !df.is_terminal() {
                                              return Ok(Mutation::Skip(false));
                                            }
                                            if df.mark_content_deleted(&policy.name, now) {
                                              Ok(Mutation::Save(true))
                                            } else {
                                              Ok(Mutation::Skip(false))
                                            }
                                          });
      match outcome {
        Ok((df, newly_marked)) => {
          if newly_marked {
            marked += 1;
          }
          if policy.delete_metadata && df.is_terminal() {
            remove_records.insert(df.did);
          }
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => log::warn!("política '{}': no se pudo marcar {}: {}", policy.name, candidate.did, e),
      }
    }
    Ok(marked)
  }

  /// Elimina del almacenamiento el contenido de los DeltaFiles marcados y
  /// aún no purgados.
  fn purge(&self, report: &mut DeleteReport) -> Result<()> {
    let criteria = DeltaFileCriteria { content_deleted: Some(true),
                                       content_purged: Some(false),
                                       limit: Some(self.ctx.config.delete_batch_size),
                                       ..Default::default() };
    for candidate in self.ctx.repo.query(&criteria)? {
      match delete_all_content(self.ctx.content.as_ref(), candidate.did) {
        Ok(objects) => report.objects_deleted += objects,
        Err(e) => {
          log::error!("no se pudo eliminar el contenido de {}: {}", candidate.did, e);
          continue;
        }
      }
      let outcome = with_optimistic_retry(self.ctx.repo.as_ref(),
                                          &candidate.did,
                                          self.ctx.config.max_optimistic_retries,
                                          |df| {
                                            if df.content_purged {
                                              return Ok(Mutation::Skip(()));
                                            }
                                            df.content_purged = true;
                                            Ok(Mutation::Save(()))
                                          });
      match outcome {
        Ok(_) => report.purged += 1,
        Err(e) => log::warn!("no se pudo registrar la purga de {}: {}", candidate.did, e),
      }
    }
    Ok(())
  }
}
