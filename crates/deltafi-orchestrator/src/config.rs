use crate::errors::{CoreError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Parámetros del núcleo. `Default` da los valores de producción; en
/// despliegue se leen de variables `DELTAFI_*` con [`CoreConfig::from_env`].
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
  /// Nombre del sistema propagado en cada `ActionContext`.
  pub system_name: String,
  pub event_poll_interval: Duration,
  /// Máximo de eventos drenados de `dgs` por tick.
  pub event_batch_size: usize,
  /// Antigüedad a partir de la cual una acción QUEUED/IN_FLIGHT se reenvía.
  pub requeue_threshold: Duration,
  pub delete_interval: Duration,
  pub delete_batch_size: usize,
  /// Días de la política `ttlSystemPolicy`; 0 la deshabilita.
  pub age_off_days: u32,
  pub flow_refresh_interval: Duration,
  pub max_optimistic_retries: u32,
  /// Tamaño de cola a partir del cual las acciones nuevas quedan
  /// COLD_QUEUED; 0 deshabilita el cold queue.
  pub cold_queue_threshold: usize,
  /// URL de Redis/Valkey. `None` usa la cola en memoria.
  pub queue_url: Option<String>,
  pub flows_path: Option<PathBuf>,
  pub delete_policies_path: Option<PathBuf>,
}

impl Default for CoreConfig {
  fn default() -> Self {
    Self { system_name: "deltafi".to_string(),
           event_poll_interval: Duration::from_millis(1000),
           event_batch_size: 500,
           requeue_threshold: Duration::from_secs(300),
           delete_interval: Duration::from_secs(60),
           delete_batch_size: 1000,
           age_off_days: 13,
           flow_refresh_interval: Duration::from_secs(30),
           max_optimistic_retries: 10,
           cold_queue_threshold: 0,
           queue_url: None,
           flows_path: None,
           delete_policies_path: None }
  }
}

impl CoreConfig {
  /// Carga `.env` (si existe) y lee el entorno del proceso.
  pub fn from_env() -> Result<Self> {
    dotenvy::dotenv().ok();
    Self::from_lookup(|key| std::env::var(key).ok())
  }

  /// Construye la configuración con una función de búsqueda arbitraria;
  /// las claves ausentes o vacías toman el valor por defecto.
  pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where F: Fn(&str) -> Option<String>
  {
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let defaults = Self::default();
    let config = Self { system_name: get("DELTAFI_SYSTEM_NAME").unwrap_or(defaults.system_name),
                        event_poll_interval: Duration::from_millis(parse_or(&get, "DELTAFI_EVENT_POLL_MS", 1000)?),
                        event_batch_size: parse_or(&get, "DELTAFI_EVENT_BATCH", defaults.event_batch_size)?,
                        requeue_threshold: Duration::from_secs(parse_or(&get, "DELTAFI_REQUEUE_SECONDS", 300)?),
                        delete_interval: Duration::from_secs(parse_or(&get, "DELTAFI_DELETE_INTERVAL_SECONDS", 60)?),
                        delete_batch_size: parse_or(&get, "DELTAFI_DELETE_BATCH", defaults.delete_batch_size)?,
                        age_off_days: parse_or(&get, "DELTAFI_AGE_OFF_DAYS", defaults.age_off_days)?,
                        flow_refresh_interval: Duration::from_secs(parse_or(&get, "DELTAFI_FLOW_REFRESH_SECONDS", 30)?),
                        max_optimistic_retries: parse_or(&get,
                                                         "DELTAFI_MAX_OPTIMISTIC_RETRIES",
                                                         defaults.max_optimistic_retries)?,
                        cold_queue_threshold: parse_or(&get,
                                                       "DELTAFI_COLD_QUEUE_THRESHOLD",
                                                       defaults.cold_queue_threshold)?,
                        queue_url: get("DELTAFI_QUEUE_URL"),
                        flows_path: get("DELTAFI_FLOWS_PATH").map(PathBuf::from),
                        delete_policies_path: get("DELTAFI_DELETE_POLICIES_PATH").map(PathBuf::from) };
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.system_name.trim().is_empty() {
      return Err(CoreError::Config("DELTAFI_SYSTEM_NAME vacío".into()));
    }
    let intervals = [("DELTAFI_EVENT_POLL_MS", self.event_poll_interval),
                     ("DELTAFI_REQUEUE_SECONDS", self.requeue_threshold),
                     ("DELTAFI_DELETE_INTERVAL_SECONDS", self.delete_interval),
                     ("DELTAFI_FLOW_REFRESH_SECONDS", self.flow_refresh_interval)];
    for (name, value) in intervals {
      if value.is_zero() {
        return Err(CoreError::Config(format!("{} debe ser mayor que cero", name)));
      }
    }
    if self.event_batch_size == 0 || self.delete_batch_size == 0 {
      return Err(CoreError::Config("los tamaños de lote deben ser mayores que cero".into()));
    }
    if self.max_optimistic_retries == 0 {
      return Err(CoreError::Config("DELTAFI_MAX_OPTIMISTIC_RETRIES debe ser al menos 1".into()));
    }
    Ok(())
  }

  /// Periodo del loop de requeue: un décimo del umbral, mínimo un segundo.
  pub fn requeue_interval(&self) -> Duration {
    (self.requeue_threshold / 10).max(Duration::from_secs(1))
  }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T>
  where G: Fn(&str) -> Option<String>,
        T: std::str::FromStr
{
  match get(key) {
    None => Ok(default),
    Some(raw) => raw.parse::<T>()
                    .map_err(|_| CoreError::Config(format!("{}: valor inválido '{}'", key, raw))),
  }
}
