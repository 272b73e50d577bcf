// Archivo: action_queue.rs
// Propósito: cliente tipado de colas de acciones. Serializa solicitudes de
// trabajo (`ActionInput`) hacia la cola de cada clase de acción y
// resultados (`ActionEvent`) hacia la cola compartida de resultados.
use crate::errors::Result;
use crate::keyed_queue::KeyedBlockingQueue;
use chrono::Utc;
use deltafi_domain::{ActionEvent, ActionEventKind, ActionInput};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Cola compartida de resultados.
pub const RESULT_QUEUE: &str = "dgs";

/// Cliente de colas usado por el orquestador (y por workers de prueba).
#[derive(Clone)]
pub struct ActionQueueClient {
    backend: Arc<dyn KeyedBlockingQueue>,
}

impl ActionQueueClient {
    pub fn new(backend: Arc<dyn KeyedBlockingQueue>) -> Self {
        Self { backend }
    }

    /// Encola `payload` serializado en JSON. Un fallo de transporte devuelve
    /// `QueueError::Connection`; no se reintenta aquí.
    pub fn put<T: Serialize>(&self, queue_name: &str, payload: &T) -> Result<()> {
        let value = serde_json::to_string(payload)?;
        self.backend.put(queue_name, Utc::now().timestamp_millis(), &value)
    }

    /// Extrae y deserializa el siguiente elemento, esperando hasta `timeout`.
    /// `Ok(None)` indica cola vacía.
    pub fn take<T: DeserializeOwned>(&self, queue_name: &str, timeout: Duration) -> Result<Option<T>> {
        match self.backend.take(queue_name, timeout)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Purga administrativa de colas (flujo o acción deshabilitados).
    pub fn drop(&self, queue_names: &[String]) -> Result<()> {
        self.backend.drop_keys(queue_names)
    }

    pub fn size(&self, queue_name: &str) -> Result<usize> {
        self.backend.size(queue_name)
    }

    /// Publica solicitudes de trabajo. Las marcadas `cold_queued` no se
    /// publican. Con `check_unique`, se omiten las que ya están en su cola
    /// (mismo `actionId`). Devuelve cuántas se publicaron.
    pub fn put_actions(&self, inputs: &[ActionInput], check_unique: bool) -> Result<usize> {
        let mut published = 0;
        for input in inputs {
            if input.cold_queued {
                continue;
            }
            if check_unique && self.backend.contains(&input.queue_name, &unique_needle(input))? {
                log::debug!("despacho duplicado omitido: {} en {}", input.unique_key(), input.queue_name);
                continue;
            }
            let value = serde_json::to_string(input)?;
            self.backend.put(&input.queue_name, input.action_created.timestamp_millis(), &value)?;
            published += 1;
        }
        Ok(published)
    }

    pub fn put_result(&self, event: &ActionEvent) -> Result<()> {
        self.put(RESULT_QUEUE, event)
    }

    pub fn take_result(&self, timeout: Duration) -> Result<Option<ActionEvent>> {
        self.take(RESULT_QUEUE, timeout)
    }

    /// Vacía sin bloquear hasta `max` resultados disponibles. Un resultado
    /// que no deserializa se descarta con un warning en lugar de frenar la
    /// cola; un error de conexión corta el drenado y se propaga sólo si no
    /// se obtuvo nada.
    pub fn drain_results(&self, max: usize) -> Result<Vec<ActionEvent>> {
        let mut events = Vec::new();
        while events.len() < max {
            let raw = match self.backend.take(RESULT_QUEUE, Duration::ZERO) {
                Ok(Some(raw)) => raw,
                Ok(None) => break,
                Err(e) if events.is_empty() => return Err(e),
                Err(e) => {
                    log::error!("drenado de resultados interrumpido: {}", e);
                    break;
                }
            };
            match serde_json::from_str::<ActionEvent>(&raw) {
                Ok(event) => events.push(event),
                Err(e) => log::warn!("resultado inválido descartado de {}: {}", RESULT_QUEUE, e),
            }
        }
        Ok(events)
    }

    /// Lado worker: reclama la siguiente solicitud de `queue_name` e informa
    /// al orquestador que empezó (`Started`).
    pub fn claim(&self, queue_name: &str, timeout: Duration) -> Result<Option<ActionInput>> {
        let input: Option<ActionInput> = self.take(queue_name, timeout)?;
        if let Some(input) = &input {
            let ctx = &input.action_context;
            let mut started = ActionEvent::new(ctx.did,
                                               &ctx.flow_name,
                                               ctx.flow_id,
                                               &ctx.action_name,
                                               ctx.attempt,
                                               ActionEventKind::Started);
            started.start = Some(Utc::now());
            self.put_result(&started)?;
        }
        Ok(input)
    }
}

fn unique_needle(input: &ActionInput) -> String {
    format!("\"actionId\":\"{}\"", input.action_context.action_id)
}
