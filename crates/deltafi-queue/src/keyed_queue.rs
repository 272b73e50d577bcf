// Archivo: keyed_queue.rs
// Propósito: contrato de la cola bloqueante por clave y su implementación
// en memoria.
//
// Cada clave es una cola ordenada por `score` (milisegundos de creación);
// a igual score se respeta el orden de llegada.
use crate::errors::{QueueError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Primitivas de la cola durable. Los valores son cadenas ya serializadas.
pub trait KeyedBlockingQueue: Send + Sync {
    /// Encola sin bloquear.
    fn put(&self, key: &str, score: i64, value: &str) -> Result<()>;

    /// Extrae el elemento de menor score. Con `timeout` cero no bloquea; en
    /// otro caso espera hasta `timeout`. `Ok(None)` significa cola vacía.
    fn take(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    /// Purga las colas indicadas.
    fn drop_keys(&self, keys: &[String]) -> Result<()>;

    fn size(&self, key: &str) -> Result<usize>;

    /// Indica si algún elemento de la cola contiene `needle` literalmente.
    fn contains(&self, key: &str, needle: &str) -> Result<bool>;
}

type Entries = BTreeMap<(i64, u64), String>;

#[derive(Default)]
struct State {
    queues: HashMap<String, Entries>,
    seq: u64,
}

/// Cola en memoria con `Mutex` + `Condvar`. No es durable; sirve para
/// pruebas y para ejecutar el núcleo sin Redis.
#[derive(Default)]
pub struct InMemoryKeyedQueue {
    state: Mutex<State>,
    available: Condvar,
}

impl InMemoryKeyedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|e| QueueError::Connection(format!("mutex poisoned: {:?}", e)))
    }

    fn pop_first(state: &mut State, key: &str) -> Option<String> {
        let entries = state.queues.get_mut(key)?;
        let first = *entries.keys().next()?;
        entries.remove(&first)
    }
}

impl KeyedBlockingQueue for InMemoryKeyedQueue {
    fn put(&self, key: &str, score: i64, value: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.seq += 1;
        let seq = state.seq;
        state.queues.entry(key.to_string()).or_default().insert((score, seq), value.to_string());
        self.available.notify_all();
        Ok(())
    }

    fn take(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock()?;
        loop {
            if let Some(v) = Self::pop_first(&mut state, key) {
                return Ok(Some(v));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self.available
                                 .wait_timeout(state, deadline - now)
                                 .map_err(|e| QueueError::Connection(format!("mutex poisoned: {:?}", e)))?;
            state = guard;
        }
    }

    fn drop_keys(&self, keys: &[String]) -> Result<()> {
        let mut state = self.lock()?;
        for key in keys {
            state.queues.remove(key);
        }
        Ok(())
    }

    fn size(&self, key: &str) -> Result<usize> {
        Ok(self.lock()?.queues.get(key).map(|q| q.len()).unwrap_or(0))
    }

    fn contains(&self, key: &str, needle: &str) -> Result<bool> {
        Ok(self.lock()?
               .queues
               .get(key)
               .map(|q| q.values().any(|v| v.contains(needle)))
               .unwrap_or(false))
    }
}
