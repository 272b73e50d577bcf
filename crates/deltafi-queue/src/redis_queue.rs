// Archivo: redis_queue.rs
// Propósito: `KeyedBlockingQueue` sobre Redis/Valkey. Cada clave es un
// sorted set con score = milisegundos de creación, de modo que el
// elemento más antiguo sale primero (ZPOPMIN/BZPOPMIN).
use crate::errors::{QueueError, Result};
use crate::keyed_queue::KeyedBlockingQueue;
use r2d2::{Pool, PooledConnection};
use std::time::Duration;

const SCAN_COUNT: usize = 1000;

pub struct RedisKeyedQueue {
    pool: Pool<redis::Client>,
}

impl RedisKeyedQueue {
    /// Crea el cliente y su pool. La conexión se establece de forma
    /// perezosa: un backend caído se reporta en la primera operación.
    pub fn new(connection_url: &str, max_connections: u32) -> Result<Self> {
        let client = redis::Client::open(connection_url).map_err(|e| QueueError::Connection(e.to_string()))?;
        let pool = Pool::builder().max_size(max_connections.max(1))
                                  .connection_timeout(Duration::from_secs(2))
                                  .build_unchecked(client);
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<redis::Client>> {
        self.pool.get().map_err(|e| QueueError::Connection(format!("pool: {}", e)))
    }
}

fn map_redis_err(e: redis::RedisError) -> QueueError {
    QueueError::Connection(e.to_string())
}

/// Escapa los metacaracteres de patrón de SCAN.
fn glob_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl KeyedBlockingQueue for RedisKeyedQueue {
    fn put(&self, key: &str, score: i64, value: &str) -> Result<()> {
        let mut conn = self.conn()?;
        redis::cmd("ZADD").arg(key)
                          .arg("NX")
                          .arg(score)
                          .arg(value)
                          .query::<i64>(&mut *conn)
                          .map_err(map_redis_err)?;
        Ok(())
    }

    fn take(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        if timeout.is_zero() {
            let popped: Vec<String> = redis::cmd("ZPOPMIN").arg(key)
                                                           .arg(1)
                                                           .query(&mut *conn)
                                                           .map_err(map_redis_err)?;
            return Ok(popped.into_iter().next());
        }
        let popped: Option<(String, String, String)> = redis::cmd("BZPOPMIN").arg(key)
                                                                             .arg(timeout.as_secs_f64())
                                                                             .query(&mut *conn)
                                                                             .map_err(map_redis_err)?;
        Ok(popped.map(|(_, member, _)| member))
    }

    fn drop_keys(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        redis::cmd("DEL").arg(keys).query::<i64>(&mut *conn).map_err(map_redis_err)?;
        Ok(())
    }

    fn size(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn()?;
        redis::cmd("ZCARD").arg(key).query::<usize>(&mut *conn).map_err(map_redis_err)
    }

    fn contains(&self, key: &str, needle: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let pattern = format!("*{}*", glob_escape(needle));
        let mut cursor: u64 = 0;
        loop {
            let (next, items): (u64, Vec<String>) = redis::cmd("ZSCAN").arg(key)
                                                                       .arg(cursor)
                                                                       .arg("MATCH")
                                                                       .arg(&pattern)
                                                                       .arg("COUNT")
                                                                       .arg(SCAN_COUNT)
                                                                       .query(&mut *conn)
                                                                       .map_err(map_redis_err)?;
            // ZSCAN devuelve pares miembro/score
            if !items.is_empty() {
                return Ok(true);
            }
            if next == 0 {
                return Ok(false);
            }
            cursor = next;
        }
    }
}
