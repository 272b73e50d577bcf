//! Crate `deltafi-queue`: cliente de colas de acciones.
//!
//! - `KeyedBlockingQueue`: primitivas de la cola bloqueante por clave
//!   (put, take con timeout, drop, size, contains).
//! - `InMemoryKeyedQueue` y `RedisKeyedQueue`: backends en memoria y sobre
//!   sorted sets de Redis.
//! - `ActionQueueClient`: capa tipada que serializa `ActionInput` hacia la
//!   cola de cada clase de acción y `ActionEvent` hacia la cola de
//!   resultados `dgs`.
//!
//! Los errores de conexión (`QueueError::Connection`) se distinguen de una
//! cola vacía, que no es error (`take` devuelve `Ok(None)`).
pub mod action_queue;
pub mod errors;
pub mod keyed_queue;
pub mod redis_queue;

pub use action_queue::*;
pub use errors::*;
pub use keyed_queue::*;
pub use redis_queue::*;
