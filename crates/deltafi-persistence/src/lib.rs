//! Persistencia Diesel para el trait `DeltaFileRepository`.
//! Este archivo expone el módulo `schema` y reexporta el repositorio Diesel.
//! La implementación está en `delta_file_persistence.rs`; las migraciones se
//! embeben en el binario y se aplican al construir el repositorio.

mod delta_file_persistence;
pub mod schema;

pub use delta_file_persistence::{new_from_env, DieselDeltaFileRepository, MIGRATIONS};

/// Indica si el crate se compiló contra Postgres (feature `pg`) en lugar
/// de SQLite.
pub fn uses_postgres() -> bool {
  cfg!(feature = "pg")
}
