use crate::schema::delta_files;
use crate::schema::delta_files::dsl;
use chrono::{DateTime, Utc};
use deltafi_domain::{DeltaFile, DeltaFileCriteria, DeltaFileRepository, DomainError, PersistResult};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;
use uuid::Uuid;
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");
#[cfg(feature = "pg")]
type DbConn = PgConnection;
#[cfg(not(feature = "pg"))]
type DbConn = SqliteConnection;
type DbPool = Pool<ConnectionManager<DbConn>>;
/// Aplica `busy_timeout` a cada conexión SQLite del pool; sin esto los
/// escritores concurrentes fallan con SQLITE_BUSY en lugar de esperar.
#[cfg(not(feature = "pg"))]
#[derive(Debug)]
struct SqlitePragmas;
#[cfg(not(feature = "pg"))]
impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
    diesel::sql_query("PRAGMA busy_timeout = 5000;").execute(conn).map_err(diesel::r2d2::Error::QueryError)?;
    Ok(())
  }
}
/// Repo Diesel que implementa `DeltaFileRepository`.
///
/// Cada DeltaFile se guarda como documento JSON junto a las columnas que
/// usan las consultas (etapa, flujo, tiempos, bytes). La columna `version`
/// implementa el control optimista: `save` sólo actualiza la fila si la
/// versión coincide con la esperada.
pub struct DieselDeltaFileRepository {
  pool: Arc<DbPool>,
}
impl DieselDeltaFileRepository {
  pub fn new(database_url: &str) -> Result<Self, DomainError> {
    let manager = ConnectionManager::<DbConn>::new(database_url);
    let builder = Pool::builder().max_size(4);
    #[cfg(not(feature = "pg"))]
    let builder = builder.connection_customizer(Box::new(SqlitePragmas));
    let pool = builder.build(manager)
                      .map_err(|e| DomainError::ExternalError(format!("no se pudo crear el pool de conexiones: {}", e)))?;
    let repo = DieselDeltaFileRepository { pool: Arc::new(pool) };
    let mut c = repo.conn()?;
    #[cfg(not(feature = "pg"))]
    {
      let _ = diesel::sql_query("PRAGMA journal_mode = WAL;").execute(&mut c);
    }
    c.run_pending_migrations(MIGRATIONS)
     .map_err(|e| DomainError::ExternalError(format!("migraciones: {}", e)))?;
    Ok(repo)
  }
  fn conn(&self) -> Result<PooledConnection<ConnectionManager<DbConn>>, DomainError> {
    self.pool.get().map_err(|e| DomainError::ExternalError(format!("pool: {}", e)))
  }
}
#[derive(Debug, Queryable, Insertable)]
#[diesel(table_name = delta_files)]
struct DeltaFileRow {
  pub did: String,
  pub name: String,
  pub data_source: String,
  pub stage: String,
  pub created_ts: i64,
  pub modified_ts: i64,
  pub active_modified_ts: Option<i64>,
  pub terminal_ts: Option<i64>,
  pub content_deleted_ts: Option<i64>,
  pub content_purged: bool,
  pub error_acknowledged_ts: Option<i64>,
  pub total_bytes: i64,
  pub version: i64,
  pub document: String,
}
fn millis(t: DateTime<Utc>) -> i64 {
  t.timestamp_millis()
}
fn to_row(df: &DeltaFile, version: i64) -> Result<DeltaFileRow, DomainError> {
  let mut doc = df.clone();
  doc.version = version;
  Ok(DeltaFileRow { did: df.did.to_string(),
                    name: df.name.clone(),
                    data_source: df.data_source.clone(),
                    stage: df.stage.as_str().to_string(),
                    created_ts: millis(df.created),
                    modified_ts: millis(df.modified),
                    active_modified_ts: df.oldest_active_modified().map(millis),
                    terminal_ts: df.terminal_at.map(millis),
                    content_deleted_ts: df.content_deleted.map(millis),
                    content_purged: df.content_purged,
                    error_acknowledged_ts: df.error_acknowledged.map(millis),
                    total_bytes: i64::try_from(df.total_bytes).unwrap_or(i64::MAX),
                    version,
                    document: serde_json::to_string(&doc)? })
}
fn from_row(row: DeltaFileRow) -> Result<DeltaFile, DomainError> {
  let mut df: DeltaFile = serde_json::from_str(&row.document)?;
  // la columna es la fuente de verdad de la versión
  df.version = row.version;
  Ok(df)
}
fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T, DomainError> {
  res.map_err(|e| DomainError::ExternalError(format!("db: {}", e)))
}
impl DeltaFileRepository for DieselDeltaFileRepository {
  fn find(&self, did: &Uuid) -> Result<Option<DeltaFile>, DomainError> {
    let mut conn = self.conn()?;
    let row = map_db_err(dsl::delta_files.filter(dsl::did.eq(did.to_string()))
                                         .first::<DeltaFileRow>(&mut conn)
                                         .optional())?;
    row.map(from_row).transpose()
  }
  fn insert(&self, delta_file: &DeltaFile) -> Result<i64, DomainError> {
    let mut conn = self.conn()?;
    let row = to_row(delta_file, 0)?;
    match diesel::insert_into(dsl::delta_files).values(&row).execute(&mut conn) {
      Ok(_) => Ok(0),
      Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
        Err(DomainError::ValidationError(format!("el DeltaFile {} ya existe", delta_file.did)))
      }
      Err(e) => Err(DomainError::ExternalError(format!("db: {}", e))),
    }
  }
  fn save(&self, delta_file: &DeltaFile, expected_version: i64) -> Result<PersistResult, DomainError> {
    let mut conn = self.conn()?;
    let new_version = expected_version.saturating_add(1);
    let row = to_row(delta_file, new_version)?;
    let updated = map_db_err(diesel::update(dsl::delta_files.filter(dsl::did.eq(&row.did))
                                                            .filter(dsl::version.eq(expected_version)))
                             .set((dsl::name.eq(&row.name),
                                   dsl::data_source.eq(&row.data_source),
                                   dsl::stage.eq(&row.stage),
                                   dsl::modified_ts.eq(row.modified_ts),
                                   dsl::active_modified_ts.eq(row.active_modified_ts),
                                   dsl::terminal_ts.eq(row.terminal_ts),
                                   dsl::content_deleted_ts.eq(row.content_deleted_ts),
                                   dsl::content_purged.eq(row.content_purged),
                                   dsl::error_acknowledged_ts.eq(row.error_acknowledged_ts),
                                   dsl::total_bytes.eq(row.total_bytes),
                                   dsl::version.eq(new_version),
                                   dsl::document.eq(&row.document)))
                             .execute(&mut conn))?;
    if updated == 1 {
      return Ok(PersistResult::Ok { new_version });
    }
    // 0 filas: o la versión cambió (conflicto) o el DeltaFile no existe
    let exists = map_db_err(dsl::delta_files.filter(dsl::did.eq(&row.did))
                                            .count()
                                            .get_result::<i64>(&mut conn))?;
    if exists == 0 {
      return Err(DomainError::ValidationError(format!("el DeltaFile {} no existe", delta_file.did)));
    }
    log::debug!("conflicto de versión al guardar {} (esperada {})", delta_file.did, expected_version);
    Ok(PersistResult::Conflict)
  }
  fn query(&self, criteria: &DeltaFileCriteria) -> Result<Vec<DeltaFile>, DomainError> {
    let mut conn = self.conn()?;
    let mut q = dsl::delta_files.into_boxed();
    if !criteria.stages.is_empty() {
      let stages: Vec<String> = criteria.stages.iter().map(|s| s.as_str().to_string()).collect();
      q = q.filter(dsl::stage.eq_any(stages));
    }
    if let Some(ds) = &criteria.data_source {
      q = q.filter(dsl::data_source.eq(ds.clone()));
    }
    if let Some(t) = criteria.created_after {
      q = q.filter(dsl::created_ts.gt(millis(t)));
    }
    if let Some(t) = criteria.created_before {
      q = q.filter(dsl::created_ts.lt(millis(t)));
    }
    if let Some(t) = criteria.modified_before {
      q = q.filter(dsl::modified_ts.lt(millis(t)));
    }
    if let Some(t) = criteria.active_modified_before {
      q = q.filter(dsl::active_modified_ts.lt(millis(t)));
    }
    if let Some(t) = criteria.terminal_before {
      q = q.filter(dsl::terminal_ts.lt(millis(t)));
    }
    match criteria.content_deleted {
      Some(true) => q = q.filter(dsl::content_deleted_ts.is_not_null()),
      Some(false) => q = q.filter(dsl::content_deleted_ts.is_null()),
      None => {}
    }
    if let Some(p) = criteria.content_purged {
      q = q.filter(dsl::content_purged.eq(p));
    }
    match criteria.error_acknowledged {
      Some(true) => q = q.filter(dsl::error_acknowledged_ts.is_not_null()),
      Some(false) => q = q.filter(dsl::error_acknowledged_ts.is_null()),
      None => {}
    }
    if let Some(m) = criteria.min_bytes {
      q = q.filter(dsl::total_bytes.ge(i64::try_from(m).unwrap_or(i64::MAX)));
    }
    q = q.order(dsl::modified_ts.asc());
    if let Some(limit) = criteria.limit {
      q = q.limit(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    let rows = map_db_err(q.load::<DeltaFileRow>(&mut conn))?;
    rows.into_iter().map(from_row).collect()
  }
  fn delete(&self, did: &Uuid) -> Result<bool, DomainError> {
    let mut conn = self.conn()?;
    let n = map_db_err(diesel::delete(dsl::delta_files.filter(dsl::did.eq(did.to_string()))).execute(&mut conn))?;
    Ok(n > 0)
  }
  fn count(&self) -> Result<usize, DomainError> {
    let mut conn = self.conn()?;
    let n = map_db_err(dsl::delta_files.count().get_result::<i64>(&mut conn))?;
    Ok(usize::try_from(n).unwrap_or(0))
  }
}
/// Construye el repositorio a partir de `DELTAFI_DB_URL` (o `DATABASE_URL`)
/// tras cargar `.env`.
///
/// - Con el feature `pg` la URL es obligatoria y debe apuntar a Postgres.
/// - Sin `pg` se usa SQLite; si no hay URL, una base en memoria compartida.
pub fn new_from_env() -> Result<DieselDeltaFileRepository, DomainError> {
  dotenvy::dotenv().ok();
  let url = std::env::var("DELTAFI_DB_URL").or_else(|_| std::env::var("DATABASE_URL"));
  if cfg!(feature = "pg") {
    let url = url.map_err(|_| DomainError::ExternalError("DELTAFI_DB_URL / DATABASE_URL not set".into()))?;
    let l = url.to_lowercase();
    if !(l.starts_with("postgres") || url.contains('@')) {
      return Err(DomainError::ExternalError("DELTAFI_DB_URL / DATABASE_URL does not look like Postgres URL".into()));
    }
    DieselDeltaFileRepository::new(&url)
  } else {
    let url = url.unwrap_or_else(|_| "file:deltafi?mode=memory&cache=shared".into());
    DieselDeltaFileRepository::new(&url)
  }
}
