use crate::config::DbConfig;
use crate::error::{is_retryable, PersistenceError, TxError};
use crate::schema;
use crate::schema::public_steps::dsl as groups_dsl;
use crate::schema::public_steps_steps::dsl as links_dsl;
use crate::schema::steps::dsl as st;
use crate::schema::steps_elements::dsl as elements_dsl;
use diesel::connection::SimpleConnection;
use diesel::dsl::{max, sql};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::Error as DieselError;
use diesel::sql_types::BigInt;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::{debug, warn};
use std::sync::Arc;
use steps::stubs::StoreCounts;
use steps::{ElementId, GroupId, NewPublicStepGroup, NewStep, ProjectId, PublicStepGroup, Result, Step, StepError,
            StepId, StepRepository, StepUnitOfWork, PUBLIC_STEP_TYPE};
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");
type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;
/// PRAGMAs por conexión: espera ante bloqueo y claves foráneas activas.
#[derive(Debug)]
struct SqlitePragmas;
impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
    conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA foreign_keys = ON;")
        .map_err(diesel::r2d2::Error::QueryError)
  }
}
/// Repo Diesel (SQLite) que implementa `StepRepository`.
///
/// Las escrituras usan `BEGIN IMMEDIATE`: dos duplicaciones concurrentes no
/// pueden calcular el mismo bloque de `sort` porque la segunda espera al
/// cierre de la primera.
pub struct DieselStepRepository {
  pool: Arc<DbPool>,
}
impl DieselStepRepository {
  pub fn new(database_url: &str) -> std::result::Result<Self, PersistenceError> {
    Self::from_config(&DbConfig::with_url(database_url))
  }
  pub fn from_config(cfg: &DbConfig) -> std::result::Result<Self, PersistenceError> {
    let manager = ConnectionManager::<SqliteConnection>::new(cfg.url.as_str());
    let pool = Pool::builder().max_size(cfg.max_connections.max(1))
                              .connection_customizer(Box::new(SqlitePragmas))
                              .build(manager)
                              .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    let repo = DieselStepRepository { pool: Arc::new(pool) };
    {
      let mut c = repo.conn()?;
      c.batch_execute("PRAGMA journal_mode = WAL;")?;
      c.run_pending_migrations(MIGRATIONS)
       .map_err(|e| PersistenceError::Migration(e.to_string()))?;
    }
    debug!("repositorio SQLite listo en {}", cfg.url);
    Ok(repo)
  }
  /// Carga `.env` y construye el repositorio desde `STEPS_DB_URL` /
  /// `DATABASE_URL`.
  pub fn new_from_env() -> std::result::Result<Self, PersistenceError> {
    Self::from_config(&DbConfig::from_env())
  }
  // Sólo la obtención de la conexión se reintenta; la unidad de trabajo no.
  fn conn(&self) -> std::result::Result<DbConn, PersistenceError> {
    with_retry(|| self.pool.get().map_err(PersistenceError::from))
  }
  /// Conteo de filas por tabla (diagnóstico).
  pub fn table_counts(&self) -> Result<StoreCounts> {
    let mut conn = self.conn()?;
    let c: &mut SqliteConnection = &mut conn;
    let count = |n: QueryResult<i64>| map_db_err(n).map(|n| n as usize);
    Ok(StoreCounts { groups: count(groups_dsl::public_steps.count().get_result(c))?,
                     steps: count(st::steps.count().get_result(c))?,
                     group_links: count(links_dsl::public_steps_steps.count().get_result(c))?,
                     element_links: count(elements_dsl::steps_elements.count().get_result(c))? })
  }
}
/// Reintenta operaciones con errores transitorios (pool agotado, base
/// bloqueada). Backoff: 15ms, 30ms, 45ms.
fn with_retry<F, T>(mut f: F) -> std::result::Result<T, PersistenceError>
  where F: FnMut() -> std::result::Result<T, PersistenceError>
{
  let mut attempts = 0;
  loop {
    match f() {
      Err(e) if is_retryable(&e) && attempts < 3 => {
        let delay_ms = 15 * ((attempts + 1) as u64);
        warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
        std::thread::sleep(std::time::Duration::from_millis(delay_ms));
        attempts += 1;
      }
      r => return r,
    }
  }
}
impl StepRepository for DieselStepRepository {
  fn transaction<T, F>(&self, f: F) -> Result<T>
    where F: FnOnce(&mut dyn StepUnitOfWork) -> Result<T>
  {
    let mut conn = self.conn()?;
    let c: &mut SqliteConnection = &mut conn;
    c.immediate_transaction::<T, TxError, _>(|tx| {
       let mut uow = DieselUnitOfWork { conn: tx };
       f(&mut uow).map_err(TxError::Step)
     })
     .map_err(StepError::from)
  }
  fn read<T, F>(&self, f: F) -> Result<T>
    where F: FnOnce(&mut dyn StepUnitOfWork) -> Result<T>
  {
    let mut conn = self.conn()?;
    let c: &mut SqliteConnection = &mut conn;
    c.transaction::<T, TxError, _>(|tx| {
       let mut uow = DieselUnitOfWork { conn: tx };
       f(&mut uow).map_err(TxError::Step)
     })
     .map_err(StepError::from)
  }
}
// Diesel row structs
#[derive(Debug, Queryable)]
struct GroupRow {
  pub id: i64,
  pub name: String,
  pub project_id: i64,
  pub platform: i32,
}
#[derive(Debug, Insertable)]
#[diesel(table_name = schema::public_steps)]
struct NewGroupRow<'a> {
  pub name: &'a str,
  pub project_id: i64,
  pub platform: i32,
}
#[derive(Debug, Queryable)]
struct StepRow {
  pub id: i64,
  pub parent_id: i64,
  pub case_id: i64,
  pub sort: i64,
  pub platform: i32,
  pub step_type: String,
  pub text: String,
  pub content: String,
  pub error: i32,
  pub condition_type: i32,
  pub disabled: i32,
}
#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = schema::steps)]
struct StepValues<'a> {
  pub parent_id: i64,
  pub case_id: i64,
  pub sort: i64,
  pub platform: i32,
  pub step_type: &'a str,
  pub text: &'a str,
  pub content: &'a str,
  pub error: i32,
  pub condition_type: i32,
  pub disabled: i32,
}
impl From<GroupRow> for PublicStepGroup {
  fn from(r: GroupRow) -> Self {
    PublicStepGroup { id: r.id,
                      name: r.name,
                      project_id: r.project_id,
                      platform: r.platform }
  }
}
impl From<StepRow> for Step {
  fn from(r: StepRow) -> Self {
    Step { id: r.id,
           parent_id: r.parent_id,
           case_id: r.case_id,
           sort: r.sort,
           platform: r.platform,
           step_type: r.step_type,
           text: r.text,
           content: r.content,
           error: r.error,
           condition_type: r.condition_type,
           disabled: r.disabled }
  }
}
impl<'a> From<&'a NewStep> for StepValues<'a> {
  fn from(s: &'a NewStep) -> Self {
    StepValues { parent_id: s.parent_id,
                 case_id: s.case_id,
                 sort: s.sort,
                 platform: s.platform,
                 step_type: &s.step_type,
                 text: &s.text,
                 content: &s.content,
                 error: s.error,
                 condition_type: s.condition_type,
                 disabled: s.disabled }
  }
}
impl<'a> From<&'a Step> for StepValues<'a> {
  fn from(s: &'a Step) -> Self {
    StepValues { parent_id: s.parent_id,
                 case_id: s.case_id,
                 sort: s.sort,
                 platform: s.platform,
                 step_type: &s.step_type,
                 text: &s.text,
                 content: &s.content,
                 error: s.error,
                 condition_type: s.condition_type,
                 disabled: s.disabled }
  }
}
fn map_db_err<T>(res: std::result::Result<T, DieselError>) -> Result<T> {
  res.map_err(|e| PersistenceError::from(e).into())
}
fn last_insert_id(conn: &mut SqliteConnection) -> Result<i64> {
  map_db_err(diesel::select(sql::<BigInt>("last_insert_rowid()")).get_result::<i64>(conn))
}
/// Unidad de trabajo sobre una conexión dentro de una transacción abierta.
struct DieselUnitOfWork<'a> {
  conn: &'a mut SqliteConnection,
}
impl StepUnitOfWork for DieselUnitOfWork<'_> {
  fn get_group(&mut self, id: GroupId) -> Result<Option<PublicStepGroup>> {
    let row = map_db_err(groups_dsl::public_steps.find(id).first::<GroupRow>(self.conn).optional())?;
    Ok(row.map(PublicStepGroup::from))
  }
  fn insert_group(&mut self, group: &NewPublicStepGroup) -> Result<GroupId> {
    let row = NewGroupRow { name: &group.name,
                            project_id: group.project_id,
                            platform: group.platform };
    map_db_err(diesel::insert_into(groups_dsl::public_steps).values(&row).execute(self.conn))?;
    last_insert_id(self.conn)
  }
  fn update_group(&mut self, group: &PublicStepGroup) -> Result<bool> {
    let n = map_db_err(diesel::update(groups_dsl::public_steps.find(group.id))
                         .set((groups_dsl::name.eq(&group.name),
                               groups_dsl::project_id.eq(group.project_id),
                               groups_dsl::platform.eq(group.platform)))
                         .execute(self.conn))?;
    Ok(n > 0)
  }
  fn delete_group_record(&mut self, id: GroupId) -> Result<bool> {
    let n = map_db_err(diesel::delete(groups_dsl::public_steps.find(id)).execute(self.conn))?;
    Ok(n > 0)
  }
  fn list_groups_by_project(&mut self, project_id: ProjectId) -> Result<Vec<PublicStepGroup>> {
    let rows = map_db_err(groups_dsl::public_steps.filter(groups_dsl::project_id.eq(project_id))
                                                  .order(groups_dsl::id.desc())
                                                  .load::<GroupRow>(self.conn))?;
    Ok(rows.into_iter().map(PublicStepGroup::from).collect())
  }
  fn get_step(&mut self, id: StepId) -> Result<Option<Step>> {
    let row = map_db_err(st::steps.find(id).first::<StepRow>(self.conn).optional())?;
    Ok(row.map(Step::from))
  }
  fn insert_step(&mut self, step: &NewStep) -> Result<StepId> {
    map_db_err(diesel::insert_into(st::steps).values(&StepValues::from(step)).execute(self.conn))?;
    last_insert_id(self.conn)
  }
  fn update_step(&mut self, step: &Step) -> Result<bool> {
    let n = map_db_err(diesel::update(st::steps.find(step.id)).set(&StepValues::from(step))
                                                              .execute(self.conn))?;
    Ok(n > 0)
  }
  fn delete_step(&mut self, id: StepId) -> Result<bool> {
    let n = map_db_err(diesel::delete(st::steps.find(id)).execute(self.conn))?;
    Ok(n > 0)
  }
  fn list_steps_by_sort_desc(&mut self) -> Result<Vec<Step>> {
    let rows = map_db_err(st::steps.order((st::sort.desc(), st::id.desc())).load::<StepRow>(self.conn))?;
    Ok(rows.into_iter().map(Step::from).collect())
  }
  fn list_children(&mut self, parent_id: StepId) -> Result<Vec<Step>> {
    let rows = map_db_err(st::steps.filter(st::parent_id.eq(parent_id))
                                   .order((st::sort.asc(), st::id.asc()))
                                   .load::<StepRow>(self.conn))?;
    Ok(rows.into_iter().map(Step::from).collect())
  }
  fn list_steps_referencing_group(&mut self, group_id: GroupId) -> Result<Vec<StepId>> {
    map_db_err(st::steps.filter(st::step_type.eq(PUBLIC_STEP_TYPE))
                        .filter(st::text.eq(group_id.to_string()))
                        .order(st::id.asc())
                        .select(st::id)
                        .load::<i64>(self.conn))
  }
  fn list_group_step_ids(&mut self, group_id: GroupId) -> Result<Vec<StepId>> {
    map_db_err(links_dsl::public_steps_steps.filter(links_dsl::public_steps_id.eq(group_id))
                                            .order(links_dsl::id.asc())
                                            .select(links_dsl::steps_id)
                                            .load::<i64>(self.conn))
  }
  fn insert_group_link(&mut self, group_id: GroupId, step_id: StepId) -> Result<()> {
    map_db_err(diesel::insert_into(links_dsl::public_steps_steps).values((links_dsl::public_steps_id.eq(group_id),
                                                                          links_dsl::steps_id.eq(step_id)))
                                                                 .execute(self.conn))?;
    Ok(())
  }
  fn list_groups_for_step(&mut self, step_id: StepId) -> Result<Vec<GroupId>> {
    map_db_err(links_dsl::public_steps_steps.filter(links_dsl::steps_id.eq(step_id))
                                            .select(links_dsl::public_steps_id)
                                            .distinct()
                                            .order(links_dsl::public_steps_id.asc())
                                            .load::<i64>(self.conn))
  }
  fn delete_group_links(&mut self, group_id: GroupId) -> Result<usize> {
    map_db_err(diesel::delete(links_dsl::public_steps_steps.filter(links_dsl::public_steps_id.eq(group_id)))
                 .execute(self.conn))
  }
  fn list_step_elements(&mut self, step_id: StepId) -> Result<Vec<ElementId>> {
    map_db_err(elements_dsl::steps_elements.filter(elements_dsl::steps_id.eq(step_id))
                                           .order(elements_dsl::id.asc())
                                           .select(elements_dsl::elements_id)
                                           .load::<i64>(self.conn))
  }
  fn insert_element_link(&mut self, step_id: StepId, element_id: ElementId) -> Result<()> {
    map_db_err(diesel::insert_into(elements_dsl::steps_elements).values((elements_dsl::steps_id.eq(step_id),
                                                                         elements_dsl::elements_id.eq(element_id)))
                                                                .execute(self.conn))?;
    Ok(())
  }
  fn delete_step_elements(&mut self, step_id: StepId) -> Result<usize> {
    map_db_err(diesel::delete(elements_dsl::steps_elements.filter(elements_dsl::steps_id.eq(step_id)))
                 .execute(self.conn))
  }
  // MAX(sort) directo en lugar de cargar todos los pasos.
  fn next_sort_block(&mut self, count: usize) -> Result<i64> {
    let top = map_db_err(st::steps.select(max(st::sort)).get_result::<Option<i64>>(self.conn))?;
    let first = top.unwrap_or(0) + 1;
    debug!("next_sort_block count={count} range={first}..{}", first + count as i64);
    Ok(first)
  }
}
#[cfg(test)]
mod tests {
  use super::*;
  use uuid::Uuid;
  fn temp_repo() -> (DieselStepRepository, std::path::PathBuf) {
    let path = std::env::temp_dir().join(format!("steps_unit_{}.db", Uuid::new_v4()));
    let repo = DieselStepRepository::new(path.to_str().unwrap()).expect("repo");
    (repo, path)
  }
  #[test]
  fn ids_come_from_the_store_and_rollback_discards_rows() {
    let (repo, path) = temp_repo();
    let id = repo.transaction(|uow| uow.insert_group(&NewPublicStepGroup { name: "g".into(),
                                                                           project_id: 1,
                                                                           platform: 1 }))
                 .unwrap();
    assert_eq!(id, 1);
    let res: Result<()> = repo.transaction(|uow| {
                                uow.insert_step(&NewStep { sort: 5, ..Default::default() })?;
                                Err(StepError::Storage("boom".into()))
                              });
    assert!(res.is_err());
    assert_eq!(repo.table_counts().unwrap().steps, 0);
    assert_eq!(repo.read(|uow| uow.next_sort_block(3)).unwrap(), 1);
    let _ = std::fs::remove_file(path);
  }
  #[test]
  fn next_sort_block_starts_after_the_maximum() {
    let (repo, path) = temp_repo();
    repo.transaction(|uow| {
          uow.insert_step(&NewStep { sort: 40, ..Default::default() })?;
          uow.insert_step(&NewStep { sort: 7, ..Default::default() })
        })
        .unwrap();
    assert_eq!(repo.read(|uow| uow.next_sort_block(2)).unwrap(), 41);
    let _ = std::fs::remove_file(path);
  }
}
