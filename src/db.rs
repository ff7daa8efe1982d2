use diesel::{
    SqliteConnection,
    r2d2::{ConnectionManager, Pool},
    sqlite::Sqlite,
};
use diesel_migrations::MigrationHarness;

use crate::MIGRATIONS;

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

/// Builds a connection pool for the given database URL. In-memory databases
/// get a single connection, as every pooled connection would otherwise see
/// its own (empty) database.
pub fn make_pool(database_url: &str) -> DbPool {
    Pool::builder()
        .max_size(if database_url == ":memory:" { 1 } else { 10 })
        .build(ConnectionManager::<SqliteConnection>::new(database_url))
        .unwrap()
}

pub fn run_migrations(conn: &mut impl MigrationHarness<Sqlite>) {
    conn.run_pending_migrations(MIGRATIONS).unwrap();
}
