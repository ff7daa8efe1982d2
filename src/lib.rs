use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub mod competitions;
pub mod db;
pub mod schema;

#[cfg(test)]
pub mod test;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
