//! Schema migrations for the ledger store.

use task_migrate::Table;

use self::migrations::MIGRATIONS;

mod migrations {
    include!(concat!(env!("OUT_DIR"), "/migrations.rs"));
}

#[doc(inline)]
pub use task_migrate::{DivergingMigrationError, Error, ErrorKind, Options, Target, TransactionMode};

/// A migrator pre-loaded with the ledger store's own migrations.
pub struct Migrator(task_migrate::Migrator);

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Migrator {
    pub const fn new() -> Self {
        Self(MIGRATIONS)
    }

    pub fn latest(&self) -> Target {
        Target::Version(self.latest_version())
    }

    pub fn latest_version(&self) -> u64 {
        self.0.latest().unwrap()
    }

    /// Migrate the database, ignoring whatever migration table is set in
    /// `options` in favor of the store's own bookkeeping table.
    pub async fn migrate(
        &self,
        conn: &mut sqlx::PgConnection,
        options: &Options,
    ) -> Result<(), Error> {
        let mut options = options.clone();
        options.migration_table = Table::plain("schema_migrations");

        self.0.run(conn, &options).await
    }

    pub async fn read_database_version(
        &self,
        conn: &mut sqlx::PgConnection,
    ) -> Result<Option<u64>, Error> {
        let table = Table::plain("schema_migrations");
        self.0.read_database_version(conn, &table).await
    }
}
