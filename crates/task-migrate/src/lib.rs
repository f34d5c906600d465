//! A minimal migration framework for use in cases where the person writing a
//! migration is not necessarily the person running the database.
//!
//! It supports:
//! - A configurable table for migration bookkeeping, since applications
//!   embedding this crate don't own the whole database and can't assume any
//!   fixed table name is free.
//! - Running migrations individually in their own transaction, or all as one
//!   big transaction.
//! - Reverting migrations, though this is never done automatically.
//! - Embedding migrations at build time so that consumers don't need to ship
//!   a directory of `.sql` files alongside the binary.
//!
//! # Writing migrations
//! A migration directory contains files named `<version>_<name>.[up|down].sql`.
//! Version numbers don't need to be contiguous. A down migration requires a
//! corresponding up migration with the same name.
//!
//! ```text
//! 01_create_jobs.up.sql
//! 02_add_priority_column.up.sql
//! 02_add_priority_column.down.sql
//! ```
//!
//! # Applying migrations
//! ```
//! # use sqlx::Connection;
//! use task_migrate::{Migrator, Options, Target};
//!
//! # async fn wrap() -> Result<(), Box<dyn std::error::Error>> {
//! let mut conn = sqlx::PgConnection::connect("postgres://example.invalid/db").await?;
//! let migrator = Migrator::from_dir("migrations")?;
//! let options = Options {
//!     target: Target::Latest,
//!     ..Options::default()
//! };
//!
//! migrator.run(&mut conn, &options).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Embedding migrations
//! ```no_run
//! use std::path::PathBuf;
//!
//! use task_migrate::{EmbedOptions, Migrator};
//!
//! fn main() {
//!     let out_dir = PathBuf::from(std::env::var_os("OUT_DIR").unwrap());
//!     let migrations = Migrator::from_dir("migrations").expect("failed to load migrations");
//!     let embed = migrations.embed(&EmbedOptions::default());
//!
//!     std::fs::write(out_dir.join("migrations.rs"), &embed).unwrap();
//! }
//! ```

#![allow(clippy::needless_doctest_main)]

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

macro_rules! used_in_docs {
    ($( $item:ident ),*) => {
        const _: () = {
            #[allow(unused_imports)]
            mod dummy {
                $( use super::$item; )*
            }
        };
    };
}

#[cfg(feature = "migrate")]
mod apply;
mod error;

pub use self::error::{DivergingMigrationError, Error, ErrorKind, MigratorFromDirError};

/// The migration target version to bring the database to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Target {
    /// Migrate to the latest available version, without reverting anything
    /// already applied that this migrator no longer knows about.
    Latest,
    Version(u64),
}

#[non_exhaustive]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TransactionMode {
    /// Run all applied migrations in a single transaction.
    Single,
    /// Run each migration in its own transaction.
    Individual,
}

/// Describes a table in SQL, optionally schema-qualified.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Table {
    pub schema: Option<Cow<'static, str>>,
    pub name: Cow<'static, str>,
}

impl Table {
    pub fn new(schema: impl Into<Cow<'static, str>>, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }

    pub fn plain(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    #[cfg_attr(not(feature = "migrate"), allow(dead_code))]
    fn as_sql(&self) -> String {
        match self.schema.as_deref() {
            Some(schema) => format!("{schema:?}.{:?}", self.name),
            None => format!("{:?}", self.name),
        }
    }
}

/// Options controlling how migrations are run and what they are allowed to do.
#[derive(Debug, Clone)]
pub struct Options {
    pub allow_revert: bool,
    /// Run all changes inside one transaction and roll it back at the end
    /// instead of committing. Forces `transaction_mode` to `Single`.
    pub dry_run: bool,
    /// Prefer the revert script bundled with the current binary over the one
    /// recorded in the database, where both exist.
    pub prefer_local_revert: bool,
    pub target: Target,
    pub transaction_mode: TransactionMode,
    /// Changing this forgets every migration previously recorded as applied.
    pub migration_table: Table,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            allow_revert: false,
            dry_run: false,
            prefer_local_revert: true,
            target: Target::Latest,
            migration_table: Table::plain("schema_migrations"),
            transaction_mode: TransactionMode::Single,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Migration {
    pub version: u64,
    pub name: Cow<'static, str>,
    pub sql: Cow<'static, str>,
    pub revert: Option<Cow<'static, str>>,
}

struct MigrationSource {
    up: PathBuf,
    down: Option<PathBuf>,
}

struct MigratorSources {
    migrations: Vec<MigrationSource>,
    directory: PathBuf,
}

/// A collection of migrations that can be applied to the database.
pub struct Migrator {
    migrations: Cow<'static, [Migration]>,
    sources: Option<Box<MigratorSources>>,
}

impl Migrator {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|migration| migration.version);

        Self {
            migrations: migrations.into(),
            sources: None,
        }
    }

    pub const fn from_static(migrations: &'static [Migration]) -> Self {
        let mut i = 0;
        let mut prev = None;
        while i < migrations.len() {
            let migration = &migrations[i];

            if let Some(prev) = prev {
                if migration.version <= prev {
                    panic!("migrations are not sorted");
                }
            }

            prev = Some(migration.version);
            i += 1;
        }

        Self {
            migrations: Cow::Borrowed(migrations),
            sources: None,
        }
    }

    /// Scan `path` for files matching `<version>_<name>.[up|down].sql`.
    ///
    /// # Errors
    /// Fails on IO errors, on a down migration with no matching up migration,
    /// on two migrations sharing a version with different names, or on a
    /// `.sql` file that doesn't match the naming convention.
    pub fn from_dir<P: AsRef<Path>>(path: P) -> Result<Self, MigratorFromDirError> {
        Self::_from_dir(path.as_ref())
    }

    fn _from_dir(path: &Path) -> Result<Self, MigratorFromDirError> {
        use crate::error::MigratorFromDirErrorData as Error;

        struct MigrationEntry {
            version: u64,
            name: String,
            path: PathBuf,
        }

        let mut up: BTreeMap<u64, MigrationEntry> = BTreeMap::new();
        let mut down: BTreeMap<u64, MigrationEntry> = BTreeMap::new();

        for entry in std::fs::read_dir(path).map_err(|error| Error::DirectoryIo {
            path: path.to_path_buf(),
            error,
        })? {
            let entry = entry.map_err(|error| Error::DirectoryIo {
                path: path.to_path_buf(),
                error,
            })?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                return Err(Error::NonUtf8Filename(file_name).into());
            };

            let Some((stem, ext)) = file_name.split_once(".") else {
                continue;
            };

            let is_up = match ext {
                "up.sql" => true,
                "down.sql" => false,
                _ if ext == "sql" || ext.ends_with(".sql") => {
                    return Err(Error::InvalidMigrationExt(file_name.into()).into())
                }
                _ => continue,
            };

            let Some((version, name)) = stem.split_once("_") else {
                return Err(Error::InvalidMigrationFilename {
                    filename: file_name.into(),
                    reason: "missing `_` separator between the version number and migration name",
                }
                .into());
            };

            let version: u64 = version
                .parse()
                .map_err(|_| Error::InvalidMigrationFilename {
                    filename: file_name.into(),
                    reason: "version number could not be parsed",
                })?;

            if version > i64::MAX as u64 {
                return Err(Error::InvalidMigrationVersion(file_name.into()).into());
            }

            let name = name.replace('_', " ");
            let entry = MigrationEntry {
                version,
                name,
                path: entry.path(),
            };

            let map = if is_up { &mut up } else { &mut down };
            if let Some(prev) = map.get(&entry.version) {
                return Err(Error::DuplicateMigrationVersion {
                    version: entry.version,
                    entry1: prev.path.clone(),
                    entry2: entry.path.clone(),
                }
                .into());
            }

            map.insert(entry.version, entry);
        }

        for (&version, down) in down.iter() {
            let Some(up) = up.get(&version) else {
                return Err(Error::MissingUpMigration { version }.into());
            };

            if up.name != down.name {
                return Err(Error::DuplicateMigrationVersion {
                    version,
                    entry1: up.path.clone(),
                    entry2: down.path.clone(),
                }
                .into());
            }
        }

        let mut migrations = Vec::new();
        let mut sources = Vec::new();
        for (version, up) in up.into_iter() {
            let sql = std::fs::read_to_string(&up.path).map_err(|e| Error::FileIo {
                path: up.path.clone(),
                error: e,
            })?;

            let (revert, down) = match down.get(&version) {
                Some(down) => {
                    let sql = std::fs::read_to_string(&down.path).map_err(|e| Error::FileIo {
                        path: down.path.clone(),
                        error: e,
                    })?;

                    (Some(sql), Some(down.path.clone()))
                }
                None => (None, None),
            };

            migrations.push(Migration {
                version,
                name: Cow::Owned(up.name.clone()),
                sql: Cow::Owned(sql),
                revert: revert.map(Cow::Owned),
            });

            sources.push(MigrationSource { up: up.path, down });
        }

        Ok(Self {
            migrations: migrations.into(),
            sources: Some(Box::new(MigratorSources {
                migrations: sources,
                directory: path.to_owned(),
            })),
        })
    }

    pub fn latest(&self) -> Option<u64> {
        self.migrations.last().map(|migration| migration.version)
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }
}

/// Options controlling the output of [`Migrator::embed`].
#[derive(Clone, Debug)]
pub struct EmbedOptions {
    /// Name of the generated rust constant. Defaults to `MIGRATIONS`.
    pub name: Cow<'static, str>,
    /// Whether to embed file contents via `include_str!` rather than inline.
    pub use_includes: bool,
    /// Emit `cargo:rerun-if-changed` directives.
    pub print_cargo_directives: bool,
    /// Path this crate can be accessed from in the generated code. Defaults
    /// to `::task_migrate`.
    pub crate_path: Cow<'static, str>,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            name: "MIGRATIONS".into(),
            use_includes: true,
            print_cargo_directives: true,
            crate_path: "::task_migrate".into(),
        }
    }
}

impl Migrator {
    /// Generate source for a constant embedding every migration known to
    /// this migrator. Meant to be called from a build script.
    pub fn embed(&self, options: &EmbedOptions) -> String {
        use std::fmt::Write;

        let mut content = String::new();
        let sources = self.sources.as_deref();

        let include_path = |path: &Path| {
            format!(
                r#"include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/", {:?}))"#,
                path.display().to_string()
            )
        };

        write!(
            content,
            "\
pub const {name}: {path}::Migrator = {path}::Migrator::from_static({{
    use ::std::borrow::Cow;

    &[
",
            name = options.name,
            path = options.crate_path
        )
        .unwrap();

        for (idx, migration) in self.migrations.iter().enumerate() {
            let source = sources.and_then(|sources| sources.migrations.get(idx));

            let up = source
                .filter(|_| options.use_includes)
                .map(|source| include_path(&source.up))
                .unwrap_or_else(|| format!("{:?}", migration.sql));
            let down = match migration.revert.as_deref() {
                Some(revert) => {
                    let down = source
                        .filter(|_| options.use_includes)
                        .and_then(|source| source.down.as_deref())
                        .map(include_path)
                        .unwrap_or_else(|| format!("{:?}", revert));

                    format!("Some(Cow::Borrowed({down}))")
                }
                None => "None".into(),
            };

            write!(
                content,
                "       {path}::Migration {{
            version: {version},
            name: Cow::Borrowed({name:?}),
            sql: Cow::Borrowed({up}),
            revert: {down},
        }},
",
                path = options.crate_path,
                version = migration.version,
                name = migration.name,
            )
            .unwrap();

            if !options.use_includes && options.print_cargo_directives {
                if let Some(source) = source {
                    println!("cargo:rerun-if-changed={}", source.up.display());

                    if let Some(down) = source.down.as_deref() {
                        println!("cargo:rerun-if-changed={}", down.display());
                    }
                }
            }
        }

        write!(
            content,
            "    ]
}});
"
        )
        .unwrap();

        if options.print_cargo_directives {
            if let Some(sources) = &self.sources {
                println!("cargo:rerun-if-changed={}", sources.directory.display());
            }
        }

        content
    }
}
