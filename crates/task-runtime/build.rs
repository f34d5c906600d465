use std::path::{Path, PathBuf};

use anyhow::Context;
use task_migrate::{EmbedOptions, Migrator};

fn generate_migrations(out_dir: &Path) -> anyhow::Result<()> {
    let migrator = Migrator::from_dir("migrations")?;
    let embed = migrator.embed(&EmbedOptions::default());
    let output = out_dir.join("migrations.rs");
    std::fs::write(&output, &embed)?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    let out_dir = PathBuf::from(std::env::var_os("OUT_DIR").unwrap());

    generate_migrations(&out_dir).context("failed to generate database migrations")?;

    Ok(())
}
