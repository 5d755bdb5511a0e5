//! Project initialization: `benos init`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use benos::config::{BENOS_DIR, BenConfig};
use benos::store::BenDb;

pub fn cmd_init(project_dir: &Path, mut config: BenConfig, db_path: Option<PathBuf>) -> Result<()> {
    let benos_dir = project_dir.join(BENOS_DIR);
    let created = !benos_dir.exists();
    std::fs::create_dir_all(&benos_dir)
        .with_context(|| format!("Failed to create directory: {}", benos_dir.display()))?;

    let config_path = BenConfig::path_in(project_dir);
    if let Some(path) = db_path {
        config.server.db_path = path;
    }
    let wrote_config = !config_path.exists();
    if wrote_config {
        config.save(&config_path)?;
    }

    let db_path = config.db_path(project_dir);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    BenDb::new(&db_path)?;
    tracing::info!(db = %db_path.display(), "Database initialized");

    if created {
        println!("Initialized Ben OS at {}", benos_dir.display());
    } else {
        println!("Ben OS already initialized at {}", benos_dir.display());
    }
    if wrote_config {
        println!("  config:   {}", config_path.display());
    }
    println!("  database: {}", db_path.display());
    println!();
    println!("Run `benos serve` to start the API.");
    Ok(())
}
