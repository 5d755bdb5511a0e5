//! HTTP server command: `benos serve`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use benos::ai::build_extractor;
use benos::config::BenConfig;
use benos::server::{ServerConfig, start_server};

/// Flags that override the loaded configuration.
#[derive(Debug, Default)]
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub db_path: Option<PathBuf>,
    pub dev: bool,
    pub open: bool,
}

pub fn server_config(project_dir: &Path, config: &BenConfig, overrides: ServeOverrides) -> ServerConfig {
    let db_path = match overrides.db_path {
        Some(path) if path.is_absolute() => path,
        Some(path) => project_dir.join(path),
        None => config.db_path(project_dir),
    };
    ServerConfig {
        host: overrides.host.unwrap_or_else(|| config.server.host.clone()),
        port: overrides.port.unwrap_or(config.server.port),
        db_path,
        dev_mode: overrides.dev,
        cors_origins: config.server.cors_origins.clone(),
        rate_limit: config.rate_limit.clone(),
        // No browser inside dev containers.
        open_browser: overrides.open && !overrides.dev,
    }
}

pub async fn cmd_serve(project_dir: &Path, config: BenConfig, overrides: ServeOverrides) -> Result<()> {
    let server = server_config(project_dir, &config, overrides);
    if let Some(parent) = server.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let extractor = build_extractor(&config.ai, |key| std::env::var(key).ok())?;
    start_server(server, extractor).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let mut config = BenConfig::default();
        config.server.port = 9000;
        let dir = Path::new("/srv/ben");

        let server = server_config(dir, &config, ServeOverrides::default());
        assert_eq!(server.port, 9000);
        assert_eq!(server.db_path, PathBuf::from("/srv/ben/.benos/benos.db"));

        let server = server_config(
            dir,
            &config,
            ServeOverrides {
                port: Some(8123),
                db_path: Some(PathBuf::from("data/ben.db")),
                dev: true,
                open: true,
                ..Default::default()
            },
        );
        assert_eq!(server.port, 8123);
        assert_eq!(server.db_path, PathBuf::from("/srv/ben/data/ben.db"));
        assert!(server.dev_mode);
        assert!(!server.open_browser);
    }
}
