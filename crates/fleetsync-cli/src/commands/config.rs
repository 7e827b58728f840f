//! Config command - inspect and create the configuration file.

use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::cli::ConfigAction;
use crate::config::Config;

pub fn cmd_config(action: ConfigAction, path: &Path, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            print!("{}", render(config)?);
        }
        ConfigAction::Init { force } => {
            init(path, force)?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}

/// The configuration as TOML, with the token masked.
fn render(config: &Config) -> Result<String> {
    let mut shown = config.clone();
    if shown.cloud.api_token.is_some() {
        shown.cloud.api_token = Some("********".to_string());
    }
    toml::to_string_pretty(&shown).context("Failed to serialize config")
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }
    Config::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleetsync").join("config.toml");

        init(&path, false).unwrap();
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync]\nqueue_capacity = 7\n").unwrap();

        assert!(init(&path, false).is_err());
        assert_eq!(Config::load(&path).unwrap().sync.queue_capacity, 7);

        init(&path, true).unwrap();
        assert_eq!(Config::load(&path).unwrap().sync.queue_capacity, 3);
    }

    #[test]
    fn test_show_masks_token() {
        let mut config = Config::default();
        config.cloud.api_token = Some("very-secret".to_string());

        let text = render(&config).unwrap();
        assert!(!text.contains("very-secret"));
        assert!(text.contains("queue_capacity = 3"));
    }
}
