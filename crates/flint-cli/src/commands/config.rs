//! Config command - show or initialize the configuration file.

use anyhow::bail;
use flint_core::Config;
use std::path::Path;

/// Run the config command.
pub fn run(config: &Config, path: &Path, init: bool, force: bool) -> anyhow::Result<()> {
    if init {
        if path.exists() && !force {
            bail!(
                "{} already exists. Use --force to overwrite it.",
                path.display()
            );
        }
        Config::default().save_to(path)?;
        println!("✓ Wrote default configuration to {}", path.display());
        return Ok(());
    }

    println!("# {}", path.display());
    if !path.exists() {
        println!("# (file not found, showing defaults)");
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("flint.toml");

        run(&Config::default(), &path, true, false).unwrap();
        assert!(path.exists());

        assert!(run(&Config::default(), &path, true, false).is_err());
        run(&Config::default(), &path, true, true).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.indexing.threads, 10);
    }
}
