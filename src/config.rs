//! Configuration loading and schema definitions for replayci.
//!
//! Configuration is a TOML file; see [`schema`] for the sections and their
//! defaults. Paths may use `~` and environment variables.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads replayci configuration from a TOML file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use replayci::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("replayci.toml"))?;
/// println!("Concurrency: {}", config.engine.concurrency);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config.expand_paths();

    Ok(config)
}

/// Loads replayci configuration from a TOML string.
///
/// # Example
///
/// ```
/// use replayci::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [engine]
///     concurrency = 4
///
///     [act]
///     runner_image = "catthehacker/ubuntu:act-latest"
/// "#)?;
///
/// assert_eq!(config.engine.concurrency, 4);
/// assert_eq!(config.engine.pool_size(), 4);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let mut config: Config = toml::from_str(content).context("Failed to parse config")?;
    config.expand_paths();

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = load_config_str("").unwrap();
        assert!(!config.engine.offline);
        assert_eq!(config.engine.timeout_minutes, 10);
        assert_eq!(config.engine.concurrency, 1);
        assert_eq!(config.engine.repo_concurrency, 1);
        assert_eq!(config.engine.pool_size(), 1);
        assert_eq!(config.engine.failure_strategy, FailureStrategyKind::Tests);
        assert_eq!(config.act.path, "act");
        assert_eq!(config.act.platform, "ubuntu-latest");
        assert_eq!(config.act.memory_limit, "7g");
        assert_eq!(config.credentials.requests_per_hour, 5000);
        assert!(config.credentials.tokens.is_empty());
        assert!(config.engine.cache_root.ends_with("act-cache"));
    }

    #[test]
    fn test_full_config() {
        let config = load_config_str(
            r#"
            [engine]
            offline = true
            timeout_minutes = 30
            concurrency = 2
            pool_size = 8
            cache_root = "/var/cache/replayci"
            failure_strategy = "exit-code"

            [act]
            path = "gh act"
            runner_image = "custom:1"
            reuse_containers = true

            [credentials]
            tokens = ["a", "b"]
            requests_per_hour = 1000

            [report]
            output_dir = "out"
            "#,
        )
        .unwrap();

        assert!(config.engine.offline);
        assert_eq!(config.engine.pool_size(), 8);
        assert_eq!(config.engine.cache_root, PathBuf::from("/var/cache/replayci"));
        assert_eq!(config.engine.failure_strategy, FailureStrategyKind::ExitCode);
        assert_eq!(config.act.path, "gh act");
        assert!(config.act.reuse_containers);
        assert_eq!(config.credentials.tokens, vec!["a", "b"]);
        assert_eq!(config.report.output_dir, PathBuf::from("out"));
    }

    #[test]
    fn test_pool_covers_concurrent_repositories() {
        let config = load_config_str("[engine]\nconcurrency = 2\nrepo_concurrency = 3\n").unwrap();
        assert_eq!(config.engine.pool_size(), 6);

        let config =
            load_config_str("[engine]\nconcurrency = 2\nrepo_concurrency = 3\npool_size = 4\n")
                .unwrap();
        assert_eq!(config.engine.pool_size(), 4);
    }

    #[test]
    fn test_tilde_is_expanded() {
        let config = load_config_str("[engine]\ncache_root = \"~/act-cache\"\n").unwrap();
        if std::env::var_os("HOME").is_some() {
            assert!(!config.engine.cache_root.starts_with("~"));
        }
        assert!(config.engine.cache_root.ends_with("act-cache"));
    }

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nconcurrency = 3").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.engine.concurrency, 3);

        assert!(load_config(Path::new("/nonexistent/replayci.toml")).is_err());
        assert!(load_config_str("[engine]\nconcurrency = \"many\"").is_err());
    }
}
