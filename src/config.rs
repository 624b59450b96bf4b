use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BundleError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bundling behaviour
    pub bundle: BundleConfig,

    /// Module resolution settings
    pub resolver: ResolverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Default output file for the bundled source
    pub output: PathBuf,

    /// Exclude modules installed under a site-packages directory
    pub exclude_third_party: bool,

    /// Only bundle code from these top-level packages
    pub include_packages: Option<Vec<String>>,

    /// Never bundle code from these top-level packages
    pub exclude_packages: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Extra directories searched when resolving imports, after the
    /// target module's own directory
    pub search_paths: Vec<PathBuf>,

    /// Additional standard-library directories, merged with the detected ones
    pub stdlib_paths: Vec<PathBuf>,

    /// Maximum source file size to parse (in bytes)
    pub max_file_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bundle: BundleConfig {
                output: PathBuf::from("bundler_output.py"),
                exclude_third_party: false,
                include_packages: None,
                exclude_packages: None,
            },
            resolver: ResolverConfig {
                search_paths: vec![],
                stdlib_paths: vec![],
                max_file_size: 1024 * 1024, // 1MB
            },
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| BundleError::Config(e.to_string()))?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| BundleError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default())
                }
            }
            None => {
                // Try common config file locations
                let candidates = ["pybundle.toml", ".pybundle.toml"];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.bundle.output, PathBuf::from("bundler_output.py"));
        assert!(!parsed.bundle.exclude_third_party);
        assert_eq!(parsed.resolver.max_file_size, 1024 * 1024);
    }

    #[test]
    fn load_or_default_falls_back_when_missing() {
        let config = Config::load_or_default(Some("/nonexistent/pybundle.toml")).unwrap();
        assert!(config.bundle.include_packages.is_none());
    }
}
