use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use anyhow::Result;

use crate::core::Engine;

#[derive(Parser)]
#[command(name = "pybundle")]
#[command(about = "Bundle a Python entry point and the source it depends on into one file")]
#[command(version)]
pub struct Cli {
    /// Analysis target, as 'path/to/module.py:function_or_class_name'
    pub target: String,

    /// Output file for the bundled source
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Exclude modules installed under a site-packages directory
    #[arg(long)]
    pub exclude_third_party: bool,

    /// Only bundle code from these top-level packages (comma-separated)
    #[arg(long, value_delimiter = ',', conflicts_with = "exclude_packages")]
    pub include_packages: Option<Vec<String>>,

    /// Never bundle code from these top-level packages (comma-separated)
    #[arg(long, value_delimiter = ',')]
    pub exclude_packages: Option<Vec<String>>,

    /// Log verbosity
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl Cli {
    pub fn execute(self, engine: Engine) -> Result<()> {
        let out_path = engine.bundle(
            &self.target,
            self.output,
            self.exclude_third_party,
            self.include_packages,
            self.exclude_packages,
        )?;
        println!("Bundle written to {}", out_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_target_and_flags() {
        let cli = Cli::try_parse_from([
            "pybundle",
            "src/app.py:main",
            "-o",
            "out.py",
            "--exclude-third-party",
            "--include-packages",
            "app,lib",
        ])
        .unwrap();
        assert_eq!(cli.target, "src/app.py:main");
        assert_eq!(cli.output, Some(PathBuf::from("out.py")));
        assert!(cli.exclude_third_party);
        assert_eq!(
            cli.include_packages,
            Some(vec!["app".to_string(), "lib".to_string()])
        );
    }

    #[test]
    fn include_and_exclude_lists_conflict() {
        let result = Cli::try_parse_from([
            "pybundle",
            "m.py:f",
            "--include-packages",
            "a",
            "--exclude-packages",
            "b",
        ]);
        assert!(result.is_err());
    }
}
