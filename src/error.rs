use std::path::PathBuf;

use thiserror::Error;

/// Main error type for pybundle operations
#[derive(Error, Debug)]
pub enum BundleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parser error: {0}")]
    Parser(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid target '{0}': expected 'path/to/module.py:function_or_class_name'")]
    InvalidTarget(String),

    #[error("Module file not found: {0}")]
    ModuleNotFound(PathBuf),

    #[error("Target '{symbol}' not found in module {module}")]
    TargetNotFound { symbol: String, module: PathBuf },

    #[error("Target '{symbol}' in module {module} is not a function, method, or class")]
    TargetWrongKind { symbol: String, module: PathBuf },
}

pub type Result<T> = std::result::Result<T, BundleError>;
