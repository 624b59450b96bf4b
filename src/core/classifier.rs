use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{BundleError, Result};

use super::module_index::Module;

/// CPython's compiled-in modules. These never have a source file, so name
/// membership is the only way to recognise them.
const BUILTIN_MODULE_NAMES: &[&str] = &[
    "_abc",
    "_ast",
    "_codecs",
    "_collections",
    "_functools",
    "_imp",
    "_io",
    "_locale",
    "_operator",
    "_signal",
    "_sre",
    "_stat",
    "_string",
    "_symtable",
    "_thread",
    "_tokenize",
    "_tracemalloc",
    "_warnings",
    "_weakref",
    "atexit",
    "builtins",
    "errno",
    "faulthandler",
    "gc",
    "itertools",
    "marshal",
    "posix",
    "pwd",
    "sys",
    "time",
];

const SITE_PACKAGES: &str = "site-packages";

/// Decides whether a module's code belongs in the bundle.
///
/// Standard-library code is always excluded, third-party (site-packages)
/// code optionally, and the remainder is filtered by mutually exclusive
/// include/exclude top-level package lists.
pub struct Classifier {
    include_packages: Option<Vec<String>>,
    exclude_packages: Option<Vec<String>>,
    exclude_third_party: bool,
    extra_stdlib_paths: Vec<PathBuf>,
}

impl Classifier {
    pub fn new(
        include_packages: Option<Vec<String>>,
        exclude_packages: Option<Vec<String>>,
        exclude_third_party: bool,
        extra_stdlib_paths: Vec<PathBuf>,
    ) -> Result<Self> {
        if include_packages.is_some() && exclude_packages.is_some() {
            return Err(BundleError::Config(
                "Cannot specify both include_packages and exclude_packages".to_string(),
            ));
        }
        Ok(Self {
            include_packages,
            exclude_packages,
            exclude_third_party,
            extra_stdlib_paths,
        })
    }

    /// Apply the classification rules in order: stdlib, third-party,
    /// package lists.
    pub fn should_include(&self, module: &Module) -> bool {
        if self.is_standard_library(module) {
            return false;
        }

        if self.exclude_third_party && is_third_party_path(&module.path) {
            debug!(
                "Module '{}' ({}) is a third-party module.",
                module.name,
                module.path.display()
            );
            return false;
        }

        // The both-lists case was rejected at construction.
        is_package_included(
            &module.name,
            self.include_packages.as_deref(),
            self.exclude_packages.as_deref(),
        )
        .unwrap_or(false)
    }

    fn is_standard_library(&self, module: &Module) -> bool {
        let top = top_level_package(&module.name);
        if BUILTIN_MODULE_NAMES.contains(&top) {
            debug!("Module '{}' is built-in.", module.name);
            return true;
        }

        for std_path in stdlib_paths().iter().chain(self.extra_stdlib_paths.iter()) {
            if module.path.starts_with(std_path) {
                debug!(
                    "Module '{}' ({}) is within standard library path '{}'.",
                    module.name,
                    module.path.display(),
                    std_path.display()
                );
                return true;
            }
        }

        false
    }
}

/// Top-level package name: the text before the first dot.
pub fn top_level_package(module_name: &str) -> &str {
    module_name.split('.').next().unwrap_or(module_name)
}

/// Include/exclude filtering over the top-level package name. Supplying
/// both lists is a caller contract violation.
pub fn is_package_included(
    module_name: &str,
    include_list: Option<&[String]>,
    exclude_list: Option<&[String]>,
) -> Result<bool> {
    if include_list.is_some() && exclude_list.is_some() {
        return Err(BundleError::Config(
            "Cannot specify both include_list and exclude_list".to_string(),
        ));
    }

    let top_package = top_level_package(module_name);

    if let Some(include) = include_list {
        Ok(include.iter().any(|p| p == top_package))
    } else if let Some(exclude) = exclude_list {
        Ok(!exclude.iter().any(|p| p == top_package))
    } else {
        Ok(true)
    }
}

/// True when the path contains a site-packages component.
pub fn is_third_party_path(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, Component::Normal(name) if name == SITE_PACKAGES))
}

/// True when the path is inside a virtual environment: under $VIRTUAL_ENV,
/// or with an ancestor directory holding a pyvenv.cfg marker.
pub fn is_virtualenv_path(path: &Path) -> bool {
    if let Ok(venv) = std::env::var("VIRTUAL_ENV") {
        if !venv.is_empty() && path.starts_with(&venv) {
            return true;
        }
    }
    let mut current = path;
    while let Some(parent) = current.parent() {
        if parent.join("pyvenv.cfg").is_file() {
            return true;
        }
        current = parent;
    }
    false
}

/// Directories where the Python standard library lives on this machine.
///
/// Computed once per process and cached; the interpreter installation does
/// not change while we run. `PYBUNDLE_STDLIB_PATH` (a `:`-separated list)
/// overrides detection.
pub fn stdlib_paths() -> &'static [PathBuf] {
    static STDLIB_PATHS: OnceLock<Vec<PathBuf>> = OnceLock::new();
    STDLIB_PATHS.get_or_init(detect_stdlib_paths)
}

fn detect_stdlib_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(raw) = std::env::var("PYBUNDLE_STDLIB_PATH") {
        for part in raw.split(':').filter(|p| !p.is_empty()) {
            let path = PathBuf::from(part);
            if path.is_dir() {
                paths.push(path);
            }
        }
        if !paths.is_empty() {
            debug!("Using standard library paths from environment: {:?}", paths);
            return paths;
        }
    }

    let Ok(version_dir) = Regex::new(r"^python\d+\.\d+$") else {
        return paths;
    };

    let mut prefixes = Vec::new();
    if let Ok(home) = std::env::var("PYTHONHOME") {
        if !home.is_empty() {
            prefixes.push(PathBuf::from(home));
        }
    }
    prefixes.push(PathBuf::from("/usr"));
    prefixes.push(PathBuf::from("/usr/local"));

    for prefix in &prefixes {
        for lib in ["lib", "lib64"] {
            let lib_dir = prefix.join(lib);
            let Ok(entries) = std::fs::read_dir(&lib_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if !version_dir.is_match(name) || !path.is_dir() {
                    continue;
                }
                if is_third_party_path(&path) || is_virtualenv_path(&path) {
                    continue;
                }
                paths.push(path);
            }
        }
    }

    if paths.is_empty() {
        warn!("Could not reliably determine standard library path(s). Filtering might be inaccurate.");
    } else {
        debug!("Identified standard library paths for exclusion: {:?}", paths);
    }

    paths
}
