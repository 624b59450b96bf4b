use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BundleError, Result};

use super::module_index::{Binding, ModuleId, ModuleIndex, UnitId};

/// A parsed `path/to/module.py:symbol` target string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub module_path: PathBuf,
    pub symbol: String,
}

/// Split a target string on its last colon into a module path and a
/// symbol name. The path part is made absolute but not required to exist
/// yet; that is checked when the module is loaded.
pub fn parse_target_string(target: &str) -> Result<TargetSpec> {
    let Some((path_part, symbol)) = target.rsplit_once(':') else {
        return Err(BundleError::InvalidTarget(target.to_string()));
    };
    if path_part.is_empty() || symbol.is_empty() {
        return Err(BundleError::InvalidTarget(target.to_string()));
    }

    if !path_part.ends_with(".py") {
        warn!("Target module path '{}' does not end in .py", path_part);
    }

    let module_path =
        std::path::absolute(path_part).unwrap_or_else(|_| PathBuf::from(path_part));

    Ok(TargetSpec {
        module_path,
        symbol: symbol.to_string(),
    })
}

/// Load the target module into the index and resolve the entry symbol.
///
/// The module's own directory is pushed to the front of the search paths
/// first, the way an interpreter would put the script directory on
/// `sys.path`.
pub fn load_target(index: &mut ModuleIndex, spec: &TargetSpec) -> Result<(ModuleId, UnitId)> {
    if !spec.module_path.is_file() {
        return Err(BundleError::ModuleNotFound(spec.module_path.clone()));
    }

    if let Some(dir) = spec.module_path.parent() {
        index.add_search_path_front(dir.to_path_buf());
    }

    let module_name = module_name_for(&spec.module_path);
    let module_id = index.load_module(&spec.module_path, &module_name)?;

    let binding = index.module(module_id).bindings.get(&spec.symbol).cloned();
    match binding {
        Some(Binding::Unit(unit)) => {
            debug!(
                "Resolved target '{}' to {} at line {}",
                spec.symbol,
                index.unit(unit).qualified_name,
                index.unit(unit).line
            );
            Ok((module_id, unit))
        }
        Some(_) => Err(BundleError::TargetWrongKind {
            symbol: spec.symbol.clone(),
            module: spec.module_path.clone(),
        }),
        None => Err(BundleError::TargetNotFound {
            symbol: spec.symbol.clone(),
            module: spec.module_path.clone(),
        }),
    }
}

/// Dotted name for the entry module: its file stem, or the parent
/// directory name for a package `__init__.py`.
fn module_name_for(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("module");
    if stem == "__init__" {
        if let Some(name) = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
        {
            return name.to_string();
        }
    }
    stem.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_path_and_symbol() {
        let spec = parse_target_string("src/app.py:main").unwrap();
        assert!(spec.module_path.ends_with("src/app.py"));
        assert_eq!(spec.symbol, "main");
    }

    #[test]
    fn splits_on_the_last_colon() {
        let spec = parse_target_string("dir:with:colons/mod.py:func").unwrap();
        assert!(spec.module_path.ends_with("dir:with:colons/mod.py"));
        assert_eq!(spec.symbol, "func");
    }

    #[test]
    fn rejects_missing_colon_and_empty_parts() {
        assert!(matches!(
            parse_target_string("no_colon_here.py"),
            Err(BundleError::InvalidTarget(_))
        ));
        assert!(matches!(
            parse_target_string(":func"),
            Err(BundleError::InvalidTarget(_))
        ));
        assert!(matches!(
            parse_target_string("mod.py:"),
            Err(BundleError::InvalidTarget(_))
        ));
    }

    #[test]
    fn loads_a_function_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "def entry():\n    return 1\n\nVALUE = 2\n").unwrap();

        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let spec = TargetSpec {
            module_path: path.clone(),
            symbol: "entry".to_string(),
        };
        let (_, unit) = load_target(&mut index, &spec).unwrap();
        assert_eq!(index.unit(unit).name, "entry");
    }

    #[test]
    fn missing_symbol_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "def entry():\n    return 1\n").unwrap();

        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let spec = TargetSpec {
            module_path: path,
            symbol: "missing".to_string(),
        };
        assert!(matches!(
            load_target(&mut index, &spec),
            Err(BundleError::TargetNotFound { .. })
        ));
    }

    #[test]
    fn non_unit_symbol_is_wrong_kind() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("helper.py"), "def util():\n    return 1\n").unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, "import helper\n").unwrap();

        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let spec = TargetSpec {
            module_path: path,
            symbol: "helper".to_string(),
        };
        assert!(matches!(
            load_target(&mut index, &spec),
            Err(BundleError::TargetWrongKind { .. })
        ));
    }
}
