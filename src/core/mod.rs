mod bundler;
mod classifier;
mod edge_finder;
mod loader;
mod module_index;
mod python;

pub use bundler::{DependencyBundler, MAX_PROCESSED};
pub use classifier::Classifier;
pub use edge_finder::DependencyFinder;
pub use loader::{load_target, parse_target_string, TargetSpec};
pub use module_index::{
    Binding, Candidate, CodeUnit, Module, ModuleId, ModuleIndex, UnitId, UnitKind,
};
pub use python::PythonParser;

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::output;

/// Ties the pieces together: configuration, classification, module
/// loading, traversal, and output.
pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = Config::load_or_default(config_path)?;
        Ok(Self { config })
    }

    pub fn with_config(config: Config) -> Self {
        Self { config }
    }

    /// Bundle the target and write the result. Command-line options
    /// override their configuration counterparts. Returns the path the
    /// bundle was written to.
    pub fn bundle(
        &self,
        target: &str,
        output_path: Option<PathBuf>,
        exclude_third_party: bool,
        include_packages: Option<Vec<String>>,
        exclude_packages: Option<Vec<String>>,
    ) -> Result<PathBuf> {
        let include = include_packages.or_else(|| self.config.bundle.include_packages.clone());
        let exclude = exclude_packages.or_else(|| self.config.bundle.exclude_packages.clone());
        let exclude_third_party = exclude_third_party || self.config.bundle.exclude_third_party;

        // Invalid filter combinations fail before any file is touched.
        let classifier = Classifier::new(
            include,
            exclude,
            exclude_third_party,
            self.config.resolver.stdlib_paths.clone(),
        )?;

        let spec = parse_target_string(target)?;
        let mut index = ModuleIndex::new(
            self.config.resolver.search_paths.clone(),
            self.config.resolver.max_file_size,
        )?;
        let (_, entry) = load_target(&mut index, &spec)?;

        let mut bundler = DependencyBundler::new(&index, &classifier)?;
        bundler.run_analysis(entry)?;

        if bundler.truncated() {
            warn!("Bundle is incomplete: traversal hit the processing limit");
        }
        info!(
            "Collected {} fragment(s) from {} processed unit(s)",
            bundler.fragments().len(),
            bundler.processed_count()
        );

        let rendered = output::render_bundle(target, bundler.fragments());
        let out_path = output_path.unwrap_or_else(|| self.config.bundle.output.clone());
        output::write_bundle(&out_path, &rendered)?;

        Ok(out_path)
    }
}
