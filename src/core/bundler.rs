use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;

use super::classifier::Classifier;
use super::edge_finder::DependencyFinder;
use super::module_index::{Candidate, ModuleIndex, UnitId, UnitKind};

/// Ceiling on processed units. Traversal stops here and flags the result
/// as truncated rather than running away on pathological inputs.
pub const MAX_PROCESSED: usize = 1000;

/// Worklist traversal over the module index: starting from the entry unit,
/// collect every included definition reachable through discovered edges.
///
/// Fragments are keyed by (file path, line), so the final bundle reads in
/// source order regardless of discovery order.
pub struct DependencyBundler<'a> {
    index: &'a ModuleIndex,
    classifier: &'a Classifier,
    finder: DependencyFinder,
    queue: VecDeque<UnitId>,
    queued: HashSet<UnitId>,
    processed: HashSet<UnitId>,
    collected: BTreeMap<(PathBuf, usize), String>,
    truncated: bool,
}

impl<'a> DependencyBundler<'a> {
    pub fn new(index: &'a ModuleIndex, classifier: &'a Classifier) -> Result<Self> {
        Ok(Self {
            index,
            classifier,
            finder: DependencyFinder::new()?,
            queue: VecDeque::new(),
            queued: HashSet::new(),
            processed: HashSet::new(),
            collected: BTreeMap::new(),
            truncated: false,
        })
    }

    /// Run the closure computation from the entry unit. Resets any state
    /// left by a previous run.
    pub fn run_analysis(&mut self, entry: UnitId) -> Result<()> {
        self.queue.clear();
        self.queued.clear();
        self.processed.clear();
        self.collected.clear();
        self.truncated = false;

        // The entry unit is always bundled; classification applies only to
        // discovered candidates.
        self.queued.insert(entry);
        self.queue.push_back(entry);

        while let Some(unit_id) = self.queue.pop_front() {
            // queued never readmits a unit, so processed.len() equals the
            // number of dequeues.
            if self.processed.len() >= MAX_PROCESSED {
                warn!(
                    "Reached processing limit of {} objects; the bundle may be incomplete",
                    MAX_PROCESSED
                );
                self.truncated = true;
                break;
            }
            if !self.processed.insert(unit_id) {
                continue;
            }
            self.process_unit(unit_id);
        }

        debug!(
            "Analysis complete: {} units processed, {} fragments collected",
            self.processed.len(),
            self.collected.len()
        );
        Ok(())
    }

    /// Collected fragments in (file path, line) order.
    pub fn fragments(&self) -> &BTreeMap<(PathBuf, usize), String> {
        &self.collected
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// True when the run stopped at the processing ceiling.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn process_unit(&mut self, id: UnitId) {
        let unit = self.index.unit(id);
        debug!("Processing {}", unit.qualified_name);

        let key = (unit.file.clone(), unit.line);
        if !self.collected.contains_key(&key) {
            let header = format!(
                "# --- Source from: {} Line: {} Object: {} ---",
                display_path(&unit.file),
                unit.line,
                unit.qualified_name
            );
            self.collected
                .insert(key, format!("{}\n{}", header, unit.source.trim_end()));
        }

        // Classes pull in their base classes and every method defined in
        // the body; inherited methods arrive through the base expansion.
        if unit.kind == UnitKind::Class {
            for base in &unit.bases {
                self.enqueue_candidate(base);
            }
            let mut members: Vec<UnitId> = unit.members.values().copied().collect();
            members.sort();
            for member in members {
                self.enqueue_unit(member);
            }
        }

        // A fragment whose text fails to reparse keeps its place in the
        // bundle; it just contributes no further edges.
        match self.finder.find_dependencies(self.index, unit) {
            Ok(candidates) => {
                for candidate in candidates {
                    self.enqueue_candidate(&candidate);
                }
            }
            Err(e) => warn!(
                "Could not analyze source of {}: {}",
                unit.qualified_name, e
            ),
        }
    }

    fn enqueue_candidate(&mut self, candidate: &Candidate) {
        match candidate {
            Candidate::Unit(unit) => self.enqueue_unit(*unit),
            // Wrapped callables: both the wrapper and the wrapped units
            // stay reachable.
            Candidate::Call { callee, args } => {
                self.enqueue_unit(*callee);
                for arg in args {
                    self.enqueue_unit(*arg);
                }
            }
        }
    }

    fn enqueue_unit(&mut self, id: UnitId) {
        if self.processed.contains(&id) || self.queued.contains(&id) {
            return;
        }

        let unit = self.index.unit(id);
        let module = self.index.module(unit.module);
        if !self.classifier.should_include(module) {
            debug!(
                "Skipping {} from excluded module '{}'",
                unit.qualified_name, module.name
            );
            return;
        }

        self.queued.insert(id);
        self.queue.push_back(id);
    }
}

/// Path shown in fragment headers: relative to the working directory when
/// possible, absolute otherwise.
fn display_path(path: &Path) -> String {
    match std::env::current_dir() {
        Ok(cwd) => path
            .strip_prefix(&cwd)
            .unwrap_or(path)
            .display()
            .to_string(),
        Err(_) => path.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn run(source: &str, entry: &str) -> Vec<String> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(&path, source).unwrap();

        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();
        let unit = match index.module(mid).bindings.get(entry) {
            Some(crate::core::module_index::Binding::Unit(u)) => *u,
            other => panic!("'{}' not a unit: {:?}", entry, other),
        };

        let classifier = Classifier::new(None, None, false, vec![]).unwrap();
        let mut bundler = DependencyBundler::new(&index, &classifier).unwrap();
        bundler.run_analysis(unit).unwrap();

        bundler
            .fragments()
            .values()
            .map(|fragment| {
                let header = fragment.lines().next().unwrap_or("");
                let marker = "Object: ";
                let start = header.find(marker).map(|i| i + marker.len()).unwrap_or(0);
                header[start..].trim_end_matches(" ---").to_string()
            })
            .collect()
    }

    #[test]
    fn leaf_function_bundles_only_itself() {
        let names = run("def leaf():\n    return 1\n\ndef unused():\n    return 2\n", "leaf");
        assert_eq!(names, vec!["leaf"]);
    }

    #[test]
    fn transitive_calls_are_followed() {
        let names = run(
            "def a():\n    return b()\n\ndef b():\n    return c()\n\ndef c():\n    return 1\n",
            "a",
        );
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn classes_expand_to_their_methods() {
        let names = run(
            "class Widget:\n    def __init__(self):\n        self.x = 1\n\n    def render(self):\n        return self.x\n",
            "Widget",
        );
        assert_eq!(names, vec!["Widget", "Widget.__init__", "Widget.render"]);
    }

    #[test]
    fn base_classes_are_pulled_in() {
        let names = run(
            "class Base:\n    def shared(self):\n        return 1\n\nclass Child(Base):\n    def own(self):\n        return 2\n",
            "Child",
        );
        assert_eq!(
            names,
            vec!["Base", "Base.shared", "Child", "Child.own"]
        );
    }

    #[test]
    fn method_fragments_keep_class_body_indentation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(
            &path,
            "class Widget:\n    def render(self):\n        return 1\n",
        )
        .unwrap();

        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();
        let unit = match index.module(mid).bindings.get("Widget") {
            Some(crate::core::module_index::Binding::Unit(u)) => *u,
            other => panic!("Widget not a unit: {:?}", other),
        };

        let classifier = Classifier::new(None, None, false, vec![]).unwrap();
        let mut bundler = DependencyBundler::new(&index, &classifier).unwrap();
        bundler.run_analysis(unit).unwrap();

        let fragment = bundler
            .fragments()
            .values()
            .find(|f| f.contains("Object: Widget.render"))
            .expect("render fragment missing");
        let body = fragment.lines().nth(1).expect("fragment body missing");
        assert_eq!(body, "    def render(self):");
    }

    #[test]
    fn entry_unit_bypasses_classification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.py");
        fs::write(
            &path,
            "def helper():\n    return 1\n\ndef entry():\n    return helper()\n",
        )
        .unwrap();

        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();
        let unit = match index.module(mid).bindings.get("entry") {
            Some(crate::core::module_index::Binding::Unit(u)) => *u,
            other => panic!("entry not a unit: {:?}", other),
        };

        // The module's package is not on the include list, yet the entry
        // itself is still collected; only its callees are filtered.
        let classifier =
            Classifier::new(Some(vec!["somewhere_else".to_string()]), None, false, vec![])
                .unwrap();
        let mut bundler = DependencyBundler::new(&index, &classifier).unwrap();
        bundler.run_analysis(unit).unwrap();

        let names: Vec<&String> = bundler.fragments().values().collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].contains("Object: entry"));
    }

    #[test]
    fn recursive_functions_terminate() {
        let names = run("def rec(n):\n    return rec(n - 1) if n else 0\n", "rec");
        assert_eq!(names, vec!["rec"]);
    }

    #[test]
    fn fragments_sort_by_line_not_discovery_order() {
        let names = run(
            "def early():\n    return 1\n\ndef entry():\n    return late() + early()\n\ndef late():\n    return 2\n",
            "entry",
        );
        assert_eq!(names, vec!["early", "entry", "late"]);
    }
}
