use std::collections::HashSet;

use tree_sitter::Node;

use crate::error::Result;

use super::module_index::{Candidate, CodeUnit, ModuleId, ModuleIndex};
use super::python::{dedent, PythonParser};

/// Discovers the outgoing dependency edges of one code unit by reparsing
/// its source text.
///
/// Two passes over the fragment tree: the first collects every name the
/// fragment binds itself (parameters, assignment targets, nested
/// definitions), the second resolves the remaining reads against the
/// owning module's namespace.
pub struct DependencyFinder {
    parser: PythonParser,
}

impl DependencyFinder {
    pub fn new() -> Result<Self> {
        Ok(Self {
            parser: PythonParser::new()?,
        })
    }

    /// Candidates referenced by the unit's source, in first-seen order,
    /// deduplicated.
    pub fn find_dependencies(
        &mut self,
        index: &ModuleIndex,
        unit: &CodeUnit,
    ) -> Result<Vec<Candidate>> {
        // Method sources carry their class-body indentation; dedent only
        // for parsing, the stored text stays as written.
        let source = dedent(&unit.source);
        let tree = self.parser.parse(&source)?;
        let root = tree.root_node();

        let mut locals = HashSet::new();
        collect_locals(root, &source, &mut locals);

        let mut pass = ResolvePass {
            index,
            module: unit.module,
            source: &source,
            locals,
            seen: HashSet::new(),
            found: Vec::new(),
        };
        pass.walk(root);
        Ok(pass.found)
    }
}

/// Pass 1: names bound anywhere inside the fragment. Scope-insensitive on
/// purpose; a name bound in any nested scope is never treated as a module
/// reference.
fn collect_locals(node: Node, source: &str, locals: &mut HashSet<String>) {
    match node.kind() {
        "function_definition" | "class_definition" => {
            if let Some(name) = node.child_by_field_name("name") {
                locals.insert(text(name, source));
            }
        }
        "parameters" | "lambda_parameters" => collect_parameter_names(node, source, locals),
        "assignment" | "augmented_assignment" | "for_statement" | "for_in_clause" => {
            if let Some(left) = node.child_by_field_name("left") {
                collect_target_names(left, source, locals);
            }
        }
        "as_pattern" => {
            if let Some(alias) = node.child_by_field_name("alias") {
                collect_target_names(alias, source, locals);
            }
        }
        "named_expression" => {
            if let Some(name) = node.child_by_field_name("name") {
                collect_target_names(name, source, locals);
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_locals(child, source, locals);
    }
}

fn collect_parameter_names(params: Node, source: &str, locals: &mut HashSet<String>) {
    let mut cursor = params.walk();
    for child in params.named_children(&mut cursor) {
        match child.kind() {
            "identifier" => {
                locals.insert(text(child, source));
            }
            "default_parameter" | "typed_default_parameter" => {
                if let Some(name) = child.child_by_field_name("name") {
                    if name.kind() == "identifier" {
                        locals.insert(text(name, source));
                    }
                }
            }
            "typed_parameter" | "list_splat_pattern" | "dictionary_splat_pattern" => {
                let mut inner = child.walk();
                for part in child.named_children(&mut inner) {
                    if part.kind() == "identifier" {
                        locals.insert(text(part, source));
                        break;
                    }
                }
            }
            _ => {}
        }
    }
}

/// Bare names in a binding target. Attribute and subscript targets bind no
/// local name and are left alone.
fn collect_target_names(node: Node, source: &str, locals: &mut HashSet<String>) {
    match node.kind() {
        "identifier" | "as_pattern_target" => {
            if node.kind() == "identifier" {
                locals.insert(text(node, source));
                return;
            }
        }
        "tuple_pattern" | "list_pattern" | "pattern_list" | "tuple" | "list"
        | "parenthesized_expression" | "list_splat_pattern" => {}
        _ => return,
    }
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_target_names(child, source, locals);
    }
}

/// Pass 2: resolve the reads.
struct ResolvePass<'a> {
    index: &'a ModuleIndex,
    module: ModuleId,
    source: &'a str,
    locals: HashSet<String>,
    seen: HashSet<Candidate>,
    found: Vec<Candidate>,
}

impl ResolvePass<'_> {
    fn walk(&mut self, node: Node) {
        match node.kind() {
            // Import statements name modules, not values read here.
            "import_statement" | "import_from_statement" | "future_import_statement" => return,
            "attribute" => {
                self.handle_attribute(node);
                if let Some(object) = node.child_by_field_name("object") {
                    self.walk(object);
                }
                return;
            }
            "keyword_argument" => {
                if let Some(value) = node.child_by_field_name("value") {
                    self.walk(value);
                }
                return;
            }
            "identifier" => {
                let name = text(node, self.source);
                if !self.locals.contains(&name) {
                    self.resolve_name(&name);
                }
                return;
            }
            // Binding targets are store context, not reads.
            "assignment" | "augmented_assignment" | "for_statement" | "for_in_clause" => {
                let left = node.child_by_field_name("left");
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if Some(child) == left {
                        self.walk_target(child);
                    } else {
                        self.walk(child);
                    }
                }
                return;
            }
            "function_definition" | "class_definition" => {
                let name_node = node.child_by_field_name("name");
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if Some(child) == name_node {
                        continue;
                    }
                    self.walk(child);
                }
                return;
            }
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child);
        }
    }

    /// A store target binds rather than reads: bare names bind locals,
    /// attribute and subscript targets only read their base expression.
    fn walk_target(&mut self, node: Node) {
        match node.kind() {
            "identifier" => {}
            "attribute" => {
                if let Some(object) = node.child_by_field_name("object") {
                    self.walk(object);
                }
            }
            "tuple_pattern" | "list_pattern" | "pattern_list" | "tuple" | "list"
            | "parenthesized_expression" | "list_splat_pattern" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    self.walk_target(child);
                }
            }
            _ => self.walk(node),
        }
    }

    fn resolve_name(&mut self, name: &str) {
        let bindings = &self.index.module(self.module).bindings;
        if let Some(binding) = bindings.get(name) {
            if let Some(candidate) = Candidate::from_binding(binding) {
                self.push(candidate);
            }
        }
    }

    /// `base.attr` where the base is a bare name bound in the module:
    /// module member, class member, or class member through an instance.
    /// Unresolvable attribute chains are silently skipped.
    fn handle_attribute(&mut self, node: Node) {
        let Some(object) = node.child_by_field_name("object") else {
            return;
        };
        if object.kind() != "identifier" {
            return;
        }
        let Some(attr) = node.child_by_field_name("attribute") else {
            return;
        };

        let base_name = text(object, self.source);
        let bindings = &self.index.module(self.module).bindings;
        let Some(base) = bindings.get(&base_name) else {
            return;
        };
        let attr_name = text(attr, self.source);
        if let Some(binding) = self.index.attribute_of(base, &attr_name) {
            if let Some(candidate) = Candidate::from_binding(&binding) {
                self.push(candidate);
            }
        }
    }

    fn push(&mut self, candidate: Candidate) {
        if self.seen.insert(candidate.clone()) {
            self.found.push(candidate);
        }
    }
}

fn text(node: Node, source: &str) -> String {
    source[node.byte_range()].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::module_index::{Binding, UnitId};
    use std::fs;
    use std::path::{Path, PathBuf};

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn unit_named(index: &ModuleIndex, module: crate::core::module_index::ModuleId, name: &str) -> UnitId {
        match index.module(module).bindings.get(name) {
            Some(Binding::Unit(u)) => *u,
            other => panic!("'{}' not bound to a unit: {:?}", name, other),
        }
    }

    fn find(index: &ModuleIndex, unit: UnitId) -> Vec<Candidate> {
        let mut finder = DependencyFinder::new().unwrap();
        finder
            .find_dependencies(index, index.unit(unit))
            .unwrap()
    }

    #[test]
    fn finds_sibling_function_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "m.py",
            "def helper():\n    return 1\n\ndef entry():\n    return helper() + 1\n",
        );
        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();

        let deps = find(&index, unit_named(&index, mid, "entry"));
        let helper = unit_named(&index, mid, "helper");
        assert_eq!(deps, vec![Candidate::Unit(helper)]);
    }

    #[test]
    fn locals_and_parameters_are_not_edges() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "m.py",
            "def helper():\n    return 1\n\ndef entry(helper):\n    value = helper\n    return value\n",
        );
        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();

        let deps = find(&index, unit_named(&index, mid, "entry"));
        assert!(deps.is_empty());
    }

    #[test]
    fn resolves_attribute_access_on_imported_module() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "helper.py", "def util():\n    return 1\n");
        let path = write(
            dir.path(),
            "m.py",
            "import helper\n\ndef entry():\n    return helper.util()\n",
        );
        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();

        let deps = find(&index, unit_named(&index, mid, "entry"));
        assert_eq!(deps.len(), 1);
        let Candidate::Unit(util) = &deps[0] else {
            panic!("expected unit candidate");
        };
        assert_eq!(index.unit(*util).name, "util");
    }

    #[test]
    fn attribute_store_targets_are_not_read_references() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "helper.py", "def cache():\n    return 1\n");
        let path = write(
            dir.path(),
            "m.py",
            "import helper\n\ndef entry():\n    helper.cache = 5\n    helper.cache += 1\n",
        );
        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();

        let deps = find(&index, unit_named(&index, mid, "entry"));
        assert!(deps.is_empty());
    }

    #[test]
    fn attribute_reads_still_resolve_after_a_store() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "helper.py", "def cache():\n    return 1\n");
        let path = write(
            dir.path(),
            "m.py",
            "import helper\n\ndef entry():\n    helper.cache = 5\n    return helper.cache()\n",
        );
        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();

        let deps = find(&index, unit_named(&index, mid, "entry"));
        assert_eq!(deps.len(), 1);
        let Candidate::Unit(cache) = &deps[0] else {
            panic!("expected unit candidate");
        };
        assert_eq!(index.unit(*cache).name, "cache");
    }

    #[test]
    fn external_imports_yield_no_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "m.py",
            "import json\n\ndef entry():\n    return json.dumps({})\n",
        );
        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();

        let deps = find(&index, unit_named(&index, mid, "entry"));
        assert!(deps.is_empty());
    }

    #[test]
    fn call_bindings_surface_as_call_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "m.py",
            "def wrap(f):\n    return f\n\ndef inner():\n    return 1\n\nwrapped = wrap(inner)\n\ndef entry():\n    return wrapped()\n",
        );
        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();

        let deps = find(&index, unit_named(&index, mid, "entry"));
        let wrap = unit_named(&index, mid, "wrap");
        let inner = unit_named(&index, mid, "inner");
        assert_eq!(
            deps,
            vec![Candidate::Call {
                callee: wrap,
                args: vec![inner]
            }]
        );
    }

    #[test]
    fn method_sources_parse_and_reach_module_functions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "m.py",
            "def helper():\n    return 1\n\nclass C:\n    def method(self):\n        if helper():\n            return self.other()\n        return 0\n\n    def other(self):\n        return 2\n",
        );
        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();

        let class = unit_named(&index, mid, "C");
        let method = index.unit(class).members["method"];
        let deps = find(&index, method);
        let helper = unit_named(&index, mid, "helper");
        assert_eq!(deps, vec![Candidate::Unit(helper)]);
    }

    #[test]
    fn instances_recover_their_class_members() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "m.py",
            "class Widget:\n    def render(self):\n        return 1\n\nwidget = Widget()\n\ndef entry():\n    return widget.render()\n",
        );
        let mut index = ModuleIndex::new(vec![], 1024 * 1024).unwrap();
        let mid = index.load_module(&path, "m").unwrap();

        let deps = find(&index, unit_named(&index, mid, "entry"));
        let class = unit_named(&index, mid, "Widget");
        let render = index.unit(class).members["render"];
        assert!(deps.contains(&Candidate::Unit(render)));
    }
}
