use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BundleError, Result};

use super::python::{
    AssignInfo, ClassInfo, DefInfo, ImportItem, NameRef, PythonParser, TopLevelItem, ValueExpr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    Function,
    Class,
}

/// One analyzable definition: a function, method, or class.
///
/// Identity is the arena id, never the name; two definitions may share a
/// name. The source text keeps its original indentation.
#[derive(Debug, Clone)]
pub struct CodeUnit {
    pub id: UnitId,
    pub module: ModuleId,
    pub kind: UnitKind,
    pub name: String,
    pub qualified_name: String,
    pub file: PathBuf,
    pub line: usize,
    pub source: String,
    /// Methods defined in the class body (classes only)
    pub members: HashMap<String, UnitId>,
    /// Resolved non-`object` base-class references (classes only)
    pub bases: Vec<Candidate>,
}

/// What a name in a module namespace resolves to.
#[derive(Debug, Clone)]
pub enum Binding {
    Unit(UnitId),
    Module(ModuleId),
    /// An import that resolved to no on-disk file (stdlib or missing).
    External(String),
    /// `name = callee(args...)` where the callee is a known unit. Keeps
    /// the unit-valued arguments so wrapped callables stay reachable.
    Call { callee: UnitId, args: Vec<UnitId> },
}

/// A discovered edge target, ready for the traversal engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Candidate {
    Unit(UnitId),
    Call { callee: UnitId, args: Vec<UnitId> },
}

impl Candidate {
    pub fn from_binding(binding: &Binding) -> Option<Candidate> {
        match binding {
            Binding::Unit(u) => Some(Candidate::Unit(*u)),
            Binding::Call { callee, args } => Some(Candidate::Call {
                callee: *callee,
                args: args.clone(),
            }),
            Binding::Module(_) | Binding::External(_) => None,
        }
    }
}

/// A loaded Python module: its resolved file, dotted name, namespace
/// bindings and the units defined in it.
#[derive(Debug)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    pub path: PathBuf,
    pub bindings: HashMap<String, Binding>,
    pub units: Vec<UnitId>,
}

/// Arena of modules and code units, keyed by resolved file path.
///
/// Loading a module parses it, creates its units, and eagerly resolves its
/// imports against the search roots. The path cache doubles as the cycle
/// guard: a module is registered before its imports are processed, so
/// import cycles resolve to the partially-built module.
pub struct ModuleIndex {
    parser: PythonParser,
    modules: Vec<Module>,
    units: Vec<CodeUnit>,
    by_path: HashMap<PathBuf, ModuleId>,
    search_paths: Vec<PathBuf>,
    max_file_size: usize,
}

impl ModuleIndex {
    pub fn new(search_paths: Vec<PathBuf>, max_file_size: usize) -> Result<Self> {
        Ok(Self {
            parser: PythonParser::new()?,
            modules: Vec::new(),
            units: Vec::new(),
            by_path: HashMap::new(),
            search_paths,
            max_file_size,
        })
    }

    /// Prepend an import search root, ahead of the configured paths.
    pub fn add_search_path_front(&mut self, path: PathBuf) {
        if !self.search_paths.contains(&path) {
            self.search_paths.insert(0, path);
        }
    }

    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0]
    }

    pub fn unit(&self, id: UnitId) -> &CodeUnit {
        &self.units[id.0]
    }

    /// Load a module from a file, under the given dotted name. Returns the
    /// cached module when the path was loaded before.
    pub fn load_module(&mut self, path: &Path, name: &str) -> Result<ModuleId> {
        let path = normalize(path);
        if let Some(id) = self.by_path.get(&path) {
            return Ok(*id);
        }
        if !path.is_file() {
            return Err(BundleError::ModuleNotFound(path));
        }

        let source = std::fs::read_to_string(&path)?;
        if source.len() > self.max_file_size {
            return Err(BundleError::Parser(format!(
                "File {} exceeds maximum size limit",
                path.display()
            )));
        }

        let items = self.parser.parse_module(&source)?;

        let id = ModuleId(self.modules.len());
        self.modules.push(Module {
            id,
            name: name.to_string(),
            path: path.clone(),
            bindings: HashMap::new(),
            units: Vec::new(),
        });
        // Registered before imports run: the cycle guard.
        self.by_path.insert(path.clone(), id);
        debug!("Loaded module '{}' from {}", name, path.display());

        let module_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        for item in items {
            self.apply_item(id, &module_dir, &source, item);
        }

        Ok(id)
    }

    fn apply_item(&mut self, id: ModuleId, module_dir: &Path, source: &str, item: TopLevelItem) {
        match item {
            TopLevelItem::Function(def) => {
                let unit = self.create_unit(id, UnitKind::Function, &def, None, source);
                self.bind(id, def.name, Binding::Unit(unit));
            }
            TopLevelItem::Class(class) => {
                let unit = self.create_class_unit(id, &class, source);
                self.bind(id, class.name, Binding::Unit(unit));
            }
            TopLevelItem::Import(import) => self.apply_import(id, module_dir, import),
            TopLevelItem::Assign(assign) => self.apply_assign(id, assign),
        }
    }

    fn create_unit(
        &mut self,
        module: ModuleId,
        kind: UnitKind,
        def: &DefInfo,
        class_name: Option<&str>,
        source: &str,
    ) -> UnitId {
        let id = UnitId(self.units.len());
        let qualified_name = match class_name {
            Some(class) => format!("{}.{}", class, def.name),
            None => def.name.clone(),
        };
        let file = self.modules[module.0].path.clone();
        self.units.push(CodeUnit {
            id,
            module,
            kind,
            name: def.name.clone(),
            qualified_name,
            file,
            line: def.line,
            source: extract_source(source, def.byte_range.start, def.byte_range.end),
            members: HashMap::new(),
            bases: Vec::new(),
        });
        self.modules[module.0].units.push(id);
        id
    }

    fn create_class_unit(&mut self, module: ModuleId, class: &ClassInfo, source: &str) -> UnitId {
        let mut members = HashMap::new();
        for method in &class.methods {
            let unit = self.create_unit(
                module,
                UnitKind::Function,
                method,
                Some(&class.name),
                source,
            );
            members.insert(method.name.clone(), unit);
        }

        // Base classes must already be bound when the class statement
        // runs, so resolving against the current bindings matches Python.
        let mut bases = Vec::new();
        for base in &class.bases {
            if matches!(base, NameRef::Name(n) if n == "object") {
                continue;
            }
            match self.resolve_name_ref(module, base) {
                Some(binding) => {
                    if let Some(candidate) = Candidate::from_binding(&binding) {
                        bases.push(candidate);
                    }
                }
                None => debug!(
                    "Could not resolve base class {:?} of '{}'",
                    base, class.name
                ),
            }
        }

        let id = UnitId(self.units.len());
        let file = self.modules[module.0].path.clone();
        self.units.push(CodeUnit {
            id,
            module,
            kind: UnitKind::Class,
            name: class.name.clone(),
            qualified_name: class.name.clone(),
            file,
            line: class.line,
            source: extract_source(source, class.byte_range.start, class.byte_range.end),
            members,
            bases,
        });
        self.modules[module.0].units.push(id);
        id
    }

    fn apply_import(&mut self, id: ModuleId, module_dir: &Path, import: ImportItem) {
        match import {
            ImportItem::Plain { module, alias } => {
                self.apply_plain_import(id, module_dir, &module, alias);
            }
            ImportItem::From {
                module,
                level,
                name,
                alias,
            } => {
                self.apply_from_import(id, module_dir, &module, level, name, alias);
            }
            ImportItem::Star { module, .. } => {
                debug!(
                    "Skipping 'from {} import *' in {}: star imports are not resolved",
                    module,
                    self.modules[id.0].path.display()
                );
            }
        }
    }

    /// `import a.b.c [as m]`: loads every resolvable segment, wires
    /// submodule bindings into their parents, and binds either the alias
    /// (to the final module) or the top-level name.
    fn apply_plain_import(
        &mut self,
        id: ModuleId,
        module_dir: &Path,
        dotted: &str,
        alias: Option<String>,
    ) {
        let roots = self.roots_for(module_dir);
        let parts: Vec<&str> = dotted.split('.').collect();

        let mut top: Option<ModuleId> = None;
        let mut last: Option<ModuleId> = None;
        let mut parent: Option<ModuleId> = None;
        for depth in 1..=parts.len() {
            let prefix = parts[..depth].join(".");
            match resolve_module_file(&prefix, &roots) {
                Some(file) => match self.load_module(&file, &prefix) {
                    Ok(mid) => {
                        if let Some(parent_id) = parent {
                            self.bind(
                                parent_id,
                                parts[depth - 1].to_string(),
                                Binding::Module(mid),
                            );
                        }
                        if depth == 1 {
                            top = Some(mid);
                        }
                        if depth == parts.len() {
                            last = Some(mid);
                        }
                        parent = Some(mid);
                    }
                    Err(e) => {
                        warn!("Failed to load module '{}': {}", prefix, e);
                        parent = None;
                    }
                },
                None => {
                    parent = None;
                }
            }
        }

        // `import a.b` binds the top package; `import a.b as c` binds the
        // leaf module under the alias.
        let bound_name = alias.clone().unwrap_or_else(|| parts[0].to_string());
        let loaded = if alias.is_some() { last } else { top };
        match loaded {
            Some(mid) => self.bind(id, bound_name, Binding::Module(mid)),
            None => {
                debug!("Import '{}' did not resolve on disk; treating as external", dotted);
                self.bind(id, bound_name, Binding::External(dotted.to_string()));
            }
        }
    }

    fn apply_from_import(
        &mut self,
        id: ModuleId,
        module_dir: &Path,
        dotted: &str,
        level: usize,
        name: String,
        alias: Option<String>,
    ) {
        let bound_name = alias.unwrap_or_else(|| name.clone());

        let roots = if level == 0 {
            self.roots_for(module_dir)
        } else {
            // `from .x import y`: each extra dot climbs one package level.
            let mut base = module_dir.to_path_buf();
            for _ in 1..level {
                base = base.parent().map(Path::to_path_buf).unwrap_or(base);
            }
            vec![base]
        };

        // Resolve the source module; an empty dotted part means the
        // package directory itself (`from . import x`).
        let parent_module = if dotted.is_empty() {
            None
        } else {
            match resolve_module_file(dotted, &roots) {
                Some(file) => match self.load_module(&file, dotted) {
                    Ok(mid) => Some(mid),
                    Err(e) => {
                        warn!("Failed to load module '{}': {}", dotted, e);
                        self.bind(
                            id,
                            bound_name,
                            Binding::External(format!("{}.{}", dotted, name)),
                        );
                        return;
                    }
                },
                None => {
                    debug!(
                        "Import 'from {} import {}' did not resolve on disk; treating as external",
                        dotted, name
                    );
                    self.bind(
                        id,
                        bound_name,
                        Binding::External(format!("{}.{}", dotted, name)),
                    );
                    return;
                }
            }
        };

        // Prefer a symbol bound in the parent module's namespace.
        if let Some(parent) = parent_module {
            if let Some(binding) = self.modules[parent.0].bindings.get(&name).cloned() {
                self.bind(id, bound_name, binding);
                return;
            }
        }

        // Otherwise the name may be a submodule file next to the parent.
        let submodule = if dotted.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", dotted, name)
        };
        if let Some(file) = resolve_module_file(&submodule, &roots) {
            match self.load_module(&file, &submodule) {
                Ok(mid) => {
                    self.bind(id, bound_name, Binding::Module(mid));
                    return;
                }
                Err(e) => warn!("Failed to load module '{}': {}", submodule, e),
            }
        }

        debug!(
            "Name '{}' not found in module '{}'; no binding created",
            name, dotted
        );
    }

    fn apply_assign(&mut self, id: ModuleId, assign: AssignInfo) {
        let binding = match &assign.value {
            ValueExpr::Name(name) => self.modules[id.0].bindings.get(name).cloned(),
            ValueExpr::Attribute { object, attr } => self.resolve_name_ref(
                id,
                &NameRef::Attribute {
                    object: object.clone(),
                    attr: attr.clone(),
                },
            ),
            ValueExpr::Call { func, args } => {
                let callee = match self.resolve_name_ref(id, func) {
                    Some(Binding::Unit(u)) => Some(u),
                    _ => None,
                };
                callee.map(|callee| {
                    let args = args
                        .iter()
                        .filter_map(|a| match self.modules[id.0].bindings.get(a) {
                            Some(Binding::Unit(u)) => Some(*u),
                            _ => None,
                        })
                        .collect();
                    Binding::Call { callee, args }
                })
            }
            ValueExpr::Other => None,
        };

        match binding {
            Some(binding) => self.bind(id, assign.target, binding),
            // Rebinding to an opaque value shadows any earlier binding.
            None => {
                self.modules[id.0].bindings.remove(&assign.target);
            }
        }
    }

    /// Resolve a bare name or single-attribute reference in a module's
    /// namespace.
    pub fn resolve_name_ref(&self, id: ModuleId, name_ref: &NameRef) -> Option<Binding> {
        match name_ref {
            NameRef::Name(name) => self.modules[id.0].bindings.get(name).cloned(),
            NameRef::Attribute { object, attr } => {
                let base = self.modules[id.0].bindings.get(object)?;
                self.attribute_of(base, attr)
            }
        }
    }

    /// Look an attribute up on a resolved binding: module member, class
    /// member, or class member through an instance.
    pub fn attribute_of(&self, base: &Binding, attr: &str) -> Option<Binding> {
        match base {
            Binding::Module(m) => self.modules[m.0].bindings.get(attr).cloned(),
            Binding::Unit(u) => {
                let unit = &self.units[u.0];
                if unit.kind == UnitKind::Class {
                    unit.members.get(attr).map(|m| Binding::Unit(*m))
                } else {
                    None
                }
            }
            Binding::Call { callee, .. } => {
                let unit = &self.units[callee.0];
                if unit.kind == UnitKind::Class {
                    unit.members.get(attr).map(|m| Binding::Unit(*m))
                } else {
                    None
                }
            }
            Binding::External(_) => None,
        }
    }

    fn bind(&mut self, id: ModuleId, name: String, binding: Binding) {
        self.modules[id.0].bindings.insert(name, binding);
    }

    fn roots_for(&self, module_dir: &Path) -> Vec<PathBuf> {
        let mut roots = Vec::with_capacity(self.search_paths.len() + 1);
        roots.push(module_dir.to_path_buf());
        roots.extend(self.search_paths.iter().cloned());
        roots
    }
}

/// Find the file for a dotted module name under the given roots:
/// `root/a/b.py`, then `root/a/b/__init__.py`.
fn resolve_module_file(dotted: &str, roots: &[PathBuf]) -> Option<PathBuf> {
    let relative: PathBuf = dotted.split('.').collect();
    for root in roots {
        let base = root.join(&relative);
        let as_file = base.with_extension("py");
        if as_file.is_file() {
            return Some(as_file);
        }
        let as_package = base.join("__init__.py");
        if as_package.is_file() {
            return Some(as_package);
        }
    }
    None
}

/// Slice a definition's source out of the file, widened back to the start
/// of its first line so nested definitions keep their full indentation.
/// The text is stored as written; consumers dedent when they reparse it.
fn extract_source(source: &str, start: usize, end: usize) -> String {
    let line_start = source[..start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let start = if source[line_start..start]
        .chars()
        .all(|c| c == ' ' || c == '\t')
    {
        line_start
    } else {
        start
    };
    source[start..end].to_string()
}

/// Absolute, symlink-resolved path when possible.
pub fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
