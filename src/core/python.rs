use std::ops::Range;

use tree_sitter::{Node, Parser, Tree};

use crate::error::{BundleError, Result};

/// Python source front end built on Tree-sitter.
///
/// Produces the top-level items a module namespace is built from: function
/// and class definitions (with their source spans), imports, and simple
/// module-level assignments.
pub struct PythonParser {
    parser: Parser,
}

/// A function or method definition. The span and line include any decorators.
#[derive(Debug, Clone)]
pub struct DefInfo {
    pub name: String,
    pub line: usize,
    pub byte_range: Range<usize>,
}

/// A class definition with its base references and body methods.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub line: usize,
    pub byte_range: Range<usize>,
    pub bases: Vec<NameRef>,
    pub methods: Vec<DefInfo>,
}

/// A reference expression simple enough to resolve against a namespace:
/// a bare name or a single attribute access on a bare name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameRef {
    Name(String),
    Attribute { object: String, attr: String },
}

/// One imported binding. `import a.b as c` and each clause of a
/// from-import expand to separate items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportItem {
    Plain {
        module: String,
        alias: Option<String>,
    },
    From {
        module: String,
        level: usize,
        name: String,
        alias: Option<String>,
    },
    Star {
        module: String,
        level: usize,
    },
}

/// A module-level `name = value` statement.
#[derive(Debug, Clone)]
pub struct AssignInfo {
    pub target: String,
    pub value: ValueExpr,
}

/// The right-hand side of an assignment, reduced to the shapes the
/// namespace builder understands.
#[derive(Debug, Clone)]
pub enum ValueExpr {
    Name(String),
    Attribute { object: String, attr: String },
    Call { func: NameRef, args: Vec<String> },
    Other,
}

#[derive(Debug, Clone)]
pub enum TopLevelItem {
    Function(DefInfo),
    Class(ClassInfo),
    Import(ImportItem),
    Assign(AssignInfo),
}

impl PythonParser {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        let python_language = tree_sitter_python::language();
        parser
            .set_language(&python_language)
            .map_err(|e| BundleError::Parser(format!("Failed to set Python language: {}", e)))?;

        Ok(Self { parser })
    }

    /// Parse source into a raw tree. A tree containing syntax errors is
    /// reported as a parser error; callers treat it as recoverable.
    pub fn parse(&mut self, source: &str) -> Result<Tree> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or_else(|| BundleError::Parser("Failed to parse Python code".to_string()))?;
        if tree.root_node().has_error() {
            return Err(BundleError::Parser(
                "Source contains syntax errors".to_string(),
            ));
        }
        Ok(tree)
    }

    /// Extract the top-level items of a module, in statement order.
    pub fn parse_module(&mut self, source: &str) -> Result<Vec<TopLevelItem>> {
        let tree = self.parse(source)?;
        let root = tree.root_node();
        let mut items = Vec::new();

        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            self.extract_statement(child, source, &mut items);
        }

        Ok(items)
    }

    fn extract_statement(&self, node: Node, source: &str, items: &mut Vec<TopLevelItem>) {
        match node.kind() {
            "function_definition" => {
                if let Some(def) = self.parse_def(node, node, source) {
                    items.push(TopLevelItem::Function(def));
                }
            }
            "class_definition" => {
                if let Some(class) = self.parse_class(node, node, source) {
                    items.push(TopLevelItem::Class(class));
                }
            }
            "decorated_definition" => {
                if let Some(def_node) = node.child_by_field_name("definition") {
                    match def_node.kind() {
                        "function_definition" => {
                            if let Some(def) = self.parse_def(def_node, node, source) {
                                items.push(TopLevelItem::Function(def));
                            }
                        }
                        "class_definition" => {
                            if let Some(class) = self.parse_class(def_node, node, source) {
                                items.push(TopLevelItem::Class(class));
                            }
                        }
                        _ => {}
                    }
                }
            }
            "import_statement" => self.parse_import(node, source, items),
            "import_from_statement" => self.parse_from_import(node, source, items),
            "expression_statement" => {
                let mut cursor = node.walk();
                for expr in node.named_children(&mut cursor) {
                    if expr.kind() == "assignment" {
                        if let Some(assign) = self.parse_assignment(expr, source) {
                            items.push(TopLevelItem::Assign(assign));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// `def_node` is the function_definition itself; `span_node` is the
    /// enclosing decorated_definition when decorators are present.
    fn parse_def(&self, def_node: Node, span_node: Node, source: &str) -> Option<DefInfo> {
        let name_node = def_node.child_by_field_name("name")?;
        Some(DefInfo {
            name: self.node_text(name_node, source),
            line: span_node.start_position().row + 1,
            byte_range: span_node.byte_range(),
        })
    }

    fn parse_class(&self, class_node: Node, span_node: Node, source: &str) -> Option<ClassInfo> {
        let name_node = class_node.child_by_field_name("name")?;
        let name = self.node_text(name_node, source);

        let mut bases = Vec::new();
        if let Some(superclasses) = class_node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for arg in superclasses.named_children(&mut cursor) {
                if let Some(name_ref) = self.parse_name_ref(arg, source) {
                    bases.push(name_ref);
                }
            }
        }

        let mut methods = Vec::new();
        if let Some(body) = class_node.child_by_field_name("body") {
            let mut cursor = body.walk();
            for child in body.named_children(&mut cursor) {
                match child.kind() {
                    "function_definition" => {
                        if let Some(def) = self.parse_def(child, child, source) {
                            methods.push(def);
                        }
                    }
                    "decorated_definition" => {
                        if let Some(def_node) = child.child_by_field_name("definition") {
                            if def_node.kind() == "function_definition" {
                                if let Some(def) = self.parse_def(def_node, child, source) {
                                    methods.push(def);
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        Some(ClassInfo {
            name,
            line: span_node.start_position().row + 1,
            byte_range: span_node.byte_range(),
            bases,
            methods,
        })
    }

    /// `import a.b, c as d` - one item per clause.
    fn parse_import(&self, node: Node, source: &str, items: &mut Vec<TopLevelItem>) {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            match child.kind() {
                "dotted_name" => items.push(TopLevelItem::Import(ImportItem::Plain {
                    module: self.node_text(child, source),
                    alias: None,
                })),
                "aliased_import" => {
                    let module = child
                        .child_by_field_name("name")
                        .map(|n| self.node_text(n, source));
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|n| self.node_text(n, source));
                    if let Some(module) = module {
                        items.push(TopLevelItem::Import(ImportItem::Plain { module, alias }));
                    }
                }
                _ => {}
            }
        }
    }

    /// `from [.]*pkg import a as b, c` or `from pkg import *`.
    fn parse_from_import(&self, node: Node, source: &str, items: &mut Vec<TopLevelItem>) {
        let (module, level) = match node.child_by_field_name("module_name") {
            Some(module_node) => match module_node.kind() {
                "dotted_name" => (self.node_text(module_node, source), 0),
                "relative_import" => {
                    let text = self.node_text(module_node, source);
                    let level = text.chars().take_while(|c| *c == '.').count();
                    (text.trim_start_matches('.').to_string(), level)
                }
                _ => return,
            },
            None => return,
        };

        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            // The module_name field also matches dotted_name; skip it.
            if Some(child) == node.child_by_field_name("module_name") {
                continue;
            }
            match child.kind() {
                "dotted_name" => items.push(TopLevelItem::Import(ImportItem::From {
                    module: module.clone(),
                    level,
                    name: self.node_text(child, source),
                    alias: None,
                })),
                "aliased_import" => {
                    let name = child
                        .child_by_field_name("name")
                        .map(|n| self.node_text(n, source));
                    let alias = child
                        .child_by_field_name("alias")
                        .map(|n| self.node_text(n, source));
                    if let Some(name) = name {
                        items.push(TopLevelItem::Import(ImportItem::From {
                            module: module.clone(),
                            level,
                            name,
                            alias,
                        }));
                    }
                }
                "wildcard_import" => items.push(TopLevelItem::Import(ImportItem::Star {
                    module: module.clone(),
                    level,
                })),
                _ => {}
            }
        }
    }

    fn parse_assignment(&self, node: Node, source: &str) -> Option<AssignInfo> {
        let left = node.child_by_field_name("left")?;
        if left.kind() != "identifier" {
            // Tuple targets and attribute targets do not create namespace
            // bindings we can resolve.
            return None;
        }
        let right = node.child_by_field_name("right")?;

        let value = match right.kind() {
            "identifier" => ValueExpr::Name(self.node_text(right, source)),
            "attribute" => self
                .parse_name_ref(right, source)
                .map(|r| match r {
                    NameRef::Attribute { object, attr } => ValueExpr::Attribute { object, attr },
                    NameRef::Name(n) => ValueExpr::Name(n),
                })
                .unwrap_or(ValueExpr::Other),
            "call" => {
                let func = right
                    .child_by_field_name("function")
                    .and_then(|f| self.parse_name_ref(f, source));
                match func {
                    Some(func) => {
                        let mut args = Vec::new();
                        if let Some(arg_list) = right.child_by_field_name("arguments") {
                            let mut cursor = arg_list.walk();
                            for arg in arg_list.named_children(&mut cursor) {
                                if arg.kind() == "identifier" {
                                    args.push(self.node_text(arg, source));
                                }
                            }
                        }
                        ValueExpr::Call { func, args }
                    }
                    None => ValueExpr::Other,
                }
            }
            _ => ValueExpr::Other,
        };

        Some(AssignInfo {
            target: self.node_text(left, source),
            value,
        })
    }

    fn parse_name_ref(&self, node: Node, source: &str) -> Option<NameRef> {
        match node.kind() {
            "identifier" => Some(NameRef::Name(self.node_text(node, source))),
            "attribute" => {
                let object = node.child_by_field_name("object")?;
                let attr = node.child_by_field_name("attribute")?;
                if object.kind() == "identifier" {
                    Some(NameRef::Attribute {
                        object: self.node_text(object, source),
                        attr: self.node_text(attr, source),
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Extract text content of a node
    fn node_text(&self, node: Node, source: &str) -> String {
        source[node.byte_range()].to_string()
    }
}

/// Strip the longest common leading whitespace from every line, so a
/// method body extracted from inside a class parses as a standalone
/// fragment. Whitespace-only lines are normalised to empty.
pub fn dedent(source: &str) -> String {
    let mut prefix: Option<&str> = None;
    for line in source.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let indent = &line[..line.len() - line.trim_start().len()];
        prefix = Some(match prefix {
            None => indent,
            Some(current) => common_prefix(current, indent),
        });
    }

    let prefix = match prefix {
        Some(p) if !p.is_empty() => p,
        _ => return source.to_string(),
    };

    let mut out: Vec<&str> = Vec::new();
    for line in source.lines() {
        if line.trim().is_empty() {
            out.push("");
        } else {
            out.push(line.strip_prefix(prefix).unwrap_or(line));
        }
    }
    let mut result = out.join("\n");
    if source.ends_with('\n') {
        result.push('\n');
    }
    result
}

fn common_prefix<'a>(a: &'a str, b: &str) -> &'a str {
    let end = a
        .bytes()
        .zip(b.bytes())
        .take_while(|(x, y)| x == y)
        .count();
    &a[..end]
}
