//! Structural parsing: turns file content into labelled name captures.
//!
//! The engine only depends on [`StructuralParser`]. [`TreeSitterParser`] is
//! the bundled implementation; it walks the tree-sitter AST and labels each
//! captured name `definition.<kind>` or `reference.<kind>`.

use std::collections::HashSet;

use tree_sitter::{Node, Parser};

use crate::walker::Language;

/// One named node reported by a structural parser.
///
/// # Examples
///
/// ```
/// use atlas_repomap::parser::Capture;
///
/// let capture = Capture {
///     text: "compute_total".into(),
///     label: "definition.function".into(),
///     line: 0,
/// };
/// assert!(capture.label.starts_with("definition"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Source text of the captured name node.
    pub text: String,
    /// Capture label, e.g. `definition.function` or `reference.call`.
    pub label: String,
    /// Zero-based line where the node starts.
    pub line: u32,
}

/// Why a file produced no captures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// No grammar is registered for the file's language.
    #[error("no structural parser for language `{0}`")]
    Unsupported(String),
    /// The grammar or query failed on this input.
    #[error("structural parse failed: {0}")]
    Failed(String),
}

/// A source of labelled name captures for one file.
///
/// Implementations must be shareable across extraction workers.
pub trait StructuralParser: Send + Sync {
    /// Parse `content` written in `language`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Unsupported`] when the language has no grammar,
    /// and [`ParseError::Failed`] when the grammar cannot process the input.
    fn parse(&self, language: Language, content: &str) -> Result<Vec<Capture>, ParseError>;
}

/// How a definition node is recognised in one grammar.
struct DefinitionRule {
    /// AST node kind that introduces the definition.
    node: &'static str,
    /// Child kinds that may hold the defined name, tried in order.
    names: &'static [&'static str],
    /// The node only counts when one of these child kinds is present.
    requires: &'static [&'static str],
    /// Capture label suffix after `definition.`.
    label: &'static str,
}

const fn rule(
    node: &'static str,
    names: &'static [&'static str],
    label: &'static str,
) -> DefinitionRule {
    DefinitionRule {
        node,
        names,
        requires: &[],
        label,
    }
}

const fn rule_requiring(
    node: &'static str,
    names: &'static [&'static str],
    requires: &'static [&'static str],
    label: &'static str,
) -> DefinitionRule {
    DefinitionRule {
        node,
        names,
        requires,
        label,
    }
}

const RUST_RULES: &[DefinitionRule] = &[
    rule("function_item", &["identifier"], "function"),
    rule("function_signature_item", &["identifier"], "function"),
    rule("struct_item", &["type_identifier"], "class"),
    rule("enum_item", &["type_identifier"], "class"),
    rule("union_item", &["type_identifier"], "class"),
    rule("trait_item", &["type_identifier"], "interface"),
    rule("type_item", &["type_identifier"], "type"),
    rule("mod_item", &["identifier"], "module"),
    rule("macro_definition", &["identifier"], "macro"),
    rule("const_item", &["identifier"], "constant"),
    rule("static_item", &["identifier"], "constant"),
];

const PYTHON_RULES: &[DefinitionRule] = &[
    rule("function_definition", &["identifier"], "function"),
    rule("class_definition", &["identifier"], "class"),
];

const JAVASCRIPT_RULES: &[DefinitionRule] = &[
    rule("function_declaration", &["identifier"], "function"),
    rule("generator_function_declaration", &["identifier"], "function"),
    rule("class_declaration", &["identifier"], "class"),
    rule("method_definition", &["property_identifier"], "method"),
    rule_requiring(
        "variable_declarator",
        &["identifier"],
        &["arrow_function", "function_expression", "function"],
        "function",
    ),
];

const TYPESCRIPT_RULES: &[DefinitionRule] = &[
    rule("function_declaration", &["identifier"], "function"),
    rule("generator_function_declaration", &["identifier"], "function"),
    rule("class_declaration", &["type_identifier", "identifier"], "class"),
    rule("abstract_class_declaration", &["type_identifier"], "class"),
    rule("interface_declaration", &["type_identifier"], "interface"),
    rule("type_alias_declaration", &["type_identifier"], "type"),
    rule("enum_declaration", &["identifier"], "class"),
    rule("method_definition", &["property_identifier"], "method"),
    rule("method_signature", &["property_identifier"], "method"),
    rule_requiring(
        "variable_declarator",
        &["identifier"],
        &["arrow_function", "function_expression", "function"],
        "function",
    ),
];

const GO_RULES: &[DefinitionRule] = &[
    rule("function_declaration", &["identifier"], "function"),
    rule("method_declaration", &["field_identifier"], "method"),
    rule("type_spec", &["type_identifier"], "type"),
];

const JAVA_RULES: &[DefinitionRule] = &[
    rule("class_declaration", &["identifier"], "class"),
    rule("interface_declaration", &["identifier"], "interface"),
    rule("enum_declaration", &["identifier"], "class"),
    rule("record_declaration", &["identifier"], "class"),
    rule("method_declaration", &["identifier"], "method"),
    rule("constructor_declaration", &["identifier"], "method"),
];

const C_RULES: &[DefinitionRule] = &[
    rule("function_definition", &["function_declarator", "pointer_declarator"], "function"),
    rule_requiring(
        "struct_specifier",
        &["type_identifier"],
        &["field_declaration_list"],
        "class",
    ),
    rule_requiring(
        "enum_specifier",
        &["type_identifier"],
        &["enumerator_list"],
        "class",
    ),
    rule("type_definition", &["type_identifier"], "type"),
];

const CPP_RULES: &[DefinitionRule] = &[
    rule("function_definition", &["function_declarator", "pointer_declarator"], "function"),
    rule_requiring(
        "class_specifier",
        &["type_identifier"],
        &["field_declaration_list"],
        "class",
    ),
    rule_requiring(
        "struct_specifier",
        &["type_identifier"],
        &["field_declaration_list"],
        "class",
    ),
    rule_requiring(
        "enum_specifier",
        &["type_identifier"],
        &["enumerator_list"],
        "class",
    ),
    rule("namespace_definition", &["namespace_identifier"], "module"),
    rule("type_definition", &["type_identifier"], "type"),
];

const RUBY_RULES: &[DefinitionRule] = &[
    rule("method", &["identifier"], "method"),
    rule("singleton_method", &["identifier"], "method"),
    rule("class", &["constant", "scope_resolution"], "class"),
    rule("module", &["constant", "scope_resolution"], "module"),
];

const PHP_RULES: &[DefinitionRule] = &[
    rule("function_definition", &["name"], "function"),
    rule("method_declaration", &["name"], "method"),
    rule("class_declaration", &["name"], "class"),
    rule("interface_declaration", &["name"], "interface"),
    rule("trait_declaration", &["name"], "interface"),
    rule("enum_declaration", &["name"], "class"),
];

const KOTLIN_RULES: &[DefinitionRule] = &[
    rule("function_declaration", &["simple_identifier", "identifier"], "function"),
    rule("class_declaration", &["type_identifier", "identifier"], "class"),
    rule("object_declaration", &["type_identifier", "identifier"], "class"),
];

const SWIFT_RULES: &[DefinitionRule] = &[
    rule("function_declaration", &["simple_identifier"], "function"),
    rule("class_declaration", &["type_identifier"], "class"),
    rule("protocol_declaration", &["type_identifier"], "interface"),
];

fn rules_for(language: Language) -> &'static [DefinitionRule] {
    match language {
        Language::Rust => RUST_RULES,
        Language::Python => PYTHON_RULES,
        Language::JavaScript => JAVASCRIPT_RULES,
        Language::TypeScript => TYPESCRIPT_RULES,
        Language::Go => GO_RULES,
        Language::Java => JAVA_RULES,
        Language::C => C_RULES,
        Language::Cpp => CPP_RULES,
        Language::Ruby => RUBY_RULES,
        Language::Php => PHP_RULES,
        Language::Kotlin => KOTLIN_RULES,
        Language::Swift => SWIFT_RULES,
        Language::Unknown => &[],
    }
}

/// Node kinds that carry a bare name and count as references outside
/// definition sites.
const NAME_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
    "simple_identifier",
    "constant",
    "name",
];

/// Parent kinds that make a reference a call.
const CALL_KINDS: &[&str] = &[
    "call",
    "call_expression",
    "method_invocation",
    "function_call_expression",
    "member_call_expression",
    "macro_invocation",
];

/// Tree-sitter backed [`StructuralParser`] covering every [`Language`]
/// except `Unknown`.
///
/// # Examples
///
/// ```
/// use atlas_repomap::parser::{StructuralParser, TreeSitterParser};
/// use atlas_repomap::walker::Language;
///
/// let captures = TreeSitterParser::new()
///     .parse(Language::Rust, "fn hello() {}\nfn main() { hello(); }")
///     .unwrap();
/// assert!(captures
///     .iter()
///     .any(|c| c.text == "hello" && c.label == "definition.function"));
/// assert!(captures
///     .iter()
///     .any(|c| c.text == "hello" && c.label == "reference.call"));
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterParser;

impl TreeSitterParser {
    pub fn new() -> Self {
        Self
    }
}

impl StructuralParser for TreeSitterParser {
    fn parse(&self, language: Language, content: &str) -> Result<Vec<Capture>, ParseError> {
        let Some(ts_language) = language.tree_sitter_language() else {
            return Err(ParseError::Unsupported(language.name().to_string()));
        };

        // tree-sitter parsers are not Sync; one per call keeps workers independent
        let mut parser = Parser::new();
        parser
            .set_language(&ts_language)
            .map_err(|e| ParseError::Failed(format!("failed to set language: {e}")))?;

        let Some(tree) = parser.parse(content, None) else {
            return Err(ParseError::Failed("parser produced no tree".into()));
        };

        let mut walker = CaptureWalker {
            source: content.as_bytes(),
            rules: rules_for(language),
            definition_sites: HashSet::new(),
            captures: Vec::new(),
        };
        walker.visit(tree.root_node());

        Ok(walker.captures)
    }
}

struct CaptureWalker<'a> {
    source: &'a [u8],
    rules: &'static [DefinitionRule],
    /// Byte ranges of name nodes already reported as definitions.
    definition_sites: HashSet<(usize, usize)>,
    captures: Vec<Capture>,
}

impl CaptureWalker<'_> {
    fn visit(&mut self, node: Node) {
        let kind = node.kind();

        if let Some(rule) = self.rules.iter().find(|r| r.node == kind) {
            if rule.requires.is_empty() || rule.requires.iter().any(|k| child_has_kind(&node, k)) {
                if let Some(name_node) = definition_name(&node, rule.names) {
                    let text = node_text(&name_node, self.source);
                    if !text.is_empty() {
                        self.definition_sites
                            .insert((name_node.start_byte(), name_node.end_byte()));
                        self.captures.push(Capture {
                            text,
                            label: format!("definition.{}", rule.label),
                            line: name_node.start_position().row as u32,
                        });
                    }
                }
            }
        }

        if NAME_KINDS.contains(&kind)
            && !self
                .definition_sites
                .contains(&(node.start_byte(), node.end_byte()))
        {
            let text = node_text(&node, self.source);
            if is_identifier(&text) {
                self.captures.push(Capture {
                    label: reference_label(&node).to_string(),
                    line: node.start_position().row as u32,
                    text,
                });
            }
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit(child);
        }
    }
}

fn reference_label(node: &Node) -> &'static str {
    let parent_kind = node.parent().map(|p| p.kind());
    match parent_kind {
        Some(p) if CALL_KINDS.contains(&p) => "reference.call",
        Some("impl_item") => "reference.implementation",
        _ if node.kind() == "type_identifier" => "reference.type",
        _ => "reference.identifier",
    }
}

/// Find the node holding a definition's name.
///
/// C-family function names sit inside (possibly pointer-wrapped) declarators.
fn definition_name<'t>(node: &Node<'t>, names: &[&str]) -> Option<Node<'t>> {
    for kind in names {
        let mut cursor = node.walk();
        let found = node.children(&mut cursor).find(|c| c.kind() == *kind);
        if let Some(child) = found {
            return match child.kind() {
                "function_declarator" | "pointer_declarator" => declarator_name(&child),
                _ => Some(child),
            };
        }
    }
    None
}

fn declarator_name<'t>(node: &Node<'t>) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.children(&mut cursor).collect();
    for child in children {
        match child.kind() {
            "identifier" | "field_identifier" => return Some(child),
            "function_declarator" | "pointer_declarator" | "qualified_identifier" => {
                if let Some(found) = declarator_name(&child) {
                    return Some(found);
                }
            }
            _ => {}
        }
    }
    None
}

/// A capture is only useful as an identifier if it is a single word that
/// does not start with a digit.
fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

fn node_text(node: &Node, source: &[u8]) -> String {
    let start = node.start_byte();
    let end = node.end_byte();
    if start >= source.len() || end > source.len() {
        return String::new();
    }
    String::from_utf8_lossy(&source[start..end]).to_string()
}

fn child_has_kind(node: &Node, kind: &str) -> bool {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).any(|c| c.kind() == kind);
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(language: Language, content: &str) -> Vec<Capture> {
        TreeSitterParser::new().parse(language, content).unwrap()
    }

    fn definitions(captures: &[Capture]) -> Vec<&str> {
        captures
            .iter()
            .filter(|c| c.label.starts_with("definition"))
            .map(|c| c.text.as_str())
            .collect()
    }

    fn references(captures: &[Capture]) -> Vec<&str> {
        captures
            .iter()
            .filter(|c| c.label.starts_with("reference"))
            .map(|c| c.text.as_str())
            .collect()
    }

    #[test]
    fn parse_rust_definitions() {
        let captures = parse(
            Language::Rust,
            r#"
pub fn top_level(x: i32) -> bool {
    x > 0
}

pub struct Config {
    name: String,
}

pub enum Color {
    Red,
}

pub trait Drawable {
    fn draw(&self);
}

impl Config {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}
"#,
        );

        let defs = definitions(&captures);
        for expected in ["top_level", "Config", "Color", "Drawable", "draw", "new"] {
            assert!(defs.contains(&expected), "missing {expected}: {defs:?}");
        }

        let top = captures.iter().find(|c| c.text == "top_level").unwrap();
        assert_eq!(top.label, "definition.function");
        assert_eq!(top.line, 1);

        let drawable = captures.iter().find(|c| c.text == "Drawable").unwrap();
        assert_eq!(drawable.label, "definition.interface");

        // `impl Config` names the type without defining it
        assert!(captures
            .iter()
            .any(|c| c.text == "Config" && c.label == "reference.implementation"));
    }

    #[test]
    fn definition_sites_are_not_references() {
        let captures = parse(Language::Python, "def lonely():\n    pass\n");
        assert_eq!(definitions(&captures), vec!["lonely"]);
        assert!(!references(&captures).contains(&"lonely"));
    }

    #[test]
    fn parse_python_calls_as_references() {
        let captures = parse(
            Language::Python,
            r#"
from a import compute_total

class Report:
    def render(self):
        return compute_total([1, 2])
"#,
        );

        let defs = definitions(&captures);
        assert!(defs.contains(&"Report"));
        assert!(defs.contains(&"render"));

        let calls: Vec<&Capture> = captures
            .iter()
            .filter(|c| c.text == "compute_total")
            .collect();
        assert_eq!(calls.len(), 2, "import and call: {calls:?}");
        assert!(calls.iter().any(|c| c.label == "reference.call" && c.line == 5));
    }

    #[test]
    fn parse_typescript_definitions() {
        let captures = parse(
            Language::TypeScript,
            r#"
function greet(name: string): string {
    return `Hello ${name}`;
}

interface Shape {
    area(): number;
}

class Greeter {
    sayHello() {
        greet("x");
    }
}

const add = (a: number, b: number) => a + b;
const limit = 3;
"#,
        );

        let defs = definitions(&captures);
        for expected in ["greet", "Shape", "Greeter", "sayHello", "add"] {
            assert!(defs.contains(&expected), "missing {expected}: {defs:?}");
        }
        assert!(!defs.contains(&"limit"), "plain constants are not functions");
        assert!(references(&captures).contains(&"greet"));
    }

    #[test]
    fn parse_go_definitions() {
        let captures = parse(
            Language::Go,
            r#"
package main

type Server struct {
    port int
}

func (s *Server) Start() error {
    return nil
}

func NewServer() *Server {
    return &Server{}
}
"#,
        );

        let defs = definitions(&captures);
        assert!(defs.contains(&"Server"));
        assert!(defs.contains(&"Start"));
        assert!(defs.contains(&"NewServer"));
        assert!(references(&captures).contains(&"Server"));
    }

    #[test]
    fn parse_c_function_through_pointer_declarator() {
        let captures = parse(
            Language::C,
            r#"
struct node {
    int value;
};

struct node *make_node(int value) {
    return 0;
}

int main(void) {
    make_node(1);
    return 0;
}
"#,
        );

        let defs = definitions(&captures);
        assert!(defs.contains(&"node"), "{defs:?}");
        assert!(defs.contains(&"make_node"), "{defs:?}");
        assert!(defs.contains(&"main"), "{defs:?}");
        assert!(references(&captures).contains(&"make_node"));
    }

    #[test]
    fn parse_java_definitions() {
        let captures = parse(
            Language::Java,
            r#"
public class UserService {
    public UserService() {}
    public User findById(long id) { return null; }
}
"#,
        );

        let defs = definitions(&captures);
        assert!(defs.contains(&"UserService"));
        assert!(defs.contains(&"findById"));
        assert!(references(&captures).contains(&"User"));
    }

    #[test]
    fn parse_ruby_definitions() {
        let captures = parse(
            Language::Ruby,
            r#"
module Billing
  class Invoice
    def total
      42
    end
  end
end
"#,
        );

        let defs = definitions(&captures);
        assert!(defs.contains(&"Billing"));
        assert!(defs.contains(&"Invoice"));
        assert!(defs.contains(&"total"));
    }

    #[test]
    fn syntax_errors_still_give_partial_results() {
        let captures = parse(
            Language::Rust,
            r#"
fn valid_fn() -> bool { true }

fn broken( {

struct ValidStruct {
    x: i32,
}
"#,
        );
        assert!(definitions(&captures).contains(&"valid_fn"));
    }

    #[test]
    fn unknown_language_is_unsupported() {
        let err = TreeSitterParser::new()
            .parse(Language::Unknown, "whatever")
            .unwrap_err();
        assert_eq!(err, ParseError::Unsupported("unknown".into()));
    }

    #[test]
    fn empty_file_has_no_captures() {
        assert!(parse(Language::Rust, "").is_empty());
    }

    #[test]
    fn identifier_filter() {
        assert!(is_identifier("compute_total"));
        assert!(is_identifier("_private"));
        assert!(is_identifier("$scope"));
        assert!(!is_identifier("9lives"));
        assert!(!is_identifier("a::b"));
        assert!(!is_identifier(""));
    }
}
