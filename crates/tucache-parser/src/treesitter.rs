//! Tree-sitter based engine for C
//!
//! Builds units in-process. Compiler options are recorded with the unit but
//! do not change how tree-sitter reads the file.

use std::path::{Path, PathBuf};
use tracing::debug;
use tree_sitter::{Node, Parser as TSParser, Tree};
use tucache_core::{
    ChunkKind, CompletionCandidate, CompletionChunk, CursorKind, Diagnostic, Error, Location,
    ParseFlags, Result, Severity,
};

use crate::{ParseEngine, TranslationUnit};

/// Function parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
}

/// What a top-level declaration declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclarationKind {
    Function {
        return_type: String,
        params: Vec<Parameter>,
    },
    Struct,
    Typedef,
}

/// A declaration offered by completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclarationKind,
    pub location: Location,
}

impl Declaration {
    /// Raw completion candidate for this declaration
    pub fn to_candidate(&self) -> CompletionCandidate {
        match &self.kind {
            DeclarationKind::Function {
                return_type,
                params,
            } => {
                let mut chunks = vec![
                    CompletionChunk::new(ChunkKind::ResultType, return_type.clone()),
                    CompletionChunk::new(ChunkKind::TypedText, self.name.clone()),
                    CompletionChunk::new(ChunkKind::LeftParen, "("),
                ];
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        chunks.push(CompletionChunk::new(ChunkKind::Comma, ", "));
                    }
                    let text = if param.name.is_empty() {
                        param.type_name.clone()
                    } else {
                        format!("{} {}", param.type_name, param.name)
                    };
                    chunks.push(CompletionChunk::new(ChunkKind::Placeholder, text));
                }
                chunks.push(CompletionChunk::new(ChunkKind::RightParen, ")"));
                CompletionCandidate {
                    cursor_kind: CursorKind::FunctionDecl,
                    chunks,
                }
            }
            DeclarationKind::Struct => CompletionCandidate {
                cursor_kind: CursorKind::StructDecl,
                chunks: vec![CompletionChunk::new(ChunkKind::TypedText, self.name.clone())],
            },
            DeclarationKind::Typedef => CompletionCandidate {
                cursor_kind: CursorKind::TypedefDecl,
                chunks: vec![CompletionChunk::new(ChunkKind::TypedText, self.name.clone())],
            },
        }
    }
}

/// Tree-sitter based engine
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeSitterEngine;

impl TreeSitterEngine {
    pub fn new() -> Self {
        Self
    }
}

impl ParseEngine for TreeSitterEngine {
    fn parse(
        &self,
        path: &Path,
        options: &[String],
        flags: ParseFlags,
    ) -> Result<Box<dyn TranslationUnit>> {
        let unit = TreeSitterUnit::build(path, options, flags)?;
        Ok(Box::new(unit))
    }

    fn name(&self) -> &str {
        "tree-sitter"
    }

    fn is_available(&self) -> bool {
        new_parser().is_ok()
    }
}

/// Unit built by [`TreeSitterEngine`]
#[derive(Debug)]
pub struct TreeSitterUnit {
    path: PathBuf,
    options: Vec<String>,
    source: String,
    declarations: Vec<Declaration>,
    diagnostics: Vec<Diagnostic>,
}

impl TreeSitterUnit {
    /// Read and parse `path`
    pub fn build(path: &Path, options: &[String], flags: ParseFlags) -> Result<Self> {
        let mut unit = Self {
            path: path.to_path_buf(),
            options: options.to_vec(),
            source: String::new(),
            declarations: Vec::new(),
            diagnostics: Vec::new(),
        };
        unit.load(flags)?;
        Ok(unit)
    }

    /// Options the unit was built with
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Top-level declarations found in the file
    pub fn declarations(&self) -> &[Declaration] {
        &self.declarations
    }

    fn load(&mut self, flags: ParseFlags) -> Result<()> {
        let source = std::fs::read_to_string(&self.path)?;
        let filename = self.path.to_string_lossy().into_owned();
        debug!(
            "tree-sitter parse of {} (flags {:?}, {} options)",
            filename,
            flags,
            self.options.len()
        );

        let tree = new_parser()?
            .parse(&source, None)
            .ok_or_else(|| Error::Parse(format!("tree-sitter gave up on {}", filename)))?;

        let extractor = Extractor {
            source: &source,
            filename: &filename,
        };
        self.declarations = extractor.declarations(&tree);
        self.diagnostics = extractor.syntax_errors(&tree);
        self.source = source;
        Ok(())
    }
}

impl TranslationUnit for TreeSitterUnit {
    fn reparse(&mut self, flags: ParseFlags) -> Result<()> {
        self.load(flags)
    }

    fn complete_at(
        &mut self,
        path: &Path,
        line: u32,
        column: u32,
        _flags: ParseFlags,
    ) -> Result<Vec<CompletionCandidate>> {
        if path != self.path {
            return Err(Error::Completion(format!(
                "unit for {} cannot complete in {}",
                self.path.display(),
                path.display()
            )));
        }

        let prefix = prefix_at(&self.source, line, column)?;
        let mut matches: Vec<&Declaration> = self
            .declarations
            .iter()
            .filter(|d| d.name.starts_with(prefix))
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(matches.into_iter().map(Declaration::to_candidate).collect())
    }

    fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

fn new_parser() -> Result<TSParser> {
    let mut parser = TSParser::new();
    parser
        .set_language(&tree_sitter_c::LANGUAGE.into())
        .map_err(|e| Error::EngineUnavailable(format!("C grammar: {}", e)))?;
    Ok(parser)
}

/// Identifier typed right before a 1-based cursor position
fn prefix_at(source: &str, line: u32, column: u32) -> Result<&str> {
    if line == 0 || column == 0 {
        return Err(Error::Completion(format!(
            "invalid position {}:{}",
            line, column
        )));
    }
    let text = source
        .lines()
        .nth(line as usize - 1)
        .ok_or_else(|| Error::Completion(format!("line {} is past the end of file", line)))?;

    let mut end = (column as usize - 1).min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let start = text[..end]
        .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .map(|i| i + 1)
        .unwrap_or(0);
    Ok(&text[start..end])
}

struct Extractor<'a> {
    source: &'a str,
    filename: &'a str,
}

impl Extractor<'_> {
    fn declarations(&self, tree: &Tree) -> Vec<Declaration> {
        let mut decls = Vec::new();
        self.visit_node(tree.root_node(), &mut decls);

        // Prototypes and definitions of the same function collapse to one
        let mut seen = std::collections::HashSet::new();
        decls.retain(|d| seen.insert((d.name.clone(), std::mem::discriminant(&d.kind))));
        decls
    }

    fn visit_node(&self, node: Node, decls: &mut Vec<Declaration>) {
        match node.kind() {
            "function_definition" | "declaration" => {
                if let Some(func) = self.extract_function(node) {
                    debug!("Found function: {}", func.name);
                    decls.push(func);
                }
            }
            "struct_specifier" => {
                if let Some(name) = node.child_by_field_name("name") {
                    decls.push(Declaration {
                        name: self.node_text(name),
                        kind: DeclarationKind::Struct,
                        location: self.location(node),
                    });
                }
            }
            "type_definition" => {
                if let Some(name) = node
                    .child_by_field_name("declarator")
                    .and_then(|d| self.declarator_name(d))
                {
                    debug!("Found typedef: {}", name);
                    decls.push(Declaration {
                        name,
                        kind: DeclarationKind::Typedef,
                        location: self.location(node),
                    });
                }
            }
            // Locals are not visible at file scope
            "compound_statement" => return,
            _ => {}
        }

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.visit_node(child, decls);
        }
    }

    fn extract_function(&self, node: Node) -> Option<Declaration> {
        let mut declarator = node.child_by_field_name("declarator")?;
        let mut pointers = 0;
        while declarator.kind() == "pointer_declarator" {
            pointers += 1;
            declarator = declarator.child_by_field_name("declarator")?;
        }
        if declarator.kind() != "function_declarator" {
            return None;
        }

        let name_node = declarator.child_by_field_name("declarator")?;
        if name_node.kind() != "identifier" {
            // Function pointer variables, e.g. `int (*fp)(void)`
            return None;
        }

        let mut return_type = node
            .child_by_field_name("type")
            .map(|t| self.node_text(t))
            .unwrap_or_default();
        return_type.push_str(&"*".repeat(pointers));

        let params = declarator
            .child_by_field_name("parameters")
            .map(|list| self.extract_parameters(list))
            .unwrap_or_default();

        Some(Declaration {
            name: self.node_text(name_node),
            kind: DeclarationKind::Function {
                return_type,
                params,
            },
            location: self.location(node),
        })
    }

    fn extract_parameters(&self, list: Node) -> Vec<Parameter> {
        let mut params = Vec::new();
        let mut cursor = list.walk();
        for param_node in list.children(&mut cursor) {
            if param_node.kind() != "parameter_declaration" {
                continue;
            }
            let mut type_name = param_node
                .child_by_field_name("type")
                .map(|t| self.node_text(t))
                .unwrap_or_default();

            let declarator = param_node.child_by_field_name("declarator");
            if declarator.is_none() && type_name == "void" {
                // `f(void)` takes no parameters
                continue;
            }

            let mut name = String::new();
            if let Some(mut d) = declarator {
                while d.kind() == "pointer_declarator" || d.kind() == "abstract_pointer_declarator"
                {
                    type_name.push('*');
                    match d.child_by_field_name("declarator") {
                        Some(inner) => d = inner,
                        None => break,
                    }
                }
                name = self.declarator_name(d).unwrap_or_default();
            }
            params.push(Parameter { name, type_name });
        }
        params
    }

    fn declarator_name(&self, node: Node) -> Option<String> {
        match node.kind() {
            "identifier" | "type_identifier" | "field_identifier" => Some(self.node_text(node)),
            _ => node
                .child_by_field_name("declarator")
                .and_then(|d| self.declarator_name(d)),
        }
    }

    fn syntax_errors(&self, tree: &Tree) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        if tree.root_node().has_error() {
            self.collect_errors(tree.root_node(), &mut diagnostics);
        }
        diagnostics
    }

    fn collect_errors(&self, node: Node, diagnostics: &mut Vec<Diagnostic>) {
        if node.is_error() || node.is_missing() {
            let message = if node.is_missing() {
                format!("missing {}", node.kind())
            } else {
                "syntax error".to_string()
            };
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                location: Some(self.location(node)),
                message,
            });
            return;
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.has_error() || child.is_missing() {
                self.collect_errors(child, diagnostics);
            }
        }
    }

    fn location(&self, node: Node) -> Location {
        Location::new(
            self.filename,
            node.start_position().row as u32 + 1,
            node.start_position().column as u32 + 1,
        )
    }

    fn node_text(&self, node: Node) -> String {
        node.utf8_text(self.source.as_bytes())
            .unwrap_or("")
            .to_string()
    }
}
