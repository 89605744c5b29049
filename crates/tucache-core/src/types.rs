//! Core type definitions

use crate::location::Location;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flags handed to the parse engine on parse and reparse
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ParseFlags: u32 {
        /// Precompile the preamble (leading includes) of the unit
        const PRECOMPILED_PREAMBLE = 0x04;
        /// Keep completion results cached inside the unit
        const CACHE_COMPLETION_RESULTS = 0x08;
    }
}

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Note,
    Warning,
    Error,
    Fatal,
}

/// Diagnostic reported while building a unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: Option<Location>,
    pub message: String,
}

impl Diagnostic {
    /// Whether the diagnostic prevents a usable unit
    pub fn is_fatal(&self) -> bool {
        self.severity == Severity::Fatal
    }
}

/// Kind of declaration a completion candidate refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CursorKind {
    StructDecl,
    TypedefDecl,
    FunctionDecl,
    VarDecl,
    EnumDecl,
    MacroDefinition,
    NotImplemented,
}

impl std::fmt::Display for CursorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CursorKind::StructDecl => "StructDecl",
            CursorKind::TypedefDecl => "TypedefDecl",
            CursorKind::FunctionDecl => "FunctionDecl",
            CursorKind::VarDecl => "VarDecl",
            CursorKind::EnumDecl => "EnumDecl",
            CursorKind::MacroDefinition => "MacroDefinition",
            CursorKind::NotImplemented => "NotImplemented",
        };
        f.write_str(name)
    }
}

/// Kind of a completion string chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkKind {
    /// The text the user is expected to type
    TypedText,
    /// Plain text inserted as-is
    Text,
    /// Argument placeholder, e.g. the parameter type
    Placeholder,
    /// Informative text, not inserted
    Informative,
    /// Result type of the declaration
    ResultType,
    /// Optional trailing arguments
    Optional,
    LeftParen,
    RightParen,
    Comma,
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A single chunk of a completion string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub kind: ChunkKind,
    pub text: String,
}

impl CompletionChunk {
    pub fn new(kind: ChunkKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

/// Raw completion candidate as produced by a parse engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionCandidate {
    pub cursor_kind: CursorKind,
    pub chunks: Vec<CompletionChunk>,
}

/// Kind of a completed type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeKind {
    Class,
}

/// A type offered as a completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    pub name: String,
    pub kind: TypeKind,
}

/// A named, typed value: a parameter or a return value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub type_name: String,
}

/// A callable offered as a completion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Method {
    pub name: String,
    pub returns: Vec<Variable>,
    pub parameters: Vec<Variable>,
}

/// Completion results in output form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResult {
    pub types: Vec<TypeInfo>,
    pub methods: Vec<Method>,
}

impl CompletionResult {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.methods.is_empty()
    }
}
