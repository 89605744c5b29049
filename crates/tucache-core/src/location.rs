//! Source code location types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Represents a location in source code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// File path
    pub file: String,
    /// Line (1-based)
    pub line: u32,
    /// Column (1-based)
    pub column: u32,
}

impl Location {
    /// Create a new location
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A file as the front-end sees it.
///
/// `contents` is empty when the buffer is saved to disk; anything else is an
/// unsaved in-memory buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub name: PathBuf,
    #[serde(default)]
    pub contents: String,
}

impl SourceFile {
    /// A file whose contents live on disk
    pub fn on_disk(name: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            contents: String::new(),
        }
    }

    /// Whether the front-end sent unsaved contents along
    pub fn has_unsaved_contents(&self) -> bool {
        !self.contents.is_empty()
    }
}

/// Cursor position inside a file (1-based line and column)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorLocation {
    pub file: SourceFile,
    pub line: u32,
    pub column: u32,
}

/// Arguments of a completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteAtArgs {
    pub location: CursorLocation,
}

impl CompleteAtArgs {
    /// Completion request against a saved file
    pub fn new(file: impl Into<PathBuf>, line: u32, column: u32) -> Self {
        Self {
            location: CursorLocation {
                file: SourceFile::on_disk(file),
                line,
                column,
            },
        }
    }
}
