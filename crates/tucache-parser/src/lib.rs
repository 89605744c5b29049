//! tucache Parser
//!
//! Parse engines that turn a source file plus compiler options into a
//! translation unit that can later answer completion queries.
//!
//! ## Modules
//!
//! - `treesitter` - In-process C parsing using tree-sitter
//! - `clang` - Units backed by the clang executable
//! - `mock` - Scripted engine for tests (feature `mock`)

pub mod clang;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod treesitter;

use std::path::Path;
use tucache_core::config::{EngineKind, ParserConfig};
use tucache_core::{CompletionCandidate, Diagnostic, ParseFlags, Result};

/// A parsed source file.
///
/// Mutating methods take `&mut self`; callers serialize access.
pub trait TranslationUnit: Send {
    /// Refresh the unit from disk using the options it was built with
    fn reparse(&mut self, flags: ParseFlags) -> Result<()>;

    /// Completion candidates at a 1-based line and column
    fn complete_at(
        &mut self,
        path: &Path,
        line: u32,
        column: u32,
        flags: ParseFlags,
    ) -> Result<Vec<CompletionCandidate>>;

    /// Diagnostics from the most recent parse or reparse
    fn diagnostics(&self) -> &[Diagnostic];
}

/// Builds translation units.
///
/// `parse` may be slow and is called concurrently for different paths.
pub trait ParseEngine: Send + Sync {
    /// Parse a file with the given ordered compiler options
    fn parse(
        &self,
        path: &Path,
        options: &[String],
        flags: ParseFlags,
    ) -> Result<Box<dyn TranslationUnit>>;

    /// Get engine name
    fn name(&self) -> &str;

    /// Check if engine is available
    fn is_available(&self) -> bool;
}

/// Get the engine selected by the configuration
pub fn get_engine(config: &ParserConfig) -> Result<Box<dyn ParseEngine>> {
    match config.engine {
        EngineKind::TreeSitter => Ok(Box::new(treesitter::TreeSitterEngine::new())),
        EngineKind::Clang => {
            let engine = match &config.clang_path {
                Some(path) => clang::ClangEngine::with_path(path.clone()),
                None => clang::ClangEngine::new()?,
            };
            Ok(Box::new(engine))
        }
    }
}
