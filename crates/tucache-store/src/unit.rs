//! Unit handles
//!
//! A handle owns one parsed translation unit together with the exact options
//! it was built from. The options never change after construction; the unit
//! itself is only reachable through [`UnitHandle::lock`].

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tucache_core::{CompletionCandidate, Diagnostic, ParseFlags, Result};
use tucache_parser::TranslationUnit;

/// In-memory buffers keyed by path. Accepted but not honored by the cache.
pub type UnsavedFiles = HashMap<PathBuf, String>;

/// What a caller asks the cache for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRequest {
    /// Source file
    pub path: PathBuf,
    /// Compiler options, order-sensitive
    pub options: Vec<String>,
    /// Identifier of the script the options were derived from
    pub options_script: Option<String>,
}

impl UnitRequest {
    pub fn new<I, S>(path: impl Into<PathBuf>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            path: path.into(),
            options: options.into_iter().map(Into::into).collect(),
            options_script: None,
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.options_script = Some(script.into());
        self
    }
}

/// A cached translation unit
pub struct UnitHandle {
    path: PathBuf,
    options: Vec<String>,
    options_script: Option<String>,
    unit: Mutex<Box<dyn TranslationUnit>>,
}

impl UnitHandle {
    pub(crate) fn new(request: &UnitRequest, unit: Box<dyn TranslationUnit>) -> Self {
        Self {
            path: request.path.clone(),
            options: request.options.clone(),
            options_script: request.options_script.clone(),
            unit: Mutex::new(unit),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Options the unit was built with
    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn options_script(&self) -> Option<&str> {
        self.options_script.as_deref()
    }

    /// Whether the unit was built from exactly these options and script.
    ///
    /// Comparison is order-sensitive.
    pub fn matches(&self, options: &[String], options_script: Option<&str>) -> bool {
        self.options == options && self.options_script.as_deref() == options_script
    }

    /// The request that would rebuild this unit
    pub fn request(&self) -> UnitRequest {
        UnitRequest {
            path: self.path.clone(),
            options: self.options.clone(),
            options_script: self.options_script.clone(),
        }
    }

    /// Exclusive access to the unit, blocking while another thread holds it
    pub fn lock(&self) -> LockedUnit<'_> {
        LockedUnit {
            handle: self,
            unit: self.unit.lock(),
        }
    }

    pub fn try_lock(&self) -> Option<LockedUnit<'_>> {
        self.unit.try_lock().map(|unit| LockedUnit { handle: self, unit })
    }
}

impl std::fmt::Debug for UnitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitHandle")
            .field("path", &self.path)
            .field("options", &self.options)
            .field("options_script", &self.options_script)
            .field("locked", &self.unit.is_locked())
            .finish()
    }
}

/// A locked unit. Unlocks on drop.
pub struct LockedUnit<'a> {
    handle: &'a UnitHandle,
    unit: MutexGuard<'a, Box<dyn TranslationUnit>>,
}

impl LockedUnit<'_> {
    pub fn handle(&self) -> &UnitHandle {
        self.handle
    }

    /// Refresh the unit in place with the options it was built with
    pub fn reparse(&mut self, flags: ParseFlags) -> Result<()> {
        self.unit.reparse(flags)
    }

    pub fn complete_at(
        &mut self,
        line: u32,
        column: u32,
        flags: ParseFlags,
    ) -> Result<Vec<CompletionCandidate>> {
        self.unit
            .complete_at(&self.handle.path, line, column, flags)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.unit.diagnostics()
    }
}
