//! Completion queries against cached units

use tracing::{debug, warn};
use tucache_core::{
    ChunkKind, CompleteAtArgs, CompletionCandidate, CompletionResult, CursorKind, Error, Method,
    Result, TypeInfo, TypeKind, Variable,
};

use crate::store::Store;

impl Store {
    /// Complete at a cursor position using the cached unit for the file.
    ///
    /// Only saved files can be completed. A file without a cached unit yields
    /// an empty result.
    pub(crate) fn complete_at(&self, args: &CompleteAtArgs) -> Result<CompletionResult> {
        let location = &args.location;
        if location.file.has_unsaved_contents() {
            return Err(Error::Unsupported(
                "completion of unsaved files is currently not supported".into(),
            ));
        }

        let Some(handle) = self.peek(&location.file.name) else {
            debug!("No unit cached for {}", location.file.name.display());
            return Ok(CompletionResult::default());
        };

        let candidates = handle
            .lock()
            .complete_at(location.line, location.column, self.flags)
            .map_err(|e| match e {
                Error::Completion(_) => e,
                other => Error::Completion(format!("completion results are not valid: {}", other)),
            })?;

        Ok(translate(&candidates))
    }
}

/// Turn raw engine candidates into types and methods
pub fn translate(candidates: &[CompletionCandidate]) -> CompletionResult {
    let mut result = CompletionResult::default();

    for candidate in candidates {
        match candidate.cursor_kind {
            CursorKind::StructDecl | CursorKind::TypedefDecl => {
                let name: String = candidate.chunks.iter().map(|c| c.text.as_str()).collect();
                result.types.push(TypeInfo {
                    name,
                    kind: TypeKind::Class,
                });
            }
            CursorKind::FunctionDecl => result.methods.push(method(candidate)),
            other => warn!("Unimplemented CursorKind: {}", other),
        }
    }

    result
}

fn method(candidate: &CompletionCandidate) -> Method {
    let mut m = Method::default();
    let mut param_started = false;

    for chunk in &candidate.chunks {
        match chunk.kind {
            // The result type is recorded as the return value's name
            ChunkKind::ResultType => m.returns.push(Variable {
                name: chunk.text.clone(),
                type_name: String::new(),
            }),
            ChunkKind::Placeholder => {
                let name = format!("arg{}", m.parameters.len());
                m.parameters.push(Variable {
                    name,
                    type_name: chunk.text.clone(),
                });
            }
            ChunkKind::LeftParen => param_started = true,
            ChunkKind::RightParen | ChunkKind::Comma => {}
            ChunkKind::TypedText => {
                if !param_started {
                    m.name.push_str(&chunk.text);
                }
            }
            other => warn!("Unimplemented CompletionChunkKind: {}", other),
        }
    }

    m
}
