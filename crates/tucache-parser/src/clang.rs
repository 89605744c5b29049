//! Clang Integration
//!
//! Units backed by the clang executable. A parse is a `-fsyntax-only` run
//! that validates the file under the unit's options; completion uses
//! clang's `-code-completion-at` mode and reads its `COMPLETION:` lines.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::OnceLock;
use tracing::{debug, warn};
use tucache_core::{
    ChunkKind, CompletionCandidate, CompletionChunk, CursorKind, Diagnostic, Error, Location,
    ParseFlags, Result, Severity,
};

use crate::{ParseEngine, TranslationUnit};

/// Clang engine
#[derive(Debug, Clone)]
pub struct ClangEngine {
    /// Path to clang executable
    clang_path: PathBuf,
}

impl ClangEngine {
    /// Create a new engine, auto-detecting clang location
    pub fn new() -> Result<Self> {
        let clang_path = Self::find_clang()?;
        debug!("Found clang at: {:?}", clang_path);
        Ok(Self { clang_path })
    }

    /// Create an engine with a specific clang path
    pub fn with_path(clang_path: PathBuf) -> Self {
        Self { clang_path }
    }

    /// Find clang executable
    fn find_clang() -> Result<PathBuf> {
        let candidates = [
            "clang",
            "/usr/bin/clang",
            "/usr/local/bin/clang",
            "/opt/homebrew/bin/clang",
            "/opt/homebrew/opt/llvm/bin/clang",
        ];

        for candidate in candidates {
            if let Ok(output) = Command::new(candidate).arg("--version").output() {
                if output.status.success() {
                    return Ok(PathBuf::from(candidate));
                }
            }
        }

        Err(Error::EngineUnavailable(
            "clang not found, please install clang".into(),
        ))
    }

    /// Get clang version
    pub fn version(&self) -> Option<String> {
        Command::new(&self.clang_path)
            .arg("--version")
            .output()
            .ok()
            .and_then(|o| {
                String::from_utf8(o.stdout)
                    .ok()
                    .and_then(|s| s.lines().next().map(|l| l.to_string()))
            })
    }
}

impl ParseEngine for ClangEngine {
    fn parse(
        &self,
        path: &Path,
        options: &[String],
        flags: ParseFlags,
    ) -> Result<Box<dyn TranslationUnit>> {
        let mut unit = ClangUnit {
            clang_path: self.clang_path.clone(),
            path: path.to_path_buf(),
            options: options.to_vec(),
            diagnostics: Vec::new(),
        };
        unit.reparse(flags)?;
        Ok(Box::new(unit))
    }

    fn name(&self) -> &str {
        "clang"
    }

    fn is_available(&self) -> bool {
        Command::new(&self.clang_path)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

/// Unit built by [`ClangEngine`]
#[derive(Debug)]
pub struct ClangUnit {
    clang_path: PathBuf,
    path: PathBuf,
    options: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl ClangUnit {
    fn run(&self, extra: &[String]) -> Result<Output> {
        let output = Command::new(&self.clang_path)
            .arg("-fsyntax-only")
            .args(extra)
            .args(&self.options)
            .arg(&self.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;
        Ok(output)
    }
}

impl TranslationUnit for ClangUnit {
    fn reparse(&mut self, flags: ParseFlags) -> Result<()> {
        if !self.path.exists() {
            return Err(Error::Parse(format!(
                "file not found: {}",
                self.path.display()
            )));
        }

        debug!(
            "clang -fsyntax-only {:?} {} (flags {:?})",
            self.options,
            self.path.display(),
            flags
        );
        let output = self.run(&[])?;
        let diagnostics = parse_diagnostics(&String::from_utf8_lossy(&output.stderr));

        if let Some(fatal) = diagnostics.iter().find(|d| d.is_fatal()) {
            return Err(Error::Parse(fatal.message.clone()));
        }
        if !output.status.success() {
            debug!(
                "{} has {} errors",
                self.path.display(),
                diagnostics
                    .iter()
                    .filter(|d| d.severity == Severity::Error)
                    .count()
            );
        }

        self.diagnostics = diagnostics;
        Ok(())
    }

    fn complete_at(
        &mut self,
        path: &Path,
        line: u32,
        column: u32,
        _flags: ParseFlags,
    ) -> Result<Vec<CompletionCandidate>> {
        let extra = vec![
            "-Xclang".to_string(),
            format!("-code-completion-at={}:{}:{}", path.display(), line, column),
        ];
        let output = self.run(&extra)?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if stdout.trim().is_empty() && !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Completion(stderr.trim().to_string()));
        }

        Ok(parse_completion_output(&stdout))
    }

    fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

fn diagnostic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(.+?):(\d+):(\d+): (note|warning|error|fatal error): (.*)$")
            .expect("diagnostic pattern")
    })
}

fn completion_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^COMPLETION: (\S+)(?: : (.*))?$").expect("completion pattern"))
}

/// Parse clang diagnostics from stderr
pub fn parse_diagnostics(stderr: &str) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for line in stderr.lines() {
        if let Some(caps) = diagnostic_regex().captures(line) {
            let severity = match &caps[4] {
                "note" => Severity::Note,
                "warning" => Severity::Warning,
                "error" => Severity::Error,
                _ => Severity::Fatal,
            };
            diagnostics.push(Diagnostic {
                severity,
                location: Some(Location::new(
                    &caps[1],
                    caps[2].parse().unwrap_or(0),
                    caps[3].parse().unwrap_or(0),
                )),
                message: caps[5].to_string(),
            });
        } else if let Some(message) = line.strip_prefix("clang: error: ") {
            // Driver errors such as an unknown argument carry no location
            diagnostics.push(Diagnostic {
                severity: Severity::Fatal,
                location: None,
                message: message.to_string(),
            });
        }
    }

    diagnostics
}

/// Parse the stdout of a `-code-completion-at` run into raw candidates.
///
/// Lines look like `COMPLETION: add : [#int#]add(<#int a#>, <#int b#>)`.
/// Keyword patterns (`COMPLETION: Pattern : ...`) are skipped.
pub fn parse_completion_output(stdout: &str) -> Vec<CompletionCandidate> {
    let mut candidates = Vec::new();

    for line in stdout.lines() {
        let Some(caps) = completion_regex().captures(line) else {
            continue;
        };
        let name = &caps[1];
        if name == "Pattern" {
            continue;
        }

        let chunks = match caps.get(2) {
            Some(pattern) => parse_completion_string(pattern.as_str()),
            None => vec![CompletionChunk::new(ChunkKind::TypedText, name)],
        };
        candidates.push(CompletionCandidate {
            cursor_kind: infer_cursor_kind(&chunks),
            chunks,
        });
    }

    candidates
}

/// Clang's printed completion strings drop the cursor kind; callables are
/// recognised by their parameter list, result-typed names are variables and
/// the rest are type names.
fn infer_cursor_kind(chunks: &[CompletionChunk]) -> CursorKind {
    let has_paren = chunks.iter().any(|c| c.kind == ChunkKind::LeftParen);
    let has_result = chunks.iter().any(|c| c.kind == ChunkKind::ResultType);
    match (has_paren, has_result) {
        (true, _) => CursorKind::FunctionDecl,
        (false, true) => CursorKind::VarDecl,
        (false, false) => CursorKind::TypedefDecl,
    }
}

/// Split one printed completion string into chunks
fn parse_completion_string(pattern: &str) -> Vec<CompletionChunk> {
    let mut chunks = Vec::new();
    let mut text = String::new();
    let mut seen_typed = false;
    let mut rest = pattern;

    let flush = |text: &mut String, chunks: &mut Vec<CompletionChunk>, seen_typed: &mut bool| {
        if text.is_empty() {
            return;
        }
        let kind = if *seen_typed {
            ChunkKind::Text
        } else {
            *seen_typed = true;
            ChunkKind::TypedText
        };
        chunks.push(CompletionChunk::new(kind, std::mem::take(text)));
    };

    while let Some(c) = rest.chars().next() {
        if let Some(after) = rest.strip_prefix("[#") {
            flush(&mut text, &mut chunks, &mut seen_typed);
            let (inner, tail) = split_marker(after, "#]");
            chunks.push(CompletionChunk::new(ChunkKind::ResultType, inner));
            rest = tail;
        } else if let Some(after) = rest.strip_prefix("<#") {
            flush(&mut text, &mut chunks, &mut seen_typed);
            let (inner, tail) = split_marker(after, "#>");
            chunks.push(CompletionChunk::new(ChunkKind::Placeholder, inner));
            rest = tail;
        } else if let Some(after) = rest.strip_prefix("{#") {
            flush(&mut text, &mut chunks, &mut seen_typed);
            let (inner, tail) = split_optional(after);
            chunks.push(CompletionChunk::new(ChunkKind::Optional, inner));
            rest = tail;
        } else if rest.starts_with(", ") {
            flush(&mut text, &mut chunks, &mut seen_typed);
            chunks.push(CompletionChunk::new(ChunkKind::Comma, ", "));
            rest = &rest[2..];
        } else if c == '(' || c == ')' {
            flush(&mut text, &mut chunks, &mut seen_typed);
            let kind = if c == '(' {
                ChunkKind::LeftParen
            } else {
                ChunkKind::RightParen
            };
            chunks.push(CompletionChunk::new(kind, c.to_string()));
            rest = &rest[1..];
        } else {
            text.push(c);
            rest = &rest[c.len_utf8()..];
        }
    }
    flush(&mut text, &mut chunks, &mut seen_typed);

    chunks
}

fn split_marker<'a>(s: &'a str, close: &str) -> (&'a str, &'a str) {
    match s.find(close) {
        Some(end) => (&s[..end], &s[end + close.len()..]),
        None => {
            warn!("Unterminated completion marker in {:?}", s);
            (s, "")
        }
    }
}

/// Optional chunks nest, e.g. `{#, <#int b#>{#, <#int c#>#}#}`
fn split_optional(s: &str) -> (String, &str) {
    let mut depth = 1;
    let mut i = 0;
    while i < s.len() {
        let tail = &s[i..];
        if tail.starts_with("{#") {
            depth += 1;
            i += 2;
        } else if tail.starts_with("#}") {
            depth -= 1;
            if depth == 0 {
                let inner = strip_markers(&s[..i]);
                return (inner, &s[i + 2..]);
            }
            i += 2;
        } else {
            i += tail.chars().next().map(char::len_utf8).unwrap_or(1);
        }
    }
    warn!("Unterminated optional chunk in {:?}", s);
    (strip_markers(s), "")
}

fn strip_markers(s: &str) -> String {
    ["{#", "#}", "<#", "#>", "[#", "#]"]
        .iter()
        .fold(s.to_string(), |acc, m| acc.replace(m, ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_function_completion() {
        let out = "COMPLETION: add : [#int#]add(<#int a#>, <#int b#>)\n";
        let candidates = parse_completion_output(out);

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].cursor_kind, CursorKind::FunctionDecl);
        assert_eq!(
            candidates[0].chunks,
            vec![
                CompletionChunk::new(ChunkKind::ResultType, "int"),
                CompletionChunk::new(ChunkKind::TypedText, "add"),
                CompletionChunk::new(ChunkKind::LeftParen, "("),
                CompletionChunk::new(ChunkKind::Placeholder, "int a"),
                CompletionChunk::new(ChunkKind::Comma, ", "),
                CompletionChunk::new(ChunkKind::Placeholder, "int b"),
                CompletionChunk::new(ChunkKind::RightParen, ")"),
            ]
        );
    }

    #[test]
    fn test_parse_mixed_completion_output() {
        let out = "\
COMPLETION: Pattern : sizeof(<#expression-or-type#>)
COMPLETION: counter : [#int#]counter
COMPLETION: point_t : point_t
COMPLETION: lonely
COMPLETION: vlog : [#void#]vlog(<#const char *fmt#>{#, <#int level#>{#, <#int flags#>#}#})
not a completion line
";
        let candidates = parse_completion_output(out);
        let kinds: Vec<_> = candidates.iter().map(|c| c.cursor_kind).collect();

        assert_eq!(
            kinds,
            vec![
                CursorKind::VarDecl,
                CursorKind::TypedefDecl,
                CursorKind::TypedefDecl,
                CursorKind::FunctionDecl,
            ]
        );
        assert_eq!(
            candidates[2].chunks,
            vec![CompletionChunk::new(ChunkKind::TypedText, "lonely")]
        );

        let optional = candidates[3]
            .chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Optional)
            .unwrap();
        assert_eq!(optional.text, ", int level, int flags");
        assert_eq!(candidates[3].chunks.last().unwrap().kind, ChunkKind::RightParen);
    }

    #[test]
    fn test_parse_diagnostics() {
        let stderr = "\
a.cc:3:5: error: use of undeclared identifier 'x'
a.cc:1:10: fatal error: 'missing.h' file not found
   3 | int y = x;
clang: error: unknown argument: '-fbogus'
";
        let diagnostics = parse_diagnostics(stderr);

        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics[0].severity, Severity::Error);
        assert_eq!(diagnostics[0].location, Some(Location::new("a.cc", 3, 5)));
        assert!(diagnostics[1].is_fatal());
        assert_eq!(diagnostics[1].message, "'missing.h' file not found");
        assert!(diagnostics[2].is_fatal());
        assert_eq!(diagnostics[2].location, None);
    }

    #[test]
    fn test_missing_clang_is_unavailable() {
        let engine = ClangEngine::with_path(PathBuf::from("/nonexistent/clang"));
        assert!(!engine.is_available());
        assert!(engine.version().is_none());
    }

    #[test]
    fn test_missing_file_fails_parse() {
        let engine = ClangEngine::with_path(PathBuf::from("clang"));
        let result = engine.parse(
            Path::new("/nonexistent/missing.c"),
            &["-std=c11".to_string()],
            ParseFlags::empty(),
        );
        assert!(matches!(result, Err(Error::Parse(_))));
    }
}
