//! tucache CLI
//!
//! Build translation units and query completions from the command line.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tucache_core::config::{Config, EngineKind};
use tucache_core::{CompleteAtArgs, CompletionResult, Diagnostic};
use tucache_store::{TranslationUnitCache, UnitRequest, UnsavedFiles};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "tucache")]
#[command(author, version, about = "Translation unit cache for code completion", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Parse engine (tree-sitter, clang)
    #[arg(short, long, global = true)]
    engine: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a unit and print its diagnostics
    Parse {
        /// Source file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Compiler options
        #[arg(last = true, value_name = "OPTIONS")]
        options: Vec<String>,
    },

    /// Print completions at a position
    Complete {
        /// Source file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Line (1-based)
        #[arg(value_name = "LINE")]
        line: u32,

        /// Column (1-based)
        #[arg(value_name = "COLUMN")]
        column: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Compiler options
        #[arg(last = true, value_name = "OPTIONS")]
        options: Vec<String>,
    },

    /// Parse every source file under a directory
    Warm {
        /// Root directory
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// File extensions to parse
        #[arg(long, value_delimiter = ',', default_value = "c,h")]
        ext: Vec<String>,

        /// Compiler options
        #[arg(last = true, value_name = "OPTIONS")]
        options: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref(), cli.engine.as_deref())?;
    let cache = TranslationUnitCache::from_config(&config)
        .context("failed to start the translation unit cache")?;
    debug!("{:?}", cache);

    match cli.command {
        Commands::Parse { file, options } => cmd_parse(&cache, &file, options)?,
        Commands::Complete {
            file,
            line,
            column,
            format,
            options,
        } => cmd_complete(&cache, &file, line, column, &format, options)?,
        Commands::Warm { dir, ext, options } => cmd_warm(&cache, &dir, &ext, &options)?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>, engine: Option<&str>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(engine) = engine {
        config.parser.engine = engine.parse::<EngineKind>()?;
    }
    Ok(config)
}

fn build(
    cache: &TranslationUnitCache,
    file: &Path,
    options: Vec<String>,
) -> Result<Vec<Diagnostic>> {
    let request = UnitRequest::new(file, options);
    let Some(unit) = cache.get_unit(&request, &UnsavedFiles::new()) else {
        bail!("failed to parse {}", file.display());
    };
    let diagnostics = unit.lock().diagnostics().to_vec();
    Ok(diagnostics)
}

fn cmd_parse(cache: &TranslationUnitCache, file: &Path, options: Vec<String>) -> Result<()> {
    let start = Instant::now();
    let diagnostics = build(cache, file, options)?;

    println!(
        "📂 Parsed {} with {} in {:?}",
        file.display(),
        cache.engine_name(),
        start.elapsed()
    );
    if diagnostics.is_empty() {
        println!("   No diagnostics");
    }
    for diagnostic in &diagnostics {
        print_diagnostic(diagnostic);
    }

    Ok(())
}

fn print_diagnostic(diagnostic: &Diagnostic) {
    match &diagnostic.location {
        Some(location) => println!(
            "   {}: {:?}: {}",
            location, diagnostic.severity, diagnostic.message
        ),
        None => println!("   {:?}: {}", diagnostic.severity, diagnostic.message),
    }
}

fn cmd_complete(
    cache: &TranslationUnitCache,
    file: &Path,
    line: u32,
    column: u32,
    format: &str,
    options: Vec<String>,
) -> Result<()> {
    build(cache, file, options)?;
    let result = cache.complete_at(&CompleteAtArgs::new(file, line, column))?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_completions(&result);
    }

    Ok(())
}

fn print_completions(result: &CompletionResult) {
    if result.is_empty() {
        println!("No completions");
        return;
    }

    for t in &result.types {
        println!("type   {}", t.name);
    }
    for m in &result.methods {
        let params: Vec<&str> = m.parameters.iter().map(|p| p.type_name.as_str()).collect();
        let returns = m
            .returns
            .first()
            .map(|r| r.name.as_str())
            .unwrap_or("void");
        println!("method {} {}({})", returns, m.name, params.join(", "));
    }
}

fn cmd_warm(
    cache: &TranslationUnitCache,
    dir: &Path,
    extensions: &[String],
    options: &[String],
) -> Result<()> {
    let files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|want| want == ext))
        })
        .map(|e| e.into_path())
        .collect();

    println!("📂 Warming {} files under {}", files.len(), dir.display());
    let start = Instant::now();

    let failed: Vec<&PathBuf> = files
        .par_iter()
        .filter(|file| {
            let request = UnitRequest::new(file.as_path(), options.iter().cloned());
            cache.get_unit(&request, &UnsavedFiles::new()).is_none()
        })
        .collect();

    info!("Warmed {} files in {:?}", files.len(), start.elapsed());
    for file in &failed {
        println!("   ⚠️  {}", file.display());
    }

    let stats = cache.stats();
    println!("\n📊 Summary:");
    println!("   Units cached: {}", stats.units);
    println!("   Parses: {}", stats.parses);
    println!("   Failures: {}", stats.failures);
    println!("   Elapsed: {:?}", start.elapsed());

    Ok(())
}
