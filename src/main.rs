//! revkb CLI: inspect and edit a revisioned triple store.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};

use revkb::config::StoreConfig;
use revkb::engine::Engine;
use revkb::term::{ContextKey, Term, Triple, TriplePattern};

#[derive(Parser)]
#[command(name = "revkb", version, about = "Revisioned, transactional triple store")]
struct Cli {
    /// Data directory for persistent storage.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Maximum number of contexts kept in memory (0 = unbounded).
    #[arg(long, global = true)]
    max_active_contexts: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new revkb data directory.
    Init,

    /// Add one triple and commit it.
    Add {
        /// Subject in N-Triples syntax, e.g. "<http://ex/s>".
        subject: String,
        /// Predicate in N-Triples syntax.
        predicate: String,
        /// Object in N-Triples syntax.
        object: String,
        /// Context name (default context when omitted).
        #[arg(long)]
        context: Option<String>,
    },

    /// Remove every triple matching a pattern and commit.
    Remove {
        #[command(flatten)]
        pattern: PatternArgs,
        /// Context name (default context when omitted).
        #[arg(long)]
        context: Option<String>,
    },

    /// List triples matching a pattern.
    Query {
        #[command(flatten)]
        pattern: PatternArgs,
        /// Restrict to one context.
        #[arg(long)]
        context: Option<String>,
        /// Restrict to the default context.
        #[arg(long, conflicts_with = "context")]
        default_context: bool,
    },

    /// List contexts holding at least one triple.
    Contexts,

    /// Show the revision history of a context.
    Log {
        #[arg(long)]
        context: Option<String>,
    },

    /// Compact the history of a context into a single revision.
    Collapse {
        #[arg(long)]
        context: Option<String>,
    },

    /// Import triples from a JSON file in one commit.
    Import {
        /// Path to a JSON array of {"s", "p", "o", "context"?} objects.
        #[arg(long)]
        file: PathBuf,
    },

    /// Export all triples as JSON.
    Export,

    /// Show store info and statistics.
    Info,
}

#[derive(clap::Args)]
struct PatternArgs {
    /// Subject (N-Triples syntax); wildcard when omitted.
    #[arg(long = "s")]
    subject: Option<String>,
    /// Predicate (N-Triples syntax); wildcard when omitted.
    #[arg(long = "p")]
    predicate: Option<String>,
    /// Object (N-Triples syntax); wildcard when omitted.
    #[arg(long = "o")]
    object: Option<String>,
}

impl PatternArgs {
    fn to_pattern(&self) -> Result<TriplePattern> {
        let slot = |s: &Option<String>| -> Result<Option<Term>> {
            s.as_deref()
                .map(Term::parse)
                .transpose()
                .into_diagnostic()
        };
        Ok(TriplePattern::new(
            slot(&self.subject)?,
            slot(&self.predicate)?,
            slot(&self.object)?,
        ))
    }
}

/// One row of the JSON import/export format. Terms use N-Triples syntax.
#[derive(Serialize, Deserialize)]
struct TripleRow {
    s: String,
    p: String,
    o: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    context: Option<String>,
}

impl TripleRow {
    fn from_triple(triple: &Triple, context: &ContextKey) -> Self {
        Self {
            s: triple.subject.to_string(),
            p: triple.predicate.to_string(),
            o: triple.object.to_string(),
            context: context.name().map(str::to_string),
        }
    }

    fn to_triple(&self) -> Result<Triple> {
        Ok(Triple::new(
            Term::parse(&self.s).into_diagnostic()?,
            Term::parse(&self.p).into_diagnostic()?,
            Term::parse(&self.o).into_diagnostic()?,
        ))
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => StoreConfig::load(path)?,
        None => StoreConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(max) = cli.max_active_contexts {
        config.max_active_contexts = max;
    }

    match cli.command {
        Commands::Init => {
            let engine = Engine::open(config.with_create(true))?;
            println!("Initialized revkb at {}", engine.config().data_dir.display());
            print!("{}", engine.info()?);
            engine.close()?;
        }

        Commands::Add {
            subject,
            predicate,
            object,
            context,
        } => {
            let engine = Engine::open(config)?;
            let triple = Triple::new(
                Term::parse(&subject).into_diagnostic()?,
                Term::parse(&predicate).into_diagnostic()?,
                Term::parse(&object).into_diagnostic()?,
            );
            let context = ContextKey::from(context);
            engine.add(triple.clone(), &context)?;
            let summary = engine.commit()?;
            println!(
                "Added {triple} to {context} ({} revision(s) written)",
                summary.revisions
            );
            engine.close()?;
        }

        Commands::Remove { pattern, context } => {
            let engine = Engine::open(config)?;
            let context = ContextKey::from(context);
            let removed = engine.remove(&pattern.to_pattern()?, &context)?;
            engine.commit()?;
            println!("Removed {removed} triple(s) from {context}");
            engine.close()?;
        }

        Commands::Query {
            pattern,
            context,
            default_context,
        } => {
            let engine = Engine::open(config)?;
            let scope = if default_context {
                Some(ContextKey::unnamed())
            } else {
                context.map(ContextKey::named)
            };
            let mut count = 0;
            for row in engine.triples(&pattern.to_pattern()?, scope.as_ref()) {
                let (triple, context) = row?;
                println!("{triple} {context}");
                count += 1;
            }
            println!("{count} match(es)");
            engine.close()?;
        }

        Commands::Contexts => {
            let engine = Engine::open(config)?;
            let contexts = engine.contexts(None)?;
            if contexts.is_empty() {
                println!("No contexts.");
            } else {
                println!("Contexts ({}):", contexts.len());
                for context in &contexts {
                    println!("  {context}  {} triple(s)", engine.len(context)?);
                }
            }
            engine.close()?;
        }

        Commands::Log { context } => {
            let engine = Engine::open(config)?;
            let context = ContextKey::from(context);
            let history = engine.history(&context)?;
            if history.is_empty() {
                println!("No revisions for {context}.");
            } else {
                println!("Revisions of {context} ({}):", history.len());
                for rev in &history {
                    println!("  {:>6}  {:<6}  {} bytes", rev.index, rev.kind.as_str(), rev.bytes);
                }
            }
            engine.close()?;
        }

        Commands::Collapse { context } => {
            let engine = Engine::open(config)?;
            let context = ContextKey::from(context);
            let before = engine.history(&context)?.len();
            match engine.collapse(&context)? {
                Some(index) => {
                    println!("Collapsed {before} revision(s) of {context} into revision {index}")
                }
                None => println!("{context} is empty; removed {before} revision(s)"),
            }
            engine.close()?;
        }

        Commands::Import { file } => {
            let engine = Engine::open(config)?;
            let content = std::fs::read_to_string(&file).into_diagnostic()?;
            let rows: Vec<TripleRow> = serde_json::from_str(&content).into_diagnostic()?;
            for row in &rows {
                engine.add(row.to_triple()?, &ContextKey::from(row.context.clone()))?;
            }
            let summary = engine.commit()?;
            println!(
                "Imported {} triple(s) from {} ({} revision(s) across {} context(s))",
                rows.len(),
                file.display(),
                summary.revisions,
                summary.contexts
            );
            engine.close()?;
        }

        Commands::Export => {
            let engine = Engine::open(config)?;
            let mut rows = Vec::new();
            for row in engine.triples(&TriplePattern::any(), None) {
                let (triple, context) = row?;
                rows.push(TripleRow::from_triple(&triple, &context));
            }
            let json = serde_json::to_string_pretty(&rows).into_diagnostic()?;
            println!("{json}");
            engine.close()?;
        }

        Commands::Info => {
            let engine = Engine::open(config)?;
            print!("{}", engine.info()?);
            engine.close()?;
        }
    }

    Ok(())
}
