//! rqbs CLI - Command line interface for rqbs build descriptions
//!
//! # Usage
//!
//! ```text
//! rqbs resolve <file>                  Resolve a project and print it as JSON
//! rqbs resolve <file> -f yaml          Print the resolved project as YAML
//! rqbs resolve <file> -I dir -D k=v    Add a search path and a property override
//! rqbs parse <file>                    Show the syntax tree of an item or script file
//! rqbs expr <expression>               Evaluate a standalone expression
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use rqbs_runtime::{
    ConflictPolicy, Evaluator, ItemPool, ProjectResolver, PropertyOverrides, ResolveOptions,
};
use rqbs_stdlib::stdlib_registry;

#[derive(Parser)]
#[command(name = "rqbs")]
#[command(author, version, about = "Resolve qbs-style build descriptions", long_about = None)]
struct Cli {
    /// Log more (-v for debug, -vv for trace); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a project or product file
    Resolve {
        /// The project file to resolve
        file: PathBuf,

        /// Additional search path for modules and imports
        #[arg(short = 'I', long = "search-path", value_name = "DIR")]
        search_paths: Vec<PathBuf>,

        /// Property override such as modules.cpp.optimization=fast
        #[arg(short = 'D', long = "define", value_name = "KEY=VALUE")]
        overrides: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,

        /// Treat conflicting module property values as errors
        #[arg(long)]
        strict: bool,

        /// Evaluate products one after another
        #[arg(long)]
        sequential: bool,
    },

    /// Parse a file and show its syntax tree (for debugging)
    Parse {
        /// An item file, or a script file if it ends in `.js`
        file: PathBuf,
    },

    /// Evaluate an expression
    Expr {
        /// The expression to evaluate
        expression: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: OutputFormat,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Yaml,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Resolve {
            file,
            search_paths,
            overrides,
            format,
            strict,
            sequential,
        } => {
            let options = ResolveOptions {
                search_paths,
                overrides: PropertyOverrides::from_assignments(&overrides)?,
                conflict_policy: if strict {
                    ConflictPolicy::Error
                } else {
                    ConflictPolicy::Warn
                },
                parallel: !sequential,
            };
            let resolver = ProjectResolver::new(Arc::new(stdlib_registry()), options);
            tracing::debug!(file = %file.display(), "resolving project");
            let project = resolver.resolve(&file)?;
            println!("{}", render(&project, format)?);
        }

        Commands::Parse { file } => {
            let source = fs::read_to_string(&file)?;
            if file.extension().is_some_and(|ext| ext == "js") {
                let script = rqbs_parser::parse_script(&source)
                    .map_err(|e| format!("Parse error: {}", e))?;
                println!("{:#?}", script);
            } else {
                let ast = rqbs_parser::parse_file(&source)
                    .map_err(|e| format!("Parse error: {}", e))?;
                println!("{:#?}", ast);
            }
        }

        Commands::Expr { expression, format } => {
            let pool = ItemPool::new();
            let evaluator = Evaluator::new(&pool, Arc::new(stdlib_registry()));
            let result = evaluator.evaluate_expression(&expression)?;
            println!("{}", render(&result, format)?);
        }
    }

    Ok(())
}

fn render<T: Serialize>(value: &T, format: OutputFormat) -> Result<String, Box<dyn std::error::Error>> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(value)?,
        OutputFormat::Yaml => serde_yaml::to_string(value)?,
    })
}
