//! Prism CLI - validate and compile declarative queries, evaluate expressions
//!
//! Usage:
//!   prism compile --schema <schema.json> --table <name> --query <query.json> [--dialect <dialect>]
//!   prism validate --schema <schema.json> --table <name> --query <query.json> [--correct]
//!   prism eval --data <rows.json> --expr <expression> [--filter <expr>] [--partition-by <column>]
//!   prism manifest [--file <manifest.json>]
//!
//! Examples:
//!   prism compile --schema shop.json --table orders --query revenue.json --dialect postgres
//!   prism eval --data grades.json --expr "zscore(score)" --partition-by class

use clap::{Parser, Subcommand, ValueEnum};
use prism::config::Settings;
use prism::dsl::{
    compile_pull_query, compile_query, correct_query_with, validate_query_with, ExecutionPath,
    Query,
};
use prism::expression::{evaluate_expression, EvalOptions};
use prism::schema::Schema;
use prism::sql::Dialect;
use prism::transform::{
    build_dependency_map, extract_column_refs, topological_sort, Layer, Manifest, TransformRecord,
};
use prism::value::Row;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prism")]
#[command(about = "Prism - declarative analytic queries and derived columns compiled to SQL")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to $PRISM_CONFIG, ./prism.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a query and compile it to SQL
    Compile {
        /// Path to the schema JSON
        #[arg(long)]
        schema: PathBuf,

        /// Base table of the query
        #[arg(short, long)]
        table: String,

        /// Path to the query JSON
        #[arg(short, long)]
        query: PathBuf,

        /// SQL dialect to generate (defaults to the configured dialect)
        #[arg(short, long)]
        dialect: Option<DialectArg>,
    },

    /// Validate a query against a schema without compiling
    Validate {
        /// Path to the schema JSON
        #[arg(long)]
        schema: PathBuf,

        /// Base table of the query
        #[arg(short, long)]
        table: String,

        /// Path to the query JSON
        #[arg(short, long)]
        query: PathBuf,

        /// Fix misspelled field names before validating
        #[arg(long)]
        correct: bool,
    },

    /// Evaluate an expression over rows
    Eval {
        /// Path to a JSON array of row objects
        #[arg(long)]
        data: PathBuf,

        /// Expression to evaluate
        #[arg(short, long)]
        expr: String,

        /// Only evaluate rows where this expression is true
        #[arg(short, long)]
        filter: Option<String>,

        /// Compute column-wise functions per value of this column
        #[arg(long)]
        partition_by: Option<String>,
    },

    /// Check a derived-column manifest and print its replay order
    Manifest {
        /// Path to the manifest JSON (defaults to `[manifest] path`)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Clone, ValueEnum)]
enum DialectArg {
    Duckdb,
    Postgres,
    Mysql,
    Tsql,
    Sqlite,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Duckdb => Dialect::DuckDb,
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Sqlite => Dialect::Sqlite,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Compile {
            schema,
            table,
            query,
            dialect,
        } => cmd_compile(&settings, &schema, &table, &query, dialect),
        Commands::Validate {
            schema,
            table,
            query,
            correct,
        } => cmd_validate(&settings, &schema, &table, &query, correct),
        Commands::Eval {
            data,
            expr,
            filter,
            partition_by,
        } => cmd_eval(&settings, &data, &expr, filter, partition_by),
        Commands::Manifest { file } => {
            let file = match file {
                Some(file) => file,
                None => match settings.manifest.resolved_path() {
                    Ok(Some(path)) => path,
                    Ok(None) => {
                        eprintln!("No manifest file given and no [manifest] path configured");
                        return ExitCode::FAILURE;
                    }
                    Err(e) => {
                        eprintln!("Configuration error: {}", e);
                        return ExitCode::FAILURE;
                    }
                },
            };
            cmd_manifest(&file)
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Error reading file '{}': {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| format!("Error parsing '{}': {}", path.display(), e))
}

fn cmd_compile(
    settings: &Settings,
    schema: &Path,
    table: &str,
    query: &Path,
    dialect: Option<DialectArg>,
) -> ExitCode {
    let (schema, query): (Schema, Query) = match (read_json(schema), read_json(query)) {
        (Ok(s), Ok(q)) => (s, q),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let dialect = dialect.map(Dialect::from).unwrap_or(settings.query.dialect);

    if let Err(e) = validate_query_with(&schema, table, &query, &settings.validation) {
        eprintln!("Validation error: {}", e);
        return ExitCode::FAILURE;
    }

    let path = ExecutionPath::choose(&query, dialect);
    let result = match path {
        ExecutionPath::Sql => compile_query(&schema, table, &query, dialect),
        ExecutionPath::Fallback | ExecutionPath::FallbackWithWindows => {
            println!(
                "-- {} cannot compute these aggregates; run in-process ({:?}) over:",
                dialect, path
            );
            compile_pull_query(&schema, table, &query, dialect)
        }
    };

    match result {
        Ok(sql) => {
            println!("{}", sql);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_validate(
    settings: &Settings,
    schema: &Path,
    table: &str,
    query: &Path,
    correct: bool,
) -> ExitCode {
    let (schema, mut query): (Schema, Query) = match (read_json(schema), read_json(query)) {
        (Ok(s), Ok(q)) => (s, q),
        (Err(e), _) | (_, Err(e)) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if correct {
        let (corrected, corrections) =
            correct_query_with(&schema, table, &query, &settings.validation);
        for c in &corrections {
            println!("Corrected '{}' -> '{}'", c.original, c.corrected);
        }
        query = corrected;
    }

    match validate_query_with(&schema, table, &query, &settings.validation) {
        Ok(()) => {
            if correct {
                match serde_json::to_string_pretty(&query) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("Error serializing query: {}", e);
                        return ExitCode::FAILURE;
                    }
                }
            }
            println!("OK: query is valid for table '{}'", table);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Validation error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_eval(
    settings: &Settings,
    data: &Path,
    expr: &str,
    filter: Option<String>,
    partition_by: Option<String>,
) -> ExitCode {
    let rows: Vec<Row> = match read_json(data) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let options = EvalOptions {
        filter,
        partition_by,
        ..EvalOptions::from_settings(&settings.evaluation)
    };

    match evaluate_expression(expr, &rows, &options) {
        Ok(evaluation) => match serde_json::to_string_pretty(&evaluation) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error serializing result: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Evaluation error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_manifest(file: &Path) -> ExitCode {
    let manifest = match Manifest::load(file) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("Manifest error in '{}': {}", file.display(), e);
            return ExitCode::FAILURE;
        }
    };

    println!("Manifest: {} (version {})", file.display(), manifest.version);
    for (table, entries) in &manifest.tables {
        // Entries must already be in replay order.
        let records: Vec<TransformRecord> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| {
                TransformRecord::new(
                    &e.column,
                    &e.expr,
                    e.value_type,
                    Layer::Derived,
                    i as u64,
                )
            })
            .collect();
        if let Err(e) = build_dependency_map(&records).and_then(|map| topological_sort(&map)) {
            eprintln!("Table '{}': {}", table, e);
            return ExitCode::FAILURE;
        }
        let defined: Vec<&str> = entries.iter().map(|e| e.column.as_str()).collect();
        for (i, entry) in entries.iter().enumerate() {
            let refs = match extract_column_refs(&entry.expr) {
                Ok(refs) => refs,
                Err(e) => {
                    eprintln!("Table '{}', column '{}': {}", table, entry.column, e);
                    return ExitCode::FAILURE;
                }
            };
            if let Some(column) = refs.iter().find(|r| defined[i + 1..].contains(&r.as_str())) {
                eprintln!(
                    "Table '{}': '{}' references '{}', which is defined later",
                    table, entry.column, column
                );
                return ExitCode::FAILURE;
            }
        }

        println!();
        println!("{}:", table);
        for (i, entry) in entries.iter().enumerate() {
            let partition = entry
                .partition_by
                .as_deref()
                .map(|p| format!(" partitioned by {}", p))
                .unwrap_or_default();
            println!(
                "  {}. {} = {} ({}){}",
                i + 1,
                entry.column,
                entry.expr,
                entry.value_type,
                partition
            );
        }
    }
    ExitCode::SUCCESS
}
