//! pgadvise: PostgreSQL diagnostic advisor CLI
//!
//! # Usage
//!
//! ```bash
//! # Offline: statement template and index candidate
//! pgadvise normalize "SELECT * FROM users WHERE id = 42"
//! pgadvise extract --table orders "SELECT * FROM orders WHERE customer_id = 5 ORDER BY created_at DESC"
//!
//! # Against a database
//! export PGADVISE_DATABASE_URL=postgres://localhost/app
//! pgadvise explain "SELECT * FROM orders WHERE total > 100"
//! pgadvise slow-queries --top 10
//! pgadvise suggest --table orders --sql "SELECT * FROM orders WHERE customer_id = $1"
//!
//! # JSON-RPC tool server on stdin/stdout
//! pgadvise serve
//! ```

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use pgadvise::advisor::{ExplainReport, IndexSuggestions};
use pgadvise::extract::{PredicateSets, SortDirection};
use pgadvise::prelude::*;
use pgadvise::rpc::{serve, Dispatcher};
use pgadvise::stats::{NPlusOneReport, SlowQueries, StatsOutcome, StatsUnavailable};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pgadvise")]
#[command(version)]
#[command(about = "PostgreSQL plan, statistics and index advisor", long_about = None)]
#[command(after_help = "EXAMPLES:
    pgadvise normalize \"SELECT * FROM users WHERE id = 42\"
    pgadvise extract --table orders \"SELECT * FROM orders o WHERE o.customer_id = 5\"
    pgadvise n-plus-one --min-calls 100
    pgadvise suggest --table orders --sql \"SELECT * FROM orders WHERE status = 'open'\"")]
struct Cli {
    /// Database connection URL
    #[arg(long, global = true, env = "PGADVISE_DATABASE_URL")]
    database_url: Option<String>,

    /// Config file (defaults to <config dir>/pgadvise/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Verbose output (debug logging on stderr)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace literals with placeholders
    Normalize {
        /// SQL statement
        sql: String,
    },
    /// Show detected predicate columns and the index candidate
    Extract {
        /// SQL statement
        sql: String,
        /// Target table for the candidate
        #[arg(short, long)]
        table: Option<String>,
    },
    /// EXPLAIN a statement and report its hotspot
    Explain {
        /// SQL statement
        sql: String,
        /// Execute the statement (EXPLAIN ANALYZE)
        #[arg(long)]
        analyze: bool,
        /// Leave out buffer usage
        #[arg(long)]
        no_buffers: bool,
        /// Leave out per-node timing
        #[arg(long)]
        no_timing: bool,
    },
    /// Slowest statements by mean time
    SlowQueries {
        #[arg(long)]
        top: Option<i64>,
    },
    /// Statements that look like N+1 lookups
    NPlusOne {
        #[arg(long)]
        min_calls: Option<i64>,
        #[arg(long)]
        max_avg_rows: Option<f64>,
        #[arg(long)]
        min_mean_ms: Option<f64>,
    },
    /// Propose (and validate) a composite index
    Suggest {
        /// Target table
        #[arg(short, long)]
        table: String,
        /// Sample statement
        #[arg(short, long)]
        sql: String,
        /// Skip hypothetical index validation
        #[arg(long)]
        no_validate: bool,
    },
    /// Serve JSON-RPC tools over stdin/stdout
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("PGADVISE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = AdvisorConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database_url = Some(url);
    }
    let format = cli.format;

    match cli.command {
        Commands::Normalize { sql } => {
            let template = normalize(&sql);
            match format {
                OutputFormat::Json => print_json(&template)?,
                OutputFormat::Table => println!("{}", template.as_str().white()),
            }
        }
        Commands::Extract { sql, table } => {
            let proposal = Advisor::default().propose(table.as_deref(), &sql);
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "explanation": proposal.explanation,
                    "candidate": proposal.candidate,
                }))?,
                OutputFormat::Table => {
                    print_predicates(&proposal.explanation.predicates);
                    if let Some(alias) = &proposal.explanation.target_alias {
                        println!("  {} {}", "Alias:".dimmed(), alias.cyan());
                    }
                    println!();
                    match proposal.candidate {
                        Some(candidate) => {
                            println!("{}", "Candidate:".green().bold());
                            println!("  {}", candidate.to_sql().white());
                        }
                        None if table.is_none() => {
                            println!("{}", "Pass --table to get an index candidate".yellow());
                        }
                        None => println!("{}", "(no usable columns)".dimmed()),
                    }
                }
            }
        }
        Commands::Explain {
            sql,
            analyze,
            no_buffers,
            no_timing,
        } => {
            let options = ExplainOptions {
                analyze,
                buffers: !no_buffers,
                timing: !no_timing,
            };
            let mut sessions = open(&config).await?;
            let report = explain(sessions.session_mut()?, &sql, options).await?;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Table => print_explain(&report),
            }
            sessions.close().await?;
        }
        Commands::SlowQueries { top } => {
            let top = top.unwrap_or(config.slow_queries.top);
            if top < 1 {
                return Err(anyhow!("--top must be at least 1"));
            }
            let mut sessions = open(&config).await?;
            let outcome = slow_queries(sessions.session_mut()?, top).await;
            match format {
                OutputFormat::Json => print_json(&outcome)?,
                OutputFormat::Table => print_slow_queries(&outcome),
            }
            sessions.close().await?;
        }
        Commands::NPlusOne {
            min_calls,
            max_avg_rows,
            min_mean_ms,
        } => {
            let defaults = config.n_plus_one;
            let thresholds = NPlusOneThresholds {
                min_calls: min_calls.unwrap_or(defaults.min_calls),
                max_avg_rows: max_avg_rows.unwrap_or(defaults.max_avg_rows),
                min_mean_ms: min_mean_ms.unwrap_or(defaults.min_mean_ms),
            };
            let mut sessions = open(&config).await?;
            let outcome = n_plus_one_suspicions(sessions.session_mut()?, thresholds).await;
            match format {
                OutputFormat::Json => print_json(&outcome)?,
                OutputFormat::Table => print_n_plus_one(&outcome),
            }
            sessions.close().await?;
        }
        Commands::Suggest {
            table,
            sql,
            no_validate,
        } => {
            let mut request = IndexRequest::new(table, sql);
            if no_validate || !config.validate_with_hypopg {
                request = request.without_validation();
            }
            let mut sessions = open(&config).await?;
            let report = Advisor::default()
                .index_suggestions(sessions.session_mut()?, &request)
                .await;
            match format {
                OutputFormat::Json => print_json(&report)?,
                OutputFormat::Table => print_suggestions(&report),
            }
            sessions.close().await?;
        }
        Commands::Serve => {
            let url = config.database_url.clone();
            let mut dispatcher = Dispatcher::new(config);
            if let Some(url) = url {
                if let Err(e) = dispatcher.sessions_mut().connect(&url).await {
                    warn!("Initial connect failed: {}", e);
                }
            }
            serve(
                &mut dispatcher,
                BufReader::new(tokio::io::stdin()),
                tokio::io::stdout(),
            )
            .await?;
        }
    }

    Ok(())
}

async fn open(config: &AdvisorConfig) -> Result<SessionManager> {
    let url = config.database_url.as_deref().ok_or_else(|| {
        anyhow!("No database URL. Use --database-url or set PGADVISE_DATABASE_URL")
    })?;
    let mut sessions = SessionManager::new(config.auto_enable_extensions);
    sessions
        .connect(url)
        .await
        .with_context(|| format!("connecting to {}", redact(url)))?;
    Ok(sessions)
}

/// Hide the password part of a connection URL.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            let userinfo = &url[scheme + 3..at];
            match userinfo.split_once(':') {
                Some((user, _)) => format!("{}{}:***{}", &url[..scheme + 3], user, &url[at..]),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn joined(items: impl IntoIterator<Item = String>) -> String {
    let items: Vec<String> = items.into_iter().collect();
    if items.is_empty() {
        "-".to_string()
    } else {
        items.join(", ")
    }
}

fn print_predicates(sets: &PredicateSets) {
    println!("{}", "Detected Columns:".green().bold());
    println!(
        "  {} {}",
        "Equality:".dimmed(),
        joined(sets.equality.iter().map(|c| c.to_string())).white()
    );
    println!(
        "  {} {}",
        "Range:   ".dimmed(),
        joined(sets.range.iter().map(|c| c.to_string())).white()
    );
    println!(
        "  {} {}",
        "Order:   ".dimmed(),
        joined(sets.order.iter().map(|o| match o.direction {
            SortDirection::Asc => o.column.to_string(),
            SortDirection::Desc => format!("{} DESC", o.column),
        }))
        .white()
    );
}

fn print_explain(report: &ExplainReport) {
    let summary = &report.summary;
    let spot = &summary.dominant_node;

    println!("{}", "Hotspot:".green().bold());
    println!("  {} {}", "Node:".dimmed(), spot.node_type.cyan().bold());
    if let Some(relation) = &spot.relation {
        println!("  {} {}", "Relation:".dimmed(), relation.white());
    }
    if let Some(index) = &spot.index_name {
        println!("  {} {}", "Index:".dimmed(), index.white());
    }
    println!("  {} {:.2}", "Metric:".dimmed(), spot.metric);

    println!();
    println!("{}", "Plan:".green().bold());
    let figures = [
        ("Startup cost", summary.startup_cost),
        ("Total cost", summary.total_cost),
        ("Actual rows", summary.actual_rows),
        ("Actual time (ms)", summary.actual_total_time_ms),
    ];
    for (label, value) in figures {
        if let Some(v) = value {
            println!("  {:18} {:.2}", label.dimmed(), v);
        }
    }
    if let Some(width) = summary.plan_width {
        println!("  {:18} {}", "Width".dimmed(), width);
    }
}

fn print_unavailable(info: &StatsUnavailable) {
    println!("{} {}", "⚠".yellow(), info.warning.yellow());
    println!("  {}", info.error.dimmed());
}

fn print_slow_queries(outcome: &StatsOutcome<SlowQueries>) {
    let report = match outcome {
        StatsOutcome::Available(report) => report,
        StatsOutcome::Unavailable(info) => return print_unavailable(info),
    };
    if let Some(reset) = report.stats_reset {
        println!("{} {}", "Stats since:".dimmed(), reset.to_rfc3339());
    }
    if report.top.is_empty() {
        println!("{}", "(no statements)".dimmed());
        return;
    }

    println!(
        "{:>10} {:>10} {:>12} {:>10}  {}",
        "mean ms".white().bold(),
        "calls".white().bold(),
        "total ms".white().bold(),
        "rows".white().bold(),
        "statement".white().bold()
    );
    println!("{}", "─".repeat(80).dimmed());
    for q in &report.top {
        println!(
            "{:>10.2} {:>10} {:>12.1} {:>10}  {}",
            q.mean_ms,
            q.calls,
            q.total_ms,
            q.rows,
            q.normalized.yellow()
        );
    }
}

fn print_n_plus_one(outcome: &StatsOutcome<NPlusOneReport>) {
    let report = match outcome {
        StatsOutcome::Available(report) => report,
        StatsOutcome::Unavailable(info) => return print_unavailable(info),
    };
    if report.suspicions.is_empty() {
        println!("{} No N+1 suspects", "✓".green());
        return;
    }

    println!(
        "{:>10} {:>10} {:>10}  {}",
        "calls".white().bold(),
        "avg rows".white().bold(),
        "mean ms".white().bold(),
        "statement".white().bold()
    );
    println!("{}", "─".repeat(80).dimmed());
    for s in &report.suspicions {
        println!(
            "{:>10} {:>10.2} {:>10.2}  {}",
            s.calls,
            s.avg_rows,
            s.mean_ms,
            s.normalized.yellow()
        );
    }
}

fn print_suggestions(report: &IndexSuggestions) {
    for explanation in &report.explanation {
        print_predicates(&explanation.predicates);
        if let Some(alias) = &explanation.target_alias {
            println!("  {} {}", "Alias:".dimmed(), alias.cyan());
        }
    }
    println!();

    if report.suggestions.is_empty() {
        println!("{}", "(no index suggested)".dimmed());
        return;
    }

    for suggestion in &report.suggestions {
        println!("{}", "Suggested Index:".green().bold());
        println!("  {}", suggestion.candidate.to_sql().white());
        match &suggestion.validation {
            ValidationOutcome::NotRequested => println!("  {}", "not validated".dimmed()),
            ValidationOutcome::Unavailable => {
                println!("  {}", "not validated (hypopg unavailable)".dimmed())
            }
            ValidationOutcome::Validated(result) | ValidationOutcome::Failed(result) => {
                if result.plan_uses_index {
                    println!("  {} planner uses the hypothetical index", "✓".green());
                } else {
                    println!("  {} planner ignores the hypothetical index", "✗".red());
                }
                if let Some(diagnostic) = &result.diagnostic {
                    println!("  {} {}", "⚠".yellow(), diagnostic.yellow());
                }
            }
        }
    }
}
