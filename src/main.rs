use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use ulogview_logs::{DisplayableLog, FILE_PROVIDER_NAME, TextFilter};
use ulogview_session::{LogProfile, PredefinedLogTextFilter, Session, SessionContext, Settings};
use ulogview_types::{FilterCombinationMode, LogLevel};

/// ulogview - read, filter and mark structured log files
#[derive(Parser, Debug)]
#[command(name = "ulogview")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log pattern with named groups, repeat for multi-line layouts
    #[arg(long = "pattern", value_name = "REGEX")]
    patterns: Vec<String>,

    /// Only show logs of this level
    #[arg(long, value_parser = parse_level)]
    level: Option<LogLevel>,

    /// Only show logs of this process ID
    #[arg(long)]
    pid: Option<i32>,

    /// Only show logs of this thread ID
    #[arg(long)]
    tid: Option<i32>,

    /// Case insensitive text filter, repeat to combine
    #[arg(long = "filter", value_name = "REGEX")]
    filters: Vec<String>,

    /// Show logs matching any filter instead of all of them
    #[arg(long)]
    union: bool,

    /// Log files to read
    #[arg(value_name = "FILE", required = true)]
    files: Vec<String>,
}

fn parse_level(s: &str) -> std::result::Result<LogLevel, String> {
    match LogLevel::from_name(s) {
        LogLevel::Undefined => Err(format!("unknown log level '{s}'")),
        level => Ok(level),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ULOGVIEW_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run(args).await;
    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }
    result
}

fn build_profile(args: &Args) -> Result<LogProfile> {
    let profile = LogProfile::new("cli", FILE_PROVIDER_NAME);
    if args.patterns.is_empty() {
        return Ok(profile);
    }
    let patterns: Vec<(&str, bool, bool)> = args
        .patterns
        .iter()
        .map(|pattern| (pattern.as_str(), false, false))
        .collect();
    profile
        .with_patterns(&patterns)
        .context("Invalid log pattern")
}

fn apply_filters(session: &mut Session, args: &Args) -> Result<()> {
    if let Some(level) = args.level {
        session.set_level_filter(level);
    }
    session.set_process_id_filter(args.pid);
    session.set_thread_id_filter(args.tid);

    let mut filters = args
        .filters
        .iter()
        .map(|pattern| TextFilter::new(pattern, true))
        .collect::<ulogview_types::Result<Vec<_>>>()
        .context("Invalid text filter")?
        .into_iter();
    session.set_text_filter(filters.next());
    let predefined = filters
        .enumerate()
        .map(|(i, filter)| {
            let name = filter.pattern().to_string();
            Arc::new(PredefinedLogTextFilter::new(format!("cli-{i}"), name, filter))
        })
        .collect();
    session.set_predefined_text_filters(predefined);

    if args.union {
        session.set_filters_combination_mode(FilterCombinationMode::Union);
    }
    Ok(())
}

fn format_log(log: &DisplayableLog) -> String {
    let log = log.log();
    let mut line = String::new();
    if let Some(timestamp) = log.timestamp() {
        line.push_str(&timestamp.format("%Y-%m-%d %H:%M:%S%.3f ").to_string());
    }
    if log.level() != LogLevel::Undefined {
        line.push_str(log.level().short_name());
        line.push(' ');
    }
    if let Some(message) = log.message() {
        line.push_str(&message);
    }
    line
}

async fn run(args: Args) -> Result<()> {
    let settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let ctx = SessionContext::new(settings);
    let mut session = Session::new(ctx);

    session.set_log_profile(Arc::new(build_profile(&args)?))?;
    for file in &args.files {
        session.add_log_file(file)?;
    }
    apply_filters(&mut session, &args)?;
    session.wait_for_idle().await;

    if session.has_all_data_source_errors() {
        anyhow::bail!("None of the log files could be read");
    }
    if session.has_partial_data_source_errors() {
        tracing::warn!("Some log files could not be read");
    }

    let mut stdout = std::io::stdout().lock();
    for log in session.filtered_logs() {
        writeln!(stdout, "{}", format_log(log))?;
    }
    let info = session.time_info();
    writeln!(
        stdout,
        "-- {} of {} logs, {} marked{}",
        session.filtered_logs().len(),
        session.all_logs().len(),
        session.marked_logs().len(),
        info.duration
            .map(|d| format!(", spanning {}s", d.num_seconds()))
            .unwrap_or_default()
    )?;
    drop(stdout);

    session.wait_for_necessary_tasks().await;
    session.dispose();
    Ok(())
}
