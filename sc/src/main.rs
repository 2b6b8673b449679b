//! SQL Connect - JDBC-backed SQL data source
//!
//! CLI entry point for running queries and variable queries against the
//! backend, and for inspecting connection settings.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info};

use sqlconnect::cli::{Cli, Command, OutputFormat};
use sqlconnect::config::Config;
use sqlconnect::{
    CoordinatorState, DataFrame, DataSource, Format, QueryRequest, SqlQuery, TimeRange, VariableInterpolator,
    create_executor,
};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sqlconnect")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: --verbose > CLI --log-level > config file > default (INFO)
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        match cli_log_level.or(config_log_level).map(|s| s.to_uppercase()) {
            Some(s) => match s.as_str() {
                "TRACE" => tracing::Level::TRACE,
                "DEBUG" => tracing::Level::DEBUG,
                "INFO" => tracing::Level::INFO,
                "WARN" | "WARNING" => tracing::Level::WARN,
                "ERROR" => tracing::Level::ERROR,
                _ => {
                    eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                    tracing::Level::INFO
                }
            },
            None => tracing::Level::INFO,
        }
    };

    let log_file = fs::File::create(log_dir.join("sqlconnect.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref(), cli.verbose)
        .context("Failed to setup logging")?;

    info!(
        "SQL Connect loaded config: base_url={}, datasource_uid={}",
        config.backend.base_url, config.backend.datasource_uid
    );

    // Dispatch command
    match cli.command {
        Some(Command::Query {
            sql,
            vars,
            from,
            to,
            format,
        }) => cmd_query(&config, &sql, &vars, from.as_deref(), to.as_deref(), format).await,
        Some(Command::Variable { sql, vars, format }) => cmd_variable(&config, &sql, &vars, format).await,
        Some(Command::Settings { format }) => cmd_settings(&config, format),
        Some(Command::Format { sql }) => cmd_format(&sql),
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

/// Build a data source for the configured backend
fn build_datasource(config: &Config, vars: &[String]) -> Result<DataSource> {
    config.validate()?;
    let executor = create_executor(&config.backend).context("Failed to create backend client")?;
    let variables = VariableInterpolator::parse_assignments(vars)?;
    let template = VariableInterpolator::new(variables)?;
    Ok(DataSource::new(executor).with_template(Arc::new(template)))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .context(format!("Invalid time '{}', expected RFC 3339", value))
}

/// Run a query and print its frames
async fn cmd_query(
    config: &Config,
    sql: &str,
    vars: &[String],
    from: Option<&str>,
    to: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    debug!(%sql, ?from, ?to, "cmd_query: called");
    let mut ds = build_datasource(config, vars)?;

    let mut range = TimeRange::default();
    if let Some(from) = from {
        range.from = parse_time(from)?;
    }
    if let Some(to) = to {
        range.to = parse_time(to)?;
    }

    let request = QueryRequest::new(vec![SqlQuery::new("A", sql)]).with_range(range);
    let response = ds.query(request).await.context("Query failed")?;

    if let Some(error) = &response.error {
        eprintln!("{} {}", "Error:".red().bold(), error);
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&response)?),
        OutputFormat::Text | OutputFormat::Table => {
            if response.data.is_empty() {
                println!("{}", "No data".dimmed());
            }
            for frame in &response.data {
                print_frame(frame);
            }
        }
    }
    Ok(())
}

/// Resolve variable options the way the variable editor does
async fn cmd_variable(config: &Config, sql: &str, vars: &[String], format: OutputFormat) -> Result<()> {
    debug!(%sql, "cmd_variable: called");
    let mut ds = build_datasource(config, vars)?;

    ds.set_variable_query(Some(CoordinatorState::fresh()));
    let result = ds.metric_find_query(&SqlQuery::new("A", sql)).await;
    ds.set_variable_query(None);
    let values = result?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&values)?),
        OutputFormat::Text | OutputFormat::Table => {
            for value in &values {
                let value_text = match &value.value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if value_text == value.text {
                    println!("{}", value.text);
                } else {
                    println!("{} {}", value.text, format!("({})", value_text).dimmed());
                }
            }
        }
    }
    Ok(())
}

/// Show configured settings with secure values masked
fn cmd_settings(config: &Config, format: OutputFormat) -> Result<()> {
    debug!("cmd_settings: called");
    let options = config.connection.to_options();
    options.validate()?;

    match format {
        OutputFormat::Json => {
            let settings: Vec<_> = options
                .settings()
                .iter()
                .map(|s| {
                    serde_json::json!({
                        "name": s.name,
                        "value": options.display_value(&s.name),
                        "secure": s.secure,
                    })
                })
                .collect();
            let out = serde_json::json!({
                "settings": settings,
                "connectionString": options.redacted_connection_string(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text | OutputFormat::Table => {
            println!("{}", "Driver Settings".bold());
            if options.settings().is_empty() {
                println!("  {}", "(none)".dimmed());
            }
            for setting in options.settings() {
                let value = options.display_value(&setting.name).unwrap_or_default();
                let lock = if setting.secure { " (secure)".yellow() } else { "".normal() };
                println!("  {:<24} {}{}", setting.name.cyan(), value, lock);
            }
            println!();
            println!("{} {}", "Connection:".bold(), options.redacted_connection_string());
        }
    }
    Ok(())
}

fn cmd_format(sql: &str) -> Result<()> {
    let format = Format::detect(sql);
    println!("{} ({})", format, u8::from(format));
    Ok(())
}

/// Print a frame as an aligned table
fn print_frame(frame: &DataFrame) {
    if let Some(name) = frame.name.as_deref().or(frame.ref_id.as_deref()) {
        println!("{}", name.bold());
    }

    let cells: Vec<Vec<String>> = frame
        .fields
        .iter()
        .map(|f| {
            (0..frame.len())
                .map(|row| match f.values.get(row) {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(serde_json::Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                })
                .collect()
        })
        .collect();

    let widths: Vec<usize> = frame
        .fields
        .iter()
        .zip(&cells)
        .map(|(f, col)| col.iter().map(String::len).chain([f.name.len()]).max().unwrap_or(0))
        .collect();

    let header: Vec<String> = frame
        .fields
        .iter()
        .zip(&widths)
        .map(|(f, w)| format!("{:<w$}", f.name, w = *w))
        .collect();
    println!("{}", header.join("  ").cyan());

    for row in 0..frame.len() {
        let line: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(col, w)| format!("{:<w$}", col[row], w = *w))
            .collect();
        println!("{}", line.join("  "));
    }
    println!();
}
