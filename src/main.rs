use anyhow::{Context, Result};
use clap::Parser;
use dataplot::{
    chart::{Aggregation, ChartBindings, ChartKind},
    config::Settings,
    error::PipelineError,
    fetch::{DatasetRequest, RetryPolicy},
    parse::Format,
    pipeline::{ImportOutcome, Pipeline},
    table::arrow::write_parquet,
};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
    process::exit,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fetch a remote CSV/XLSX dataset, type it and describe a chart")]
struct Args {
    /// Dataset URL (http or https)
    url: String,

    /// YAML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Query parameter, repeatable: --query key=value
    #[arg(long = "query", value_parser = parse_query)]
    queries: Vec<(String, String)>,

    /// Extra request header, repeatable: --header 'Name: value'
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Bearer token for the Authorization header
    #[arg(long)]
    token: Option<String>,

    /// Request timeout in seconds (overrides settings)
    #[arg(long)]
    timeout: Option<u64>,

    /// Redirects to follow; 0 disables following (overrides settings)
    #[arg(long)]
    max_redirects: Option<usize>,

    /// Force a format instead of detecting it: csv, tsv, psv, xlsx
    #[arg(long)]
    format: Option<Format>,

    /// Worksheet to read from a workbook
    #[arg(long)]
    sheet: Option<String>,

    /// Zero-based header row among non-blank rows
    #[arg(long, conflicts_with = "no_header")]
    header_row: Option<usize>,

    /// The data has no header row
    #[arg(long)]
    no_header: bool,

    /// Chart kind: line, bar, scatter, area
    #[arg(long, default_value = "bar")]
    kind: ChartKind,

    /// Column on the x axis
    #[arg(short, long)]
    x: String,

    /// Column on the y axis
    #[arg(short, long)]
    y: Option<String>,

    /// Column splitting the data into series
    #[arg(long)]
    color: Option<String>,

    /// Reduce y per x group: sum, mean, count, min, max
    #[arg(long = "agg")]
    aggregation: Option<Aggregation>,

    #[arg(long)]
    title: Option<String>,

    /// Print the table and chart as JSON
    #[arg(long)]
    json: bool,

    /// Also write the parsed table as CSV
    #[arg(long)]
    csv_out: Option<PathBuf>,

    /// Also write the parsed table as Parquet
    #[arg(long)]
    parquet_out: Option<PathBuf>,
}

fn parse_query(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {:?}", s))
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected 'Name: value', got {:?}", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(secs) = args.timeout {
        settings.fetch.timeout_secs = secs;
    }
    if let Some(n) = args.max_redirects {
        settings.fetch.max_redirects = n;
    }

    let mut options = settings.parse.to_options()?;
    if args.format.is_some() {
        options.format = args.format;
    }
    if args.sheet.is_some() {
        options.sheet = args.sheet.clone();
    }
    if args.no_header {
        options.header_row = None;
    } else if args.header_row.is_some() {
        options.header_row = args.header_row;
    }

    // One-shot run: the payload cache would never be hit.
    let pipeline = Pipeline::new(options).with_retry(RetryPolicy::from(&settings.retry));
    let bindings = ChartBindings {
        kind: args.kind,
        x: args.x.clone(),
        y: args.y.clone(),
        color: args.color.clone(),
        aggregation: args.aggregation,
        title: args.title.clone(),
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; cancelling import");
                cancel.cancel();
            }
        });
    }

    let result = match build_request(&args, &settings) {
        Ok(request) => {
            info!(?request, "starting import");
            pipeline.run(&request, &bindings, &cancel).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => {
            write_outputs(&args, &outcome)?;
            Ok(())
        }
        Err(e) => {
            let report = e.report();
            error!(kind = %report.kind, "{}", report.message);
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                eprintln!("{}: {}", report.kind, report.message);
            }
            exit(1);
        }
    }
}

fn build_request(args: &Args, settings: &Settings) -> Result<DatasetRequest, PipelineError> {
    let mut builder = DatasetRequest::builder(&args.url).settings(&settings.fetch);
    for (k, v) in &args.queries {
        builder = builder.query(k, v);
    }
    for (k, v) in &args.headers {
        builder = builder.header(k, v);
    }
    if let Some(token) = &args.token {
        builder = builder.auth_token(token);
    }
    Ok(builder.build()?)
}

fn write_outputs(args: &Args, outcome: &ImportOutcome) -> Result<()> {
    if let Some(path) = &args.csv_out {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        outcome
            .table
            .write_csv(BufWriter::new(file))
            .with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), "wrote csv");
    }
    if let Some(path) = &args.parquet_out {
        write_parquet(&outcome.table, path)?;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, outcome)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(
        out,
        "{} rows x {} columns from {}",
        outcome.table.num_rows(),
        outcome.table.num_columns(),
        outcome.source
    )?;
    for (name, ty) in outcome.table.schema() {
        writeln!(out, "  {:<30} {}", name, ty)?;
    }
    writeln!(out, "\n{} ({})", outcome.chart.title(), outcome.chart.kind())?;
    for point in outcome.chart.data() {
        let y = point
            .y
            .as_ref()
            .map(|d| serde_json::to_string(d))
            .transpose()?
            .unwrap_or_default();
        match &point.color {
            Some(c) => writeln!(out, "  {} [{}] {}", serde_json::to_string(&point.x)?, serde_json::to_string(c)?, y)?,
            None => writeln!(out, "  {} {}", serde_json::to_string(&point.x)?, y)?,
        }
    }
    Ok(())
}
