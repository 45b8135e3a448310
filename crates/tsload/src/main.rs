// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! tsload CLI
//!
//! Bulk-loads line protocol into a time-series backend.
//!
//! # Usage
//!
//! ```bash
//! # Load from stdin with four workers
//! tsload --urls http://localhost:8902 --workers 4 < data.lp
//!
//! # Several backends, gzip off, custom database
//! tsload --file data.lp --urls http://a:8902,http://b:8902 --db bench --gzip false
//!
//! # Parse and encode only
//! tsload check --file data.lp
//!
//! # Write into an existing database, fail if it is already there
//! tsload --file data.lp --db bench --abort-on-exist
//!
//! # Using configuration file
//! tsload --config tsload.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tsload::batch::BatchConfig;
use tsload::codec::decode_batch;
use tsload::config::{ConfigError, LoadConfig};
use tsload::loader::{Loader, RunContext};
use tsload::pool::BufferPool;
use tsload::writer::{Consistency, DbManager, HttpTransport, HttpTransportConfig};
use tsload::{encode, BatchAssembler, BinaryFormat, LineLexer, PointFormat};

/// Line protocol bulk loader
#[derive(Parser, Debug)]
#[command(name = "tsload")]
#[command(about = "Parse, encode and load line protocol under backpressure")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input file (stdin when omitted)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Backend URLs (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    urls: Option<Vec<String>>,

    /// Database name
    #[arg(long)]
    db: Option<String>,

    /// Number of write workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Points per batch
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Gzip request bodies
    #[arg(long)]
    gzip: Option<bool>,

    /// Backoff between retries (milliseconds)
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Parse and batch, but do not send
    #[arg(long)]
    dry_run: bool,

    /// Create the database before loading
    #[arg(long)]
    create_db: Option<bool>,

    /// Fail when the database already exists
    #[arg(long)]
    abort_on_exist: bool,

    /// Drop and recreate an existing database
    #[arg(long)]
    drop_existing: Option<bool>,

    /// Replica count of a created database
    #[arg(long)]
    replication_factor: Option<u32>,

    /// Write consistency (any, one, quorum, all)
    #[arg(long)]
    consistency: Option<Consistency>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "tsload.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Parse and encode a file without sending it
    Check {
        /// Input file
        #[arg(short, long)]
        file: PathBuf,

        /// Print every point in canonical form
        #[arg(long)]
        print: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Subcommands log at the requested level or info
    if let Some(cmd) = args.command {
        init_logging(args.log_level.as_deref().unwrap_or("info"));
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
            Commands::Check { file, print } => cmd_check(file, print),
        };
    }

    let config = build_config(&args)?;
    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));

    if config.db_setup().create {
        let url = config.url_for(0).unwrap_or("http://localhost:8902");
        let client = HttpTransport::new(&transport_config(&config, url))?;
        let mut manager = DbManager::new(client, url);
        Loader::prepare_database(&config, &mut manager).await?;
    }

    let ctx = RunContext::from_config(&config);
    let transports = build_transports(&config)?;
    let loader = Loader::from_config(&config, ctx.clone(), transports)?;

    let shutdown = ctx.shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down");
            shutdown.trigger();
        }
    });

    info!(
        "loading into '{}' with {} workers",
        config.loader.database, config.loader.workers
    );
    let report = match &args.file {
        Some(path) => loader.run(tokio::fs::File::open(path).await?).await?,
        None => loader.run(tokio::io::stdin()).await?,
    };

    for err in &report.errors {
        error!("{}", err);
    }
    let snap = &report.stats;
    if snap.parse_errors > 0 {
        info!("{} of {} lines skipped", snap.parse_errors, snap.lines_read);
    }
    info!(
        "backoffs took a total of {:.6}sec of runtime; mean write latency {:?}",
        report.backoff_total().as_secs_f64(),
        snap.mean_latency()
    );
    println!("{}", report.summary_line());

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &Args) -> Result<LoadConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => LoadConfig::from_file(path)?,
        None => LoadConfig::default(),
    };

    if let Some(urls) = &args.urls {
        config.target.urls = urls.clone();
    }
    if let Some(db) = &args.db {
        config.loader.database = db.clone();
    }
    if let Some(workers) = args.workers {
        config.loader.workers = workers;
    }
    if let Some(batch_size) = args.batch_size {
        config.loader.batch_size = batch_size;
    }
    if let Some(gzip) = args.gzip {
        config.target.gzip = gzip;
    }
    if let Some(backoff_ms) = args.backoff_ms {
        config.target.backoff_ms = backoff_ms;
    }
    if args.dry_run {
        config.loader.do_load = false;
    }
    if let Some(create_db) = args.create_db {
        config.target.create_db = create_db;
    }
    if args.abort_on_exist {
        config.target.abort_on_exist = true;
    }
    if let Some(drop_existing) = args.drop_existing {
        config.target.drop_existing = drop_existing;
    }
    if let Some(replication_factor) = args.replication_factor {
        config.target.replication_factor = replication_factor;
    }
    if let Some(consistency) = args.consistency {
        config.target.consistency = Some(consistency);
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

fn transport_config(config: &LoadConfig, url: &str) -> HttpTransportConfig {
    HttpTransportConfig {
        url: url.to_string(),
        database: config.loader.database.clone(),
        username: config.target.username.clone(),
        password: config.target.password.clone(),
        content_type: config.point_format().content_type(),
        timeout: config.request_timeout(),
        consistency: config.target.consistency,
    }
}

fn build_transports(config: &LoadConfig) -> Result<Vec<HttpTransport>, Box<dyn std::error::Error>> {
    let mut transports = Vec::with_capacity(config.loader.workers);
    for worker in 0..config.loader.workers {
        let url = config.url_for(worker).unwrap_or("http://localhost:8902");
        transports.push(HttpTransport::new(&transport_config(config, url))?);
    }
    Ok(transports)
}

fn cmd_gen_config(output: PathBuf) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&LoadConfig::example())?;

    let content = format!(
        r#"# tsload configuration
# Generated by tsload gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_validate(config_path: PathBuf) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match LoadConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Database: {}", config.loader.database);
            println!("Workers: {}", config.loader.workers);
            println!(
                "Batch: {} points / {} bytes",
                config.loader.batch_size, config.loader.batch_bytes
            );
            println!("Backpressure: {}", config.target.backpressure);
            let setup = config.db_setup();
            println!(
                "Database setup: create={} drop_existing={} abort_on_exist={} replicas={}",
                setup.create, setup.drop_existing, setup.abort_on_exist, setup.replication_factor
            );
            for worker in 0..config.loader.workers {
                if let Some(url) = config.url_for(worker) {
                    println!("  [worker {}] {}", worker, url);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Parse every record, encode the valid ones into one binary batch, decode
/// it back and compare canonical text.
fn cmd_check(file: PathBuf, print: bool) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let input = std::fs::read(&file)?;
    let pool = Arc::new(BufferPool::new(1, input.len()));
    let format: Arc<dyn PointFormat> = Arc::new(BinaryFormat);
    let mut assembler = BatchAssembler::new(
        format,
        "check",
        BatchConfig {
            max_points: u32::MAX as usize,
            max_bytes: usize::MAX,
            flush_interval: None,
        },
        pool,
    );

    let mut expected = Vec::new();
    let mut errors = 0usize;
    for raw in LineLexer::new(&input) {
        match encode(&raw) {
            Ok(point) => {
                assembler.push(&point)?;
                expected.push(point.to_line_protocol());
            }
            Err(e) => {
                errors += 1;
                eprintln!("{}", e);
            }
        }
    }

    let mut mismatches = 0usize;
    for batch in assembler.flush()? {
        let decoded = decode_batch(batch.body())?;
        for (point, original) in decoded.points.iter().zip(&expected) {
            let text = point.to_line_protocol();
            if &text != original {
                mismatches += 1;
                eprintln!(
                    "round trip mismatch:\n  {}\n  {}",
                    String::from_utf8_lossy(original),
                    String::from_utf8_lossy(&text)
                );
            } else if print {
                println!("{}", String::from_utf8_lossy(&text));
            }
        }
    }

    println!(
        "{}: {} points, {} errors, {} round trip mismatches",
        file.display(),
        expected.len(),
        errors,
        mismatches
    );
    Ok(if errors == 0 && mismatches == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
