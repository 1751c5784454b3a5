//! CLI entry point for the ROVE backend.
//!
//! Provides subcommands for the full metric pipeline, shape generation on
//! its own, and publishing existing outputs to S3.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rove::config::{Agency, BackendConfig, DataOption, DateType, RoveParams};
use rove::fetch::Credential;
use rove::pipeline::{self, RunOptions};
use rove::storage::S3Publisher;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "rove")]
#[command(about = "Bus route performance metrics from GTFS and AVL data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Parameters identifying one analysis.
#[derive(Args)]
struct ParamArgs {
    /// Transit agency: CTA, MBTA or WMATA
    #[arg(short, long)]
    agency: Agency,

    /// Two-digit month, e.g. 03
    #[arg(short, long)]
    month: String,

    /// Four-digit year, e.g. 2022
    #[arg(short, long)]
    year: String,

    /// Service days analyzed: workday, saturday or sunday
    #[arg(long, default_value = "workday")]
    date_type: DateType,

    /// Input data: GTFS, GTFS-AVL or GTFS-AVL-ODX
    #[arg(long, default_value = "GTFS")]
    data_option: DataOption,

    /// Backend config JSON; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root holding the data/ and frontend/ directories
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,
}

/// Inputs and shape options shared by `run` and `shapes`.
#[derive(Args)]
struct GtfsArgs {
    /// Path, directory or URL of the static feed, instead of the default input path
    #[arg(long)]
    gtfs: Option<String>,

    /// Send GTFS_API_KEY as this query parameter instead of a header
    #[arg(long)]
    api_key_param: Option<String>,

    /// Mode whose route types are analyzed
    #[arg(long, default_value = "bus")]
    mode: String,

    /// Ignore an existing shapes file and generate shapes again
    #[arg(long, default_value_t = false)]
    regenerate_shapes: bool,

    /// Do not supplement segments with the feed's shapes table
    #[arg(long, default_value_t = false)]
    no_shape_improvement: bool,

    /// Maximum number of concurrent map matching requests
    #[arg(long, default_value_t = 8)]
    concurrency: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline: GTFS, shapes, AVL, metrics and aggregation
    Run {
        #[command(flatten)]
        params: ParamArgs,

        #[command(flatten)]
        gtfs: GtfsArgs,

        /// AVL CSV, instead of the default input path
        #[arg(long)]
        avl: Option<PathBuf>,

        /// Optional: S3 bucket name to upload outputs to (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Optional: Gzip compress files before uploading to S3
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
    /// Load GTFS and generate shapes only
    Shapes {
        #[command(flatten)]
        params: ParamArgs,

        #[command(flatten)]
        gtfs: GtfsArgs,
    },
    /// Upload the outputs of a previous run to S3
    Publish {
        #[command(flatten)]
        params: ParamArgs,

        /// S3 bucket name to upload outputs to (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: String,

        /// Gzip compress files before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/rove.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("rove.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive(LevelFilter::INFO.into()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive(LevelFilter::DEBUG.into()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            params,
            gtfs,
            avl,
            s3_bucket,
            gzip,
        } => {
            let params = build_params(params)?;
            let mut options = run_options(&params, gtfs);
            options.avl_path = avl;

            let publisher = match s3_bucket {
                Some(bucket) => {
                    info!(bucket = %bucket, gzip, "S3 upload enabled");
                    Some(S3Publisher::from_env(bucket, gzip).await)
                }
                None => None,
            };

            pipeline::run(&params, &options, publisher.as_ref()).await?;
        }
        Commands::Shapes { params, gtfs } => {
            let params = build_params(params)?;
            let mut options = run_options(&params, gtfs);
            options.regenerate_shapes = true;

            let feed = pipeline::load_gtfs(&params, &options).await?;
            pipeline::write_lookups(&feed, &params)?;
            let shapes = pipeline::load_or_generate_shapes(&feed, &params, &options).await?;
            info!(
                patterns = feed.patterns.len(),
                segments = shapes.len(),
                path = %params.output_paths.shapes.display(),
                "Shapes written"
            );
        }
        Commands::Publish {
            params,
            s3_bucket,
            gzip,
        } => {
            let params = build_params(params)?;
            if s3_bucket.is_empty() {
                info!("S3 bucket not specified, skipping upload");
            } else {
                let publisher = S3Publisher::from_env(s3_bucket, gzip).await;
                publisher.publish(&params).await?;
            }
        }
    }

    Ok(())
}

fn build_params(args: ParamArgs) -> Result<RoveParams> {
    let backend_config = match &args.config {
        Some(path) => BackendConfig::load(path)?,
        None => BackendConfig::default(),
    };
    let params = RoveParams::new(
        args.agency,
        &args.month,
        &args.year,
        args.date_type,
        args.data_option,
        backend_config,
        &args.base_dir,
    )?;
    info!(
        agency = %params.agency,
        suffix = %params.suffix,
        date_type = ?params.date_type,
        data_option = %params.data_option,
        "Parameters ready"
    );
    Ok(params)
}

/// Run options from CLI flags and the environment (`GTFS_API_KEY`, `VALHALLA_URL`).
fn run_options(params: &RoveParams, args: GtfsArgs) -> RunOptions {
    let credential = std::env::var("GTFS_API_KEY").ok().map(|key| match args.api_key_param {
        Some(name) => Credential::QueryParam { name, key },
        None => Credential::Header {
            name: params.agency.api_key_header().to_string(),
            key,
        },
    });

    RunOptions {
        mode: args.mode,
        gtfs_source: args.gtfs,
        avl_path: None,
        credential,
        regenerate_shapes: args.regenerate_shapes,
        improve_shapes: !args.no_shape_improvement,
        valhalla_url: std::env::var("VALHALLA_URL").ok(),
        concurrency: args.concurrency,
    }
}
