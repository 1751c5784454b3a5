//! End-to-end run: GTFS, shapes, AVL, metrics, aggregation and outputs.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::avl::{AvlRecord, load_avl};
use crate::config::{DataOption, RoveParams};
use crate::fetch::{BasicClient, Credential, load_source};
use crate::gtfs::Gtfs;
use crate::gtfs::feed::FeedArchive;
use crate::metrics::MetricCalculation;
use crate::metrics::aggregate::aggregate;
use crate::output::{print_summary, write_csv, write_json};
use crate::shapes::valhalla::ValhallaClient;
use crate::shapes::{ShapeGenerator, ShapeRecord, read_shapes, write_shapes};
use crate::storage::S3Publisher;

/// Knobs of a run that are not part of [`RoveParams`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: String,
    /// Path or URL of the static feed, instead of the default input path.
    pub gtfs_source: Option<String>,
    pub avl_path: Option<PathBuf>,
    pub credential: Option<Credential>,
    pub regenerate_shapes: bool,
    pub improve_shapes: bool,
    pub valhalla_url: Option<String>,
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: "bus".to_string(),
            gtfs_source: None,
            avl_path: None,
            credential: None,
            regenerate_shapes: false,
            improve_shapes: true,
            valhalla_url: None,
            concurrency: 8,
        }
    }
}

/// Table sizes of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub patterns: usize,
    pub segments: usize,
    pub stop_rows: usize,
    pub tpbp_rows: usize,
    pub route_rows: usize,
    pub uploaded: usize,
}

/// Reads the static feed, from a directory of `.txt` files or a zip archive
/// on disk or behind a URL.
pub async fn load_gtfs(params: &RoveParams, options: &RunOptions) -> Result<Gtfs> {
    let source = options
        .gtfs_source
        .clone()
        .unwrap_or_else(|| params.input_paths.gtfs.display().to_string());

    let archive = if Path::new(&source).is_dir() {
        FeedArchive::from_dir(&source)?
    } else {
        let bytes = load_source(&source, options.credential.as_ref())
            .await
            .with_context(|| format!("failed to load GTFS from {source}"))?;
        FeedArchive::from_zip_bytes(bytes)?
    };

    Ok(Gtfs::load(&archive, params, &options.mode, options.improve_shapes)?)
}

/// Writes the timepoint and stop name lookups used by the frontend.
pub fn write_lookups(gtfs: &Gtfs, params: &RoveParams) -> Result<()> {
    write_json(&params.output_paths.timepoints, &gtfs.timepoint_lookup())?;
    write_json(&params.output_paths.stop_name_lookup, &gtfs.stop_name_lookup())?;
    Ok(())
}

/// Reuses the shapes file of a previous run when present, otherwise
/// generates and writes shapes for every pattern.
pub async fn load_or_generate_shapes(gtfs: &Gtfs, params: &RoveParams, options: &RunOptions) -> Result<Vec<ShapeRecord>> {
    let path = &params.output_paths.shapes;
    if !options.regenerate_shapes {
        let shapes = read_shapes(path)?;
        if !shapes.is_empty() {
            info!(path = %path.display(), segments = shapes.len(), "Reusing existing shapes");
            return Ok(shapes);
        }
    }

    let valhalla_url = options
        .valhalla_url
        .as_deref()
        .or(params.backend_config.valhalla_url.as_deref());
    let shapes = match valhalla_url {
        Some(url) => {
            let client = ValhallaClient::new(BasicClient::new()?, url);
            ShapeGenerator::with_valhalla(client, options.concurrency)
                .generate(&gtfs.patterns)
                .await
        }
        None => {
            ShapeGenerator::<BasicClient>::offline()
                .generate(&gtfs.patterns)
                .await
        }
    };

    write_shapes(path, &shapes)?;
    Ok(shapes)
}

fn load_observations(params: &RoveParams, options: &RunOptions) -> Result<Option<Vec<AvlRecord>>> {
    if !params.data_option.has_avl() {
        return Ok(None);
    }
    if params.data_option == DataOption::GtfsAvlOdx {
        warn!("ODX data is not processed, continuing with GTFS and AVL");
    }
    let path = options.avl_path.as_ref().unwrap_or(&params.input_paths.avl);
    Ok(Some(load_avl(path)?))
}

/// Runs the whole backend for one agency and month.
#[tracing::instrument(skip_all, fields(agency = %params.agency, suffix = %params.suffix, data_option = %params.data_option))]
pub async fn run(params: &RoveParams, options: &RunOptions, publisher: Option<&S3Publisher>) -> Result<RunSummary> {
    info!(dates = params.date_list.len(), "Starting run");

    let gtfs = load_gtfs(params, options).await?;
    write_lookups(&gtfs, params)?;

    let shapes = load_or_generate_shapes(&gtfs, params, options).await?;
    let avl = load_observations(params, options)?;

    let metrics = MetricCalculation::new(
        &shapes,
        &gtfs.records,
        avl.as_deref(),
        params.data_option,
        params.backend_config.on_time,
    )?;
    print_summary(&metrics);

    let paths = &params.output_paths;
    write_csv(&paths.stop_metrics, &metrics.stop_metrics)?;
    write_csv(&paths.tpbp_metrics, &metrics.tpbp_metrics)?;
    write_csv(&paths.route_metrics, &metrics.route_metrics)?;

    let aggregation = aggregate(&metrics, &params.backend_config.time_periods);
    write_json(&paths.stop_aggregated, &aggregation.stops)?;
    write_json(&paths.route_aggregated, &aggregation.routes)?;

    let uploaded = match publisher {
        Some(publisher) => publisher.publish(params).await?,
        None => 0,
    };

    let summary = RunSummary {
        patterns: gtfs.patterns.len(),
        segments: shapes.len(),
        stop_rows: metrics.stop_metrics.len(),
        tpbp_rows: metrics.tpbp_metrics.len(),
        route_rows: metrics.route_metrics.len(),
        uploaded,
    };
    info!(?summary, "Run completed");
    Ok(summary)
}
