use rove::avl::load_avl;
use chrono::NaiveDate;
use rove::config::{Agency, BackendConfig, DataOption, DateType, RoveParams};
use rove::error::RoveError;
use rove::gtfs::Gtfs;
use rove::gtfs::feed::FeedArchive;
use rove::metrics::MetricCalculation;
use rove::pipeline::{self, RunOptions};
use rove::shapes::{ShapeGenerator, read_shapes};
use rove::fetch::BasicClient;
use std::io::Write;
use std::path::{Path, PathBuf};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn params(base_dir: &Path, data_option: DataOption) -> RoveParams {
    RoveParams::new(
        Agency::Mbta,
        "03",
        "2022",
        DateType::Workday,
        data_option,
        BackendConfig::default(),
        base_dir,
    )
    .expect("valid parameters")
}

fn zipped_fixture() -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    {
        let mut zip = zip::ZipWriter::new(&mut buf);
        let options = zip::write::FileOptions::default();
        for entry in std::fs::read_dir(fixture("gtfs")).unwrap() {
            let path = entry.unwrap().path();
            let name = path.file_name().unwrap().to_str().unwrap().to_string();
            zip.start_file(name, options).unwrap();
            zip.write_all(&std::fs::read(&path).unwrap()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf.into_inner()
}

#[test]
fn test_gtfs_load_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path(), DataOption::Gtfs);
    let archive = FeedArchive::from_dir(fixture("gtfs")).unwrap();

    let gtfs = Gtfs::load(&archive, &params, "bus", true).expect("Failed to load GTFS");

    // Saturday and rail trips are filtered out
    assert_eq!(gtfs.feed.trips.len(), 3);
    assert_eq!(gtfs.records.len(), 12);
    assert!(gtfs.records.iter().all(|r| r.route_id == "1"));

    let mut ids: Vec<&str> = gtfs.patterns.iter().map(|p| p.id.as_str()).collect();
    ids.sort();
    assert_eq!(ids, ["1-0-1", "1-1-1"]);

    let lookup = gtfs.stop_name_lookup();
    assert_eq!(lookup["D"].stop_name, "Northgate");
    assert_eq!(lookup["D"].municipality.as_deref(), Some("Cambridge"));
}

#[test]
fn test_gtfs_load_from_zip_matches_directory() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path(), DataOption::Gtfs);

    let from_dir = Gtfs::load(&FeedArchive::from_dir(fixture("gtfs")).unwrap(), &params, "bus", true).unwrap();
    let from_zip = Gtfs::load(&FeedArchive::from_zip_bytes(zipped_fixture()).unwrap(), &params, "bus", true).unwrap();

    assert_eq!(from_zip.records, from_dir.records);
    assert_eq!(from_zip.patterns.len(), from_dir.patterns.len());
}

#[test]
fn test_removed_service_date_is_not_analyzed() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path(), DataOption::Gtfs);
    let archive = FeedArchive::from_dir(fixture("gtfs")).unwrap();

    let gtfs = Gtfs::load(&archive, &params, "bus", true).unwrap();

    // calendar_dates removes WK on Monday 2022-03-21
    let removed = NaiveDate::from_ymd_opt(2022, 3, 21).unwrap();
    assert_eq!(params.date_list.len(), 23);
    assert!(params.date_list.contains(&removed));
    assert_eq!(gtfs.service_dates.len(), 22);
    assert!(!gtfs.service_dates.contains(&removed));
}

#[test]
fn test_month_without_service_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let params = RoveParams::new(
        Agency::Mbta,
        "03",
        "2023",
        DateType::Workday,
        DataOption::Gtfs,
        BackendConfig::default(),
        dir.path(),
    )
    .unwrap();
    let archive = FeedArchive::from_dir(fixture("gtfs")).unwrap();

    let result = Gtfs::load(&archive, &params, "bus", true);
    assert!(matches!(result, Err(RoveError::NoServiceDates(ref dates)) if dates.len() == 23));
}

#[test]
fn test_unknown_mode_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path(), DataOption::Gtfs);
    let archive = FeedArchive::from_dir(fixture("gtfs")).unwrap();

    assert!(Gtfs::load(&archive, &params, "ferry", true).is_err());
}

#[tokio::test]
async fn test_metrics_from_gtfs_and_avl() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path(), DataOption::GtfsAvl);
    let archive = FeedArchive::from_dir(fixture("gtfs")).unwrap();
    let gtfs = Gtfs::load(&archive, &params, "bus", true).unwrap();

    let shapes = ShapeGenerator::<BasicClient>::offline()
        .generate(&gtfs.patterns)
        .await;
    assert_eq!(shapes.len(), 6);
    assert!(shapes.iter().all(|s| s.distance > 0.0));

    let avl = load_avl(fixture("avl.csv")).unwrap();
    let metrics = MetricCalculation::new(
        &shapes,
        &gtfs.records,
        Some(avl.as_slice()),
        params.data_option,
        params.backend_config.on_time,
    )
    .unwrap();

    assert_eq!(metrics.stop_metrics.len(), 9);
    assert_eq!(metrics.route_metrics.len(), 3);

    let t1 = metrics.route_metrics.iter().find(|r| r.trip_id == "T1").unwrap();
    assert_eq!(t1.scheduled_running_time, Some(6.0));
    assert!(t1.stop_spacing.unwrap() > 0.0);
    assert!(t1.observed_running_time.is_some());
    assert!(t1.boardings.is_some());

    let t2 = metrics.route_metrics.iter().find(|r| r.trip_id == "T2").unwrap();
    assert_eq!(t2.scheduled_running_time, Some(9.0));
    assert!(t2.observed_running_time.is_none());
}

#[tokio::test]
async fn test_full_pipeline_writes_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let params = params(dir.path(), DataOption::GtfsAvl);
    let options = RunOptions {
        gtfs_source: Some(fixture("gtfs").display().to_string()),
        avl_path: Some(fixture("avl.csv")),
        ..RunOptions::default()
    };

    let summary = pipeline::run(&params, &options, None).await.expect("pipeline run");

    assert_eq!(summary.patterns, 2);
    assert_eq!(summary.segments, 6);
    assert_eq!(summary.route_rows, 3);
    assert_eq!(summary.uploaded, 0);
    for path in params.output_paths.all() {
        assert!(path.exists(), "missing output {}", path.display());
    }

    let shapes = read_shapes(&params.output_paths.shapes).unwrap();
    assert_eq!(shapes.len(), 6);

    let routes = std::fs::read_to_string(&params.output_paths.route_metrics).unwrap();
    assert_eq!(routes.lines().count(), 4);
}
