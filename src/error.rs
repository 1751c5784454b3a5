//! Errors raised while validating input data and running the metric pipeline.

/// Failures the backend can detect in its inputs.
///
/// Orchestration code wraps these in [`anyhow::Error`] with extra context; the
/// variants stay matchable for callers and tests.
#[derive(Debug, thiserror::Error)]
pub enum RoveError {
    #[error("agency \"{0}\" is not supported")]
    UnsupportedAgency(String),

    #[error("invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("mode \"{0}\" has no route types in the backend config")]
    UnknownMode(String),

    #[error("could not find required table {0} in GTFS data")]
    MissingTable(String),

    #[error("the GTFS file for the required table {0} is empty")]
    EmptyTable(String),

    #[error("table \"{table}\" is missing required columns: {columns:?}")]
    MissingColumns { table: String, columns: Vec<String> },

    #[error("invalid value in {table} row {row}, column {column}: {value}")]
    InvalidValue {
        table: String,
        row: usize,
        column: String,
        value: String,
    },

    #[error("failed to read GTFS table {table}: {source}")]
    Csv {
        table: String,
        #[source]
        source: csv::Error,
    },

    #[error("failed to open GTFS archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("stop {0} is used by stop_times but missing from stops")]
    UnknownStop(String),

    #[error("service IDs for days {0:?} cannot be found in GTFS")]
    NoServiceDates(Vec<String>),

    #[error("number of unique hashes ({hashes}) does not match number of unique stop lists ({stop_lists})")]
    HashCollision { hashes: usize, stop_lists: usize },

    #[error("no_earlier_than must be negative and no_later_than positive, got {0} and {1}")]
    InvalidOnTimeWindow(i64, i64),

    #[error("data option {0} requires AVL records but none were loaded")]
    MissingAvl(String),
}
