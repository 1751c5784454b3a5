pub mod avl;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gtfs;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod shapes;
pub mod storage;
