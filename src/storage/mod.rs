//! Publishing of run outputs to S3.

use anyhow::{Context, Result};
use aws_sdk_s3::primitives::ByteStream;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::ffi::OsStr;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use crate::config::RoveParams;

/// Uploads output files under `{agency}/{month}_{year}/`.
#[derive(Clone)]
pub struct S3Publisher {
    client: aws_sdk_s3::Client,
    bucket: String,
    gzip: bool,
}

impl S3Publisher {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, gzip: bool) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            gzip,
        }
    }

    /// Builds a client from the standard AWS environment.
    pub async fn from_env(bucket: impl Into<String>, gzip: bool) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket, gzip)
    }

    /// Uploads every output file of a run that exists on disk. Returns the
    /// number of files uploaded.
    #[tracing::instrument(skip_all, fields(bucket = %self.bucket, agency = %params.agency, gzip = self.gzip))]
    pub async fn publish(&self, params: &RoveParams) -> Result<usize> {
        let prefix = key_prefix(params);
        let mut upload_count = 0;

        for path in params.output_paths.all() {
            if !path.exists() {
                warn!(path = %path.display(), "Output file missing, skipping upload");
                continue;
            }
            let key = object_key(&prefix, path, self.gzip);
            self.upload_file(path, &key).await?;
            upload_count += 1;
        }

        info!(upload_count, prefix = %prefix, "S3 upload complete");
        Ok(upload_count)
    }

    async fn upload_file(&self, path: &Path, key: &str) -> Result<()> {
        let contents =
            std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let body = encode_body(contents, self.gzip)?;

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type(path));
        if self.gzip {
            request = request.content_encoding("gzip");
        }
        request
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("failed to upload s3://{}/{}", self.bucket, key))?;

        info!(key, "Uploaded");
        Ok(())
    }
}

/// `{agency}/{MM}_{YYYY}`: the run suffix without its leading underscore.
fn key_prefix(params: &RoveParams) -> String {
    format!("{}/{}", params.agency, params.suffix.trim_start_matches('_'))
}

/// S3 key of an output file: its file name under `prefix`, with `.gz` when
/// compressed.
pub fn object_key(prefix: &str, path: &Path, gzip: bool) -> String {
    let name = path
        .file_name()
        .and_then(OsStr::to_str)
        .unwrap_or("output");
    if gzip {
        format!("{prefix}/{name}.gz")
    } else {
        format!("{prefix}/{name}")
    }
}

pub fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(OsStr::to_str) {
        Some("json") => "application/json",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

fn encode_body(contents: Vec<u8>, gzip: bool) -> Result<Vec<u8>> {
    if !gzip {
        return Ok(contents);
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&contents)?;
    Ok(encoder.finish()?)
}
