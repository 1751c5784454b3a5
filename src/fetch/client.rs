use async_trait::async_trait;
use reqwest::{Request, Response};

/// Seam for issuing HTTP requests, so auth can be layered on by wrapping.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
