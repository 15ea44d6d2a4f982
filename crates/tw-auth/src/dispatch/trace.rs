use std::time::Instant;

use tracing::debug;

use super::{ApiRequest, ApiResponse, Middleware, Next};
use crate::errors::ApiResult;

/// Logs method, path, status and latency of every request that reaches it
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMiddleware;

#[async_trait::async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(&self, request: ApiRequest, next: Next) -> ApiResult<ApiResponse> {
        let method = request.method.clone();
        let path = request.path.clone();
        let started = Instant::now();

        let result = next.run(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(response) => debug!(
                %method,
                %path,
                status = response.status.as_u16(),
                elapsed_ms,
                "Request completed"
            ),
            Err(e) => debug!(
                %method,
                %path,
                status = e.status().map(|s| s.as_u16()),
                elapsed_ms,
                error = %e,
                "Request failed"
            ),
        }

        result
    }
}
