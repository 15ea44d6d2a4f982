use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::instrument;
use url::Url;

use super::{ApiRequest, ApiResponse};
use crate::config::{AuthConfig, USER_AGENT};
use crate::errors::{ApiError, ApiResult};

/// Maximum number of body characters kept in a parse error
const BODY_SNIPPET_LEN: usize = 200;

/// Final pipeline stage that puts a request on the wire
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse>;
}

/// `reqwest`-backed transport
///
/// Non-2xx responses become [`ApiError::Http`]; bodies that are not JSON
/// become [`ApiError::Parse`] carrying the real status.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(config: &AuthConfig) -> ApiResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.http_timeouts.connect)
            .timeout(config.http_timeouts.request)
            .user_agent(config.user_agent.as_deref().unwrap_or(USER_AGENT))
            .build()?;

        // Url::join replaces the last segment unless the base ends in '/'
        let mut base_url = config.base_url.clone();
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> ApiResult<Url> {
        Ok(self.base_url.join(path.trim_start_matches('/'))?)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    async fn send(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        let url = self.url_for(&request.path)?;

        let mut builder = self
            .http
            .request(request.method, url)
            .headers(request.headers)
            .header(ACCEPT, "application/json");
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = decode_body(status, &text)?;

        if status.is_success() {
            Ok(ApiResponse { status, body })
        } else {
            Err(ApiError::Http { status, body })
        }
    }
}

/// Decode a response body as JSON, treating an empty body as `null`
pub(crate) fn decode_body(status: StatusCode, text: &str) -> ApiResult<Value> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }

    serde_json::from_str(text).map_err(|e| ApiError::Parse {
        status,
        body: text.chars().take(BODY_SNIPPET_LEN).collect(),
        message: e.to_string(),
    })
}
