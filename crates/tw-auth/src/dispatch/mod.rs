//! Request dispatch pipeline.
//!
//! A request flows through an ordered list of [`Middleware`] stages and ends
//! at a [`Transport`]. The default pipeline is
//! `ReauthMiddleware -> TracingMiddleware -> HttpTransport`.

mod reauth;
mod trace;
mod transport;

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{ApiError, ApiResult};
use crate::state::AuthStore;

pub use reauth::ReauthMiddleware;
pub use trace::TracingMiddleware;
pub use transport::{HttpTransport, Transport};

/// Outgoing API call
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    requires_auth: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            requires_auth: true,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> ApiResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    /// Add a header
    pub fn header(mut self, name: HeaderName, value: &str) -> ApiResult<Self> {
        self.headers.insert(name, HeaderValue::from_str(value)?);
        Ok(self)
    }

    /// Add a header whose value is kept out of `Debug` output
    pub fn sensitive_header(mut self, name: HeaderName, value: &str) -> ApiResult<Self> {
        let mut value = HeaderValue::from_str(value)?;
        value.set_sensitive(true);
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Replace the bearer credential; `None` removes it
    pub fn set_bearer(&mut self, token: Option<&str>) -> ApiResult<()> {
        self.headers.remove(AUTHORIZATION);
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            self.headers.insert(AUTHORIZATION, value);
        }
        Ok(())
    }

    pub fn requires_auth(&self) -> bool {
        self.requires_auth
    }

    pub(crate) fn set_requires_auth(&mut self, requires_auth: bool) {
        self.requires_auth = requires_auth;
    }
}

/// Successful API response
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    /// Decoded JSON body; `Null` when the body was empty
    pub body: Value,
}

impl ApiResponse {
    /// Decode the body into `T`
    pub fn json<T: DeserializeOwned>(&self) -> ApiResult<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| ApiError::Parse {
            status: self.status,
            body: self.body.to_string(),
            message: e.to_string(),
        })
    }
}

/// Per-call dispatch options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Attach the bearer token and take part in the refresh protocol
    pub requires_auth: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            requires_auth: true,
        }
    }
}

impl DispatchOptions {
    /// Options for endpoints that must never wait on or trigger a refresh
    pub fn anonymous() -> Self {
        Self {
            requires_auth: false,
        }
    }
}

/// One stage of the request pipeline
#[async_trait::async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, request: ApiRequest, next: Next) -> ApiResult<ApiResponse>;
}

/// The remainder of the pipeline after the current stage
///
/// Cheap to clone and `'static`, so a stage may run it more than once or move
/// it into a spawned task.
#[derive(Clone)]
pub struct Next {
    stages: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    transport: Arc<dyn Transport>,
}

impl Next {
    pub async fn run(self, request: ApiRequest) -> ApiResult<ApiResponse> {
        let Some(stage) = self.stages.get(self.index).cloned() else {
            return self.transport.send(request).await;
        };

        let next = Next {
            index: self.index + 1,
            ..self
        };
        stage.handle(request, next).await
    }
}

/// Ordered middleware stages in front of a transport
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Middleware>]>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Middleware>>, transport: Arc<dyn Transport>) -> Self {
        Self {
            stages: stages.into(),
            transport,
        }
    }

    pub async fn run(&self, request: ApiRequest) -> ApiResult<ApiResponse> {
        Next {
            stages: Arc::clone(&self.stages),
            index: 0,
            transport: Arc::clone(&self.transport),
        }
        .run(request)
        .await
    }
}

/// Entry point for every API call
///
/// Wraps the pipeline with the reauth stage bound to an [`AuthStore`].
#[derive(Clone)]
pub struct Dispatcher {
    pipeline: Pipeline,
    reauth: Arc<ReauthMiddleware>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, store: AuthStore) -> Self {
        let reauth = Arc::new(ReauthMiddleware::new(store));
        let stages: Vec<Arc<dyn Middleware>> = vec![
            Arc::clone(&reauth) as Arc<dyn Middleware>,
            Arc::new(TracingMiddleware),
        ];

        Self {
            pipeline: Pipeline::new(stages, transport),
            reauth,
        }
    }

    /// Send `request`, refreshing credentials on 401 when it requires auth
    pub async fn dispatch(
        &self,
        mut request: ApiRequest,
        options: DispatchOptions,
    ) -> ApiResult<ApiResponse> {
        request.set_requires_auth(options.requires_auth);
        self.pipeline.run(request).await
    }

    /// Whether a token refresh call is in flight
    pub fn is_refreshing(&self) -> bool {
        self.reauth.is_refreshing()
    }
}
