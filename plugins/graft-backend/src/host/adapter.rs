//! Bridges host resource calls onto an axum [`Router`].
//!
//! Each [`CallResourceRequest`] becomes an `http::Request` whose path is the
//! resource path, with the [`PluginContext`] attached as a request extension.
//! The router's response is collected back into a [`CallResourceResponse`].

use crate::host::protocol::{CallResourceRequest, CallResourceResponse, PluginContext};
use crate::{GraftError, Result};
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request};
use axum::Router;
use std::collections::HashMap;
use tower::ServiceExt;
use tracing::warn;

/// Largest response body the adapter will buffer
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Adapter from host resource calls to an HTTP router
#[derive(Clone)]
pub struct HttpAdapter {
    router: Router,
}

impl HttpAdapter {
    /// Wrap `router`; it sees resource paths with a leading `/`
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// Route one resource call through the router
    pub async fn handle(&self, request: CallResourceRequest) -> Result<CallResourceResponse> {
        let http_request = into_http_request(request)?;

        let response = match self.router.clone().oneshot(http_request).await {
            Ok(response) => response,
            Err(infallible) => match infallible {},
        };

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| GraftError::InvalidRequest(format!("response body: {}", e)))?;

        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in parts.headers.iter() {
            match value.to_str() {
                Ok(value) => headers
                    .entry(name.as_str().to_string())
                    .or_default()
                    .push(value.to_string()),
                Err(_) => warn!(header = %name, "Dropping non-UTF-8 response header"),
            }
        }

        Ok(CallResourceResponse {
            status: parts.status.as_u16(),
            headers,
            body,
        })
    }
}

fn into_http_request(request: CallResourceRequest) -> Result<Request<Body>> {
    let CallResourceRequest {
        plugin_context,
        path,
        method,
        url,
        headers,
        body,
    } = request;

    let method = if method.is_empty() {
        Method::GET
    } else {
        Method::from_bytes(method.as_bytes())
            .map_err(|_| GraftError::InvalidRequest(format!("invalid method {:?}", method)))?
    };

    let mut uri = format!("/{}", path.trim_start_matches('/'));
    if let Some((_, query)) = url.split_once('?') {
        if !query.is_empty() {
            uri.push('?');
            uri.push_str(query);
        }
    }

    let mut builder = Request::builder().method(method).uri(&uri);
    for (name, values) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| GraftError::InvalidRequest(format!("invalid header name {:?}", name)))?;
        for value in values {
            let value = HeaderValue::from_str(&value).map_err(|_| {
                GraftError::InvalidRequest(format!("invalid value for header {}", name))
            })?;
            builder = builder.header(name.clone(), value);
        }
    }

    let mut http_request = builder
        .body(Body::from(body))
        .map_err(|e| GraftError::InvalidRequest(format!("invalid resource path {:?}: {}", uri, e)))?;
    http_request
        .extensions_mut()
        .insert::<PluginContext>(plugin_context);

    Ok(http_request)
}
