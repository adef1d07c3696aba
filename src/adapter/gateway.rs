//! API-gateway proxy events.
//!
//! Request fields: `httpMethod`, `path`, `headers`, `multiValueHeaders`,
//! `queryStringParameters`, `multiValueQueryStringParameters`, `body`,
//! `isBase64Encoded`, `requestContext.identity.sourceIp`.
//!
//! Multi-value maps win over their single-value twins when both name the
//! same key. Response bodies that are not UTF-8 go out base64 encoded.

use std::collections::{BTreeMap, HashMap};

use axum::body::{Body, Bytes};
use axum::http::header::{HeaderName, InvalidHeaderName, InvalidHeaderValue};
use axum::http::uri::InvalidUri;
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::response::IntoResponse;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::{Forwarder, InboundRequest};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid method `{0}`")]
    Method(String),
    #[error("invalid request path: {0}")]
    Uri(#[from] InvalidUri),
    #[error("invalid header name: {0}")]
    HeaderName(#[from] InvalidHeaderName),
    #[error("invalid value for header `{name}`: {source}")]
    HeaderValue {
        name: String,
        #[source]
        source: InvalidHeaderValue,
    },
    #[error("body is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to read response body: {0}")]
    ResponseBody(#[source] axum::Error),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub multi_value_headers: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub multi_value_query_string_parameters: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
    #[serde(default)]
    pub request_context: RequestContext,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default)]
    pub identity: Identity,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub source_ip: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub multi_value_headers: BTreeMap<String, Vec<String>>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl GatewayResponse {
    /// A plain-text response, used when the event never reaches an upstream.
    pub fn text(status: StatusCode, message: impl Into<String>) -> Self {
        let content_type = "text/plain; charset=utf-8".to_string();
        Self {
            status_code: status.as_u16(),
            headers: BTreeMap::from([("content-type".to_string(), content_type.clone())]),
            multi_value_headers: BTreeMap::from([("content-type".to_string(), vec![content_type])]),
            body: message.into(),
            is_base64_encoded: false,
        }
    }
}

/// Forward one event and shape the result as a gateway response.
///
/// Never fails: conversion and routing errors become error responses.
pub async fn handle(forwarder: &Forwarder, event: GatewayRequest) -> GatewayResponse {
    let inbound = match to_inbound(event) {
        Ok(inbound) => inbound,
        Err(err) => {
            tracing::warn!(error = %err, "Rejected gateway event");
            return GatewayResponse::text(StatusCode::BAD_REQUEST, err.to_string());
        }
    };

    let response = match forwarder.forward(inbound).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };

    match from_response(response).await {
        Ok(response) => response,
        Err(err) => {
            tracing::error!(error = %err, "Failed to relay upstream response");
            GatewayResponse::text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

/// Build the request the forwarder expects from a gateway event.
pub fn to_inbound(event: GatewayRequest) -> Result<InboundRequest, GatewayError> {
    let method = Method::from_bytes(event.http_method.as_bytes())
        .map_err(|_| GatewayError::Method(event.http_method.clone()))?;

    let path = if event.path.is_empty() { "/" } else { event.path.as_str() };
    let query = encode_query(
        event.query_string_parameters.as_ref(),
        event.multi_value_query_string_parameters.as_ref(),
    );
    let uri = if query.is_empty() {
        path.parse()?
    } else {
        format!("{path}?{query}").parse()?
    };

    let headers = build_headers(event.headers.as_ref(), event.multi_value_headers.as_ref())?;

    let body = match event.body {
        Some(body) if event.is_base64_encoded => Body::from(STANDARD.decode(body)?),
        Some(body) => Body::from(body),
        None => Body::empty(),
    };

    let mut request = Request::new(body);
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    *request.headers_mut() = headers;

    let remote = event.request_context.identity.source_ip.unwrap_or_default();
    Ok(InboundRequest::from_http(request, remote))
}

/// Collect the response into the gateway shape.
pub async fn from_response(response: Response<Body>) -> Result<GatewayResponse, GatewayError> {
    let (parts, body) = response.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(GatewayError::ResponseBody)?;

    let mut headers = BTreeMap::new();
    let mut multi_value_headers: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in parts.headers.iter() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers
            .entry(name.as_str().to_string())
            .or_insert_with(|| value.clone());
        multi_value_headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(value);
    }

    let (body, is_base64_encoded) = encode_body(bytes);
    Ok(GatewayResponse {
        status_code: parts.status.as_u16(),
        headers,
        multi_value_headers,
        body,
        is_base64_encoded,
    })
}

fn encode_body(bytes: Bytes) -> (String, bool) {
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => (text, false),
        Err(_) => (STANDARD.encode(&bytes), true),
    }
}

fn encode_query(
    single: Option<&HashMap<String, String>>,
    multi: Option<&HashMap<String, Vec<String>>>,
) -> String {
    let mut params: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    if let Some(multi) = multi {
        for (key, values) in multi {
            params.insert(key, values.iter().map(String::as_str).collect());
        }
    }
    if let Some(single) = single {
        for (key, value) in single {
            params.entry(key).or_insert_with(|| vec![value.as_str()]);
        }
    }

    let mut query = url::form_urlencoded::Serializer::new(String::new());
    for (key, values) in params {
        for value in values {
            query.append_pair(key, value);
        }
    }
    query.finish()
}

fn build_headers(
    single: Option<&HashMap<String, String>>,
    multi: Option<&HashMap<String, Vec<String>>>,
) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::new();
    if let Some(multi) = multi {
        for (name, values) in multi {
            let header = HeaderName::from_bytes(name.as_bytes())?;
            for value in values {
                headers.append(header.clone(), header_value(name, value)?);
            }
        }
    }
    if let Some(single) = single {
        for (name, value) in single {
            let header = HeaderName::from_bytes(name.as_bytes())?;
            if !headers.contains_key(&header) {
                headers.insert(header, header_value(name, value)?);
            }
        }
    }
    Ok(headers)
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, GatewayError> {
    HeaderValue::from_str(value).map_err(|source| GatewayError::HeaderValue {
        name: name.to_string(),
        source,
    })
}
