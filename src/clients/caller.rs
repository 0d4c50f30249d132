use std::sync::Arc;

use reqwest::{
    Client, Method,
    header::{CONTENT_LENGTH, HOST, HeaderMap, HeaderName, HeaderValue},
};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{
    clients::{circuit_breaker::CircuitBreakers, registry::RegistryClient},
    error::{PipelineError, Result},
};

/// Unwraps the `{ "data": ... }` envelope used by the internal services.
pub fn response_data(body: JsonValue) -> JsonValue {
    match body {
        JsonValue::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(JsonValue::Null)
        }
        other => other,
    }
}

/// A request addressed to a logical service rather than a host.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub body: Option<JsonValue>,
}

impl ServiceRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: JsonValue) -> Self {
        let mut request = Self::new(Method::POST, path);
        request.body = Some(body);
        request
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Result<Self> {
        let value = HeaderValue::from_str(value)
            .map_err(|_| PipelineError::validation(format!("Invalid value for header '{}'", name)))?;
        self.headers.insert(HeaderName::from_static(name), value);
        Ok(self)
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Drops headers that describe the inbound hop; forwarding them breaks
    /// the outbound transport.
    pub fn strip_hop_headers(&mut self) {
        self.headers.remove(CONTENT_LENGTH);
        self.headers.remove(HOST);
    }
}

/// Calls another service by logical name: discovery, then a protected HTTP
/// call under that service's circuit breaker.
#[derive(Debug, Clone)]
pub struct ResolvingCaller {
    registry: RegistryClient,
    breakers: Arc<CircuitBreakers>,
    http_client: Client,
}

impl ResolvingCaller {
    pub fn new(registry: RegistryClient, breakers: Arc<CircuitBreakers>, http_client: Client) -> Self {
        Self {
            registry,
            breakers,
            http_client,
        }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakers> {
        &self.breakers
    }

    pub async fn call(&self, service_name: &str, mut request: ServiceRequest) -> Result<JsonValue> {
        request.strip_hop_headers();

        let endpoint = self.registry.resolve(service_name).await?;
        let url = endpoint.url_for(&request.path);

        debug!(
            service = service_name,
            method = %request.method,
            url = %url,
            "Calling service"
        );

        let breaker = self.breakers.get(service_name);
        breaker
            .call(|| self.send(service_name, &url, &request))
            .await
    }

    async fn send(&self, service_name: &str, url: &str, request: &ServiceRequest) -> Result<JsonValue> {
        let mut builder = self
            .http_client
            .request(request.method.clone(), url)
            .headers(request.headers.clone());

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(service_name, e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PipelineError::unavailable(service_name, e.to_string()))?;

        let body = if text.trim().is_empty() {
            JsonValue::Null
        } else {
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        };

        if status.is_success() {
            Ok(body)
        } else {
            Err(PipelineError::Downstream {
                service: service_name.to_string(),
                status: status.as_u16(),
                body,
            })
        }
    }
}
