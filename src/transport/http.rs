//! HTTP transport for ntfy-style topic servers.
//!
//! Publishing is a `POST` of the message body to the topic URL with metadata
//! in `X-*` headers. Polling reads newline-delimited JSON from
//! `{topic}/json?poll=1&since=...`.

use super::{MessageTransport, OutgoingMessage, RawMessage};
use crate::error::TransportError;
use crate::types::{Priority, Timestamp, TopicRoute};
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// HTTP transport configuration.
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// Per-request timeout.
    pub timeout: Duration,

    pub user_agent: String,

    /// Access token sent as `Authorization: Bearer ...`.
    pub token: Option<String>,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("topic-sync/{}", env!("CARGO_PKG_VERSION")),
            token: None,
        }
    }
}

/// One line of the JSON message stream.
#[derive(Deserialize)]
struct WireMessage {
    id: String,
    time: i64,
    event: String,
    #[serde(default)]
    message: String,
    title: Option<String>,
    priority: Option<i64>,
    #[serde(default)]
    tags: Vec<String>,
    click: Option<String>,
}

/// Parse a newline-delimited JSON poll response. Only `message` events are
/// kept; keepalive and open events are skipped.
pub fn parse_message_stream(body: &str) -> Result<Vec<RawMessage>, TransportError> {
    let mut messages = Vec::new();

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let wire: WireMessage =
            serde_json::from_str(line).map_err(|e| TransportError::Decode(e.to_string()))?;

        if wire.event != "message" {
            continue;
        }

        messages.push(RawMessage {
            id: Some(wire.id),
            time: Some(Timestamp(wire.time)),
            title: wire.title,
            message: wire.message,
            priority: wire.priority.map(Priority::clamped),
            tags: wire.tags,
            click: wire.click,
        });
    }

    Ok(messages)
}

fn poll_url(route: &TopicRoute, since: Option<Timestamp>) -> String {
    let since = since.map_or_else(|| "all".to_string(), |t| t.0.to_string());
    format!("{}/json?poll=1&since={}", route.url(), since)
}

/// Blocking HTTP client for a topic server.
pub struct HttpTransport {
    client: Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn send(request: RequestBuilder) -> Result<Response, TransportError> {
        let response = request
            .send()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(TransportError::Status { code, body });
        }

        Ok(response)
    }
}

impl MessageTransport for HttpTransport {
    fn publish(&self, route: &TopicRoute, message: &OutgoingMessage) -> Result<(), TransportError> {
        let mut request = self.client.post(route.url()).body(message.body.clone());

        if let Some(title) = &message.title {
            request = request.header("X-Title", title);
        }
        if let Some(priority) = message.priority {
            request = request.header("X-Priority", priority.value().to_string());
        }
        if !message.tags.is_empty() {
            request = request.header("X-Tags", message.tags.join(","));
        }
        if let Some(click) = &message.click {
            request = request.header("X-Click", click);
        }

        Self::send(self.authorized(request))?;
        debug!(route = %route, "published message");
        Ok(())
    }

    fn fetch(
        &self,
        route: &TopicRoute,
        since: Option<Timestamp>,
    ) -> Result<Vec<RawMessage>, TransportError> {
        let url = poll_url(route, since);
        let response = Self::send(self.authorized(self.client.get(&url)))?;
        let body = response
            .text()
            .map_err(|e| TransportError::Decode(e.to_string()))?;

        let messages = parse_message_stream(&body)?;
        debug!(route = %route, count = messages.len(), "fetched messages");
        Ok(messages)
    }

    /// Pull subscriptions hold no server-side registration.
    fn deregister(&self, route: &TopicRoute) -> Result<(), TransportError> {
        debug!(route = %route, "nothing to deregister for polled topic");
        Ok(())
    }
}
