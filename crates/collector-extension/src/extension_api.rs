// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for the Lambda Extensions API.
//!
//! An extension registers once during the init phase and then long-polls
//! `event/next` until it receives `SHUTDOWN`. Every call after registration
//! carries the identifier the host handed back.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ExtensionName;

pub const EXTENSION_NAME_HEADER: &str = "Lambda-Extension-Name";
pub const EXTENSION_ID_HEADER: &str = "Lambda-Extension-Identifier";
pub const REGISTER_PATH: &str = "/2020-01-01/extension/register";
pub const NEXT_EVENT_PATH: &str = "/2020-01-01/extension/event/next";

#[derive(Debug, thiserror::Error)]
pub enum ExtensionApiError {
    #[error("Failed to build extensions API client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Extensions API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Extensions API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Register response is missing the Lambda-Extension-Identifier header")]
    MissingIdentifier,

    #[error("Unable to decode extensions API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Extension is already registered")]
    AlreadyRegistered,

    #[error("Extension is not registered")]
    NotRegistered,

    #[error("Request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    Invoke,
    Shutdown,
    /// Anything else the host sends; informational only.
    Other(String),
}

impl From<&str> for EventType {
    fn from(value: &str) -> Self {
        match value {
            "INVOKE" => EventType::Invoke,
            "SHUTDOWN" => EventType::Shutdown,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(EventType::from(s.as_str()))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Invoke => write!(f, "INVOKE"),
            EventType::Shutdown => write!(f, "SHUTDOWN"),
            EventType::Other(other) => write!(f, "{other}"),
        }
    }
}

/// Event returned by `event/next`. Everything except the type is kept as
/// opaque metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl LifecycleEvent {
    pub fn request_id(&self) -> Option<&str> {
        self.metadata.get("requestId").and_then(Value::as_str)
    }

    pub fn shutdown_reason(&self) -> Option<&str> {
        self.metadata.get("shutdownReason").and_then(Value::as_str)
    }

    pub fn deadline_ms(&self) -> Option<i64> {
        self.metadata.get("deadlineMs").and_then(Value::as_i64)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub function_name: Option<String>,
    pub function_version: Option<String>,
    pub handler: Option<String>,
}

/// Host-side lifecycle API. Both calls are cancellation-aware.
#[async_trait]
pub trait ExtensionApi: Send + Sync {
    async fn register(
        &self,
        name: &ExtensionName,
        cancel: &CancellationToken,
    ) -> Result<RegisterResponse, ExtensionApiError>;

    /// Blocks until the host has an event for this extension.
    async fn next_event(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LifecycleEvent, ExtensionApiError>;
}

#[derive(Debug)]
pub struct ExtensionClient {
    client: reqwest::Client,
    base_url: String,
    extension_id: OnceLock<String>,
}

impl ExtensionClient {
    /// `runtime_api` is the value of `AWS_LAMBDA_RUNTIME_API` (`host:port`);
    /// a full `http://` URL is accepted as well.
    pub fn new(runtime_api: &str) -> Result<Self, ExtensionApiError> {
        let base_url = if runtime_api.starts_with("http://") || runtime_api.starts_with("https://")
        {
            runtime_api.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", runtime_api.trim_end_matches('/'))
        };
        // no request timeout: event/next is held open until the host has an event
        let client = reqwest::Client::builder()
            .build()
            .map_err(ExtensionApiError::Client)?;
        Ok(Self {
            client,
            base_url,
            extension_id: OnceLock::new(),
        })
    }

    pub fn extension_id(&self) -> Option<&str> {
        self.extension_id.get().map(String::as_str)
    }

    async fn send_register(
        &self,
        name: &ExtensionName,
    ) -> Result<RegisterResponse, ExtensionApiError> {
        let url = format!("{}{REGISTER_PATH}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(EXTENSION_NAME_HEADER, name.as_str())
            .json(&serde_json::json!({ "events": ["INVOKE", "SHUTDOWN"] }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtensionApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let extension_id = response
            .headers()
            .get(EXTENSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(ExtensionApiError::MissingIdentifier)?;

        let body = response.bytes().await?;
        let register_response = if body.is_empty() {
            RegisterResponse::default()
        } else {
            serde_json::from_slice(&body)?
        };

        self.extension_id
            .set(extension_id)
            .map_err(|_| ExtensionApiError::AlreadyRegistered)?;
        Ok(register_response)
    }

    async fn send_next_event(&self, extension_id: &str) -> Result<LifecycleEvent, ExtensionApiError> {
        let url = format!("{}{NEXT_EVENT_PATH}", self.base_url);
        let response = self
            .client
            .get(&url)
            .header(EXTENSION_ID_HEADER, extension_id)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtensionApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

async fn cancellable<T, F>(cancel: &CancellationToken, request: F) -> Result<T, ExtensionApiError>
where
    F: Future<Output = Result<T, ExtensionApiError>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ExtensionApiError::Cancelled),
        result = request => result,
    }
}

#[async_trait]
impl ExtensionApi for ExtensionClient {
    async fn register(
        &self,
        name: &ExtensionName,
        cancel: &CancellationToken,
    ) -> Result<RegisterResponse, ExtensionApiError> {
        if self.extension_id.get().is_some() {
            return Err(ExtensionApiError::AlreadyRegistered);
        }
        debug!("Registering extension {name}");
        cancellable(cancel, self.send_register(name)).await
    }

    async fn next_event(
        &self,
        cancel: &CancellationToken,
    ) -> Result<LifecycleEvent, ExtensionApiError> {
        let extension_id = self
            .extension_id
            .get()
            .ok_or(ExtensionApiError::NotRegistered)?;
        cancellable(cancel, self.send_next_event(extension_id)).await
    }
}
