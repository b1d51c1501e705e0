// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Remote parameter lookup used to fetch the collector configuration.
//!
//! [`SsmStore`] calls SSM `GetParameter` with the function's own credentials.
//! [`SecretsExtensionStore`] goes through the Parameters and Secrets Lambda
//! extension instead, for functions that already ship that layer.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ssm::error::DisplayErrorContext;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::debug;

const GET_PARAMETER_PATH: &str = "/systemsmanager/parameters/get";
const SESSION_TOKEN_HEADER: &str = "X-Aws-Parameters-Secrets-Token";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum ParameterStoreError {
    #[error("Failed to build parameter store client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Parameter store request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Parameter store returned {status} for {name}: {body}")]
    Status {
        name: String,
        status: u16,
        body: String,
    },

    #[error("GetParameter failed for {name}: {message}")]
    Sdk { name: String, message: String },

    #[error("Parameter {0} has no value")]
    MissingValue(String),
}

/// Source of named configuration parameters.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    async fn get_parameter(&self, name: &str) -> Result<String, ParameterStoreError>;
}

/// SSM client using the default AWS credential and region chain.
///
/// The AWS configuration is loaded on first use, so functions that never set
/// a parameter name never pay for it.
#[derive(Debug, Default)]
pub struct SsmStore {
    client: OnceCell<aws_sdk_ssm::Client>,
}

impl SsmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: aws_sdk_ssm::Client) -> Self {
        Self {
            client: OnceCell::new_with(Some(client)),
        }
    }

    async fn client(&self) -> &aws_sdk_ssm::Client {
        self.client
            .get_or_init(|| async {
                let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
                aws_sdk_ssm::Client::new(&config)
            })
            .await
    }
}

#[async_trait]
impl ParameterStore for SsmStore {
    async fn get_parameter(&self, name: &str) -> Result<String, ParameterStoreError> {
        debug!("Fetching parameter {name} from SSM");
        // no WithDecryption: SecureString values come back encrypted
        let output = self
            .client()
            .await
            .get_parameter()
            .name(name)
            .send()
            .await
            .map_err(|e| ParameterStoreError::Sdk {
                name: name.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        output
            .parameter()
            .and_then(|parameter| parameter.value())
            .map(str::to_string)
            .ok_or_else(|| ParameterStoreError::MissingValue(name.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct GetParameterResponse {
    #[serde(rename = "Parameter")]
    parameter: Option<Parameter>,
}

#[derive(Debug, Deserialize)]
struct Parameter {
    #[serde(rename = "Value")]
    value: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SecretsExtensionStore {
    client: reqwest::Client,
    base_url: String,
    session_token: Option<String>,
}

impl SecretsExtensionStore {
    pub fn new(
        base_url: impl Into<String>,
        session_token: Option<String>,
    ) -> Result<Self, ParameterStoreError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ParameterStoreError::Client)?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            session_token,
        })
    }
}

#[async_trait]
impl ParameterStore for SecretsExtensionStore {
    async fn get_parameter(&self, name: &str) -> Result<String, ParameterStoreError> {
        let url = format!("{}{GET_PARAMETER_PATH}", self.base_url);
        debug!("Fetching parameter {name} from {url}");

        let mut request = self.client.get(&url).query(&[("name", name)]);
        if let Some(token) = &self.session_token {
            request = request.header(SESSION_TOKEN_HEADER, token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ParameterStoreError::Status {
                name: name.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let body: GetParameterResponse = response.json().await?;
        body.parameter
            .and_then(|parameter| parameter.value)
            .ok_or_else(|| ParameterStoreError::MissingValue(name.to_string()))
    }
}
