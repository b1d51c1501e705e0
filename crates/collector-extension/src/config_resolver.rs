// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_CONFIG_PATH;
use crate::parameter_store::{ParameterStore, ParameterStoreError};

/// Where the collector configuration was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    ParameterStore,
    LocalOverride,
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::ParameterStore => write!(f, "parameter store"),
            ConfigSource::LocalOverride => write!(f, "local override"),
            ConfigSource::Default => write!(f, "default"),
        }
    }
}

/// Path of the configuration document handed to the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfigPath {
    path: PathBuf,
    source: ConfigSource,
}

impl ResolvedConfigPath {
    pub fn new(path: impl Into<PathBuf>, source: ConfigSource) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> ConfigSource {
        self.source
    }
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub parameter_name: Option<String>,
    pub local_override: Option<PathBuf>,
    /// file the fetched parameter is written to
    pub parameter_store_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
enum RemoteConfigError {
    #[error("no parameter name configured")]
    NotConfigured,

    #[error(transparent)]
    Fetch(#[from] ParameterStoreError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Picks the collector configuration: remote parameter first, then the local
/// override, then the built-in default. Resolution never fails.
pub struct ConfigResolver {
    store: Arc<dyn ParameterStore>,
    settings: ResolverSettings,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ParameterStore>, settings: ResolverSettings) -> Self {
        Self { store, settings }
    }

    pub async fn resolve(&self) -> ResolvedConfigPath {
        match self.fetch_remote().await {
            Ok(path) => {
                info!(
                    "Using collector configuration from the parameter store at {}",
                    path.display()
                );
                ResolvedConfigPath::new(path, ConfigSource::ParameterStore)
            }
            Err(RemoteConfigError::NotConfigured) => {
                debug!("No parameter name configured, using local collector configuration");
                self.local_fallback()
            }
            Err(e) => {
                warn!("Unable to load collector configuration from the parameter store: {e}");
                self.local_fallback()
            }
        }
    }

    async fn fetch_remote(&self) -> Result<PathBuf, RemoteConfigError> {
        let name = self
            .settings
            .parameter_name
            .as_deref()
            .ok_or(RemoteConfigError::NotConfigured)?;

        let value = self.store.get_parameter(name).await?;

        let path = self.settings.parameter_store_path.clone();
        tokio::fs::write(&path, value.as_bytes())
            .await
            .map_err(|source| RemoteConfigError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }

    fn local_fallback(&self) -> ResolvedConfigPath {
        match &self.settings.local_override {
            Some(path) => {
                info!("Using config file at path {}", path.display());
                ResolvedConfigPath::new(path.clone(), ConfigSource::LocalOverride)
            }
            None => ResolvedConfigPath::new(DEFAULT_CONFIG_PATH, ConfigSource::Default),
        }
    }
}
