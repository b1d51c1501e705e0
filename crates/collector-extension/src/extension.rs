// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Extension runtime.
//!
//! Startup order is fixed: resolve the collector configuration, start the
//! collector, then register with the host. Nothing registers with a collector
//! that failed to start or has already exited again. Whichever way the event loop ends, the collector is
//! stopped before [`Extension::run`] returns.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::process::ProcessEngine;
use crate::collector::{Collector, CollectorError, Components};
use crate::config::{Config, ExtensionName, ParameterStoreClient};
use crate::config_resolver::ConfigResolver;
use crate::event_loop::{process_events, LoopExit};
use crate::extension_api::{ExtensionApi, ExtensionApiError, ExtensionClient};
use crate::parameter_store::{
    ParameterStore, ParameterStoreError, SecretsExtensionStore, SsmStore,
};
use crate::signals::spawn_signal_bridge;

#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    #[error("Failed to create parameter store client: {0}")]
    ParameterStore(#[from] ParameterStoreError),

    #[error("Failed to create extensions API client: {0}")]
    Client(#[source] ExtensionApiError),

    #[error("Failed to start the extension: {0}")]
    CollectorStart(#[source] CollectorError),

    #[error("Cannot register extension: {0}")]
    Register(#[source] ExtensionApiError),
}

pub struct Extension {
    name: ExtensionName,
    resolver: ConfigResolver,
    api: Arc<dyn ExtensionApi>,
    collector: Collector,
    cancel: CancellationToken,
}

impl Extension {
    pub fn new(
        name: ExtensionName,
        resolver: ConfigResolver,
        api: Arc<dyn ExtensionApi>,
        collector: Collector,
    ) -> Self {
        Self {
            name,
            resolver,
            api,
            collector,
            cancel: CancellationToken::new(),
        }
    }

    /// Wires the production clients and the process-backed collector.
    pub fn from_config(config: &Config) -> Result<Self, ExtensionError> {
        let store: Arc<dyn ParameterStore> = match config.parameter_store_client {
            ParameterStoreClient::Sdk => Arc::new(SsmStore::new()),
            ParameterStoreClient::SecretsExtension => Arc::new(SecretsExtensionStore::new(
                config.parameter_store_url(),
                config.session_token.clone(),
            )?),
        };
        let resolver = ConfigResolver::new(store, config.resolver_settings());
        let api = ExtensionClient::new(&config.runtime_api).map_err(ExtensionError::Client)?;
        let collector = Collector::new(
            Box::new(ProcessEngine::new(config.process_engine_config())),
            Components::lambda(),
        );
        Ok(Self::new(
            config.extension_name.clone(),
            resolver,
            Arc::new(api),
            collector,
        ))
    }

    /// Token observed by the event loop and every host call. Cancelling it
    /// has the same effect as SIGTERM.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(mut self) -> Result<LoopExit, ExtensionError> {
        info!(
            "Launching OpenTelemetry Lambda extension {} version {}",
            self.name,
            env!("CARGO_PKG_VERSION")
        );

        let config_path = self.resolver.resolve().await;
        self.collector
            .start(&config_path)
            .await
            .map_err(ExtensionError::CollectorStart)?;
        // the collector may reject its configuration after the startup grace
        self.collector
            .check_alive()
            .map_err(ExtensionError::CollectorStart)?;

        let signal_task = match spawn_signal_bridge(self.cancel.clone()) {
            Ok(task) => Some(task),
            Err(e) => {
                warn!("Unable to listen for termination signals: {e}");
                None
            }
        };

        let response = match self.api.register(&self.name, &self.cancel).await {
            Ok(response) => response,
            Err(e) => {
                self.ensure_stopped().await;
                abort(signal_task);
                return Err(ExtensionError::Register(e));
            }
        };
        debug!("Register response: {response:?}");

        // Blocks until SHUTDOWN, cancellation or a poll failure.
        let exit = process_events(self.api.as_ref(), &mut self.collector, &self.cancel).await;
        debug!("Event loop finished: {exit:?}");

        self.ensure_stopped().await;
        abort(signal_task);
        Ok(exit)
    }

    async fn ensure_stopped(&mut self) {
        if self.collector.is_running() {
            debug!("Collector still running, stopping it");
            if let Err(e) = self.collector.stop().await {
                error!("Failed to stop the collector: {e}");
            }
        }
    }
}

fn abort(signal_task: Option<tokio::task::JoinHandle<()>>) {
    if let Some(task) = signal_task {
        task.abort();
    }
}
