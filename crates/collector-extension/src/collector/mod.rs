// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Supervision of the collector engine.
//!
//! [`Collector`] owns exactly one engine instance and walks it through
//! `Idle -> Running -> Stopping -> Stopped`. Once stopping has begun the
//! collector is never started again.

pub mod components;
pub mod process;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config_resolver::ResolvedConfigPath;
pub use components::Components;

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Collector already started")]
    AlreadyStarted,

    #[error("Collector not running")]
    NotRunning,

    #[error("Failed to launch collector {binary}: {source}")]
    Spawn {
        binary: PathBuf,
        source: std::io::Error,
    },

    #[error("Collector exited during startup with {0}")]
    ExitedDuringStartup(String),

    #[error("Collector exited with {0}")]
    ExitedWithError(String),

    #[error("Collector exited unexpectedly with {0}")]
    Exited(String),

    #[error("Collector did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Failed to signal collector: {0}")]
    Signal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Everything an engine needs to come up.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Factories the pipeline may use. Informational for engines whose
    /// binary carries its own factories, such as [`process::ProcessEngine`].
    pub components: Components,
    pub config_path: PathBuf,
}

/// The telemetry pipeline being supervised.
///
/// `shutdown` must wait for in-flight telemetry to be flushed before it
/// returns.
#[async_trait]
pub trait CollectorEngine: Send {
    async fn start(&mut self, settings: &CollectorSettings) -> Result<(), CollectorError>;

    async fn shutdown(&mut self) -> Result<(), CollectorError>;

    /// Fails if the engine has stopped on its own since `start`.
    fn check_alive(&mut self) -> Result<(), CollectorError>;
}

pub struct Collector {
    engine: Box<dyn CollectorEngine>,
    components: Components,
    state: CollectorState,
}

impl Collector {
    pub fn new(engine: Box<dyn CollectorEngine>, components: Components) -> Self {
        Self {
            engine,
            components,
            state: CollectorState::Idle,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == CollectorState::Running
    }

    /// Starts the engine with the resolved configuration. A failed start is
    /// final: the collector moves to `Stopped` and cannot be started again.
    pub async fn start(&mut self, config: &ResolvedConfigPath) -> Result<(), CollectorError> {
        if self.state != CollectorState::Idle {
            return Err(CollectorError::AlreadyStarted);
        }

        let settings = CollectorSettings {
            components: self.components.clone(),
            config_path: config.path().to_path_buf(),
        };
        debug!(
            "Starting collector with {} components and config {} ({})",
            settings.components.len(),
            config.path().display(),
            config.source()
        );

        match self.engine.start(&settings).await {
            Ok(()) => {
                self.state = CollectorState::Running;
                info!("Collector started");
                Ok(())
            }
            Err(e) => {
                self.state = CollectorState::Stopped;
                error!("Collector failed to start: {e}");
                Err(e)
            }
        }
    }

    /// Confirms a running collector is still up. A collector that exited on
    /// its own moves to `Stopped` and is not shut down again.
    pub fn check_alive(&mut self) -> Result<(), CollectorError> {
        if self.state != CollectorState::Running {
            return Err(CollectorError::NotRunning);
        }

        if let Err(e) = self.engine.check_alive() {
            self.state = CollectorState::Stopped;
            error!("Collector is no longer running: {e}");
            return Err(e);
        }
        Ok(())
    }

    /// Asks the engine to flush and exit. Ends in `Stopped` whether or not
    /// the engine shut down cleanly.
    pub async fn stop(&mut self) -> Result<(), CollectorError> {
        if self.state != CollectorState::Running {
            return Err(CollectorError::NotRunning);
        }

        self.state = CollectorState::Stopping;
        debug!("Stopping collector");
        let result = self.engine.shutdown().await;
        self.state = CollectorState::Stopped;

        if result.is_ok() {
            info!("Collector stopped");
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config_resolver::ConfigSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Engine that records calls; shared with the event loop and runtime tests.
    #[derive(Default)]
    pub(crate) struct FakeEngine {
        pub starts: Arc<AtomicUsize>,
        pub shutdowns: Arc<AtomicUsize>,
        pub fail_start: bool,
        pub fail_shutdown: bool,
        /// exited on its own after a successful start
        pub exited: bool,
        pub last_settings: Arc<Mutex<Option<CollectorSettings>>>,
    }

    #[async_trait]
    impl CollectorEngine for FakeEngine {
        async fn start(&mut self, settings: &CollectorSettings) -> Result<(), CollectorError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            *self.last_settings.lock().unwrap() = Some(settings.clone());
            if self.fail_start {
                return Err(CollectorError::ExitedDuringStartup(
                    "exit status: 1".to_string(),
                ));
            }
            Ok(())
        }

        async fn shutdown(&mut self) -> Result<(), CollectorError> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            if self.fail_shutdown {
                return Err(CollectorError::ShutdownTimeout(Duration::from_millis(1)));
            }
            Ok(())
        }

        fn check_alive(&mut self) -> Result<(), CollectorError> {
            if self.exited {
                return Err(CollectorError::Exited("exit status: 1".to_string()));
            }
            Ok(())
        }
    }

    fn config() -> ResolvedConfigPath {
        ResolvedConfigPath::new("/opt/collector-config/config.yaml", ConfigSource::Default)
    }

    #[tokio::test]
    async fn start_then_stop() {
        let engine = FakeEngine::default();
        let starts = engine.starts.clone();
        let shutdowns = engine.shutdowns.clone();
        let settings = engine.last_settings.clone();
        let mut collector = Collector::new(Box::new(engine), Components::lambda());
        assert_eq!(collector.state(), CollectorState::Idle);

        collector.start(&config()).await.unwrap();
        assert!(collector.is_running());
        let settings = settings.lock().unwrap().clone().unwrap();
        assert_eq!(
            settings.config_path,
            PathBuf::from("/opt/collector-config/config.yaml")
        );
        assert_eq!(settings.components, Components::lambda());

        collector.stop().await.unwrap();
        assert_eq!(collector.state(), CollectorState::Stopped);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut collector = Collector::new(Box::new(FakeEngine::default()), Components::lambda());
        collector.start(&config()).await.unwrap();
        assert!(matches!(
            collector.start(&config()).await,
            Err(CollectorError::AlreadyStarted)
        ));
    }

    #[tokio::test]
    async fn failed_start_is_final() {
        let engine = FakeEngine {
            fail_start: true,
            ..Default::default()
        };
        let starts = engine.starts.clone();
        let mut collector = Collector::new(Box::new(engine), Components::lambda());

        assert!(collector.start(&config()).await.is_err());
        assert_eq!(collector.state(), CollectorState::Stopped);
        assert!(matches!(
            collector.start(&config()).await,
            Err(CollectorError::AlreadyStarted)
        ));
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_without_start_is_rejected() {
        let engine = FakeEngine::default();
        let shutdowns = engine.shutdowns.clone();
        let mut collector = Collector::new(Box::new(engine), Components::lambda());

        assert!(matches!(
            collector.stop().await,
            Err(CollectorError::NotRunning)
        ));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_stop_still_ends_stopped() {
        let engine = FakeEngine {
            fail_shutdown: true,
            ..Default::default()
        };
        let shutdowns = engine.shutdowns.clone();
        let mut collector = Collector::new(Box::new(engine), Components::lambda());
        collector.start(&config()).await.unwrap();

        assert!(collector.stop().await.is_err());
        assert_eq!(collector.state(), CollectorState::Stopped);
        assert!(matches!(
            collector.stop().await,
            Err(CollectorError::NotRunning)
        ));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn running_collector_passes_liveness_check() {
        let mut collector = Collector::new(Box::new(FakeEngine::default()), Components::lambda());
        assert!(matches!(
            collector.check_alive(),
            Err(CollectorError::NotRunning)
        ));

        collector.start(&config()).await.unwrap();
        collector.check_alive().unwrap();
        assert!(collector.is_running());
    }

    #[tokio::test]
    async fn exited_collector_fails_liveness_check_and_is_not_stopped_again() {
        let engine = FakeEngine {
            exited: true,
            ..Default::default()
        };
        let shutdowns = engine.shutdowns.clone();
        let mut collector = Collector::new(Box::new(engine), Components::lambda());
        collector.start(&config()).await.unwrap();

        assert!(matches!(
            collector.check_alive(),
            Err(CollectorError::Exited(_))
        ));
        assert_eq!(collector.state(), CollectorState::Stopped);
        assert!(matches!(
            collector.stop().await,
            Err(CollectorError::NotRunning)
        ));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
    }
}
