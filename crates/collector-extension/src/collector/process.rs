// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collector engine backed by an external collector binary.
//!
//! The child inherits stdout/stderr so its logs land in the function's log
//! stream. It is started with `--config=<path>` and asked to stop with
//! SIGTERM, which makes the collector drain its pipelines before exiting.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::{CollectorEngine, CollectorError, CollectorSettings};

#[derive(Debug, Clone)]
pub struct ProcessEngineConfig {
    pub binary: PathBuf,
    /// passed before `--config`
    pub args: Vec<String>,
    /// an exit inside this window counts as a failed start
    pub startup_grace: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Debug)]
pub struct ProcessEngine {
    config: ProcessEngineConfig,
    child: Option<Child>,
}

impl ProcessEngine {
    pub fn new(config: ProcessEngineConfig) -> Self {
        Self {
            config,
            child: None,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<(), CollectorError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // no pid means the child has already been reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|e| CollectorError::Signal(e.to_string()))?;
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(CollectorError::Signal(e.to_string())),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<(), CollectorError> {
    child.start_kill().map_err(CollectorError::Io)
}

#[async_trait]
impl CollectorEngine for ProcessEngine {
    async fn start(&mut self, settings: &CollectorSettings) -> Result<(), CollectorError> {
        if self.child.is_some() {
            return Err(CollectorError::AlreadyStarted);
        }

        let mut child = Command::new(&self.config.binary)
            .args(&self.config.args)
            .arg(format!("--config={}", settings.config_path.display()))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CollectorError::Spawn {
                binary: self.config.binary.clone(),
                source,
            })?;
        debug!(
            "Launched collector {} with pid {:?}",
            self.config.binary.display(),
            child.id()
        );

        // A bad configuration or a component that fails to initialise makes
        // the collector exit right away.
        match timeout(self.config.startup_grace, child.wait()).await {
            Ok(Ok(status)) => Err(CollectorError::ExitedDuringStartup(status.to_string())),
            Ok(Err(e)) => Err(CollectorError::Io(e)),
            Err(_) => {
                self.child = Some(child);
                Ok(())
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), CollectorError> {
        let mut child = self.child.take().ok_or(CollectorError::NotRunning)?;

        terminate(&mut child)?;

        match timeout(self.config.shutdown_timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                debug!("Collector exited with {status}");
                Ok(())
            }
            Ok(Ok(status)) => Err(CollectorError::ExitedWithError(status.to_string())),
            Ok(Err(e)) => Err(CollectorError::Io(e)),
            Err(_) => {
                warn!(
                    "Collector did not exit within {:?}, killing it",
                    self.config.shutdown_timeout
                );
                child.kill().await?;
                Err(CollectorError::ShutdownTimeout(self.config.shutdown_timeout))
            }
        }
    }

    fn check_alive(&mut self) -> Result<(), CollectorError> {
        let child = self.child.as_mut().ok_or(CollectorError::NotRunning)?;
        match child.try_wait()? {
            None => Ok(()),
            Some(status) => {
                debug!("Collector exited with {status} after startup");
                self.child = None;
                Err(CollectorError::Exited(status.to_string()))
            }
        }
    }
}
