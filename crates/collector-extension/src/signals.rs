// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for TerminationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationSignal::Interrupt => write!(f, "SIGINT"),
            TerminationSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// SIGINT/SIGTERM listeners, installed eagerly so no signal is missed
/// between installation and the first poll.
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl SignalListener {
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    /// Resolves with the first termination signal, or `None` if the signal
    /// streams closed.
    pub async fn recv(&mut self) -> Option<TerminationSignal> {
        #[cfg(unix)]
        {
            tokio::select! {
                received = self.interrupt.recv() => received.map(|()| TerminationSignal::Interrupt),
                received = self.terminate.recv() => received.map(|()| TerminationSignal::Terminate),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c()
                .await
                .ok()
                .map(|()| TerminationSignal::Interrupt)
        }
    }
}

/// Cancels `cancel` once `signal` resolves. Returns early, without touching
/// the token, if something else cancels it first.
pub async fn bridge<F>(signal: F, cancel: CancellationToken)
where
    F: Future<Output = Option<TerminationSignal>>,
{
    tokio::select! {
        () = cancel.cancelled() => {
            debug!("Cancellation already requested, signal bridge exiting");
        }
        received = signal => match received {
            Some(signal) => {
                info!("Received {signal}");
                cancel.cancel();
                debug!("Exiting");
            }
            None => warn!("Signal listener closed, termination signals will not be handled"),
        },
    }
}

/// Installs the SIGINT/SIGTERM listeners and spawns the task that turns the
/// first of them into cancellation of `cancel`.
pub fn spawn_signal_bridge(cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    let mut listener = SignalListener::install()?;
    Ok(tokio::spawn(async move {
        bridge(listener.recv(), cancel).await;
    }))
}
