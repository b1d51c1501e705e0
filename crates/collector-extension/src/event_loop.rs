// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::collector::Collector;
use crate::extension_api::{EventType, ExtensionApi, ExtensionApiError};

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// `SHUTDOWN` received and the collector asked to stop.
    Shutdown,
    /// The shared cancellation token fired.
    Cancelled,
    /// The host connection failed.
    PollFailed,
}

/// Polls the host for lifecycle events until `SHUTDOWN`, cancellation or a
/// poll failure.
///
/// Cancellation is checked before every poll and also interrupts a pending
/// poll. On `SHUTDOWN` the collector is stopped exactly once; a stop failure
/// is logged and does not change the outcome.
pub async fn process_events(
    api: &dyn ExtensionApi,
    collector: &mut Collector,
    cancel: &CancellationToken,
) -> LoopExit {
    loop {
        if cancel.is_cancelled() {
            debug!("Cancellation requested, leaving event loop");
            return LoopExit::Cancelled;
        }

        debug!("Waiting for event...");
        let event = match api.next_event(cancel).await {
            Ok(event) => event,
            Err(ExtensionApiError::Cancelled) => {
                debug!("Event poll cancelled, leaving event loop");
                return LoopExit::Cancelled;
            }
            Err(e) => {
                error!("Error: {e}");
                debug!("Exiting");
                return LoopExit::PollFailed;
            }
        };

        match &event.event_type {
            EventType::Shutdown => {
                info!(
                    "Received SHUTDOWN event, reason: {}, deadline: {}",
                    event.shutdown_reason().unwrap_or("unknown"),
                    event
                        .deadline_ms()
                        .map_or_else(|| "unknown".to_string(), |ms| format!("{ms}ms"))
                );
                if let Err(e) = collector.stop().await {
                    error!("Failed to stop the collector: {e}");
                }
                debug!("Exiting");
                return LoopExit::Shutdown;
            }
            EventType::Invoke => {
                debug!(
                    "Received INVOKE event, request id: {}",
                    event.request_id().unwrap_or("unknown")
                );
            }
            EventType::Other(other) => {
                debug!("Ignoring {other} event");
            }
        }
    }
}
