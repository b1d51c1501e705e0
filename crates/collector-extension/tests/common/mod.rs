// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![allow(dead_code)]

use async_trait::async_trait;
use collector_extension::collector::{CollectorEngine, CollectorError, CollectorSettings};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Collector engine double. Records the config it was started with and the
/// content of that file at start time.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    pub starts: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
    pub config_seen: Arc<Mutex<Option<(String, String)>>>,
    pub fail_start: bool,
}

impl RecordingEngine {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CollectorEngine for RecordingEngine {
    async fn start(&mut self, settings: &CollectorSettings) -> Result<(), CollectorError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let contents = std::fs::read_to_string(&settings.config_path).unwrap_or_default();
        *self.config_seen.lock().unwrap() =
            Some((settings.config_path.display().to_string(), contents));
        if self.fail_start {
            return Err(CollectorError::ExitedDuringStartup(
                "exit status: 1".to_string(),
            ));
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), CollectorError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn check_alive(&mut self) -> Result<(), CollectorError> {
        Ok(())
    }
}

/// Host that accepts registration but never answers `event/next`.
pub struct SilentHost {
    pub addr: SocketAddr,
    pub next_event_requests: Arc<AtomicUsize>,
}

impl SilentHost {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind silent host");
        let addr = listener.local_addr().expect("Failed to get local addr");
        let next_event_requests = Arc::new(AtomicUsize::new(0));
        let counter = next_event_requests.clone();

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let head = String::from_utf8_lossy(&request);
                    if head.starts_with("POST /2020-01-01/extension/register") {
                        let _ = stream
                            .write_all(
                                b"HTTP/1.1 200 OK\r\n\
                                  Lambda-Extension-Identifier: silent-id\r\n\
                                  Content-Length: 0\r\n\
                                  Connection: close\r\n\r\n",
                            )
                            .await;
                    } else {
                        counter.fetch_add(1, Ordering::SeqCst);
                        // hold the long-poll open
                        std::future::pending::<()>().await;
                    }
                });
            }
        });

        SilentHost {
            addr,
            next_event_requests,
        }
    }
}
