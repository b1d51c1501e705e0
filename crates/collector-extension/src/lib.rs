// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runs an OpenTelemetry collector as a Lambda extension.
//!
//! The extension resolves the collector configuration, starts the collector,
//! registers with the Extensions API and then follows the environment's
//! lifecycle events until `SHUTDOWN` (or SIGTERM/SIGINT), stopping the
//! collector on the way out.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod collector;
pub mod config;
pub mod config_resolver;
pub mod event_loop;
pub mod extension;
pub mod extension_api;
pub mod parameter_store;
pub mod signals;

pub use config::Config;
pub use extension::{Extension, ExtensionError};
