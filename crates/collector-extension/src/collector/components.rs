// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Registry of the component factories a collector build ships with.
///
/// Handed to the engine on start. The process engine launches a binary that
/// already links these factories, so there the registry only documents what
/// the build provides and shows up in the startup log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Components {
    pub receivers: Vec<&'static str>,
    pub processors: Vec<&'static str>,
    pub exporters: Vec<&'static str>,
    pub extensions: Vec<&'static str>,
}

impl Components {
    /// Components bundled with the Lambda collector distribution.
    pub fn lambda() -> Self {
        Self {
            receivers: vec!["otlp", "telemetryapi"],
            processors: vec![
                "attributes",
                "batch",
                "decouple",
                "filter",
                "memory_limiter",
                "probabilistic_sampler",
                "resource",
                "span",
            ],
            exporters: vec!["debug", "otlp", "otlphttp", "prometheusremotewrite"],
            extensions: vec!["basicauth", "sigv4auth"],
        }
    }

    pub fn len(&self) -> usize {
        self.receivers.len() + self.processors.len() + self.exporters.len() + self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        [
            &self.receivers,
            &self.processors,
            &self.exporters,
            &self.extensions,
        ]
        .iter()
        .any(|kind| kind.iter().any(|component| *component == name))
    }
}
