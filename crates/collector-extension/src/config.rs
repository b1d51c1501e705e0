// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::process::ProcessEngineConfig;
use crate::config_resolver::ResolverSettings;

pub const RUNTIME_API_ENV: &str = "AWS_LAMBDA_RUNTIME_API";
pub const PARAMETER_NAME_ENV: &str = "OPENTELEMETRY_SSM_PARAMETER_NAME";
pub const CONFIG_FILE_ENV: &str = "OPENTELEMETRY_COLLECTOR_CONFIG_FILE";
pub const COLLECTOR_BINARY_ENV: &str = "OPENTELEMETRY_COLLECTOR_BINARY";
pub const SHUTDOWN_TIMEOUT_ENV: &str = "OPENTELEMETRY_COLLECTOR_SHUTDOWN_TIMEOUT_MS";
pub const STARTUP_GRACE_ENV: &str = "OPENTELEMETRY_COLLECTOR_STARTUP_GRACE_MS";
pub const PARAMETER_STORE_CLIENT_ENV: &str = "OPENTELEMETRY_PARAMETER_STORE_CLIENT";
pub const LOG_LEVEL_ENV: &str = "OPENTELEMETRY_EXTENSION_LOG_LEVEL";
pub const PARAMETER_STORE_PORT_ENV: &str = "PARAMETERS_SECRETS_EXTENSION_HTTP_PORT";
pub const SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";

pub const DEFAULT_CONFIG_PATH: &str = "/opt/collector-config/config.yaml";
pub const PARAMETER_STORE_CONFIG_PATH: &str = "/tmp/ssm_collector.yml";
pub const DEFAULT_COLLECTOR_BINARY: &str = "/opt/collector/otelcol";
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 1500;
const DEFAULT_STARTUP_GRACE_MS: u64 = 200;
const DEFAULT_PARAMETER_STORE_PORT: u16 = 2773;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("AWS_LAMBDA_RUNTIME_API environment variable is not set")]
    MissingRuntimeApi,

    #[error("Invalid extension name {0:?}: must be the file name of the running binary")]
    InvalidExtensionName(String),

    #[error("Unable to determine the running binary's file name")]
    UnknownBinaryName,
}

/// How the collector configuration parameter is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterStoreClient {
    /// SSM `GetParameter` through the AWS SDK.
    #[default]
    Sdk,
    /// The Parameters and Secrets Lambda extension on its local port.
    SecretsExtension,
}

impl ParameterStoreClient {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "sdk" => Some(Self::Sdk),
            "secrets-extension" => Some(Self::SecretsExtension),
            _ => None,
        }
    }
}

/// Name the extension registers under.
///
/// The host rejects the registration unless this is exactly the file name of
/// the extension binary, so it is derived from `argv[0]` and checked once at
/// startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionName(String);

impl ExtensionName {
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(ConfigError::InvalidExtensionName(name));
        }
        Ok(Self(name))
    }

    pub fn from_binary_path(path: &Path) -> Result<Self, ConfigError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or(ConfigError::UnknownBinaryName)?;
        Self::new(file_name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExtensionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` of the Extensions API
    pub runtime_api: String,
    pub extension_name: ExtensionName,
    /// parameter holding the collector configuration, if any
    pub parameter_name: Option<String>,
    /// local configuration file used when the parameter store is unavailable
    pub config_file: Option<PathBuf>,
    pub collector_binary: PathBuf,
    /// how long the collector gets to flush and exit once asked to stop
    pub shutdown_timeout: Duration,
    /// a collector exiting within this window after launch failed to start
    pub startup_grace: Duration,
    pub parameter_store_client: ParameterStoreClient,
    pub parameter_store_port: u16,
    pub session_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok(), env::args_os().next())
    }

    /// Builds the configuration from an arbitrary variable lookup and the
    /// process' `argv[0]`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F, argv0: Option<OsString>) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());

        let runtime_api = var(RUNTIME_API_ENV).ok_or(ConfigError::MissingRuntimeApi)?;

        let binary_path = argv0.map(PathBuf::from).ok_or(ConfigError::UnknownBinaryName)?;
        let extension_name = ExtensionName::from_binary_path(&binary_path)?;

        let shutdown_timeout_ms = var(SHUTDOWN_TIMEOUT_ENV)
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS);

        let startup_grace_ms = var(STARTUP_GRACE_ENV)
            .and_then(|val| val.parse::<u64>().ok())
            .unwrap_or(DEFAULT_STARTUP_GRACE_MS);

        let parameter_store_client = var(PARAMETER_STORE_CLIENT_ENV)
            .and_then(|val| ParameterStoreClient::parse(&val))
            .unwrap_or_default();

        let parameter_store_port = var(PARAMETER_STORE_PORT_ENV)
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PARAMETER_STORE_PORT);

        Ok(Config {
            runtime_api,
            extension_name,
            parameter_name: var(PARAMETER_NAME_ENV),
            config_file: var(CONFIG_FILE_ENV).map(PathBuf::from),
            collector_binary: var(COLLECTOR_BINARY_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COLLECTOR_BINARY)),
            shutdown_timeout: Duration::from_millis(shutdown_timeout_ms),
            startup_grace: Duration::from_millis(startup_grace_ms),
            parameter_store_client,
            parameter_store_port,
            session_token: var(SESSION_TOKEN_ENV),
        })
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            parameter_name: self.parameter_name.clone(),
            local_override: self.config_file.clone(),
            parameter_store_path: PathBuf::from(PARAMETER_STORE_CONFIG_PATH),
        }
    }

    pub fn process_engine_config(&self) -> ProcessEngineConfig {
        ProcessEngineConfig {
            binary: self.collector_binary.clone(),
            args: Vec::new(),
            startup_grace: self.startup_grace,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    pub fn parameter_store_url(&self) -> String {
        format!("http://localhost:{}", self.parameter_store_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(
            |key| vars.get(key).cloned(),
            Some(OsString::from("/opt/extensions/collector")),
        )
    }

    #[test]
    fn test_error_if_no_runtime_api() {
        let config = config_from(&[]);
        assert_eq!(config.unwrap_err(), ConfigError::MissingRuntimeApi);
    }

    #[test]
    fn test_empty_runtime_api_counts_as_unset() {
        let config = config_from(&[(RUNTIME_API_ENV, "  ")]);
        assert_eq!(config.unwrap_err(), ConfigError::MissingRuntimeApi);
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[(RUNTIME_API_ENV, "127.0.0.1:9001")]).unwrap();
        assert_eq!(config.runtime_api, "127.0.0.1:9001");
        assert_eq!(config.extension_name.as_str(), "collector");
        assert_eq!(config.parameter_name, None);
        assert_eq!(config.config_file, None);
        assert_eq!(config.collector_binary, PathBuf::from(DEFAULT_COLLECTOR_BINARY));
        assert_eq!(config.shutdown_timeout, Duration::from_millis(1500));
        assert_eq!(config.startup_grace, Duration::from_millis(200));
        assert_eq!(config.parameter_store_client, ParameterStoreClient::Sdk);
        assert_eq!(config.parameter_store_url(), "http://localhost:2773");
        assert_eq!(config.session_token, None);
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (RUNTIME_API_ENV, "127.0.0.1:9001"),
            (PARAMETER_NAME_ENV, "/lambda/collector"),
            (CONFIG_FILE_ENV, "/var/task/collector.yaml"),
            (COLLECTOR_BINARY_ENV, "/opt/bin/otelcol-contrib"),
            (SHUTDOWN_TIMEOUT_ENV, "800"),
            (STARTUP_GRACE_ENV, "1500"),
            (PARAMETER_STORE_CLIENT_ENV, "Secrets-Extension"),
            (PARAMETER_STORE_PORT_ENV, "2999"),
            (SESSION_TOKEN_ENV, "token"),
        ])
        .unwrap();
        assert_eq!(config.parameter_name.as_deref(), Some("/lambda/collector"));
        assert_eq!(
            config.config_file,
            Some(PathBuf::from("/var/task/collector.yaml"))
        );
        assert_eq!(
            config.collector_binary,
            PathBuf::from("/opt/bin/otelcol-contrib")
        );
        assert_eq!(config.shutdown_timeout, Duration::from_millis(800));
        assert_eq!(config.startup_grace, Duration::from_millis(1500));
        assert_eq!(
            config.parameter_store_client,
            ParameterStoreClient::SecretsExtension
        );
        assert_eq!(config.parameter_store_url(), "http://localhost:2999");

        let engine = config.process_engine_config();
        assert_eq!(engine.startup_grace, Duration::from_millis(1500));
        assert_eq!(engine.shutdown_timeout, Duration::from_millis(800));
        assert_eq!(config.session_token.as_deref(), Some("token"));

        let settings = config.resolver_settings();
        assert_eq!(settings.parameter_name.as_deref(), Some("/lambda/collector"));
        assert_eq!(
            settings.parameter_store_path,
            PathBuf::from(PARAMETER_STORE_CONFIG_PATH)
        );
    }

    #[test]
    fn test_unparseable_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            (RUNTIME_API_ENV, "127.0.0.1:9001"),
            (SHUTDOWN_TIMEOUT_ENV, "soon"),
            (STARTUP_GRACE_ENV, "-1"),
            (PARAMETER_STORE_CLIENT_ENV, "vault"),
            (PARAMETER_STORE_PORT_ENV, "99999"),
        ])
        .unwrap();
        assert_eq!(config.shutdown_timeout, Duration::from_millis(1500));
        assert_eq!(config.startup_grace, Duration::from_millis(200));
        assert_eq!(config.parameter_store_client, ParameterStoreClient::Sdk);
        assert_eq!(config.parameter_store_port, 2773);
    }

    #[test]
    fn test_extension_name_must_be_a_file_name() {
        assert!(ExtensionName::new("collector").is_ok());
        assert_eq!(
            ExtensionName::new("").unwrap_err(),
            ConfigError::InvalidExtensionName(String::new())
        );
        assert!(ExtensionName::new("bin/collector").is_err());
        assert_eq!(
            ExtensionName::from_binary_path(Path::new("/")).unwrap_err(),
            ConfigError::UnknownBinaryName
        );
    }

    #[test]
    fn test_missing_argv0() {
        let config = Config::from_lookup(
            |key| (key == RUNTIME_API_ENV).then(|| "127.0.0.1:9001".to_string()),
            None,
        );
        assert_eq!(config.unwrap_err(), ConfigError::UnknownBinaryName);
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        env::set_var(RUNTIME_API_ENV, "127.0.0.1:9001");
        env::set_var(CONFIG_FILE_ENV, "/var/task/collector.yaml");
        let config = Config::from_env().unwrap();
        assert_eq!(config.runtime_api, "127.0.0.1:9001");
        assert_eq!(
            config.config_file,
            Some(PathBuf::from("/var/task/collector.yaml"))
        );
        env::remove_var(RUNTIME_API_ENV);
        env::remove_var(CONFIG_FILE_ENV);
    }
}
