// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Intake Server Configuration
//
// Defines the configuration schema for a term-apply intake server:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - SSH listener, host key and session limits
// - Key registry endpoint
// - Object store and keyed store backends
// - Role catalogue and observability settings

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::application::ROLE_CATALOGUE;
use super::repository::{PostgresConfig, StorageBackend};

pub const API_VERSION: &str = "term-apply/v1";
pub const KIND: &str = "IntakeConfig";

/// Top-level Kubernetes-style intake configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeConfigManifest {
    /// API version (must be "term-apply/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "IntakeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: IntakeConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable deployment name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Intake configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeConfigSpec {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub applications: ApplicationsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Path to the OpenSSH-format host private key
    #[serde(default = "default_host_key_path")]
    pub host_key_path: String,

    /// Idle connections are closed after this many seconds
    #[serde(default = "default_max_session_secs")]
    pub max_session_secs: u64,

    /// Local staging directory for uploads
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Uploads reaching this many bytes are rejected
    #[serde(default = "default_upload_limit_bytes")]
    pub upload_limit_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL; keys are fetched from `<url>/<identity>.keys`
    #[serde(default = "default_registry_url")]
    pub url: String,

    #[serde(default = "default_registry_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub object_store: ObjectStoreConfig,

    /// Key prefix under which resumes are stored
    #[serde(default = "default_resume_prefix")]
    pub resume_prefix: String,

    #[serde(default)]
    pub keyed_store: KeyedStoreConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreKind {
    S3,
    #[default]
    Fs,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default)]
    pub backend: ObjectStoreKind,

    /// S3 bucket name (required for the s3 backend)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Custom S3 endpoint (MinIO, LocalStack)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Root directory for the fs backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyedStoreKind {
    #[default]
    InMemory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyedStoreConfig {
    #[serde(default)]
    pub backend: KeyedStoreKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationsConfig {
    /// Roles offered by the form, in menu order
    #[serde(default = "default_roles")]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus exporter port; disabled when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    23234
}

fn default_host_key_path() -> String {
    ".ssh/term_info_ed25519".to_string()
}

fn default_max_session_secs() -> u64 {
    300
}

fn default_upload_dir() -> String {
    "./uploads".to_string()
}

fn default_upload_limit_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_registry_url() -> String {
    "https://github.com".to_string()
}

fn default_registry_timeout_secs() -> u64 {
    10
}

fn default_resume_prefix() -> String {
    "/term-apply/dev/resumes".to_string()
}

fn default_roles() -> Vec<String> {
    ROLE_CATALOGUE.iter().map(|r| r.to_string()).collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            host_key_path: default_host_key_path(),
            max_session_secs: default_max_session_secs(),
            upload_dir: default_upload_dir(),
            upload_limit_bytes: default_upload_limit_bytes(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            timeout_secs: default_registry_timeout_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            object_store: ObjectStoreConfig::default(),
            resume_prefix: default_resume_prefix(),
            keyed_store: KeyedStoreConfig::default(),
        }
    }
}

impl Default for ApplicationsConfig {
    fn default() -> Self {
        Self { roles: default_roles() }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_port: None,
        }
    }
}

impl Default for IntakeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "term-apply".to_string(),
                version: Some("1.0.0".to_string()),
            },
            spec: IntakeConfigSpec::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_session(&self) -> Duration {
        Duration::from_secs(self.max_session_secs)
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl KeyedStoreConfig {
    /// Repository backend selection; call after `validate()`
    pub fn storage_backend(&self) -> StorageBackend {
        match (self.backend, &self.connection_string) {
            (KeyedStoreKind::Postgres, Some(conn)) => StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: conn.clone(),
            }),
            _ => StorageBackend::InMemory,
        }
    }
}

impl IntakeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. TA_CONFIG_PATH environment variable
    /// 2. ./term-apply.yaml (working directory)
    /// 3. ~/.term-apply/config.yaml (user home)
    /// 4. /etc/term-apply/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("TA_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./term-apply.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".term-apply").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/term-apply/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    /// This allows container deployments to override config via env vars
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("TA_HOST") {
            tracing::info!("Environment override: TA_HOST={}", val);
            self.spec.server.host = val;
        }

        if let Some(val) = lookup("TA_PORT") {
            match val.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Environment override: TA_PORT={}", port);
                    self.spec.server.port = port;
                }
                Err(_) => {
                    tracing::warn!("Invalid value for TA_PORT: '{}'. Expected a port number. Ignoring.", val);
                }
            }
        }

        if let Some(val) = lookup("TA_UPLOAD_DIR") {
            tracing::info!("Environment override: TA_UPLOAD_DIR={}", val);
            self.spec.server.upload_dir = val;
        }

        if let Some(val) = lookup("TA_HOST_KEY_PATH") {
            tracing::info!("Environment override: TA_HOST_KEY_PATH={}", val);
            self.spec.server.host_key_path = val;
        }

        if let Some(val) = lookup("TA_BUCKET") {
            tracing::info!("Environment override: TA_BUCKET={} (object store backend set to s3)", val);
            self.spec.storage.object_store.backend = ObjectStoreKind::S3;
            self.spec.storage.object_store.bucket = Some(val);
        }

        if let Some(val) = lookup("TA_RESUME_PREFIX") {
            tracing::info!("Environment override: TA_RESUME_PREFIX={}", val);
            self.spec.storage.resume_prefix = val;
        }

        if let Some(val) = lookup("TA_DATABASE_URL") {
            tracing::info!("Environment override: TA_DATABASE_URL set (keyed store backend set to postgres)");
            self.spec.storage.keyed_store.backend = KeyedStoreKind::Postgres;
            self.spec.storage.keyed_store.connection_string = Some(val);
        }

        if let Some(val) = lookup("TA_REGISTRY_URL") {
            tracing::info!("Environment override: TA_REGISTRY_URL={}", val);
            self.spec.registry.url = val;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let server = &self.spec.server;
        if server.port == 0 {
            anyhow::bail!("spec.server.port cannot be 0");
        }
        if server.upload_limit_bytes == 0 {
            anyhow::bail!("spec.server.upload_limit_bytes must be greater than 0");
        }
        if server.upload_dir.is_empty() {
            anyhow::bail!("spec.server.upload_dir cannot be empty");
        }

        if self.spec.registry.url.is_empty() {
            anyhow::bail!("spec.registry.url cannot be empty");
        }

        let object_store = &self.spec.storage.object_store;
        if object_store.backend == ObjectStoreKind::S3
            && object_store.bucket.as_deref().is_none_or(str::is_empty)
        {
            anyhow::bail!("spec.storage.object_store.bucket is required for the s3 backend");
        }

        let keyed_store = &self.spec.storage.keyed_store;
        if keyed_store.backend == KeyedStoreKind::Postgres
            && keyed_store.connection_string.as_deref().is_none_or(str::is_empty)
        {
            anyhow::bail!("spec.storage.keyed_store.connection_string is required for the postgres backend");
        }

        if self.spec.applications.roles.is_empty() {
            anyhow::bail!("spec.applications.roles must list at least one role");
        }

        Ok(())
    }
}
