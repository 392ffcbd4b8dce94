// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `term-apply serve`
//!
//! Builds the intake services from configuration and runs the SSH server
//! until Ctrl-C / SIGTERM, then drains the intake writer.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use term_apply_core::application::{IntakeConsistencyEngine, ResumeStatusCache, TransferPipeline};
use term_apply_core::domain::auth::PublicKeyAuthenticator;
use term_apply_core::domain::config::IntakeConfigManifest;
use term_apply_core::infrastructure::key_registry::KeyRegistryAuthenticator;
use term_apply_core::infrastructure::object_store::OpendalObjectStore;
use term_apply_core::infrastructure::repositories::create_application_repository;
use term_apply_core::presentation::{FormSettings, IntakeServices};

use crate::server::{self, SshServer, SshServerSettings};

/// Load, override and validate configuration for serving
pub fn load_config(config_path: Option<PathBuf>) -> Result<IntakeConfigManifest> {
    let config = IntakeConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

pub async fn run(config: IntakeConfigManifest) -> Result<()> {
    info!("term-apply {} starting ({})", env!("CARGO_PKG_VERSION"), config.metadata.name);

    if let Some(port) = config.spec.observability.metrics_port {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], port))
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Prometheus metrics exporter listening on port {}", port);
    }

    let services = build_services(&config).await?;
    let authenticator: Arc<dyn PublicKeyAuthenticator> = Arc::new(
        KeyRegistryAuthenticator::new(config.spec.registry.url.clone(), config.spec.registry.timeout())
            .context("Failed to build key registry client")?,
    );

    let settings = SshServerSettings {
        bind_address: config.spec.server.bind_address(),
        host_key_path: PathBuf::from(&config.spec.server.host_key_path),
        max_session: config.spec.server.max_session(),
    };
    let ssh = SshServer::new(settings, services.clone(), authenticator)?;

    let result = ssh.run(server::shutdown_signal()).await;

    info!("Draining pending application writes");
    services.engine.shutdown().await;
    info!("term-apply stopped");

    result
}

async fn build_services(config: &IntakeConfigManifest) -> Result<IntakeServices> {
    let server_config = &config.spec.server;
    let storage = &config.spec.storage;
    let upload_dir = PathBuf::from(&server_config.upload_dir);

    let object_store = Arc::new(
        OpendalObjectStore::from_config(&storage.object_store, &default_fs_root(&upload_dir))
            .context("Failed to initialize object store")?,
    );
    info!(
        "Object store initialized ({:?}, prefix {})",
        storage.object_store.backend, storage.resume_prefix
    );

    let repository = create_application_repository(storage.keyed_store.storage_backend())
        .await
        .context("Failed to initialize keyed store")?;
    info!("Keyed store initialized ({:?})", storage.keyed_store.backend);

    let engine = Arc::new(IntakeConsistencyEngine::new(repository));
    let resume_status = Arc::new(ResumeStatusCache::new(object_store.clone(), storage.resume_prefix.clone()));
    let pipeline = TransferPipeline::new(object_store, upload_dir, storage.resume_prefix.clone())
        .with_upload_limit(server_config.upload_limit_bytes)
        .with_status_cache(resume_status.clone());

    Ok(IntakeServices {
        engine,
        resume_status,
        pipeline: Arc::new(pipeline),
        form: FormSettings {
            roles: config.spec.applications.roles.clone(),
            upload_host: advertised_host(&server_config.host),
            upload_port: server_config.port,
        },
    })
}

/// Objects live beside the staging area unless a root is configured
fn default_fs_root(upload_dir: &Path) -> PathBuf {
    upload_dir.join("objects")
}

/// A wildcard bind address is not something an applicant can connect to
fn advertised_host(bind_host: &str) -> String {
    match bind_host {
        "0.0.0.0" | "::" | "[::]" => "localhost".to_string(),
        host => host.to_string(),
    }
}
