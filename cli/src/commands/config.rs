// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use term_apply_core::domain::config::{IntakeConfigManifest, KeyedStoreKind};

const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./term-apply.yaml)
        #[arg(short, long, default_value = "./term-apply.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = IntakeConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. TA_CONFIG_PATH: {}",
            std::env::var("TA_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./term-apply.yaml");
        println!("  4. ~/.term-apply/config.yaml");
        println!("  5. /etc/term-apply/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let server = &config.spec.server;
    println!("{}", "SSH Server:".bold());
    println!("  Listen: {}", server.bind_address());
    println!("  Host key: {}", server.host_key_path);
    println!("  Max session: {}s", server.max_session_secs);
    println!("  Upload dir: {}", server.upload_dir);
    println!("  Upload limit: {} bytes", server.upload_limit_bytes);
    println!();

    println!("{}", "Key Registry:".bold());
    println!("  URL: {}", config.spec.registry.url);
    println!("  Timeout: {}s", config.spec.registry.timeout_secs);
    println!();

    let storage = &config.spec.storage;
    println!("{}", "Storage:".bold());
    println!("  Object store: {:?}", storage.object_store.backend);
    if let Some(bucket) = &storage.object_store.bucket {
        println!("    Bucket: {}", bucket);
    }
    println!("  Resume prefix: {}", storage.resume_prefix);
    match storage.keyed_store.backend {
        KeyedStoreKind::InMemory => println!("  Keyed store: in-memory"),
        // Never print the connection string; it carries credentials.
        KeyedStoreKind::Postgres => println!("  Keyed store: postgres"),
    }
    println!();

    println!("{}", "Roles:".bold());
    for (i, role) in config.spec.applications.roles.iter().enumerate() {
        println!("  {}) {}", i + 1, role);
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = IntakeConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(&output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}
