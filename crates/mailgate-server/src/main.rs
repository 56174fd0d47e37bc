//! mailgate - module host entry point

use anyhow::{Context, Result};
use mailgate_common::config::{Config, LoggingConfig};
use mailgate_core::{builtin_registry, CheckPipeline, ModuleSet};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    init_logging(&config.logging)?;
    info!("Starting mailgate...");

    let registry = builtin_registry()?.install()?;
    info!(
        modules = registry.module_names().count(),
        "Module registry initialized"
    );

    let modules = ModuleSet::from_config(registry, &config)?;
    modules.start().await?;

    let pipeline = config
        .pipeline
        .as_ref()
        .map(|pipeline| CheckPipeline::from_config(pipeline, &modules))
        .transpose()?;

    for instance in modules.iter() {
        info!(
            module = %instance.descriptor().module_name,
            instance = %instance.instance_name(),
            role = instance.kind().role(),
            "Module ready"
        );
    }
    match &pipeline {
        Some(pipeline) => info!(checks = pipeline.len(), "Check pipeline ready"),
        None => info!("No check pipeline configured"),
    }

    info!("mailgate started successfully");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    info!("mailgate shutdown complete");

    Ok(())
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("Invalid log level {:?}", logging.level))?,
    };

    let json = logging.format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json().with_target(true).with_level(true)))
        .with((!json).then(|| fmt::layer().with_target(true).with_level(true)))
        .with(filter)
        .init();

    Ok(())
}
