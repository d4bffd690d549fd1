//! Command-line entry point of the twinlink gateway.

mod catalog;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use twinlink_core::config::{defaults, env_vars, GatewayConfig, DEFAULT_WORKERS};
use twinlink_core::{resolve_properties, ModelCoordinates, PollSupervisor};
use twinlink_devices::{available_drivers, DriverManager, ProtocolReader};
use twinlink_ditto::{Credentials, DittoPublisher, TwinProvisioner};

use crate::catalog::Catalog;

/// twinlink - Poll PLC data points and forward them to an Eclipse Ditto twin.
#[derive(Parser, Debug)]
#[command(name = "twinlink")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace of the model and the twin.
    #[arg(long, default_value = defaults::NAMESPACE)]
    namespace: String,

    /// Model name.
    #[arg(long, default_value = defaults::MODEL_NAME)]
    model_name: String,

    /// Model version.
    #[arg(long, default_value = defaults::MODEL_VERSION)]
    model_version: String,

    /// Mapping name in the model catalog.
    #[arg(long, default_value = defaults::MAPPING)]
    mapping: String,

    /// Ditto endpoint, a host (https is implied) or an http(s) URL.
    #[arg(long, default_value = defaults::DITTO_ENDPOINT)]
    ditto_endpoint: String,

    /// Twin id; a random id is generated when omitted.
    #[arg(long)]
    twin_id: Option<String>,

    /// Model catalog base URL.
    #[arg(long, default_value = defaults::CATALOG_ENDPOINT)]
    catalog_endpoint: String,

    /// Read the thing document from a file instead of the catalog.
    #[arg(long)]
    thing_file: Option<PathBuf>,

    /// Read the mapping document from a file instead of the catalog.
    #[arg(long)]
    mapping_file: Option<PathBuf>,

    /// Maximum number of concurrent poll ticks.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Verbose output.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    run(args).await
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "twinlink=debug" } else { "twinlink=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));

    if env_vars::log_json() {
        // JSON format for container environments
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}

async fn run(args: Args) -> Result<()> {
    let config = GatewayConfig::new(
        ModelCoordinates::new(args.namespace, args.model_name, args.model_version),
        args.mapping,
        &args.ditto_endpoint,
        &args.catalog_endpoint,
        args.twin_id,
        args.workers,
    );
    info!(
        namespace = %config.model.namespace,
        model = %config.model.name,
        version = %config.model.version,
        mapping = %config.mapping,
        endpoint = %config.ditto_base_url,
        twin_id = %config.twin.twin_id,
        "Starting twinlink"
    );
    info!("Using thingId: {}", config.twin.thing_id());

    let catalog = Catalog::new()?;
    let mapping = catalog
        .load(
            "mapping document",
            args.mapping_file.as_deref(),
            &config.mapping_document_url(),
        )
        .await?;
    let specs = resolve_properties(&mapping, &config.model)
        .context("Failed to resolve the property mapping")?;

    let reader = ProtocolReader::new(DriverManager::with_default_drivers());
    for spec in &specs {
        reader.validate(spec).with_context(|| {
            format!(
                "Property '{}' has an unusable source (drivers: {})",
                spec.name,
                available_drivers().join(", ")
            )
        })?;
    }

    let thing = catalog
        .load(
            "thing document",
            args.thing_file.as_deref(),
            &config.thing_document_url(),
        )
        .await?;
    let credentials = Credentials::new(env_vars::ditto_username(), env_vars::ditto_password());
    TwinProvisioner::new(config.ditto_base_url.clone(), credentials.clone())
        .context("Failed to set up the provisioning client")?
        .provision(&config.twin, thing)
        .await
        .context("Failed to provision the twin")?;

    let publisher = DittoPublisher::connect(&config.websocket_url(), &credentials, config.feature_id())
        .await
        .context("Failed to open the Ditto live channel")?;

    let mut supervisor = PollSupervisor::new(
        config.twin.clone(),
        Arc::new(reader),
        Arc::new(publisher),
        config.workers,
    );
    supervisor
        .schedule_all(specs)
        .context("Failed to schedule poll tasks")?;
    info!(
        tasks = supervisor.tasks().len(),
        workers = config.workers,
        "Polling started"
    );

    tokio::select! {
        _ = supervisor.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = Args::parse_from(["twinlink"]);
        assert_eq!(args.namespace, "org.apache.plc4x.examples");
        assert_eq!(args.model_name, "VirtualMachine");
        assert_eq!(args.model_version, "1.0.0");
        assert_eq!(args.mapping, "demoSpsPragmatics");
        assert_eq!(args.ditto_endpoint, "twin.pragmaticindustries.de/");
        assert_eq!(args.twin_id, None);
        assert_eq!(args.workers, 4);
    }

    #[test]
    fn test_invalid_workers() {
        assert!(Args::try_parse_from(["twinlink", "--workers", "many"]).is_err());
    }
}
