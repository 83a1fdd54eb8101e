pub mod config;         // Configuration management
pub mod coordinator;    // Polling loop
pub mod datalog_writer; // Snapshot logging
pub mod error;          // Protocol and link errors
pub mod options;        // Command line options parsing
pub mod prelude;        // Common imports and types
pub mod rest;           // HTTP presentation of the latest snapshot
pub mod snapshot;       // Latest published telemetry
pub mod solax;          // SOLAX QPGSn serial protocol

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::coordinator::{Coordinator, PollStats};
use crate::datalog_writer::DatalogWriter;
use crate::rest::RestService;
use crate::snapshot::TelemetryStore;
use crate::solax::link::DeviceLink;
use crate::solax::port::SerialConnector;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn init_logging(level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        warn!("logger already initialised: {}", e);
    }
}

/// Main application entry point
///
/// Loads the configuration, starts the REST service and the polling
/// thread, then waits for Ctrl+C or the optional runtime limit.
pub async fn app(options: Options) -> Result<()> {
    let config = load_config(&options.config_file)?;

    let store = TelemetryStore::new();

    // the only fatal startup error once the config is loaded
    let rest_handle = if config.rest().enabled() {
        let service = RestService::bind(config.rest(), store.clone()).await?;
        Some(tokio::spawn(async move {
            if let Err(e) = service.serve().await {
                error!("REST service failed: {}", e);
            }
        }))
    } else {
        info!("REST service disabled");
        None
    };

    let stats = start_poller(&config, store)?;

    wait_for_shutdown(options.runtime).await;

    info!("Shutdown signal received, stopping...");
    if let Some(handle) = rest_handle {
        handle.abort();
    }
    if let Ok(stats) = stats.lock() {
        stats.print_summary();
    }
    info!("Application shutdown complete");

    Ok(())
}

/// Reads the config file, installs the logger at the configured level and
/// logs the settings summary through it.
pub fn load_config(config_file: &str) -> Result<ConfigWrapper> {
    let config = ConfigWrapper::new(config_file.to_string())?;
    init_logging(config.loglevel());

    info!("solax-bridge {} starting with config file: {}", CARGO_PKG_VERSION, config_file);
    config.log_summary(config_file);

    Ok(config)
}

/// Spawns the polling loop on its own thread. The thread is never joined;
/// it ends with the process.
fn start_poller(config: &ConfigWrapper, store: TelemetryStore) -> Result<Arc<Mutex<PollStats>>> {
    let serial = config.serial();
    let link = DeviceLink::new(
        SerialConnector::new(serial.clone()),
        serial.device_paths().to_vec(),
        serial.into(),
    );

    let mut coordinator = Coordinator::new(link, store, config.poller().into());
    if let Some(path) = config.datalog_file() {
        match DatalogWriter::new(path) {
            Ok(writer) => coordinator = coordinator.with_datalog_writer(writer),
            Err(e) => warn!("datalog disabled: {}", e),
        }
    }

    let stats = coordinator.stats.clone();
    std::thread::Builder::new()
        .name("poller".to_string())
        .spawn(move || coordinator.run())?;

    Ok(stats)
}

async fn wait_for_shutdown(runtime: Option<u64>) {
    let runtime_limit = async {
        match runtime {
            Some(secs) => {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                info!("runtime limit of {}s reached", secs);
            }
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
        _ = runtime_limit => {}
    }
}
