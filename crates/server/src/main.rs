//! google-servo daemon
//!
//! Watches the USB bus for Google Servo debug/control boards and exposes a
//! device node (`<node_root>/usb/google-servo<N>`) for interface 0 of every
//! board while it is connected.

mod config;
mod service;
mod usb;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use common::{DriverBridge, DriverCommand, DriverEvent, create_driver_bridge, setup_logging};
use driver::driver::DRIVER_DESC;
use driver::table::model_name;
use driver::{DevfsNaming, ServoDriver, UsbDriver};
use service::SdState;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};
use usb::spawn_usb_worker;

#[derive(Parser, Debug)]
#[command(name = "google-servo")]
#[command(
    author,
    version,
    about = "Google Servo attach manager - expose device nodes for Servo boards"
)]
#[command(long_about = "
Claims interface 0 of every connected Google Servo board (V2, V3, Micro, V4)
and exposes a device node for it while the board stays connected.

EXAMPLES:
    # Run with default config
    google-servo

    # Run with custom config
    google-servo --config /path/to/config.toml

    # List connected Servo boards without registering nodes
    google-servo --list-devices

    # Run with debug logging
    google-servo --log-level debug

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/google-servo/server.toml
    3. /etc/google-servo/server.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List connected Servo boards and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = config::ServerConfig::default();
        let path = config::ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        config::ServerConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        config::ServerConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.server.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    info!("{} v{}", DRIVER_DESC, env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    let table = config
        .driver
        .id_table()
        .context("Invalid device table")?;

    if args.list_devices {
        return list_devices_mode(&table);
    }

    run_service(config, table).await
}

/// List matching devices and exit
fn list_devices_mode(table: &driver::IdTable) -> Result<()> {
    let devices = usb::list_matching_devices(table).context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No Servo boards found.");
        return Ok(());
    }

    println!("Found {} Servo board(s):\n", devices.len());
    for device in devices {
        println!(
            "  {} - {}",
            device.identity,
            model_name(&device.identity).unwrap_or("Configured device")
        );
        println!(
            "      Bus {:03} Device {:03} Interfaces: {:?}",
            device.bus_number, device.device_address, device.interfaces
        );
        println!();
    }

    Ok(())
}

/// Run until Ctrl+C, exposing nodes for attached boards
async fn run_service(config: config::ServerConfig, table: driver::IdTable) -> Result<()> {
    let class = config.driver.class_driver();
    let node_root = config.driver.node_root();
    let minors = driver::MinorTable::new(config.driver.capacity());
    let naming = DevfsNaming::with_minors(&node_root, minors);

    let servo: Arc<dyn UsbDriver> = Arc::new(ServoDriver::new(table, class, naming));
    info!(
        "Driver {} exposing nodes under {}",
        servo.name(),
        node_root.display()
    );

    let (bridge, worker) = create_driver_bridge();
    let (usb_worker_handle, started) =
        spawn_usb_worker(worker, servo, config.server.rescan_interval())
            .context("Failed to spawn USB worker thread")?;

    // Only report readiness once the worker owns a working libusb context
    match started.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            let _ = usb_worker_handle.join();
            return Err(anyhow!(e)).context("Failed to initialize USB subsystem");
        }
        Err(_) => {
            let _ = usb_worker_handle.join();
            return Err(anyhow!("USB worker exited during startup"));
        }
    }

    let events_handle = tokio::spawn(log_driver_events(bridge.clone()));

    if service::is_systemd() {
        info!("Running under systemd");
    }
    service::notify(SdState::Ready).context("Failed to notify systemd ready")?;

    info!("Press Ctrl+C to shutdown");
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }

    service::notify(SdState::Stopping).context("Failed to notify systemd stopping")?;

    if let Ok(attached) = list_attached(&bridge).await
        && !attached.is_empty()
    {
        info!("Releasing {} attached board(s)", attached.len());
    }

    info!("Shutting down USB subsystem...");
    if let Err(e) = shutdown_usb_worker(&bridge).await {
        error!("Error shutting down USB worker: {:#}", e);
    }

    match usb_worker_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB worker exited with error: {}", e),
        Err(e) => error!("USB worker thread panicked: {:?}", e),
    }

    events_handle.abort();
    info!("Shutdown complete");
    Ok(())
}

/// Log driver outcomes and keep the systemd status line current
async fn log_driver_events(bridge: DriverBridge) {
    let mut attached = 0usize;

    while let Ok(event) = bridge.recv_event().await {
        match event {
            DriverEvent::Claimed { peripheral } => {
                attached += 1;
                info!(
                    "{} ({}) available as {} (minor {})",
                    model_name(&peripheral.identity).unwrap_or("Servo"),
                    peripheral.handle,
                    peripheral.node.display(),
                    peripheral.minor
                );
            }
            DriverEvent::Ignored {
                identity,
                handle,
                reason,
            } => {
                debug!("{} at {} not claimed: {}", identity, handle, reason);
                continue;
            }
            DriverEvent::RegistrationFailed {
                identity,
                handle,
                error,
            } => {
                warn!("{} at {} left unclaimed: {}", identity, handle, error);
                continue;
            }
            DriverEvent::Released { handle } => {
                attached = attached.saturating_sub(1);
                info!("{} removed", handle);
            }
        }

        let status = SdState::Status(format!("{} Servo board(s) attached", attached));
        if let Err(e) = service::notify(status) {
            warn!("Failed to update systemd status: {:#}", e);
        }
    }
}

async fn list_attached(bridge: &DriverBridge) -> Result<Vec<common::AttachedPeripheral>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    bridge
        .send_command(DriverCommand::ListAttached { response: tx })
        .await
        .context("Failed to send ListAttached command")?;

    rx.await.context("Failed to receive attached list")
}

/// Shutdown USB worker thread gracefully
async fn shutdown_usb_worker(bridge: &DriverBridge) -> Result<()> {
    bridge
        .send_command(DriverCommand::Shutdown)
        .await
        .context("Failed to send Shutdown command")?;
    Ok(())
}
