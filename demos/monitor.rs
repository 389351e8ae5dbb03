//! Print USB connections and disconnections until Enter is pressed.
//!
//! Run with: cargo run --example monitor [-- <seconds between checks>]

use std::io::BufRead;

use tracing_subscriber::EnvFilter;
use usbmonitor::{DeviceAttributes, DeviceHandlers, MonitorOptions, UsbMonitor};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("usbmonitor=info")),
        )
        .init();

    let options = match std::env::args().nth(1) {
        Some(seconds) => MonitorOptions::from_seconds(seconds.parse()?)?,
        None => MonitorOptions::default(),
    };

    let monitor = UsbMonitor::new()?;
    println!("Currently connected devices:");
    for (id, attrs) in monitor.on_start_devices() {
        println!("  {}: {}", id, attrs.summary());
    }

    let handlers = DeviceHandlers::new()
        .on_connect(|_: &str, attrs: &DeviceAttributes| {
            println!("[+] Connected: {}", attrs.summary())
        })
        .on_disconnect(|_: &str, attrs: &DeviceAttributes| {
            println!("[-] Disconnected: {}", attrs.summary())
        });
    monitor.start_monitoring(handlers, options)?;

    println!("Monitoring USB connections. Press Enter to quit");
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;

    monitor.stop_monitoring(true);
    println!("Finished");
    Ok(())
}
