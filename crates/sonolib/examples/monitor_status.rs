//! Connect to a generator and print telemetry as it changes.
//!
//! Usage: `cargo run --example monitor_status -- /dev/ttyUSB0`

use sonolib::{DeviceBuilder, DeviceEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let device = DeviceBuilder::new().port(&port).connect().await?;
    println!(
        "connected: {} firmware {}",
        device.info().family,
        device.info().firmware
    );

    let mut events = device.subscribe();
    loop {
        match events.recv().await {
            Ok(DeviceEvent::StatusChanged(status)) => {
                println!(
                    "{:>9} Hz  gain {:>3} %  signal {}  urms {:.2} V  irms {:.3} A  phase {:.1}°",
                    status.frequency,
                    status.gain,
                    if status.signal { "on " } else { "off" },
                    status.urms,
                    status.irms,
                    status.phase,
                );
            }
            Ok(DeviceEvent::Disconnected) => {
                println!("connection lost");
                break;
            }
            Ok(DeviceEvent::Connected) => {}
            Err(_) => break,
        }
    }
    Ok(())
}
