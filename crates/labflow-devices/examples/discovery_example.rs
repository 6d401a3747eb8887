use std::sync::Arc;

use labflow_core::config::{Config, ConfigBuilder};
use labflow_devices::sim::{SimConnector, SimInstrument};
use labflow_devices::{DeviceRegistry, Direction, Driver, RegistryEvent};

use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    labflow_core::logging::init_with_filter("debug")?;

    // Shorten the timings so the demo runs quickly
    let mut overrides = Config::default();
    overrides.discovery.timeout_ms = 200;
    overrides.devices.densitometer.measurement_delay_ms = 250;
    let config = ConfigBuilder::new()
        .with_environment_prefix("LABFLOW")
        .override_with(overrides)
        .build()?;

    // A simulated bench: one pump, one densitometer, one empty port
    let bench = SimConnector::new()
        .with_instrument("/dev/ttyUSB0", SimInstrument::pump())
        .with_instrument("/dev/ttyUSB1", SimInstrument::densitometer(37.2, 0.58))
        .with_silent_port("/dev/ttyS0");

    let registry = DeviceRegistry::new(&config, Arc::new(bench));
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                RegistryEvent::DeviceAdded { name, port, .. } => {
                    info!("Registered {} on {}", name, port);
                }
                RegistryEvent::DevicesCleared => info!("Registry cleared"),
            }
        }
    });

    let devices = registry.discover(None).await?;
    for (name, device_type) in &devices {
        info!("Found {}: {}", name, device_type);
    }

    let pump = registry.get_pump("pump_0")?;
    pump.set_rotation_speed(12).await?;
    pump.start_rotation(12, Direction::Right).await?;
    pump.pour_volume(Direction::Right, 25).await?;
    pump.stop_rotation().await?;

    let densitometer = registry.get_densitometer("densitometer_0")?;
    let temperature = densitometer.get_temperature().await?;
    let absorbance = densitometer.get_od().await?;
    info!("Culture at {:.2} C, OD {:.2}", temperature, absorbance);

    println!("{}", serde_json::to_string_pretty(&pump.history().to_json()?)?);
    println!(
        "{}",
        serde_json::to_string_pretty(&densitometer.history().to_json()?)?
    );

    registry.close().await?;
    Ok(())
}
