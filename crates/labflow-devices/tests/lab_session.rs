//! End-to-end session on a simulated bench: configuration from a file,
//! discovery, driver operations, journal export and shutdown.

use std::io::Write;
use std::sync::Arc;

use labflow_core::config::ConfigBuilder;
use labflow_devices::sim::{SimConnector, SimInstrument};
use labflow_devices::{DeviceError, DeviceRegistry, DeviceType, Direction, Driver};

fn bench() -> SimConnector {
    SimConnector::new()
        .with_instrument("/dev/ttyACM0", SimInstrument::densitometer(30.25, 1.07))
        .with_instrument("/dev/ttyUSB3", SimInstrument::pump())
        .with_silent_port("/dev/ttyS0")
        .with_busy_port("/dev/ttyS1")
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test_log::test(tokio::test)]
async fn test_full_session() -> anyhow::Result<()> {
    let file = config_file(
        r#"
[discovery]
timeout_ms = 150
extra_ports = ["/dev/ttyUSB3"]

[devices.densitometer]
measurement_delay_ms = 30
response_timeout_ms = 200
"#,
    );
    let config = ConfigBuilder::new().with_config_file(file.path()).build()?;
    assert_eq!(config.discovery.baud_rate, 9600);

    let bus = bench();
    let registry = DeviceRegistry::new(&config, Arc::new(bus.clone()));

    // explicit ports replace enumeration; the configured extra still gets probed
    let devices = registry
        .discover(Some(vec!["/dev/ttyACM0".into(), "/dev/ttyS0".into(), "/dev/ttyS1".into()]))
        .await?;
    assert_eq!(devices.len(), 2);
    assert_eq!(devices["pump_0"], DeviceType::Pump);
    assert_eq!(devices["densitometer_0"], DeviceType::Densitometer);

    let pump = registry.get_pump("pump_0")?;
    pump.set_rotation_speed(20).await?;
    pump.start_rotation(20, Direction::Left).await?;
    pump.pour_volume(Direction::Left, 100).await?;
    pump.stop_rotation().await?;

    let densitometer = registry.get_densitometer("densitometer_0")?;
    assert!((densitometer.get_temperature().await? - 30.25).abs() < 1e-9);
    assert!((densitometer.get_od().await? - 1.07).abs() < 1e-9);

    let journal = pump.history().to_json()?;
    assert_eq!(journal["states"][0]["name"], "rotating");
    assert!(journal["states"][0]["ended_at"].is_string());
    assert_eq!(journal["events"][1]["name"], "pour_volume");
    assert_eq!(journal["events"][1]["params"]["speed"], 20);

    let journal = densitometer.history().to_json()?;
    assert_eq!(journal["states"][0]["name"], "measuring_od");
    assert_eq!(journal["events"][0]["params"]["temperature_c"], 30.25);
    let absorbance = journal["events"][1]["params"]["absorbance"].as_f64().unwrap();
    assert!((absorbance - 1.07).abs() < 1e-9);

    registry.close().await?;
    assert!(!pump.is_connected());
    assert!(matches!(
        pump.set_rotation_speed(1).await,
        Err(DeviceError::Connection(_))
    ));
    assert!(matches!(
        registry.get_pump("pump_0"),
        Err(DeviceError::NotFound(_))
    ));
    assert_eq!(bus.wait_until_idle().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_devices_operate_concurrently() -> anyhow::Result<()> {
    let file = config_file("[discovery]\ntimeout_ms = 150\n[devices.densitometer]\nmeasurement_delay_ms = 200\n");
    let config = ConfigBuilder::new().with_config_file(file.path()).build()?;
    let registry = DeviceRegistry::new(&config, Arc::new(bench()));
    registry.discover(None).await?;

    let pump = registry.get_pump("pump_0")?;
    let densitometer = registry.get_densitometer("densitometer_0")?;

    // the pump is not blocked by the densitometer's settling delay
    let measurement = tokio::spawn(async move { densitometer.get_od().await });
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let started = std::time::Instant::now();
    pump.start_rotation(5, Direction::Right).await?;
    assert!(started.elapsed() < std::time::Duration::from_millis(150));

    assert!((measurement.await?? - 1.07).abs() < 1e-9);
    registry.close().await?;
    Ok(())
}
