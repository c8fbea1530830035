//! Firmware entry point: startup supervision and wiring.
//!
//! Startup order follows the board's dependencies: verify the backend is
//! reachable (bounded retries), connect the device links, register the
//! light-strip subscription, then start the NFC polling worker. GPIO and
//! ADC sources are platform glue; their edges and readings enter through
//! the seams in [`sensors`].

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fieldlink_kuzzle::{LinkHandle, server_info};
use fieldlink_nfc::{NfcReader, ReaderConfig, SerialTransport};

use fieldlink_firmware::config::{Config, KuzzleSettings, ReaderSettings};
use fieldlink_firmware::devices::DeviceFleet;
use fieldlink_firmware::sensors::{
    self, ButtonBank, ChannelEdgeSource, EdgeInjector, EdgeRouter, StripRenderer,
};

/// How often and how long to retry the backend health check before giving
/// up on startup entirely.
const SERVER_INFO_ATTEMPTS: u32 = 50;
const SERVER_INFO_RETRY_DELAY: Duration = Duration::from_secs(5);

/// How many firmware-version probes to attempt before concluding no reader
/// is attached.
const VERSION_CHECK_ATTEMPTS: u32 = 5;

#[derive(Debug, Parser)]
#[command(name = "fieldlink-firmware", version, about = "Sensor appliance firmware")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    wait_for_backend(&config.kuzzle).await?;

    let fleet = DeviceFleet::connect(&config).await?;

    if let Some(rgb) = &fleet.rgb_light {
        let mut renderer = sensors::TracingRenderer;
        rgb.subscribe_state(move |state, partial| renderer.apply(&state, partial))
            .await
            .context("subscribing light strip state")?;
    }

    let _reader_thread = if config.reader.enabled {
        Some(spawn_reader_thread(
            config.reader.clone(),
            fleet.rfid.clone(),
        ))
    } else {
        None
    };

    // Keep the injector alive for the process lifetime: platform GPIO code
    // feeds button and motion edges through it.
    let _edges: Option<EdgeInjector> =
        if config.buttons.enabled || config.motion_sensor.enabled {
            Some(spawn_edge_pump(&config, &fleet))
        } else {
            None
        };

    if config.light_sensor.enabled {
        info!(
            channel = config.light_sensor.mcp_channel,
            "Light sensor enabled; sampling starts once the platform wires a LightSensor"
        );
    }

    info!("Entering event loop...");
    tokio::signal::ctrl_c().await?;
    info!("service stopped");
    fleet.shutdown().await;
    Ok(())
}

/// Block startup until the backend answers its health check, with a
/// bounded number of fixed-interval retries.
async fn wait_for_backend(kuzzle: &KuzzleSettings) -> anyhow::Result<()> {
    for remaining in (0..SERVER_INFO_ATTEMPTS).rev() {
        if let Some(info) = server_info(&kuzzle.host, kuzzle.port).await {
            info!(
                host = %kuzzle.host,
                port = kuzzle.port,
                version = info.kuzzle_version().unwrap_or("unknown"),
                "Connected to Kuzzle"
            );
            return Ok(());
        }

        warn!("Unable to connect to Kuzzle...");
        if remaining == 0 {
            break;
        }
        info!(
            delay = ?SERVER_INFO_RETRY_DELAY,
            remaining,
            "Trying to reconnect"
        );
        tokio::time::sleep(SERVER_INFO_RETRY_DELAY).await;
    }
    bail!("Impossible to connect to the Kuzzle service, quitting");
}

/// Dedicated worker thread for the blocking NFC polling loop.
///
/// The reader gets a bounded number of version probes; without a positive
/// answer the polling loop is never started. Card events are handed to the
/// RFID device link through its blocking handle.
fn spawn_reader_thread(
    settings: ReaderSettings,
    handle: LinkHandle,
) -> std::thread::JoinHandle<()> {
    std::thread::Builder::new()
        .name("nfc-polling".to_string())
        .spawn(move || {
            let transport = match SerialTransport::open(&settings.port, settings.baud) {
                Ok(transport) => transport,
                Err(e) => {
                    error!(port = %settings.port, error = %e, "Unable to open serial port");
                    return;
                }
            };

            let mut reader = NfcReader::new(transport, ReaderConfig::default());
            if let Err(e) = reader.initialize() {
                error!(error = %e, "Reader initialization failed");
                return;
            }

            let mut found = false;
            for attempt in 1..=VERSION_CHECK_ATTEMPTS {
                if reader.version_check().is_some() {
                    found = true;
                    break;
                }
                warn!(attempt, "No answer from NFC reader");
            }
            if !found {
                error!("No NFC/RFID reader found, exiting card polling...");
                return;
            }

            let result = reader.start_polling(|event| {
                let state = sensors::card_state(&event);
                match handle.publish_state_blocking(state, false) {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(_) => ControlFlow::Break(()),
                }
            });
            if let Err(e) = result {
                error!(error = %e, "Card polling terminated");
            }
        })
        .expect("spawning the NFC polling thread")
}

/// Worker thread routing button and motion edges into their device links.
fn spawn_edge_pump(config: &Config, fleet: &DeviceFleet) -> EdgeInjector {
    let (source, injector) = ChannelEdgeSource::new();

    let bank = if config.buttons.enabled {
        ButtonBank::new(&config.buttons.gpios)
    } else {
        ButtonBank::new(&[])
    };
    let motion_gpio = config
        .motion_sensor
        .enabled
        .then_some(config.motion_sensor.gpio);
    let router = EdgeRouter::new(
        bank,
        fleet.buttons.clone(),
        motion_gpio,
        fleet.motion.clone(),
    );

    std::thread::Builder::new()
        .name("edge-pump".to_string())
        .spawn(move || sensors::pump_edges(source, router))
        .expect("spawning the edge pump thread");

    injector
}
