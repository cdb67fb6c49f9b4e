//! aoa-bridge
//!
//! Command line front end for Android Open Accessory devices: switches a
//! phone or tablet into accessory mode, drives a virtual HID mouse on it,
//! and captures its USB audio stream.

mod config;
mod usb;

use accessory::{
    AoaDevice, AudioCapture, AudioOptions, CancelToken, HidAccessory, cancel_pair,
    get_protocol_version, send_identification, set_audio_mode, start_accessory,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use common::{UsbBridge, UsbCommand, UsbEvent, create_usb_bridge, setup_logging};
use config::BridgeConfig;
use protocol::{
    AOA_AUDIO_DEVICE_FILTERS, AOA_DEFAULT_DEVICE_FILTERS, AccessoryIdentity, AudioMode,
    DeviceFilter, HidMouse, MouseButtons, MouseReport, UsbError,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tracing::{debug, error, info};
use usb::{RemoteDevice, spawn_usb_worker};

#[derive(Parser, Debug)]
#[command(name = "aoa-bridge")]
#[command(
    author,
    version,
    about = "Drive Android Open Accessory devices over USB"
)]
#[command(long_about = "
Switches an accessory-capable device into Android Open Accessory mode, then
registers a virtual HID mouse on it or captures its USB audio stream.

EXAMPLES:
    # List USB devices, marking accessory-mode devices with '*'
    aoa-bridge list

    # Check whether a phone supports accessory mode
    aoa-bridge probe --device 04e8:6860

    # Switch it into accessory mode with audio enabled
    aoa-bridge start --device 04e8:6860 --audio

    # Move the pointer on the first accessory-mode device
    aoa-bridge mouse --wait 5

    # Capture 500 audio chunks
    aoa-bridge audio --output capture.raw --chunks 500

CONFIGURATION:
    Configuration is read from the following locations, in order:
    1. Path specified with --config
    2. ~/.config/aoa-bridge/config.toml
    3. /etc/aoa-bridge/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List USB devices
    List,

    /// Print the AOA protocol version a device supports
    Probe {
        /// Device to query
        #[arg(short, long, value_name = "VID:PID")]
        device: DeviceFilter,
    },

    /// Send identification strings and switch a device into accessory mode
    Start {
        /// Device to switch
        #[arg(short, long, value_name = "VID:PID")]
        device: DeviceFilter,

        /// Enable the USB audio source before switching
        #[arg(long)]
        audio: bool,
    },

    /// Register a virtual mouse and move the pointer in a square
    Mouse {
        /// Accessory-mode device to use (default: first match of the filter table)
        #[arg(short, long, value_name = "VID:PID")]
        device: Option<DeviceFilter>,

        /// Seconds to wait for the device to appear
        #[arg(long, value_name = "SECS", default_value_t = 0)]
        wait: u64,
    },

    /// Capture the device's USB audio stream to a file
    Audio {
        /// Accessory-mode device to use (default: first audio-mode device)
        #[arg(short, long, value_name = "VID:PID")]
        device: Option<DeviceFilter>,

        /// File receiving the raw samples
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Stop after this many chunks (default: until Ctrl+C)
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
        chunks: Option<u64>,

        /// Seconds to wait for the device to appear
        #[arg(long, value_name = "SECS", default_value_t = 0)]
        wait: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log level from config if not specified)
    let config = if let Some(ref path) = args.config {
        BridgeConfig::load(Some(expand_path(path))).context("Failed to load configuration")?
    } else {
        BridgeConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("aoa-bridge v{}", env!("CARGO_PKG_VERSION"));
    debug!("Log level: {}", log_level);

    let extra_filters = config.device_filters()?;

    let (usb_bridge, worker) = create_usb_bridge();
    let usb_worker_handle = spawn_usb_worker(worker, config.transfer_timeout())
        .context("Failed to spawn USB worker thread")?;

    let result = match args.command {
        Command::List => list_devices(&usb_bridge, &extra_filters).await,
        Command::Probe { device } => probe(&usb_bridge, device).await,
        Command::Start { device, audio } => {
            start(&usb_bridge, &config.accessory, device, audio).await
        }
        Command::Mouse { device, wait } => {
            let filters = device_filters(device, &extra_filters, true);
            mouse(&usb_bridge, &config, filters, Duration::from_secs(wait)).await
        }
        Command::Audio {
            device,
            output,
            chunks,
            wait,
        } => {
            let filters = device_filters(device, &extra_filters, false);
            async {
                let device = open_device(&usb_bridge, filters, Duration::from_secs(wait)).await?;
                audio(device, config.audio_options(), &expand_path(&output), chunks).await
            }
            .await
        }
    };

    info!("Shutting down USB subsystem...");
    if let Err(e) = usb_bridge.send_command(UsbCommand::Shutdown).await {
        debug!("USB worker already stopped: {}", e);
    }
    match usb_worker_handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("USB worker failed: {}", e),
        Err(e) => error!("USB worker thread panicked: {:?}", e),
    }

    result
}

fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Filters for locating an accessory-mode device
///
/// An explicit `--device` wins; otherwise the accessory product ids (HID
/// also accepts the audio ones) plus any configured extras.
fn device_filters(
    device: Option<DeviceFilter>,
    extra: &[DeviceFilter],
    include_accessory: bool,
) -> Vec<DeviceFilter> {
    if let Some(device) = device {
        return vec![device];
    }

    let mut filters = Vec::new();
    if include_accessory {
        filters.extend_from_slice(AOA_DEFAULT_DEVICE_FILTERS);
    }
    filters.extend_from_slice(AOA_AUDIO_DEVICE_FILTERS);
    filters.extend_from_slice(extra);
    filters
}

/// Open a matching device, waiting for it to be plugged in if allowed
async fn open_device(
    bridge: &UsbBridge,
    filters: Vec<DeviceFilter>,
    wait: Duration,
) -> Result<RemoteDevice> {
    match RemoteDevice::open(bridge.clone(), filters.clone()).await {
        Ok(device) => return Ok(device),
        Err(UsbError::NotFound) if !wait.is_zero() => {}
        Err(UsbError::NotFound) => bail!("No matching USB device connected"),
        Err(e) => return Err(e).context("Failed to open device"),
    }

    info!("Waiting up to {}s for a matching device", wait.as_secs());
    let arrived = tokio::time::timeout(wait, async {
        loop {
            match bridge.recv_event().await? {
                UsbEvent::DeviceArrived { device } if device.matches(&filters) => {
                    return Ok::<_, common::Error>(device);
                }
                event => debug!("Ignoring {:?}", event),
            }
        }
    })
    .await
    .context("Timed out waiting for device")??;
    info!("Device arrived: {}", arrived);

    RemoteDevice::open(bridge.clone(), filters)
        .await
        .context("Failed to open device")
}

async fn list_devices(bridge: &UsbBridge, extra: &[DeviceFilter]) -> Result<()> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    bridge
        .send_command(UsbCommand::ListDevices { response: tx })
        .await
        .context("Failed to send ListDevices command")?;

    let devices = rx.await.context("Failed to receive device list")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        let accessory = device.matches(AOA_DEFAULT_DEVICE_FILTERS)
            || device.matches(AOA_AUDIO_DEVICE_FILTERS)
            || device.matches(extra);
        println!("{} {}", if accessory { "*" } else { " " }, device);
        if let Some(serial) = &device.serial_number {
            println!("      Serial: {}", serial);
        }
    }

    Ok(())
}

async fn probe(bridge: &UsbBridge, filter: DeviceFilter) -> Result<()> {
    let device = AoaDevice::new(open_device(bridge, vec![filter], Duration::ZERO).await?);
    let version = get_protocol_version(&device).await;
    device.inner().close().await;

    match version.context("GetProtocol failed")? {
        0 => println!("{}: accessory mode not supported", device.inner().summary()),
        version => println!(
            "{}: AOA protocol version {}",
            device.inner().summary(),
            version
        ),
    }
    Ok(())
}

async fn start(
    bridge: &UsbBridge,
    identity: &AccessoryIdentity,
    filter: DeviceFilter,
    audio: bool,
) -> Result<()> {
    let device = AoaDevice::new(open_device(bridge, vec![filter], Duration::ZERO).await?);
    let result = switch_to_accessory(&device, identity, audio).await;
    device.inner().close().await;
    result?;

    println!(
        "{}: switching to accessory mode, the device will reconnect",
        device.inner().summary()
    );
    Ok(())
}

async fn switch_to_accessory(
    device: &AoaDevice<RemoteDevice>,
    identity: &AccessoryIdentity,
    audio: bool,
) -> Result<()> {
    let version = get_protocol_version(device)
        .await
        .context("GetProtocol failed")?;
    if version == 0 {
        bail!("Device does not support accessory mode");
    }
    if audio && version < 2 {
        bail!("Audio needs AOA protocol version 2, device reports {}", version);
    }

    send_identification(device, identity)
        .await
        .context("Failed to send identification strings")?;
    if audio {
        set_audio_mode(device, AudioMode::Source.into())
            .await
            .context("Failed to enable audio mode")?;
    }
    start_accessory(device)
        .await
        .context("Failed to start accessory mode")?;
    Ok(())
}

async fn mouse(
    bridge: &UsbBridge,
    config: &BridgeConfig,
    filters: Vec<DeviceFilter>,
    wait: Duration,
) -> Result<()> {
    let device = Arc::new(AoaDevice::new(open_device(bridge, filters, wait).await?));
    info!("Using {}", device.inner().summary());

    let session = match HidAccessory::register(
        device.clone(),
        config.hid.accessory_id,
        HidMouse::DESCRIPTOR,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            device.inner().close().await;
            return Err(e).context("Failed to register HID mouse");
        }
    };

    let demo = tokio::select! {
        result = mouse_demo(&session) => result,
        _ = signal::ctrl_c() => {
            info!("Interrupted");
            Ok(())
        }
    };

    let unregistered = session.unregister().await;
    device.inner().close().await;

    demo?;
    unregistered.context("Failed to unregister HID mouse")?;
    println!("Mouse demo finished");
    Ok(())
}

/// Trace a square, then click once
async fn mouse_demo<D: accessory::UsbDevice + 'static>(session: &HidAccessory<D>) -> Result<()> {
    const STEP: i32 = 4;
    const STEPS_PER_SIDE: usize = 25;

    for (dx, dy) in [(STEP, 0), (0, STEP), (-STEP, 0), (0, -STEP)] {
        for _ in 0..STEPS_PER_SIDE {
            session
                .send_mouse(&MouseReport::clamped(dx, dy, 0, 0, 0))
                .await?;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    session
        .send_mouse(&MouseReport::buttons(MouseButtons::PRIMARY))
        .await?;
    session.send_mouse(&MouseReport::buttons(0)).await?;
    Ok(())
}

async fn audio(
    device: RemoteDevice,
    options: AudioOptions,
    output: &Path,
    chunks: Option<u64>,
) -> Result<()> {
    let device = Arc::new(AoaDevice::new(device));
    info!("Using {}", device.inner().summary());

    let (cancel, token) = cancel_pair();
    let interrupt = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping capture");
            cancel.cancel();
        }
    });

    let result = capture_audio(device.clone(), options, token, output, chunks).await;

    interrupt.abort();
    device.inner().close().await;
    result
}

/// Stream audio chunks into `output`
///
/// The file is only created once the first chunk has arrived, so a device
/// that cannot stream leaves nothing behind.
async fn capture_audio(
    device: Arc<AoaDevice<RemoteDevice>>,
    options: AudioOptions,
    token: CancelToken,
    output: &Path,
    chunks: Option<u64>,
) -> Result<()> {
    let mut capture = AudioCapture::open(device, options)
        .await
        .context("Audio negotiation failed")?
        .with_cancel(token);

    let first = match capture.next_chunk().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(e)) => return Err(e).context("Audio capture failed"),
        None => {
            capture
                .close()
                .await
                .context("Failed to release audio interface")?;
            println!("No audio captured");
            return Ok(());
        }
    };

    let mut file = tokio::fs::File::create(output)
        .await
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut next = Some(first);
    let mut written_chunks = 0u64;
    let mut written_bytes = 0usize;
    while chunks.is_none_or(|limit| written_chunks < limit) {
        let chunk = match next.take() {
            Some(chunk) => chunk,
            None => match capture.next_chunk().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(e).context("Audio capture failed"),
                None => break,
            },
        };
        file.write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write {}", output.display()))?;
        written_chunks += 1;
        written_bytes += chunk.len();
    }

    file.flush().await?;
    capture
        .close()
        .await
        .context("Failed to release audio interface")?;

    println!(
        "Wrote {} chunk(s), {} bytes to {}",
        written_chunks,
        written_bytes,
        output.display()
    );
    Ok(())
}
