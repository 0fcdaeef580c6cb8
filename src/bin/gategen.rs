use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pilc_gategen::{
    Channel, Device, DeviceConfiguration, MemoryPort, MemoryStore, ParameterStore, RegisterPort,
    TomlFileStore, UNSET_EXPOSURE,
};

#[derive(Debug, Parser)]
#[command(version, about = "Drive the PiLC trigger gate generator")]
struct Cli {
    /// Deployment configuration (TOML); defaults to the legacy gateware.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Register file device node of the gate generator.
    #[arg(long, required_unless_present = "dry_run")]
    device: Option<String>,
    /// Run against an in-memory register file and print the writes issued.
    #[arg(long, conflicts_with = "device")]
    dry_run: bool,
    /// File holding memorized exposure, mode and delays.
    #[arg(long)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report idle/busy/disconnected and the alarm flag.
    Status,
    Stop,
    Prepare,
    Start,
    /// Stop, prepare and start.
    Acquire,
    /// Show or set the exposure in ms.
    Exposure { ms: Option<f64> },
    /// Show or set the mode, by name or identifier.
    Mode { mode: Option<String> },
    /// Show or set a gate delay in ms.
    Delay { channel: Channel, ms: Option<f64> },
    /// List the modes of the configured gateware.
    Modes,
}

fn open_device(cli: &Cli) -> pilc_gategen::Result<Box<dyn RegisterPort>> {
    match &cli.device {
        #[cfg(all(target_os = "linux", feature = "hardware"))]
        Some(path) => {
            let port = pilc_gategen::DevicePort::open(path).or_else(|error| {
                log::error!("could not open {}: {}", path, error);
                pilc_gategen::DevicePort::detached(path)
            })?;
            Ok(Box::new(port))
        }
        _ => Err(pilc_gategen::Error::PortUnavailable),
    }
}

fn main() -> pilc_gategen::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => DeviceConfiguration::load(path)?,
        None => DeviceConfiguration::default(),
    };
    let store: Box<dyn ParameterStore> = match &cli.store {
        Some(path) => Box::new(TomlFileStore::open(path)?),
        None => Box::new(MemoryStore::new()),
    };
    let dry_run_port = cli.dry_run.then(|| MemoryPort::gate_generator(&config.registers));
    let port: Box<dyn RegisterPort> = match &dry_run_port {
        Some(port) => Box::new(port.clone()),
        None => open_device(&cli)?,
    };
    let device = Device::with_store(port, config, store);

    match cli.command {
        Command::Status => {
            println!("{:?}", device.status());
            if device.is_connected() {
                println!("alarm detected: {}", device.alarm_detected()?);
            }
        }
        Command::Stop => device.stop()?,
        Command::Prepare => device.prepare()?,
        Command::Start => device.start()?,
        Command::Acquire => device.acquire()?,
        Command::Exposure { ms: Some(ms) } =>
            println!("{:.3} ms", device.set_exposure(ms)?),
        Command::Exposure { ms: None } => match device.exposure() {
            ms if ms == UNSET_EXPOSURE => println!("unset"),
            ms => println!("{:.3} ms", ms),
        },
        Command::Mode { mode: Some(text) } => {
            let mode = device.modes().parse(&text)?;
            device.set_mode(mode.identifier() as i64)?;
            println!("{} (code {})", mode, mode.hardware_code());
        }
        Command::Mode { mode: None } => {
            let mode = device.mode();
            println!("{} (code {})", mode, mode.hardware_code());
        }
        Command::Delay { channel, ms: Some(ms) } => device.set_channel_delay(channel, ms)?,
        Command::Delay { channel, ms: None } =>
            println!("{:.3} ms", device.channel_delay(channel)?),
        Command::Modes => {
            for mode in device.modes().iter() {
                println!("{}  {}", mode.identifier(), mode);
            }
        }
    }

    if let Some(port) = dry_run_port {
        for (addr, value) in port.writes() {
            println!("write({:#04x}, {})", addr, value);
        }
    }
    Ok(())
}
