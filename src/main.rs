//! moku-conf - declarative configuration and reconciliation for Moku devices
//!
//! Commands:
//! - `validate`: check a configuration document
//! - `read`: retrieve a device's state as a JSON snapshot
//! - `diff`: compare a snapshot with a configuration offline
//! - `deploy`: reconcile a device towards a configuration
//! - `devices`: manage the cache of known devices
//!
//! Devices are driven through the simulated backend, whose state lives in
//! `state_dir/<address>.json`.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use moku_conf::cache::{humanize_since, DeviceCache, DeviceInfo};
use moku_conf::device::SimulatedDevice;
use moku_conf::diff::{diff, StateDiff};
use moku_conf::error::{MokuError, ValidationError};
use moku_conf::loader::{
    check_bitstreams, load_configuration, load_desired, load_snapshot, single_bitstream,
};
use moku_conf::model::{ConfigurationView, DesiredConfiguration};
use moku_conf::platform::PlatformPreset;
use moku_conf::policy::{Confirm, Decision, FixedAnswer, ReconcileMode};
use moku_conf::reconcile::{read_device, ReconcileOptions, Reconciler};
use moku_conf::retrieve::ReadLevel;
use moku_conf::settings::AppSettings;
use moku_conf::validate::{validate, ValidationPurpose};

/// Declarative configuration and state reconciliation for Moku devices
#[derive(Parser)]
#[command(name = "moku-conf")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (defaults to ./moku-conf.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration document
    Validate(ValidateArgs),

    /// Read a device's current state
    Read(ReadArgs),

    /// Compare a saved snapshot with a configuration
    Diff(DiffArgs),

    /// Reconcile a device towards a configuration
    Deploy(DeployArgs),

    /// Manage known devices
    #[command(subcommand)]
    Devices(DevicesCommand),
}

#[derive(Args)]
struct ValidateArgs {
    /// Configuration file (YAML or JSON)
    config: PathBuf,

    /// Skip deployment-only checks
    #[arg(long)]
    inspect: bool,
}

#[derive(Args)]
struct ReadArgs {
    /// Device IP, name or serial number
    #[arg(short, long)]
    device: String,

    #[arg(short, long, value_enum)]
    level: Option<ReadLevel>,

    /// Take over a session held by another client
    #[arg(short, long)]
    force: bool,

    /// Write the snapshot here ("-" for stdout)
    #[arg(short, long, default_value = "-")]
    output: String,
}

#[derive(Args)]
struct DiffArgs {
    /// Snapshot written by `read`
    current: PathBuf,

    /// Desired configuration
    desired: PathBuf,
}

#[derive(Args)]
struct DeployArgs {
    /// Device IP, name or serial number
    #[arg(short, long)]
    device: String,

    /// Deployment configuration (YAML or JSON)
    #[arg(short, long, required_unless_present = "bitstream")]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    mode: Option<ReconcileMode>,

    /// Slot to deploy `--bitstream` into
    #[arg(short, long, default_value_t = 2)]
    slot: u8,

    /// Bitstream to deploy; overrides the slot's bitstream when used with --config
    #[arg(short, long)]
    bitstream: Option<PathBuf>,

    /// Take over a session held by another client
    #[arg(long)]
    force_connect: bool,

    /// Answer yes to the interactive prompt
    #[arg(short, long)]
    yes: bool,
}

#[derive(Subcommand)]
enum DevicesCommand {
    /// List cached devices
    List,

    /// Add or update a device
    Add {
        /// IPv4 address
        ip: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        serial: Option<String>,
        #[arg(long, default_value_t = 80)]
        port: u16,
    },

    /// Remove a device by IP, name or serial number
    Forget { identifier: String },
}

/// Process exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Success = 0,
    Failure = 1,
    ValidationFailed = 2,
    Aborted = 3,
    DeviceBusy = 4,
    PartialDeployment = 5,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        ExitCode::from(status as u8)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => AppSettings::load_from(path),
        None => AppSettings::load(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Error: {err}");
            return Status::Failure.into();
        }
    };
    init_tracing(&settings.log_level);

    match run(cli.command, &settings) {
        Ok(status) => status.into(),
        Err(err) => {
            eprintln!("Error: {err:#}");
            exit_status(&err).into()
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("moku_conf={default_level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn exit_status(err: &anyhow::Error) -> Status {
    match err.downcast_ref::<MokuError>() {
        Some(MokuError::Validation(_)) => Status::ValidationFailed,
        Some(e) if e.is_device_busy() => Status::DeviceBusy,
        Some(MokuError::PartialDeployment(_)) => Status::PartialDeployment,
        _ => Status::Failure,
    }
}

fn run(command: Commands, settings: &AppSettings) -> Result<Status> {
    match command {
        Commands::Validate(args) => validate_command(args),
        Commands::Read(args) => read_command(args, settings),
        Commands::Diff(args) => diff_command(args),
        Commands::Deploy(args) => deploy_command(args, settings),
        Commands::Devices(command) => devices_command(command, settings),
    }
}

fn validate_command(args: ValidateArgs) -> Result<Status> {
    let config = load_configuration(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let purpose = if args.inspect {
        ValidationPurpose::Inspect
    } else {
        ValidationPurpose::Deploy
    };

    let errors = validate(&config, purpose);
    if !errors.is_empty() {
        print_validation_errors(&errors);
        return Ok(Status::ValidationFailed);
    }
    if purpose == ValidationPurpose::Deploy {
        check_bitstreams(&config, true)?;
    }

    println!(
        "{} is valid: {} on {} ({} slot(s), {} route(s))",
        args.config.display(),
        if args.inspect { "inspected" } else { "deployable" },
        config.platform.name,
        config.slots.len(),
        config.routing.len()
    );
    Ok(Status::Success)
}

fn read_command(args: ReadArgs, settings: &AppSettings) -> Result<Status> {
    let cache = DeviceCache::load(&settings.cache_file);
    let address = cache.resolve_address(&args.device)?;
    let device = open_device(settings, &address, PlatformPreset::MokuGo)?;
    let level = args.level.unwrap_or(settings.read_level);

    let observed = read_device(&device, &address, level, args.force)
        .with_context(|| format!("Failed to read device {address}"))?;
    let json = serde_json::to_string_pretty(&observed)?;

    if args.output == "-" {
        println!("{json}");
    } else {
        std::fs::write(&args.output, json)
            .with_context(|| format!("Failed to write snapshot to {}", args.output))?;
        info!(path = %args.output, "snapshot written");
        println!("Saved {} slot(s) from {address} to {}", observed.slots().len(), args.output);
    }
    Ok(Status::Success)
}

fn diff_command(args: DiffArgs) -> Result<Status> {
    let current = load_snapshot(&args.current)
        .with_context(|| format!("Failed to load snapshot {}", args.current.display()))?;
    let desired = load_configuration(&args.desired)
        .with_context(|| format!("Failed to load config from {}", args.desired.display()))?;

    let errors = validate(&desired, ValidationPurpose::Inspect);
    if !errors.is_empty() {
        print_validation_errors(&errors);
        return Ok(Status::ValidationFailed);
    }

    print!("{}", diff(&current, &desired));
    Ok(Status::Success)
}

fn deploy_command(args: DeployArgs, settings: &AppSettings) -> Result<Status> {
    let mut cache = DeviceCache::load(&settings.cache_file);
    let address = cache.resolve_address(&args.device)?;
    if let Some(known) = cache.find_by_identifier(&args.device) {
        info!(device = known.display_name(), %address, "using cached device");
    }
    let mode = args.mode.unwrap_or(settings.default_mode);

    let desired = desired_configuration(&args, &address)?;
    check_bitstreams(&desired, mode == ReconcileMode::DryRun)?;
    print_plan(&desired);

    let preset =
        PlatformPreset::from_id(desired.platform().platform_id).unwrap_or(PlatformPreset::MokuGo);
    let device = open_device(settings, &address, preset)?;
    let options = ReconcileOptions {
        mode,
        force_connect: args.force_connect,
        read_level: ReadLevel::Basic,
    };

    let mut confirm: Box<dyn Confirm> = if args.yes {
        Box::new(FixedAnswer::yes())
    } else {
        Box::new(TerminalConfirm)
    };
    let report = Reconciler::new(&device, &address, options)
        .run(&desired, confirm.as_mut())
        .with_context(|| format!("Deployment to {address} failed"))?;

    // The terminal prompt already displayed the diff.
    let prompted = mode == ReconcileMode::Interactive && !report.diff.identical && !args.yes;
    if !prompted {
        print!("{}", report.diff);
    }

    let status = match report.decision {
        Decision::Report => {
            println!("Dry run: no changes applied.");
            Status::Success
        }
        Decision::Abort(reason) => {
            println!("{reason}");
            Status::Aborted
        }
        Decision::Proceed | Decision::Prompt => {
            match &report.deployment {
                Some(deployment) if deployment.skipped => println!("Nothing to deploy."),
                Some(deployment) => println!(
                    "Deployed {} slot(s) and {} route(s) to {address}.",
                    deployment.applied_slots.len(),
                    deployment.routes_applied
                ),
                None => {}
            }
            Status::Success
        }
    };

    if let Some(device_info) = cache.devices.get_mut(&address) {
        device_info.last_seen = Utc::now();
        if let Err(err) = cache.save(&settings.cache_file) {
            warn!(error = %err, "could not update device cache");
        }
    }
    Ok(status)
}

fn desired_configuration(args: &DeployArgs, address: &str) -> Result<DesiredConfiguration> {
    match (&args.config, &args.bitstream) {
        (Some(path), bitstream) => {
            let desired = load_desired(path)
                .with_context(|| format!("Failed to load config from {}", path.display()));
            let desired = match desired {
                Err(err) => {
                    if let Some(MokuError::Validation(errors)) = err.downcast_ref::<MokuError>() {
                        print_validation_errors(errors);
                    }
                    return Err(err);
                }
                Ok(desired) => desired,
            };
            match bitstream {
                Some(bitstream) => {
                    Ok(desired.with_bitstream_override(args.slot, bitstream.as_path())?)
                }
                None => Ok(desired),
            }
        }
        (None, Some(bitstream)) => {
            warn!("no --config given, deploying with default Moku:Go routing");
            Ok(single_bitstream(args.slot, bitstream, address)?)
        }
        (None, None) => anyhow::bail!("Must provide either --bitstream or --config"),
    }
}

fn devices_command(command: DevicesCommand, settings: &AppSettings) -> Result<Status> {
    let path = &settings.cache_file;
    let mut cache = DeviceCache::load(path);

    match command {
        DevicesCommand::List => {
            if cache.devices.is_empty() {
                println!("No cached devices. Add one with 'moku-conf devices add <ip>'.");
                return Ok(Status::Success);
            }
            let now = Utc::now();
            println!("{:<20} {:<16} {:<14} {}", "NAME", "IP", "SERIAL", "LAST SEEN");
            for device in cache.devices.values() {
                println!(
                    "{:<20} {:<16} {:<14} {}",
                    device.canonical_name.as_deref().unwrap_or("N/A"),
                    format!("{}:{}", device.ip, device.port),
                    device.serial_number.as_deref().unwrap_or("N/A"),
                    humanize_since(device.last_seen, now)
                );
            }
        }
        DevicesCommand::Add { ip, name, serial, port } => {
            ip.parse::<std::net::Ipv4Addr>()
                .with_context(|| format!("'{ip}' is not an IPv4 address"))?;
            let device = DeviceInfo {
                port,
                canonical_name: name,
                serial_number: serial,
                ..DeviceInfo::new(&ip)
            };
            println!("Added {} ({ip})", device.display_name());
            cache.add_device(device);
            cache.save(path).context("Failed to save device cache")?;
        }
        DevicesCommand::Forget { identifier } => match cache.remove(&identifier) {
            Some(device) => {
                cache.save(path).context("Failed to save device cache")?;
                println!("Removed {} ({})", device.display_name(), device.ip);
            }
            None => return Err(MokuError::UnknownDevice(identifier).into()),
        },
    }
    Ok(Status::Success)
}

fn open_device(
    settings: &AppSettings,
    address: &str,
    preset: PlatformPreset,
) -> Result<SimulatedDevice> {
    let path = settings.device_state_path(address);
    debug!(path = %path.display(), "opening device state");
    SimulatedDevice::open(&path, address, preset)
        .with_context(|| format!("Failed to open device state {}", path.display()))
}

fn print_validation_errors(errors: &[ValidationError]) {
    eprintln!("Configuration has {} validation error(s):", errors.len());
    for error in errors {
        eprintln!("  - {error}");
    }
}

fn print_plan(desired: &DesiredConfiguration) {
    println!("Platform: {}", desired.platform().name);
    for (slot, config) in desired.slots() {
        match config.bitstream.as_deref().and_then(Path::file_name) {
            Some(name) => println!(
                "  Slot {slot}: {} ({})",
                config.instrument,
                name.to_string_lossy()
            ),
            None => println!("  Slot {slot}: {}", config.instrument),
        }
    }
    println!("  Routing: {} connection(s)", desired.routing().len());
}

/// Prompts on the terminal.
struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn ask(&mut self, diff: &StateDiff) -> String {
        print!("{diff}");
        print!("Deploy these changes? [y/N] ");
        if io::stdout().flush().is_err() {
            return String::new();
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => answer,
            Err(err) => {
                warn!(error = %err, "could not read answer");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SNAPSHOT: &str = "platform: moku_go\nslots: {}\nrouting: []\n";

    fn diff_args(dir: &TempDir, desired: &str) -> DiffArgs {
        let current = dir.path().join("current.yaml");
        std::fs::write(&current, SNAPSHOT).unwrap();
        let desired_path = dir.path().join("desired.yaml");
        std::fs::write(&desired_path, desired).unwrap();
        DiffArgs {
            current,
            desired: desired_path,
        }
    }

    #[test]
    fn test_diff_rejects_malformed_desired_config() {
        let dir = TempDir::new().unwrap();
        let args = diff_args(
            &dir,
            "platform: moku_go\n\
             slots:\n  1:\n    instrument: Oscilloscope\n\
             routing:\n  - source: Input1\n    destination: Output1\n  \
             - source: Input2\n    destination: Output1\n",
        );

        assert_eq!(diff_command(args).unwrap(), Status::ValidationFailed);
    }

    #[test]
    fn test_diff_of_well_formed_config_succeeds() {
        let dir = TempDir::new().unwrap();
        let args = diff_args(
            &dir,
            "platform: moku_go\n\
             slots:\n  1:\n    instrument: Oscilloscope\n\
             routing:\n  - source: Slot1OutA\n    destination: Output1\n",
        );

        assert_eq!(diff_command(args).unwrap(), Status::Success);
    }
}
