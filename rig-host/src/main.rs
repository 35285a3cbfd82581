mod config;
mod console;
mod emulated;
mod transport;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::Parser;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trial_core::controller::{
    ChannelObserver, CommandChannel, Controller, ControllerConfig, StopSignal,
};
use trial_core::error::ControllerError;
use trial_core::history::TrialHistory;
use trial_core::orchestrator::{ReleaseOrchestrator, ThreadPacer};
use trial_core::summary::{SUMMARY_FILE_NAME, SessionSummary};

use config::RigConfig;
use emulated::{EmulatedAnimal, EmulatedRig};
use transport::{SerialChannel, TeeChannel};

const DEVICE_LOG_NAME: &str = "device.log";

#[derive(Parser, Debug)]
#[command(author, version, about = "Trial lifecycle controller for serial behaviour rigs")]
struct Args {
    /// Path to the rig TOML file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serial port, overriding the config file
    #[arg(long)]
    port: Option<String>,

    /// Run against the in-process emulated rig instead of hardware
    #[arg(long, default_value_t = false)]
    emulate: bool,

    /// Continue the session recorded in this device log
    #[arg(long, value_name = "DEVICE_LOG")]
    resume: Option<PathBuf>,

    /// Seed for trial selection, overriding the config file
    #[arg(long)]
    seed: Option<u64>,

    /// Log at debug level unless `RUST_LOG` says otherwise
    #[arg(long, short, default_value_t = false)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = RigConfig::load(args.config.as_deref())?;
    let orchestrator = ReleaseOrchestrator::new(
        config.schedule(),
        config
            .scheduler_config()
            .context("invalid scheduler configuration")?,
    )
    .with_boot_params(config.boot_parameters()?)
    .with_timing(config.timing());

    let seed = args.seed.or(config.scheduler.seed);
    let rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);

    let stop = StopSignal::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        // A second interrupt abandons the session, including any prompt.
        if handler_stop.is_requested() {
            process::exit(130);
        }
        handler_stop.request();
    })
    .context("failed to install Ctrl-C handler")?;

    let session = SessionFiles::open(&config, args.resume.as_deref())?;
    info!(log = %session.log_path.display(), "session log");

    let mut operator_entries = SessionSummary::default();
    prompt_fields(
        &mut io::stdin().lock(),
        &mut io::stdout(),
        &config.session.pre_session_fields,
        &mut operator_entries,
    )?;

    let (observer, snapshots) = ChannelObserver::bounded(4);
    let console = thread::spawn(move || console::run(snapshots));

    let setup = SessionSetup {
        orchestrator,
        rng,
        config: config.controller_config(),
        stop,
        observer,
        prior_log: session.prior_log,
    };
    let (history, outcome) = if args.emulate {
        let rig = EmulatedRig::new(seed.unwrap_or(0), EmulatedAnimal::default()).paced(true);
        run_session(TeeChannel::new(rig, session.log), setup)?
    } else {
        let Some(port) = args.port.or_else(|| config.serial.port.clone()) else {
            bail!("no serial port given; pass --port or set [serial].port");
        };
        let serial = SerialChannel::open(&port, config.serial.baud_rate)
            .with_context(|| format!("failed to open serial port {port}"))?;
        run_session(TeeChannel::new(serial, session.log), setup)?
    };

    match console.join() {
        Ok(Err(error)) => warn!(%error, "console output failed"),
        Err(_) => warn!("console thread panicked"),
        Ok(Ok(())) => {}
    }

    if outcome.is_err() {
        console::print_table(&history, &mut io::stdout().lock())?;
    }

    let summary_path = session.log_path.with_file_name(SUMMARY_FILE_NAME);
    let summary = SessionSummary {
        entries: operator_entries.entries,
        ..SessionSummary::from_history(&history)
    };
    write_summary(summary, &config.session.summary_fields, &summary_path)?;

    outcome.context("session aborted")
}

struct SessionFiles {
    log_path: PathBuf,
    log: File,
    prior_log: Option<Vec<u8>>,
}

impl SessionFiles {
    fn open(config: &RigConfig, resume: Option<&Path>) -> Result<Self> {
        let (log_path, prior_log) = match resume {
            Some(path) => {
                let prior = fs::read(path)
                    .with_context(|| format!("failed to read device log {}", path.display()))?;
                (path.to_path_buf(), Some(prior))
            }
            None => {
                let started = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |elapsed| elapsed.as_secs());
                let dir = config.session.log_dir.join(format!("session-{started}"));
                fs::create_dir_all(&dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                (dir.join(DEVICE_LOG_NAME), None)
            }
        };

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open {}", log_path.display()))?;
        Ok(Self {
            log_path,
            log,
            prior_log,
        })
    }
}

struct SessionSetup {
    orchestrator: ReleaseOrchestrator,
    rng: StdRng,
    config: ControllerConfig,
    stop: StopSignal,
    observer: ChannelObserver,
    prior_log: Option<Vec<u8>>,
}

/// Runs the controller to completion.
///
/// Returns the final history alongside the loop's own outcome so the summary
/// is written even when the session aborted.
fn run_session<C>(
    channel: C,
    setup: SessionSetup,
) -> Result<(Arc<TrialHistory>, Result<(), ControllerError>)>
where
    C: CommandChannel,
{
    let mut controller = Controller::new(channel, setup.orchestrator, setup.rng, ThreadPacer)
        .with_config(setup.config)
        .with_stop_signal(setup.stop);
    if let Some(prior_log) = setup.prior_log {
        controller = controller.resume(prior_log)?;
    }
    controller.add_observer(Box::new(setup.observer));

    let outcome = controller.run();
    let history = Arc::clone(controller.history());
    info!(
        trials = history.len(),
        completed = history.completed_count(),
        "session ended"
    );
    Ok((history, outcome))
}

/// Asks the operator for each field in turn; stops quietly at end of input.
fn prompt_fields<R, W>(
    input: &mut R,
    output: &mut W,
    fields: &[String],
    summary: &mut SessionSummary,
) -> io::Result<()>
where
    R: BufRead,
    W: Write,
{
    for field in fields {
        write!(output, "{field}: ")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            writeln!(output)?;
            break;
        }
        summary.record(field.as_str(), line);
    }
    Ok(())
}

fn write_summary(mut summary: SessionSummary, fields: &[String], path: &Path) -> Result<()> {
    prompt_fields(&mut io::stdin().lock(), &mut io::stdout(), fields, &mut summary)?;

    summary
        .write_to(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "session summary written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn records_each_answer_under_its_field() {
        let mut input = Cursor::new("21.4\n\n3.5\n");
        let mut output = Vec::new();
        let mut summary = SessionSummary::default();

        prompt_fields(
            &mut input,
            &mut output,
            &fields(&["mouse_mass", "l_volume", "r_volume"]),
            &mut summary,
        )
        .expect("prompt");

        assert_eq!(String::from_utf8_lossy(&output), "mouse_mass: l_volume: r_volume: ");
        assert_eq!(summary.entries.get("mouse_mass").map(String::as_str), Some("21.4"));
        assert!(!summary.entries.contains_key("l_volume"));
        assert_eq!(summary.entries.get("r_volume").map(String::as_str), Some("3.5"));
    }

    #[test]
    fn end_of_input_stops_prompting() {
        let mut input = Cursor::new("2.0\n");
        let mut output = Vec::new();
        let mut summary = SessionSummary::default();

        prompt_fields(
            &mut input,
            &mut output,
            &fields(&["l_volume", "r_volume", "final_pipe"]),
            &mut summary,
        )
        .expect("prompt");

        assert_eq!(String::from_utf8_lossy(&output), "l_volume: r_volume: \n");
        assert_eq!(summary.entries.len(), 1);
    }
}
