use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use laserstream::{
    default_config_path, init_logging, Config, FlowControlMode, RealtimeCommand,
    SharedSession, StreamingSession, BUILD_DATE, VERSION,
};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(10);
const RECONNECT_EVERY: Duration = Duration::from_secs(1);
const REPORT_EVERY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    name = "laserstream",
    version,
    about = "Stream G-code to GRBL-family laser and CNC controllers"
)]
struct Cli {
    /// Configuration file (TOML or JSON); defaults to the platform config dir
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log one JSON object per line
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args, Debug, Default)]
struct Target {
    /// Open this device instead of matching
    #[arg(long, value_name = "DEVICE", conflicts_with = "pattern")]
    port: Option<String>,

    /// Match the first device whose id or name contains/starts with this
    #[arg(long = "match", value_name = "PATTERN")]
    pattern: Option<String>,

    /// Baud rate
    #[arg(long)]
    baud: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List serial devices
    List {
        /// Baud rate to tag devices with
        #[arg(long)]
        baud: Option<u32>,
        /// Print JSON instead of one device per line
        #[arg(long)]
        json: bool,
    },

    /// Connect, wait for one status report and print the session snapshot
    Status {
        #[command(flatten)]
        target: Target,
        /// Give up after this many milliseconds
        #[arg(long, default_value_t = 2000)]
        wait_ms: u64,
    },

    /// Stream a G-code file
    Stream {
        /// Program to send, one command per line
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[command(flatten)]
        target: Target,
        /// Retire commands on `ok` replies instead of buffer reports
        #[arg(long)]
        ack: bool,
    },
}

fn load_config(path: Option<&Path>, target: &Target) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => match default_config_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        },
    };

    if let Some(port) = &target.port {
        config.connection.port = Some(port.clone());
    }
    if let Some(pattern) = &target.pattern {
        config.connection.port = None;
        config.connection.match_pattern = pattern.clone();
    }
    if let Some(baud) = target.baud {
        config.connection.baud_rate = baud;
    }
    config.validate()?;
    Ok(config)
}

fn list(config: &Config, json: bool) -> Result<()> {
    let session = StreamingSession::new(config)?;
    let devices = session.list_devices()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    let pattern = &config.connection.match_pattern;
    for device in &devices {
        let matched = device.info.as_ref().is_some_and(|info| {
            laserstream::communication::catalog::matches_pattern(
                info,
                pattern,
                config.connection.match_strategy,
            )
        });
        let detail = device
            .info
            .as_ref()
            .map(|info| format!("{} {}", info.description, info.hardware_id()))
            .unwrap_or_default();
        println!(
            "{} {:<24} {}",
            if matched { "*" } else { " " },
            device.path,
            detail.trim_end()
        );
    }
    if devices.is_empty() {
        eprintln!("No serial devices found");
    }
    Ok(())
}

async fn status(config: &Config, wait: Duration) -> Result<()> {
    let mut session = StreamingSession::new(config)?;
    tokio::task::block_in_place(|| session.connect(None))?;
    session.send_realtime(RealtimeCommand::StatusQuery)?;

    let deadline = Instant::now() + wait;
    let mut ticker = tokio::time::interval(TICK);
    while session.status().is_none() && Instant::now() < deadline {
        ticker.tick().await;
        session.service_tick()?;
    }
    if session.status().is_none() {
        tracing::warn!("No status report within {:?}", wait);
    }

    println!("{}", serde_json::to_string_pretty(&session.snapshot())?);
    session.disconnect();
    Ok(())
}

/// Log one progress line. Skipped while the tick loop holds the session
/// (a reconnect can sit in the settle delay for a second or more).
fn report_progress(shared: &SharedSession) -> bool {
    let Some(session) = shared.try_lock() else {
        return false;
    };
    let snapshot = session.snapshot();
    drop(session);

    tracing::info!(
        "{:5.1}% {} queued, {} bytes in flight{}",
        snapshot.progress * 100.0,
        snapshot.queued,
        snapshot.bytes_in_flight,
        if snapshot.paused { " (paused)" } else { "" }
    );
    true
}

fn spawn_reporter(shared: SharedSession) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REPORT_EVERY);
        loop {
            ticker.tick().await;
            report_progress(&shared);
        }
    })
}

async fn stream(config: Config, file: &Path) -> Result<()> {
    let program = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;

    let mut session = StreamingSession::new(&config)?;
    let count = session.enqueue_program(&program)?;
    tracing::info!("Streaming {} command(s) from {}", count, file.display());

    let shared = session.into_shared();
    let reporter = spawn_reporter(shared.clone());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(TICK);
    let mut last_attempt: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::warn!("Interrupted, aborting job");
                let mut session = shared.lock();
                if let Err(e) = session.abort() {
                    tracing::error!("Abort failed: {}", e);
                }
                session.disconnect();
                break;
            }
            _ = ticker.tick() => {
                let mut session = shared.lock();

                if !session.is_connected() {
                    if last_attempt.is_some_and(|at| at.elapsed() < RECONNECT_EVERY) {
                        continue;
                    }
                    last_attempt = Some(Instant::now());
                    // Opening sleeps through the board's reset; keep it off
                    // the async workers.
                    let connected = tokio::task::block_in_place(|| session.connect(None));
                    if let Err(e) = connected {
                        tracing::warn!("{}; retrying", e);
                        continue;
                    }
                }

                if let Err(e) = session.service_tick() {
                    tracing::warn!("{}; will reconnect", e);
                    continue;
                }

                if session.is_drained() {
                    tracing::info!("Job complete");
                    session.disconnect();
                    break;
                }
            }
        }
    }

    reporter.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;
    tracing::debug!("laserstream {} built {}", VERSION, BUILD_DATE);

    match cli.cmd {
        Cmd::List { baud, json } => {
            let target = Target {
                baud,
                ..Target::default()
            };
            let config = load_config(cli.config.as_deref(), &target)?;
            list(&config, json)
        }
        Cmd::Status { target, wait_ms } => {
            let config = load_config(cli.config.as_deref(), &target)?;
            status(&config, Duration::from_millis(wait_ms)).await
        }
        Cmd::Stream { file, target, ack } => {
            let mut config = load_config(cli.config.as_deref(), &target)?;
            if ack {
                config.streaming.flow_control = FlowControlMode::Acknowledge;
            }
            stream(config, &file).await
        }
    }
}
