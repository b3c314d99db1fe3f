use std::{error::Error, io, process};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, warn, LevelFilter};

use pandora_bridge::{
    backend::Backend,
    config::{Config, Options},
    mpd::{self, Mpd},
    signal::Signals,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when built in release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Contains your Pandora credentials, so keep it private.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("config.toml"))]
    config: String,

    /// MPD address
    #[arg(short, long, value_name = "HOST:PORT", value_hint = ValueHint::Hostname, env = "MPD_ADDRESS", default_value_t = String::from(mpd::DEFAULT_ADDRESS))]
    mpd: String,

    /// Keep running and log whenever MPD finishes a track
    #[arg(short, long, default_value_t = false)]
    watch: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// Command line arguments take precedence over `RUST_LOG`, which takes
/// precedence over the default of `info`.
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// Loads and validates the configuration file.
///
/// Invalid values fall back to their defaults with a warning. Missing
/// credentials are reported but not fatal, since the host may still
/// provide them.
fn load_config(path: &str) -> Result<Config, Box<dyn Error>> {
    let options = Options::from_file(path).inspect_err(|e| {
        if e.kind == pandora_bridge::error::ErrorKind::NotFound {
            info!("copy config.toml.example to {path} and fill in your credentials");
        }
    })?;

    let validated = Config::from_options(&options);
    if let Some(warning) = validated.warning {
        warn!("{}", warning.replace('\n', " "));
    }

    let config = validated.value;
    if let Err(e) = config.validate_credentials() {
        warn!("{e}");
    }
    debug!("{config:#?}");

    Ok(config)
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args.config)?;
    info!(
        "keeping {} tracks per station",
        config.max_station_tracks
    );

    let mpd = Mpd::connect(args.mpd.as_str()).await?;
    let state = mpd.state().await?;
    info!(
        "mpd at {} is {} at {}s",
        mpd.address(),
        state.status,
        state.elapsed.as_secs()
    );

    if !args.watch {
        return Ok(());
    }

    let mut signals = Signals::new()?;
    loop {
        let finished = mpd.on_track_finished();

        tokio::select! {
            biased;

            signal = signals.recv() => {
                info!("received {signal}; shutting down");
                mpd.unsubscribe_all();
                break Ok(());
            }

            result = finished => {
                if result.is_err() {
                    return Err(io::Error::other("mpd stopped reporting").into());
                }
                match mpd.state().await {
                    Ok(state) => info!("track finished; mpd is {}", state.status),
                    Err(e) => warn!("track finished; reading mpd state failed: {e}"),
                }
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
