#![forbid(unsafe_code)]

mod chain;
mod config;
mod constants;
mod dispatch;
mod max7219;
mod transport;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use config::{BusSettings, ConfigError, ConfigStore};
use dispatch::{Command, DispatchError};

#[derive(Parser)]
#[command(name = "max7219-ctl")]
#[command(about = "Drive a chain of MAX7219 7-segment modules over SPI", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// State file (default: <config dir>/max7219-ctl/state.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reinitialize every module and re-send the whole chain
    Reset,
    /// Re-send current state without changing it
    Sync,
    /// Show a number on a module
    Set {
        /// Module number, 1 is nearest the Pi
        #[arg(allow_negative_numbers = true)]
        module: i64,
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    /// Blank a module
    Clear {
        #[arg(allow_negative_numbers = true)]
        module: i64,
    },
    /// Set a module's intensity (0-15)
    Brightness {
        #[arg(allow_negative_numbers = true)]
        module: i64,
        #[arg(allow_negative_numbers = true)]
        level: i64,
    },
    /// Take a module out of shutdown
    On {
        #[arg(allow_negative_numbers = true)]
        module: i64,
    },
    /// Put a module in shutdown
    Off {
        #[arg(allow_negative_numbers = true)]
        module: i64,
    },
    #[command(external_subcommand)]
    Other(Vec<String>),
}

impl From<Commands> for Command {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Reset => Command::Reset,
            Commands::Sync => Command::Sync,
            Commands::Set { module, value } => Command::Set { module, value },
            Commands::Clear { module } => Command::Clear { module },
            Commands::Brightness { module, level } => Command::Brightness { module, level },
            Commands::On { module } => Command::On { module },
            Commands::Off { module } => Command::Off { module },
            Commands::Other(args) => Command::Unknown(args.into_iter().next().unwrap_or_default()),
        }
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let log_level = if verbose {
        TraceLevel::DEBUG
    } else {
        match std::env::var("LOG_LEVEL")
            .unwrap_or_else(|_| "warn".to_string())
            .to_lowercase()
            .as_str()
        {
            "trace" => TraceLevel::TRACE,
            "debug" => TraceLevel::DEBUG,
            "info" => TraceLevel::INFO,
            "error" => TraceLevel::ERROR,
            _ => TraceLevel::WARN,
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// Help and version exit 0 as usual; usage errors exit like any other
/// validation failure
fn parse_cli() -> Result<Cli, ExitCode> {
    Cli::try_parse().map_err(|e| {
        if !e.use_stderr() {
            e.exit()
        }
        eprint!("{e}");
        ExitCode::from(constants::exit::FAILURE)
    })
}

fn main() -> ExitCode {
    let cli = match parse_cli() {
        Ok(cli) => cli,
        Err(code) => return code,
    };

    if let Err(e) = init_tracing(cli.verbose) {
        eprintln!("Failed to set up logging: {e}");
    }

    let mut store = ConfigStore::new(cli.config.unwrap_or_else(config::default_path));
    store.set_verbose(cli.verbose);
    match store.load() {
        Ok(()) => {}
        // Carry on with defaults; the next save moves the file aside
        Err(e @ ConfigError::Parse { .. }) => {
            warn!(error = %e, "State file is malformed, using defaults");
        }
        Err(e @ ConfigError::Io { .. }) => {
            error!(error = %e, "Could not read state file, using defaults");
        }
    }

    store.log("Starting up.");
    let settings = BusSettings::from_store(&store, constants::config::BUS_NAME);
    if !store.has(&settings.section) {
        store.log(&format!("No '{}' section, using bus defaults", settings.section));
    }
    let transport = transport::from_settings(&settings, cli.verbose);
    let mut chain = dispatch::build_chain(transport, &store, &settings);

    let command = cli.command.map(Command::from);
    match dispatch::run(command.as_ref(), &mut chain, &mut store) {
        Ok(_) => ExitCode::SUCCESS,
        Err(DispatchError::Validation(message)) => {
            error!("{message}");
            ExitCode::from(constants::exit::FAILURE)
        }
        Err(e @ DispatchError::Fatal(_)) => {
            error!("Error: {e}");
            ExitCode::from(constants::exit::FAILURE)
        }
    }
}
