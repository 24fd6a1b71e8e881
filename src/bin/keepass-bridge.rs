use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use keepass_bridge::host::{serve_stdio, Router};
use keepass_bridge::{Bridge, BridgeConfig, BridgeError};
use serde_json::Value;

// Exit codes.
const FAILURE: u8 = 1;
const CONNECT_FAILED: u8 = 3;
const PEER_FAILED: u8 = 4;
const USAGE: u8 = 64;
const TIMEOUT: u8 = 124;

#[derive(Parser, Debug)]
#[command(name = "keepass-bridge", version, about = "Native messaging bridge to a KeePass host")]
struct Cli {
    /// Config file (TOML). Falls back to $KEEPASS_BRIDGE_CONFIG.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", global = true)]
    log_format: Option<LogFormat>,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Spawn the configured host, send one request, print the reply data.
    Send {
        /// Action name, e.g. get-status or get-credentials.
        action: String,

        /// Request payload as JSON.
        #[arg(long, value_name = "JSON", default_value = "{}")]
        data: String,

        /// Host program; overrides the config file.
        #[arg(long, value_name = "PATH", env = "KEEPASS_BRIDGE_HOST")]
        host: Option<PathBuf>,
    },
    /// Act as a host without a password database, on stdin/stdout.
    Serve,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(self) -> tracing::level_filters::LevelFilter {
        use tracing::level_filters::LevelFilter;
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

// stdout carries protocol frames in `serve`, so logs always go to stderr.
fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level.as_filter())
        .with_ansi(false)
        .with_target(false);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<BridgeConfig, BridgeError> {
    match path {
        Some(p) => BridgeConfig::load(p),
        None => BridgeConfig::from_env(),
    }
}

fn exit_code(err: &BridgeError) -> u8 {
    match err {
        BridgeError::Timeout(_) => TIMEOUT,
        BridgeError::PeerReported { .. } => PEER_FAILED,
        BridgeError::Config(_) => USAGE,
        e if e.is_connection_error() => CONNECT_FAILED,
        _ => FAILURE,
    }
}

async fn send(config: &BridgeConfig, action: &str, data: Value) -> Result<Value, BridgeError> {
    let bridge = Bridge::from_config(config)?;
    let result = bridge.send(action, data).await;
    bridge.disconnect().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match load_config(cli.config.as_ref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(USAGE);
        }
    };

    let level = cli
        .log_level
        .or_else(|| LogLevel::from_str(&config.log.level, true).ok())
        .unwrap_or(LogLevel::Warn);
    let format = cli
        .log_format
        .or_else(|| LogFormat::from_str(&config.log.format, true).ok())
        .unwrap_or(LogFormat::Text);
    init_logging(format, level);

    match cli.command {
        Command::Send { action, data, host } => {
            let data: Value = match serde_json::from_str(&data) {
                Ok(v) => v,
                Err(e) => {
                    eprintln!("error: --data is not valid JSON: {e}");
                    return ExitCode::from(USAGE);
                }
            };
            if host.is_some() {
                config.host.program = host;
            }
            match send(&config, &action, data).await {
                Ok(reply) => {
                    println!("{reply}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("error: {e}");
                    ExitCode::from(exit_code(&e))
                }
            }
        }
        Command::Serve => match serve_stdio(&Router::without_backend()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "host stopped");
                ExitCode::from(FAILURE)
            }
        },
    }
}
