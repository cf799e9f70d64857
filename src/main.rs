//! jnova-harness - diagnostic clients for jnova TCP servers
//!
//! Runs JSON command sessions (keep-alive, burst, broadcast), one-shot
//! framing probes, and an interactive raw-text chat.

mod chat;
mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use jnova_client::{ConnectionConfig, OutboundPlan};
use jnova_protocol::{Command, Framing, MAX_FRAME_SIZE};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Default keep-alive interval (10 s).
const DEFAULT_INTERVAL_MS: u64 = 10_000;

#[derive(Parser)]
#[command(name = "jnova-harness")]
#[command(about = "Diagnostic clients for jnova line/command servers")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(long, env = "JNOVA_HOST", default_value = jnova_protocol::DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(short, long, env = "JNOVA_PORT", default_value_t = jnova_protocol::DEFAULT_PORT)]
    port: u16,

    /// Connect timeout in milliseconds (waits for the OS by default)
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive raw-text chat with a periodic PING keep-alive
    Chat {
        /// Keep-alive interval in milliseconds
        #[arg(long, default_value_t = DEFAULT_INTERVAL_MS)]
        interval_ms: u64,
    },

    /// JSON session sending a PING every interval
    Keepalive {
        /// Ping interval in milliseconds
        #[arg(long, default_value_t = DEFAULT_INTERVAL_MS)]
        interval_ms: u64,
    },

    /// Send a burst of PING commands, then keep listening
    Burst {
        /// Number of pings
        #[arg(short, long, default_value_t = 1000)]
        count: u64,

        /// Delay between pings in milliseconds
        #[arg(long, default_value_t = 5)]
        interval_ms: u64,
    },

    /// Send one BROADCAST, then keep the session alive
    Broadcast {
        /// Sender identity
        #[arg(short, long, default_value = jnova_protocol::DEFAULT_SENDER)]
        sender: String,

        /// Keep-alive interval in milliseconds
        #[arg(long, default_value_t = DEFAULT_INTERVAL_MS)]
        interval_ms: u64,

        /// Message words, joined with spaces
        #[arg(required = true)]
        content: Vec<String>,
    },

    /// Send one arbitrary command, then keep listening (BROADCAST joins its
    /// arguments into the message content)
    Send {
        /// Command name
        name: String,

        /// Command arguments
        args: Vec<String>,
    },

    /// Listen for server frames without sending anything
    Listen,

    /// Probe newline-delimited framing
    ProbeLine {
        /// Payload (a newline is appended on the wire)
        #[arg(long, default_value = "PING")]
        payload: String,
    },

    /// Probe 4-byte big-endian length-prefixed framing
    ProbeLength {
        /// Payload; \n, \r, \t and \\ escapes are expanded
        #[arg(long, default_value = "PING\\n")]
        payload: String,

        /// Largest response length accepted
        #[arg(long, default_value_t = MAX_FRAME_SIZE)]
        max_frame_size: u32,
    },
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ConnectionConfig::new(cli.host, cli.port);
    if let Some(ms) = cli.connect_timeout_ms {
        config = config.with_connect_timeout(Duration::from_millis(ms));
    }

    let command = cli.command.unwrap_or(Commands::Chat {
        interval_ms: DEFAULT_INTERVAL_MS,
    });

    let result = match command {
        Commands::Chat { interval_ms } => chat::run(config, Duration::from_millis(interval_ms))
            .await
            .map(|()| String::new()),
        Commands::Keepalive { interval_ms } => {
            let plan = OutboundPlan::KeepAlive {
                interval: Duration::from_millis(interval_ms),
            };
            commands::run_session(config, plan, None).await
        }
        Commands::Burst { count, interval_ms } => {
            let plan = OutboundPlan::Burst {
                count,
                interval: Duration::from_millis(interval_ms),
            };
            commands::run_session(config, plan, None).await
        }
        Commands::Broadcast {
            sender,
            interval_ms,
            content,
        } => {
            let plan = OutboundPlan::Broadcast {
                sender,
                content: content.join(" "),
                keep_alive: Duration::from_millis(interval_ms),
            };
            commands::run_session(config, plan, None).await
        }
        Commands::Send { name, args } => {
            let command = Command::generic(name, args);
            commands::run_session(config, OutboundPlan::Idle, Some(command)).await
        }
        Commands::Listen => commands::run_session(config, OutboundPlan::Idle, None).await,
        Commands::ProbeLine { payload } => {
            commands::run_probe(config, Framing::line(), payload.as_bytes()).await
        }
        Commands::ProbeLength {
            payload,
            max_frame_size,
        } => {
            let payload = commands::unescape(&payload);
            let framing = Framing::length_prefixed().with_max_len(max_frame_size);
            commands::run_probe(config, framing, payload.as_bytes()).await
        }
    };

    report(result);
}

fn report(result: Result<String, Box<dyn std::error::Error>>) {
    match result {
        Ok(output) if output.is_empty() => {}
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
