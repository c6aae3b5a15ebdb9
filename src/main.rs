//! `chat-room` server binary.
//!
//! ```text
//! chat-room --addr 127.0.0.1:8080 --queue-capacity 64 --trace log
//! ```
//!
//! Logging follows `RUST_LOG` when set, otherwise `chat_room=info`
//! (`chat_room=debug` with `--debug`).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_room::config::{DEFAULT_FORWARD_BUFFER, DEFAULT_MAX_RESTARTS, DEFAULT_QUEUE_CAPACITY};
use chat_room::{
    EchoPolicy, NullSink, OAuthConfig, Room, RoomConfig, RoomServer, ServerConfig, TraceSink,
    TraceTarget, TracingSink, WriterSink,
};

// ============================================================================
// Arguments
// ============================================================================

/// Trace destination as given on the command line.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum TraceArg {
    Stdout,
    Log,
    Off,
}

impl From<TraceArg> for TraceTarget {
    fn from(arg: TraceArg) -> Self {
        match arg {
            TraceArg::Stdout => Self::Stdout,
            TraceArg::Log => Self::Log,
            TraceArg::Off => Self::Off,
        }
    }
}

/// Real-time chat room server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// The address of the application.
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// Outbound queue capacity per connection.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Capacity of the room's forward intake.
    #[arg(long, default_value_t = DEFAULT_FORWARD_BUFFER)]
    forward_buffer: usize,

    /// Do not send a participant's own messages back to it.
    #[arg(long)]
    no_echo: bool,

    /// Coordinator restarts tolerated before the room stops.
    #[arg(long, default_value_t = DEFAULT_MAX_RESTARTS)]
    max_restarts: u32,

    /// Where the room trace goes.
    #[arg(long, value_enum, default_value = "stdout")]
    trace: TraceArg,

    /// Identity provider configuration file.
    #[arg(long)]
    oauth_config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let echo = if self.no_echo {
            EchoPolicy::Exclude
        } else {
            EchoPolicy::Include
        };

        let room = RoomConfig::new()
            .with_queue_capacity(self.queue_capacity)
            .with_forward_buffer(self.forward_buffer)
            .with_echo(echo)
            .with_max_restarts(self.max_restarts);

        ServerConfig::new()
            .with_addr(self.addr)
            .with_trace(self.trace.into())
            .with_room(room)
    }
}

// ============================================================================
// Setup
// ============================================================================

fn init_logging(debug: bool) {
    let default = if debug {
        "chat_room=debug"
    } else {
        "chat_room=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn trace_sink(target: TraceTarget) -> Arc<dyn TraceSink> {
    match target {
        TraceTarget::Stdout => Arc::new(WriterSink::stdout()),
        TraceTarget::Log => Arc::new(TracingSink),
        TraceTarget::Off => Arc::new(NullSink),
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let config = args.server_config();
    config.validate().context("invalid configuration")?;

    if let Some(path) = &args.oauth_config {
        OAuthConfig::load(path)
            .with_context(|| format!("could not load {}", path.display()))?;
        info!(path = %path.display(), "Identity providers configured: Google, Github");
    }

    let (room, handle) = Room::new(config.room.clone(), trace_sink(config.trace))?;
    tokio::spawn(room.run_supervised());

    let server = RoomServer::bind(&config, handle)
        .await
        .with_context(|| format!("could not listen on {}", config.addr))?;
    info!(url = %server.ws_url(), "Starting web server");

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("Shutdown complete");
    Ok(())
}
