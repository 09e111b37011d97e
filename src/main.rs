use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::Level;
use wirebus_core::Transport;
use wirebus_sse::ServerConfig;
use wirebus_stdio::LineConfig;
use wirebus_telemetry::TelemetryConfig;

mod dispatch;

#[derive(Parser)]
#[command(name = "wirebus", about = "Serve a JSON-RPC message bus over SSE or stdio")]
struct Cli {
    /// Default log level (RUST_LOG overrides).
    #[arg(long, global = true, default_value = "info")]
    log_level: Level,
    /// Emit human-readable logs instead of JSON.
    #[arg(long, global = true)]
    plain_logs: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve many peers over server-sent events + HTTP POST.
    Sse {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 3009)]
        port: u16,
        #[arg(long, default_value = "/sse")]
        sse_route: String,
        #[arg(long, default_value = "/messages")]
        messages_route: String,
        /// Envelopes buffered per session before sends are rejected.
        #[arg(long, default_value_t = 64)]
        queue_capacity: usize,
    },
    /// Serve one peer over this process's stdin/stdout.
    Stdio {
        #[arg(long, default_value_t = wirebus_stdio::DEFAULT_MAX_LINE_BYTES)]
        max_line_bytes: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _telemetry = wirebus_telemetry::init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: !cli.plain_logs,
        ..Default::default()
    });

    match cli.command {
        Command::Sse {
            host,
            port,
            sse_route,
            messages_route,
            queue_capacity,
        } => {
            let config = ServerConfig {
                host,
                port,
                sse_route,
                messages_route,
                session_queue_capacity: queue_capacity,
                ..Default::default()
            };
            let handle = wirebus_sse::start(config)
                .await
                .context("failed to start push transport")?;
            tracing::info!(addr = %handle.addr, "wirebus ready");

            let transport: Arc<dyn Transport> = handle.transport();
            let dispatcher = tokio::spawn(dispatch::run(transport));

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl+c")?;
            tracing::info!("shutting down");
            handle.shutdown().await;
            dispatcher.await??;
        }
        Command::Stdio { max_line_bytes } => {
            let config = LineConfig::default().with_max_line_bytes(max_line_bytes);
            let transport: Arc<dyn Transport> = Arc::new(wirebus_stdio::stdio(config));
            tokio::select! {
                result = dispatch::run(transport) => result?,
                _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
            }
        }
    }

    Ok(())
}
