//! dshield-mcp: MCP server for DShield SIEM analysis.
//!
//! Exit codes: 0 on normal shutdown, 1 on startup failure (invalid
//! configuration), 2 on a fatal runtime error.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dshield_mcp_server::config::LogFormat;
use dshield_mcp_server::{NoopSecretResolver, ServerConfig, ServerContext};
use dshield_mcp_server::server::ServerCore;
use dshield_mcp_transport::{TcpServerConfig, serve_stdio, serve_tcp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Newline-delimited JSON over stdin/stdout.
    Stdio,
    /// TCP listener with an API-key handshake.
    Tcp,
}

#[derive(Debug, Parser)]
#[command(name = "dshield-mcp", version, about = "MCP server for DShield SIEM analysis")]
struct Cli {
    /// Transport to serve on.
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Override the configured TCP bind host.
    #[arg(long, env = "MCP_SERVER_HOST")]
    host: Option<String>,

    /// Override the configured TCP bind port.
    #[arg(long, env = "MCP_SERVER_PORT")]
    port: Option<u16>,

    /// Enable debug logging regardless of LOG_LEVEL.
    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match ServerConfig::from_env(&NoopSecretResolver) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("dshield-mcp: invalid configuration: {err}");
            return ExitCode::from(1);
        }
    };
    if let Some(host) = &cli.host {
        config.server_host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server_port = port;
    }
    if cli.debug {
        config.server_debug = true;
    }

    init_tracing(&config, cli.transport);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("dshield-mcp: failed to start runtime: {err}");
            return ExitCode::from(2);
        }
    };

    let core = match build_server(&runtime, config.clone()) {
        Ok(core) => core,
        Err(err) => {
            error!(%err, "startup failed");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(serve(core, cli.transport, &config)) {
        Ok(()) => {
            info!("shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "fatal runtime error");
            ExitCode::from(2)
        }
    }
}

/// Structured logging to stderr. Stdout belongs to the protocol when the
/// stdio transport is active.
fn init_tracing(config: &ServerConfig, _transport: Transport) {
    let level = if config.server_debug {
        "debug".to_string()
    } else {
        config.log_level.clone()
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn build_server(
    runtime: &tokio::runtime::Runtime,
    config: ServerConfig,
) -> anyhow::Result<Arc<ServerCore>> {
    let context = ServerContext::new(config)?;
    let core = Arc::new(ServerCore::new(context)?);

    // Startup probes decide which tools are exposed from the first
    // tools/list on; an unreachable backend degrades, it does not abort.
    let ctx = core.context();
    runtime.block_on(async {
        ctx.features.probe_all(&ctx.elastic, &ctx.dshield).await;
    });
    Ok(core)
}

async fn serve(
    core: Arc<ServerCore>,
    transport: Transport,
    config: &ServerConfig,
) -> anyhow::Result<()> {
    spawn_signal_handler(Arc::clone(&core));

    match transport {
        Transport::Stdio => serve_stdio(Arc::clone(&core)).await?,
        Transport::Tcp => {
            let tcp = TcpServerConfig {
                host: config.server_host.clone(),
                port: config.server_port,
            };
            serve_tcp(Arc::clone(&core), tcp).await?;
        }
    }

    // Transports have drained; cancel whatever the clients still hold.
    core.context().elastic.close();
    Ok(())
}

/// SIGTERM and Ctrl-C both begin the graceful drain; the transports bound
/// it at 30 seconds before forcing shutdown.
fn spawn_signal_handler(core: Arc<ServerCore>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    error!(%err, "cannot install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("interrupt received"),
                _ = sigterm.recv() => info!("SIGTERM received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("interrupt received");
        }

        core.trigger_shutdown();
    });
}
