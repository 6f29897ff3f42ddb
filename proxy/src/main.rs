use anyhow::Result;
use clap::{CommandFactory, Parser};
use db_audit_proxy::audit::{open_sink, AuditTarget};
use db_audit_proxy::config::ProxyConfig;
use db_audit_proxy::server::ProxyServer;
use log::{error, info};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Transparent MySQL proxy that records executed queries")]
struct Args {
    /// Config file path
    #[clap(short, long, env = "DB_AUDIT_CONFIG")]
    config: Option<String>,

    /// Local address to listen on [default: 127.0.0.1]
    #[clap(long, env = "DB_AUDIT_BIND_HOST")]
    bind_host: Option<String>,

    /// Local port to listen on [default: 8080]
    #[clap(long, env = "DB_AUDIT_BIND_PORT")]
    bind_port: Option<u16>,

    /// Remote DB host
    #[clap(long, env = "DB_AUDIT_REMOTE_HOST")]
    remote_host: Option<String>,

    /// Remote DB port
    #[clap(long, env = "DB_AUDIT_REMOTE_PORT")]
    remote_port: Option<u16>,

    /// Audit log file, "-" for stdout, "none" to disable [default: db-proxy.log]
    #[clap(long, env = "DB_AUDIT_AUDIT_LOG")]
    audit_log: Option<AuditTarget>,

    /// Hex dump relayed bytes (visible at trace level)
    #[clap(long, env = "DB_AUDIT_HEXDUMP")]
    hexdump: bool,

    /// Log level used when RUST_LOG is not set
    #[clap(long, env = "DB_AUDIT_LOG_LEVEL")]
    log_level: Option<String>,
}

fn load_config(args: Args) -> db_audit_proxy::Result<ProxyConfig> {
    let mut config = match args.config {
        Some(path) => ProxyConfig::from_file(&path)?,
        None => ProxyConfig::new(),
    };

    // Override config with command-line arguments
    if let Some(bind_host) = args.bind_host {
        config.bind_host = bind_host;
    }
    if let Some(bind_port) = args.bind_port {
        config.bind_port = bind_port;
    }
    if let Some(remote_host) = args.remote_host {
        config.remote_host = remote_host;
    }
    if let Some(remote_port) = args.remote_port {
        config.remote_port = remote_port;
    }
    if let Some(audit_log) = args.audit_log {
        config.audit_log = audit_log;
    }
    if args.hexdump {
        config.hexdump = true;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = match load_config(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}\n", e);
            Args::command().print_help()?;
            std::process::exit(1);
        }
    };

    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, &config.log_level),
    );

    let sink = open_sink(&config.audit_log)?;
    let server = ProxyServer::bind(config, sink).await?;

    info!("Starting MySQL audit proxy on {}", server.local_addr()?);
    info!(
        "Backend MySQL: {}:{}, audit log: {}",
        server.config().remote_host,
        server.config().remote_port,
        server.config().audit_log
    );

    // Cancel the accept loop on Ctrl+C
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C");
                signal.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    server.serve(shutdown).await?;

    info!("Server stopped");

    Ok(())
}
