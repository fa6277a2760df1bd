//! Burrow CLI - relay server, relay client, and key provisioning.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use burrow_client::{ClientConfig, RelayClient, ServiceConfig};
use burrow_keys::{provision, DirKeyStore, KeyStore, Role};
use burrow_server::{RelayServer, ServerConfig};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
use config::{default_config_path, FileConfig};

/// Burrow - expose firewalled TCP services through an authenticated relay
#[derive(Parser, Debug)]
#[command(name = "burrow")]
#[command(about = "Expose firewalled TCP services through an authenticated relay tunnel")]
#[command(version)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nCommit: ", env!("GIT_HASH"),
    "\nBuilt: ", env!("BUILD_TIME"),
))]
struct Cli {
    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay server (public rendezvous host)
    Server {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Tunnel listener port (overrides the config file)
        #[arg(short, long)]
        port: Option<u16>,
        /// Print the effective configuration and exit
        #[arg(short, long)]
        show_config: bool,
    },
    /// Run the relay client (origin side)
    Client {
        /// Config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Relay server address (overrides the config file)
        #[arg(long)]
        server_addr: Option<String>,
        /// Relay server tunnel port (overrides the config file)
        #[arg(long)]
        server_port: Option<u16>,
        /// Origin service address (single-service mode)
        #[arg(long)]
        service_addr: Option<String>,
        /// Origin service port (single-service mode)
        #[arg(long)]
        service_port: Option<u16>,
        /// Public port the server should open (single-service mode)
        #[arg(long)]
        bind_port: Option<u16>,
        /// Print the effective configuration and exit
        #[arg(short, long)]
        show_config: bool,
    },
    /// Generate a keypair for one role
    Keygen {
        /// Certificates directory (defaults next to the config file)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Which endpoint to provision
        #[arg(short, long)]
        role: RoleArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Server,
    Client,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Server => Role::Server,
            RoleArg::Client => Role::Client,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone())),
        )
        .init();

    match cli.command {
        Commands::Server {
            config,
            port,
            show_config,
        } => run_server(config, port, show_config).await,
        Commands::Client {
            config,
            server_addr,
            server_port,
            service_addr,
            service_port,
            bind_port,
            show_config,
        } => {
            run_client(
                config,
                server_addr,
                server_port,
                service_addr,
                service_port,
                bind_port,
                show_config,
            )
            .await
        }
        Commands::Keygen { dir, role } => run_keygen(dir, role.into()),
    }
}

fn resolve_config(path: Option<PathBuf>) -> Result<(PathBuf, FileConfig)> {
    let path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = FileConfig::load(&path)?;
    Ok((path, config))
}

async fn run_server(config: Option<PathBuf>, port: Option<u16>, show_config: bool) -> Result<()> {
    let (config_path, mut file) = resolve_config(config)?;
    if let Some(port) = port {
        file.port = Some(port);
    }

    if show_config {
        println!("{}", file.to_toml()?);
        return Ok(());
    }

    let Some(port) = file.port else {
        bail!("Server listening port is not configured");
    };

    let certs_dir = file.certificates_dir(&config_path);
    let keystore = DirKeyStore::new(&certs_dir, Role::Server);
    let _watcher = keystore.watch_clients(None);
    let keystore: Arc<dyn KeyStore> = Arc::new(keystore);

    let server_config = ServerConfig {
        port,
        bufsize: file.bufsize,
        heartbeat: file.heartbeat.clone(),
        ..ServerConfig::new(port)
    };

    let server = RelayServer::bind(server_config, keystore)
        .await
        .context("failed to start relay server")?;
    server.run().await.context("relay server failed")
}

#[allow(clippy::too_many_arguments)]
async fn run_client(
    config: Option<PathBuf>,
    server_addr: Option<String>,
    server_port: Option<u16>,
    service_addr: Option<String>,
    service_port: Option<u16>,
    bind_port: Option<u16>,
    show_config: bool,
) -> Result<()> {
    let (config_path, mut file) = resolve_config(config)?;
    if let Some(addr) = server_addr {
        file.server.addr = addr;
    }
    if let Some(port) = server_port {
        file.server.port = port;
    }

    if show_config {
        println!("{}", file.to_toml()?);
        return Ok(());
    }

    // Explicit service flags run exactly one tunnel; otherwise every
    // configured service gets its own.
    let services = match (service_addr, service_port, bind_port) {
        (Some(addr), Some(port), Some(bind_port)) => vec![ServiceConfig {
            addr,
            port,
            bind_port,
        }],
        (None, None, None) => file.services.clone(),
        _ => bail!("--service-addr, --service-port and --bind-port must be given together"),
    };
    if services.is_empty() {
        bail!("No services configured");
    }

    let certs_dir = file.certificates_dir(&config_path);
    let keystore: Arc<dyn KeyStore> = Arc::new(DirKeyStore::new(&certs_dir, Role::Client));

    let mut tunnels = Vec::new();
    for service in services {
        let mut client_config =
            ClientConfig::new(file.server.addr.clone(), file.server.port, service);
        client_config.bufsize = file.bufsize;
        client_config.heartbeat_interval = file.heartbeat.interval;

        let client = RelayClient::new(client_config, Arc::clone(&keystore));
        tunnels.push(tokio::spawn(async move { client.run().await }));
    }

    for tunnel in tunnels {
        tunnel.await?.context("relay client failed")?;
    }
    Ok(())
}

fn run_keygen(dir: Option<PathBuf>, role: Role) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => default_config_path()?
            .parent()
            .context("config path has no parent directory")?
            .join("certificates"),
    };

    let keypair = provision(&dir, role).context("failed to provision keypair")?;
    info!(
        dir = %dir.display(),
        role = role.as_str(),
        "Keypair written"
    );
    println!(
        "Wrote {role}.key and {role}.pub under {dir}\nfingerprint: {fp}",
        role = role.as_str(),
        dir = dir.display(),
        fp = keypair.fingerprint()
    );
    Ok(())
}
