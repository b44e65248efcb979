use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use flotilla::api::{run_api, ApiState};
use flotilla::config::{load_catalog, FleetConfig};
use flotilla::driver::LocalDriver;
use flotilla::server::FleetServer;
use flotilla::shutdown::shutdown_token;

#[derive(Parser, Debug)]
#[command(name = "flotilla")]
#[command(version)]
#[command(about = "A task-fleet manager for cluster schedulers")]
struct Args {
    /// Address for the HTTP API
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Path to the task-definition catalog (JSON)
    #[arg(long)]
    catalog: PathBuf,

    /// Overall bound on one restart's wait for its replacement, in milliseconds
    #[arg(long, default_value_t = 300_000)]
    restart_timeout_ms: u64,

    /// Interval for polling a replacement's runtime state, in milliseconds
    #[arg(long, default_value_t = 1_000)]
    restart_poll_ms: u64,

    /// Require replacements to report healthy before the original is killed
    #[arg(long)]
    use_healthcheck: bool,

    /// Run with the in-process local driver instead of an external scheduler
    #[arg(long)]
    local_driver: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = FleetConfig::new(args.listen)
        .with_restart_timeout(Duration::from_millis(args.restart_timeout_ms))
        .with_healthcheck(args.use_healthcheck);
    config.restart.poll_interval = Duration::from_millis(args.restart_poll_ms);

    let catalog = load_catalog(&args.catalog)?;
    tracing::info!(
        types = catalog.len(),
        catalog = %args.catalog.display(),
        "Loaded task catalog"
    );

    let (server, handle, link) = FleetServer::new(catalog, config.restart.clone());
    let shutdown = shutdown_token();

    if args.local_driver {
        tracing::warn!("Running with the in-process local driver, no external scheduler");
        let driver = LocalDriver::new(server.registry(), link);
        tokio::spawn(async move {
            driver.run().await;
        });
    } else {
        // External scheduler integrations plug into `link`; none ship in-tree.
        return Err("no scheduler driver configured; start with --local-driver".into());
    }

    let api_state = ApiState { handle };
    let api_addr = config.listen_addr;
    tokio::spawn(async move {
        run_api(api_addr, api_state).await;
    });

    server.run(shutdown).await;
    Ok(())
}
