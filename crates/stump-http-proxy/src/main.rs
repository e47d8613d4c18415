use clap::Parser;
use std::sync::Arc;
use stump_http_proxy::{InMemoryDataAccess, ProxyHost, TracingLog};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "stumpd", about = "HTTP stubbing and interception proxy")]
struct Args {
    /// External host to proxy, `host` or `host:port`
    #[arg(long)]
    external_host: String,
    /// Local port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,
    /// Forward to the origin over https
    #[arg(long)]
    use_ssl: bool,
    /// Record observed request/response pairs
    #[arg(long)]
    record: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let host = ProxyHost::new(Arc::new(InMemoryDataAccess::new()), Arc::new(TracingLog));
    let instance = host
        .create_server_instance(&args.external_host, args.port, args.use_ssl, true)
        .await?;
    instance.set_recording(args.record);

    info!(
        "proxying {} on port {} (ssl: {}, recording: {})",
        args.external_host, args.port, args.use_ssl, args.record
    );

    tokio::signal::ctrl_c().await?;
    host.shutdown();
    info!("shut down");
    Ok(())
}
