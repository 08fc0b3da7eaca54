use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ges::{rpc, ServerState};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Directory tree of git repositories to serve. Any directory whose
    /// listing matches the usual repository signature is served as a
    /// repo, whatever its name.
    #[arg(long)]
    content_path: PathBuf,
    /// Directory containing index.html and favicon.ico
    #[arg(long, default_value = "./static")]
    static_content_path: PathBuf,
    /// Virtual path segment separating decorative URI prefixes from the
    /// served path; empty disables decoration
    #[arg(long, default_value = "")]
    uri_marker: String,
    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    bind: IpAddr,
    /// Port to listen on
    #[arg(long, default_value_t = 8888)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt().with_env_filter(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    );
    #[cfg(debug_assertions)]
    let subscriber = subscriber.pretty();
    subscriber.init();

    let served_root = args
        .content_path
        .canonicalize()
        .context("content path does not exist")?;
    let static_root = args
        .static_content_path
        .canonicalize()
        .context("static content path does not exist")?;
    for expected in ["favicon.ico", "index.html"] {
        if !static_root.join(expected).is_file() {
            bail!(
                "static content directory {} does not contain {expected}",
                static_root.display()
            );
        }
    }

    let state = Arc::new(ServerState {
        rpc: rpc::assemble(served_root.clone()),
        served_root,
        static_root,
        uri_marker: args.uri_marker,
    });

    let address = SocketAddr::from((args.bind, args.port));
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    info!("listening on http://{address}");

    axum::serve(
        listener,
        ges::app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server terminated")?;

    Ok(())
}
