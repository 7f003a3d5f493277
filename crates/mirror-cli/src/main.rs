//! mirror CLI
//!
//! One-directional directory mirroring: `source` serves a subtree and
//! keeps an in-memory model of it current; `mirror` pulls files from a
//! source peer and verifies them.

mod progress;

use clap::{Parser, Subcommand};
use mirror_transfer::{ClientConfig, FileClient, FileServer, ServerConfig, TransferConfig};
use mirror_tree::{TreeWatcher, build_tree, default_ignore};
use rand::Rng;
use std::net::SocketAddr;
use std::path::PathBuf;

use progress::{TransferProgress, format_bytes, format_speed};

/// Directory mirroring over a framed binary file-transfer protocol
#[derive(Parser)]
#[command(name = "mirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level: debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a directory tree to mirror peers
    Source {
        /// Listen address
        #[arg(short, long, default_value = "0.0.0.0:52345")]
        listen: SocketAddr,

        /// Directory to serve
        #[arg(short, long)]
        root: PathBuf,
    },

    /// Pull files from a source peer
    Mirror {
        /// Source peer address
        #[arg(short, long)]
        peer: SocketAddr,

        /// Directory downloads are written into
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Resume offset applied to each requested path
        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Paths to request, relative to the peer's serving root
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_str())
        .init();

    let instance_id: u32 = rand::thread_rng().r#gen();
    tracing::debug!(instance_id = format_args!("{instance_id:08x}"), "starting");

    match cli.command {
        Commands::Source { listen, root } => run_source(listen, root, instance_id).await,
        Commands::Mirror {
            peer,
            root,
            offset,
            paths,
        } => run_mirror(peer, root, offset, paths, instance_id).await,
    }
}

/// Serve `root`: build the tree model, watch it and run the server until
/// interrupted.
async fn run_source(listen: SocketAddr, root: PathBuf, instance_id: u32) -> anyhow::Result<()> {
    let root = root.canonicalize()?;
    let ignore = default_ignore();

    let tree = build_tree(&root, &ignore)?;
    tracing::info!(
        root = %root.display(),
        dirs = tree.all_dirs().len(),
        "tree built"
    );

    // Watcher starts strictly after the build; it is the only structural
    // writer from here on
    let _watcher = TreeWatcher::start(tree, ignore)?;

    let server = FileServer::new(ServerConfig {
        listen_addr: listen,
        serving_root: root,
        instance_id,
        transfer: TransferConfig::default(),
    });

    tokio::select! {
        result = server.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
        }
    }

    Ok(())
}

/// Pull each requested path from the peer, one at a time.
async fn run_mirror(
    peer: SocketAddr,
    root: PathBuf,
    offset: u64,
    paths: Vec<String>,
    instance_id: u32,
) -> anyhow::Result<()> {
    let client = FileClient::new(ClientConfig {
        peer_addr: peer,
        mirror_root: root,
        instance_id,
        transfer: TransferConfig::default(),
    });

    let mut conn = client.connect().await?;

    for path in &paths {
        let progress = TransferProgress::new(path);
        let result = conn
            .download_with(path, offset, |received| progress.update(received))
            .await;

        let report = match result {
            Ok(report) => {
                progress.finish();
                report
            }
            Err(err) if !err.is_fatal() => {
                progress.abandon();
                eprintln!("{path}: {err}");
                continue;
            }
            Err(err) => {
                progress.abandon();
                return Err(err.into());
            }
        };

        println!(
            "{path}: {} in {:.1?} ({})",
            format_bytes(report.bytes),
            report.elapsed,
            format_speed(report.throughput()),
        );
    }

    Ok(())
}
