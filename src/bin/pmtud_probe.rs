use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mesh_pmtud::transport::udp::{engine_ack_handler, run_echo_loop, run_responder};
use mesh_pmtud::{
    init_logging, mtu_summary, wire_to_tun, AddressFamily, MtuOverrides, PathId, PmtudConfig,
    PmtudEngine, ProbeLifecycle,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about = "Path MTU probe tool", long_about = None)]
struct Args {
    /// JSON file with prober settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer probes from peers
    Respond {
        /// Listen address (IP:port)
        #[arg(short, long, default_value = "0.0.0.0:41641")]
        bind: SocketAddr,
    },
    /// Discover the path MTU towards a responder
    Probe {
        /// Responder address (IP:port)
        peer: SocketAddr,

        /// Local address (IP:port)
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Keep running and report re-validations
        #[arg(long)]
        follow: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    let config = match &args.config {
        Some(path) => PmtudConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PmtudConfig::default(),
    };

    match args.command {
        Command::Respond { bind } => respond(bind).await,
        Command::Probe { peer, bind, follow } => probe(config, peer, bind, follow).await,
    }
}

async fn respond(bind: SocketAddr) -> Result<()> {
    let socket = Arc::new(UdpSocket::bind(bind).await?);
    println!("Answering probes on {}", socket.local_addr()?);

    let cancel = CancellationToken::new();
    let responder = tokio::spawn(run_responder(socket, cancel.clone()));

    tokio::signal::ctrl_c().await?;
    cancel.cancel();
    responder.await??;
    Ok(())
}

async fn probe(
    config: PmtudConfig,
    peer: SocketAddr,
    bind: Option<SocketAddr>,
    follow: bool,
) -> Result<()> {
    let mut overrides = MtuOverrides::from_env();
    overrides.pmtud_enabled = true;
    println!("{}", mtu_summary(&overrides));

    let bind = bind.unwrap_or_else(|| match peer {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    });
    let socket = Arc::new(UdpSocket::bind(bind).await?);
    let local = socket.local_addr()?;
    println!("Probing {} from {}", peer, local);

    let engine = Arc::new(PmtudEngine::new(config, overrides));
    let path = PathId::new("cli", local, peer);

    let cancel = CancellationToken::new();
    let resolved = path.clone();
    let listener = tokio::spawn(run_echo_loop(
        socket.clone(),
        cancel.clone(),
        engine_ack_handler(engine.clone(), move |from| {
            (from == resolved.remote).then(|| resolved.clone())
        }),
    ));

    engine.create_path_prober(path.clone(), socket, AddressFamily::of(&peer))?;
    let mut states = engine
        .watch_path(&path)
        .context("path was not registered")?;
    let mut tun_mtu = engine.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = tun_mtu.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("Tunnel MTU: {}", *tun_mtu.borrow_and_update());
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = *states.borrow_and_update();
                match snapshot.lifecycle {
                    ProbeLifecycle::Stable => {
                        println!(
                            "Path MTU {} (tunnel MTU {}) after {} probes",
                            snapshot.verified_wire_mtu,
                            wire_to_tun(snapshot.verified_wire_mtu),
                            snapshot.probes_sent
                        );
                        if !follow {
                            break;
                        }
                    }
                    ProbeLifecycle::Degraded => {
                        println!("Don't-fragment is not supported here; staying at the safe MTU");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    engine.shutdown().await;
    cancel.cancel();
    listener.await??;
    Ok(())
}
