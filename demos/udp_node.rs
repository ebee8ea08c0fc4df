use std::path::PathBuf;
use std::time::Duration;

use anyhow::anyhow;
use beeton::config::EngineConfig;
use beeton::console::Console;
use beeton::mapping::{parse_u8, NameRegistry};
use beeton::messaging::engine::ProtocolEngine;
use beeton::messaging::handler::Callbacks;
use beeton::messaging::logical_addr::LogicalAddr;
use beeton::messaging::node_addr::NodeAddr;
use beeton::messaging::transport::udp::{run_host, ConsoleIo, UdpMeshTransport, UdpTransportConfig};
use beeton::messaging::transport::Role;
use clap::Parser;
use clap_derive::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn, Level};

/// Runs a single mesh node over UDP. Without `--leader`, the node is the leader and reads
///  console commands from stdin.
#[derive(Parser)]
struct Args {
    /// this node's address, e.g. fd00::1 or 127.0.0.1
    node_address: String,

    /// the leader's address - makes this node a joiner
    #[clap(long)]
    leader: Option<String>,

    #[clap(long, default_value_t = UdpTransportConfig::DEFAULT_PORT)]
    port: u16,

    /// a logical address owned by this node as <thing>:<instance id>, e.g. 0x10:2
    #[clap(long)]
    identity: Vec<String>,

    /// directory with the mapping CSV files, also the directory served by GETFILE
    #[clap(long)]
    mapping_dir: Option<PathBuf>,

    #[clap(long, default_value_t = 10)]
    tick_millis: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

fn parse_identity(s: &str, registry: &NameRegistry) -> anyhow::Result<LogicalAddr> {
    let (thing, instance_id) = s.split_once(':')
        .ok_or_else(|| anyhow!("identity must be <thing>:<instance id>, was {}", s))?;
    Ok(LogicalAddr::new(registry.resolve_thing(thing)?, parse_u8(instance_id)?))
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    // stdout is reserved for console responses
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let registry = match &args.mapping_dir {
        Some(dir) => NameRegistry::load_dir(dir)?,
        None => NameRegistry::new(),
    };

    let mut identities = registry.local_identities().to_vec();
    for s in &args.identity {
        identities.push(parse_identity(s, &registry)?);
    }

    let leader: Option<NodeAddr> = match &args.leader {
        Some(s) => Some(s.parse()?),
        None => None,
    };
    let transport = UdpMeshTransport::bind(UdpTransportConfig {
        bind_addr: args.node_address.parse()?,
        port: args.port,
        role: if leader.is_some() { Role::Joiner } else { Role::Leader },
        leader,
    }).await?;

    let mut engine = ProtocolEngine::new(transport, EngineConfig::default())?;
    engine.define_local_identities(identities);
    engine.set_handler(Callbacks::new()
        .with_message(|logical_addr, action, payload| info!(?logical_addr, action, ?payload, "received message"))
        .with_ack_success(|logical_addr, action, seq| info!(?logical_addr, action, seq, "delivered"))
        .with_ack_fail(|logical_addr, action, seq| warn!(?logical_addr, action, seq, "delivery failed")));

    let console = match leader {
        Some(leader) => {
            // this transport has no join protocol of its own, the leader is configured
            engine.on_peer_joined(leader, &[]);
            None
        }
        None => {
            let file_dir = args.mapping_dir.clone().unwrap_or_else(|| PathBuf::from("."));
            Some(ConsoleIo {
                console: Console::new(registry, file_dir),
                commands: spawn_stdin_reader(),
                out: std::io::stdout(),
            })
        }
    };

    run_host(&mut engine, Duration::from_millis(args.tick_millis), console).await
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (send, recv) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if send.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("error reading stdin: {}", e);
                    break;
                }
            }
        }
    });
    recv
}
