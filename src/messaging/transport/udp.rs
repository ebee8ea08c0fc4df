use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{ErrorKind, Write};
use std::net::Ipv6Addr;
use std::time::Duration;

use anyhow::{bail, Context};
use rustc_hash::FxHashMap;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::console::Console;
use crate::messaging::engine::ProtocolEngine;
use crate::messaging::node_addr::NodeAddr;
use crate::messaging::transport::{MeshTransport, Role};

/// Receive buffer size. A datagram that fills the buffer completely may have been truncated.
const RECV_BUFFER_SIZE: usize = 65_535;

/// upper bound for datagrams waiting for the socket to become writable
const MAX_QUEUED_DATAGRAMS: usize = 256;

#[derive(Debug, Clone)]
pub struct UdpTransportConfig {
    /// This node's address. It is bound locally and sent on the wire as the origin of all
    ///  packets, so it must be reachable by the other nodes.
    pub bind_addr: NodeAddr,
    /// All nodes of a mesh use the same port, so a [NodeAddr] is sufficient to reach a node.
    pub port: u16,
    pub role: Role,
    /// the leader's address, required for joiners
    pub leader: Option<NodeAddr>,
}

impl Default for UdpTransportConfig {
    fn default() -> Self {
        UdpTransportConfig {
            bind_addr: NodeAddr::from(Ipv6Addr::LOCALHOST),
            port: Self::DEFAULT_PORT,
            role: Role::Leader,
            leader: None,
        }
    }
}

impl UdpTransportConfig {
    pub const DEFAULT_PORT: u16 = 16_543;

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr == NodeAddr::UNSPECIFIED {
            bail!("bind address must be a concrete address since it is sent as the packets' origin");
        }
        if self.port == 0 {
            bail!("port must be configured explicitly since it is shared by all nodes");
        }
        match (self.role, self.leader) {
            (Role::Joiner, None) => bail!("a joiner requires the leader's address"),
            (Role::Joiner, Some(leader)) if leader == self.bind_addr => bail!("a joiner can not be its own leader"),
            (Role::Leader, Some(_)) => bail!("the leader must not have a leader address"),
            _ => Ok(()),
        }
    }
}

/// [MeshTransport] on top of a plain UDP socket. Sending never blocks: a datagram that does
///  not fit into the socket's send buffer is queued and sent by [MeshTransport::pump] once the
///  socket is writable again. Only a full queue or a socket error rejects a datagram.
///
/// This transport is meant to be driven from a single task, see [run_host].
pub struct UdpMeshTransport {
    config: UdpTransportConfig,
    socket: UdpSocket,
    queued: RefCell<VecDeque<(NodeAddr, Vec<u8>)>>,
    last_contact: RefCell<FxHashMap<NodeAddr, Instant>>,
}

impl UdpMeshTransport {
    pub async fn bind(config: UdpTransportConfig) -> anyhow::Result<UdpMeshTransport> {
        config.validate()?;

        let local = config.bind_addr.socket_addr(config.port);
        let socket = UdpSocket::bind(local).await
            .with_context(|| format!("binding UDP socket to {}", local))?;
        info!(?local, role = ?config.role, "bound mesh transport");

        Self::from_socket(config, socket).await
    }

    /// Waits for the socket's initial write readiness, so sending right after this returns
    ///  goes to the socket rather than to the queue.
    async fn from_socket(config: UdpTransportConfig, socket: UdpSocket) -> anyhow::Result<UdpMeshTransport> {
        socket.writable().await
            .context("waiting for the socket to become writable")?;

        Ok(UdpMeshTransport {
            config,
            socket,
            queued: Default::default(),
            last_contact: Default::default(),
        })
    }

    /// Receives the next complete datagram into `buf`, returning the sender and the datagram's
    ///  length. Datagrams that fill all of `buf` may be truncated, they are dropped.
    ///
    /// This is cancel safe.
    pub async fn recv(&self, buf: &mut [u8]) -> anyhow::Result<(NodeAddr, usize)> {
        loop {
            let (len, from) = self.socket.recv_from(buf).await?;
            let from = NodeAddr::from(from);
            if len >= buf.len() {
                warn!(?from, len, "received datagram does not fit into the receive buffer - dropping");
                continue;
            }
            trace!(?from, len, "received datagram");

            self.last_contact.borrow_mut().insert(from, Instant::now());
            return Ok((from, len));
        }
    }

    pub fn num_queued(&self) -> usize {
        self.queued.borrow().len()
    }

    /// sends queued datagrams in order until the socket would block
    fn flush_queued(&self) {
        let mut queued = self.queued.borrow_mut();
        while let Some((to, buf)) = queued.front() {
            match self.socket.try_send_to(buf, to.socket_addr(self.config.port)) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) => warn!(?to, "error sending queued datagram - dropping: {}", e),
            }
            queued.pop_front();
        }
    }

    fn enqueue(&self, to: NodeAddr, buf: &[u8]) -> bool {
        let mut queued = self.queued.borrow_mut();
        if queued.len() >= MAX_QUEUED_DATAGRAMS {
            debug!(?to, "send queue is full - rejecting datagram");
            return false;
        }
        trace!(?to, "socket is not writable - queueing datagram");
        queued.push_back((to, buf.to_vec()));
        true
    }
}

impl MeshTransport for UdpMeshTransport {
    fn send_datagram(&self, to: NodeAddr, buf: &[u8]) -> bool {
        // preserve ordering behind datagrams that are still waiting
        if self.num_queued() > 0 {
            self.flush_queued();
            if self.num_queued() > 0 {
                return self.enqueue(to, buf);
            }
        }

        match self.socket.try_send_to(buf, to.socket_addr(self.config.port)) {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::WouldBlock => self.enqueue(to, buf),
            Err(e) => {
                debug!(?to, "error sending datagram: {}", e);
                false
            }
        }
    }

    fn role(&self) -> Role {
        self.config.role
    }

    fn own_addr(&self) -> NodeAddr {
        self.config.bind_addr
    }

    fn leader_addr(&self) -> Option<NodeAddr> {
        self.config.leader
    }

    fn last_contact(&self, addr: NodeAddr) -> Option<Instant> {
        self.last_contact.borrow().get(&addr).copied()
    }

    fn pump(&self) {
        self.flush_queued();
    }
}

/// Console input for [run_host]: commands arrive as lines, responses are written to `out`.
pub struct ConsoleIo<W: Write> {
    pub console: Console,
    pub commands: mpsc::Receiver<String>,
    pub out: W,
}

/// The host run loop: feeds received datagrams to the engine, calls `tick()` every
///  `tick_interval`, and executes console commands if there is a console. Everything happens
///  on the calling task, which serializes all access to the engine.
///
/// This returns only on a socket error.
pub async fn run_host<W: Write>(
    engine: &mut ProtocolEngine<UdpMeshTransport>,
    tick_interval: Duration,
    mut console: Option<ConsoleIo<W>>,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    let mut ticks = time::interval(tick_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            r = engine.transport().recv(&mut buf) => {
                match r {
                    Ok((from, len)) => {
                        engine.on_datagram(from, &buf[..len]);
                    }
                    Err(e) => {
                        error!(error = ?e, "error receiving from datagram socket");
                        return Err(e);
                    }
                }
            }
            _ = ticks.tick() => {
                engine.tick();
            }
            r = engine.transport().socket.writable(), if engine.transport().num_queued() > 0 => {
                match r {
                    Ok(()) => engine.transport().pump(),
                    Err(e) => {
                        error!(error = ?e, "error waiting for the datagram socket to become writable");
                        return Err(e.into());
                    }
                }
            }
            opt_line = next_command(&mut console), if console.is_some() => {
                match opt_line {
                    Some(line) => {
                        if let Some(io) = console.as_mut() {
                            for response in io.console.handle_line(&line, engine) {
                                if let Err(e) = writeln!(io.out, "{}", response) {
                                    warn!("error writing console response: {}", e);
                                }
                            }
                            if let Err(e) = io.out.flush() {
                                warn!("error flushing console output: {}", e);
                            }
                        }
                    }
                    None => {
                        debug!("console input closed");
                        console = None;
                    }
                }
            }
        }
    }
}

async fn next_command<W: Write>(console: &mut Option<ConsoleIo<W>>) -> Option<String> {
    console.as_mut()?.commands.recv().await
}
