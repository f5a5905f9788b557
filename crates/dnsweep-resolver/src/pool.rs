//! Per-worker socket pool.
//!
//! Each worker owns one long-lived unbound UDP socket, bound to the chosen
//! local address and an ephemeral port at startup. The sockets are created
//! eagerly so a bad local address fails fast, and they close on drop on
//! every exit path. With recycling disabled every query gets a fresh
//! socket instead.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Off-host destination used only to read the kernel's source-address
/// choice; no packet is sent.
const IPV4_PROBE: &str = "8.8.8.8:53";
const IPV6_PROBE: &str = "[2001:4860:4860::8888]:53";

/// Discovers the local address the kernel would use for outbound queries by
/// opening a transient UDP socket toward a public resolver.
pub async fn discover_local_addr(ipv6: bool) -> std::io::Result<IpAddr> {
    let (bind, probe) = if ipv6 {
        ("[::]:0", IPV6_PROBE)
    } else {
        ("0.0.0.0:0", IPV4_PROBE)
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.connect(probe).await?;
    let addr = socket.local_addr()?.ip();
    debug!(local_addr = %addr, "discovered local address");
    Ok(addr)
}

/// Recursive servers from the OS resolver configuration, falling back to
/// well-known public resolvers when it cannot be read.
pub fn system_name_servers() -> Vec<SocketAddr> {
    name_servers_from_file("/etc/resolv.conf")
}

/// Recursive servers from a resolv.conf-format file.
pub fn name_servers_from_file(path: &str) -> Vec<SocketAddr> {
    match std::fs::read(path) {
        Ok(contents) => match resolv_conf::Config::parse(&contents) {
            Ok(config) => {
                let servers: Vec<SocketAddr> = config
                    .nameservers
                    .iter()
                    .map(|ip| SocketAddr::new(IpAddr::from(ip), 53))
                    .collect();
                if !servers.is_empty() {
                    return servers;
                }
                warn!("resolv.conf lists no name servers, using defaults");
                default_name_servers()
            }
            Err(err) => {
                warn!(error = %err, "unable to parse resolv.conf, using defaults");
                default_name_servers()
            }
        },
        Err(err) => {
            warn!(error = %err, "unable to read resolv.conf, using defaults");
            default_name_servers()
        }
    }
}

fn default_name_servers() -> Vec<SocketAddr> {
    vec![
        "8.8.8.8:53".parse().expect("static address"),
        "1.1.1.1:53".parse().expect("static address"),
    ]
}

/// The per-worker UDP sockets.
pub struct SocketPool {
    sockets: Vec<Arc<UdpSocket>>,
    local_addr: IpAddr,
    recycle: bool,
}

impl SocketPool {
    /// Binds `workers` sockets to `local_addr` with ephemeral ports. When
    /// recycling is disabled no sockets are pre-bound.
    pub async fn bind(
        local_addr: IpAddr,
        workers: usize,
        recycle: bool,
    ) -> std::io::Result<Self> {
        let mut sockets = Vec::new();
        if recycle {
            sockets.reserve(workers.max(1));
            for _ in 0..workers.max(1) {
                let socket = UdpSocket::bind(SocketAddr::new(local_addr, 0)).await?;
                sockets.push(Arc::new(socket));
            }
            debug!(count = sockets.len(), local_addr = %local_addr, "socket pool bound");
        }
        Ok(Self {
            sockets,
            local_addr,
            recycle,
        })
    }

    pub fn local_addr(&self) -> IpAddr {
        self.local_addr
    }

    /// The socket for one worker: the pooled one, or a fresh bind when
    /// recycling is off.
    pub async fn socket_for(&self, worker: usize) -> std::io::Result<Arc<UdpSocket>> {
        if self.recycle && !self.sockets.is_empty() {
            Ok(self.sockets[worker % self.sockets.len()].clone())
        } else {
            self.fresh_socket().await
        }
    }

    /// A new ephemeral socket on the pool's local address, used for fan-out
    /// queries that need their own reply stream.
    pub async fn fresh_socket(&self) -> std::io::Result<Arc<UdpSocket>> {
        let socket = UdpSocket::bind(SocketAddr::new(self.local_addr, 0)).await?;
        Ok(Arc::new(socket))
    }
}
