//! The root name servers.
//!
//! IANA root server addresses, IPv4 and IPv6. Refreshing them after a
//! renumbering means editing this file and nothing else.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// A root server entry.
#[derive(Debug, Clone, Copy)]
pub struct RootServer {
    pub name: &'static str,
    pub ipv4: &'static str,
    pub ipv6: &'static str,
}

/// The 13 root servers as published by IANA.
pub const ROOT_SERVERS: &[RootServer] = &[
    RootServer {
        name: "a.root-servers.net",
        ipv4: "198.41.0.4",
        ipv6: "2001:503:ba3e::2:30",
    },
    RootServer {
        name: "b.root-servers.net",
        ipv4: "170.247.170.2",
        ipv6: "2801:1b8:10::b",
    },
    RootServer {
        name: "c.root-servers.net",
        ipv4: "192.33.4.12",
        ipv6: "2001:500:2::c",
    },
    RootServer {
        name: "d.root-servers.net",
        ipv4: "199.7.91.13",
        ipv6: "2001:500:2d::d",
    },
    RootServer {
        name: "e.root-servers.net",
        ipv4: "192.203.230.10",
        ipv6: "2001:500:a8::e",
    },
    RootServer {
        name: "f.root-servers.net",
        ipv4: "192.5.5.241",
        ipv6: "2001:500:2f::f",
    },
    RootServer {
        name: "g.root-servers.net",
        ipv4: "192.112.36.4",
        ipv6: "2001:500:12::d0d",
    },
    RootServer {
        name: "h.root-servers.net",
        ipv4: "198.97.190.53",
        ipv6: "2001:500:1::53",
    },
    RootServer {
        name: "i.root-servers.net",
        ipv4: "192.36.148.17",
        ipv6: "2001:7fe::53",
    },
    RootServer {
        name: "j.root-servers.net",
        ipv4: "192.58.128.30",
        ipv6: "2001:503:c27::2:30",
    },
    RootServer {
        name: "k.root-servers.net",
        ipv4: "193.0.14.129",
        ipv6: "2001:7fd::1",
    },
    RootServer {
        name: "l.root-servers.net",
        ipv4: "199.7.83.42",
        ipv6: "2001:500:9f::42",
    },
    RootServer {
        name: "m.root-servers.net",
        ipv4: "202.12.27.33",
        ipv6: "2001:dc3::35",
    },
];

impl RootServer {
    pub fn ipv4_addr(&self) -> Option<SocketAddr> {
        self.ipv4
            .parse::<Ipv4Addr>()
            .ok()
            .map(|ip| SocketAddr::new(IpAddr::V4(ip), 53))
    }

    pub fn ipv6_addr(&self) -> Option<SocketAddr> {
        self.ipv6
            .parse::<Ipv6Addr>()
            .ok()
            .map(|ip| SocketAddr::new(IpAddr::V6(ip), 53))
    }
}

/// Socket addresses of the roots for one address family.
pub fn root_server_addrs(ipv6: bool) -> Vec<SocketAddr> {
    ROOT_SERVERS
        .iter()
        .filter_map(|root| {
            if ipv6 {
                root.ipv6_addr()
            } else {
                root.ipv4_addr()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thirteen_roots_each_family() {
        assert_eq!(ROOT_SERVERS.len(), 13);
        assert_eq!(root_server_addrs(false).len(), 13);
        assert_eq!(root_server_addrs(true).len(), 13);
    }

    #[test]
    fn test_all_on_port_53() {
        for addr in root_server_addrs(false).iter().chain(&root_server_addrs(true)) {
            assert_eq!(addr.port(), 53);
        }
    }
}
