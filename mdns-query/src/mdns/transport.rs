//! Socket set for one client: unicast and multicast sockets per address family.

use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::Arc;
use anyhow::{Context, Result};
use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, Type};
use tokio::net::UdpSocket;
use crate::error::Error;

pub const MDNS_PORT: u16 = 5353;
pub const MDNS_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
pub const MDNS_GROUP_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0xfb);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    fn domain(self) -> Domain {
        match self {
            Family::V4 => Domain::IPV4,
            Family::V6 => Domain::IPV6,
        }
    }

    fn unspecified(self, port: u16) -> SocketAddr {
        match self {
            Family::V4 => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            Family::V6 => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port),
        }
    }

    /// Well-known mDNS group and port for this family
    pub fn group(self) -> SocketAddr {
        match self {
            Family::V4 => SocketAddr::new(IpAddr::V4(MDNS_GROUP_V4), MDNS_PORT),
            Family::V6 => SocketAddr::V6(SocketAddrV6::new(MDNS_GROUP_V6, MDNS_PORT, 0, 0)),
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::V4 => write!(f, "IPv4"),
            Family::V6 => write!(f, "IPv6"),
        }
    }
}

/// A network interface selected for multicast traffic.
///
/// IPv4 sockets select the interface by one of its addresses, IPv6 sockets
/// by its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastInterface {
    pub name: String,
    pub index: Option<u32>,
    pub ipv4: Option<Ipv4Addr>,
}

impl MulticastInterface {
    /// Look up an interface by name among the host's configured interfaces
    pub fn by_name(name: &str) -> Result<Self> {
        let interfaces = if_addrs::get_if_addrs()
            .context("Failed to enumerate network interfaces")?;

        let mut found: Option<MulticastInterface> = None;
        for iface in interfaces.into_iter().filter(|iface| iface.name == name) {
            let entry = found.get_or_insert_with(|| MulticastInterface {
                name: iface.name.clone(),
                index: iface.index,
                ipv4: None,
            });
            if let IpAddr::V4(ip) = iface.ip() {
                entry.ipv4.get_or_insert(ip);
            }
        }

        found.ok_or_else(|| Error::InterfaceNotFound(name.to_string()).into())
    }
}

fn multicast_ipv4(iface: Option<&MulticastInterface>) -> Ipv4Addr {
    iface.and_then(|iface| iface.ipv4).unwrap_or(Ipv4Addr::UNSPECIFIED)
}

fn multicast_index(iface: Option<&MulticastInterface>) -> u32 {
    iface.and_then(|iface| iface.index).unwrap_or(0)
}

/// Unicast and multicast sockets of one address family.
#[derive(Debug, Clone)]
pub(crate) struct ProtocolPair {
    pub(crate) family: Family,
    pub(crate) unicast: Arc<UdpSocket>,
    pub(crate) multicast: Arc<UdpSocket>,
    /// Where queries written on the unicast socket go
    pub(crate) destination: SocketAddr,
}

/// A unicast socket and the destination queries are written to.
#[derive(Debug, Clone)]
pub(crate) struct QueryTarget {
    pub(crate) family: Family,
    pub(crate) socket: Arc<UdpSocket>,
    pub(crate) destination: SocketAddr,
}

/// Up to four sockets: unicast and multicast for IPv4 and IPv6.
/// Dropping the set releases its handles on the sockets.
#[derive(Debug, Default)]
pub struct EndpointSet {
    v4: Option<ProtocolPair>,
    v6: Option<ProtocolPair>,
}

impl EndpointSet {
    /// Open sockets for the enabled families.
    ///
    /// A family is kept only when both its unicast and multicast sockets bind.
    /// Individual bind failures are logged; the call fails only when no
    /// family is left.
    pub fn open(ipv4: bool, ipv6: bool, iface: Option<&MulticastInterface>) -> Result<Self> {
        if !ipv4 && !ipv6 {
            return Err(Error::NoProtocolEnabled.into());
        }

        let bind = |enabled: bool, family: Family| {
            if !enabled {
                return (None, None);
            }
            let unicast = logged(bind_unicast(family), family, "unicast");
            let multicast = logged(bind_multicast(family, iface), family, "multicast");
            (unicast, multicast)
        };

        let (v4, v6) = usable_pairs(bind(ipv4, Family::V4), bind(ipv6, Family::V6))?;

        let set = Self {
            v4: v4.map(|(u, m)| ProtocolPair::from_std(Family::V4, u, m)).transpose()?,
            v6: v6.map(|(u, m)| ProtocolPair::from_std(Family::V6, u, m)).transpose()?,
        };
        set.set_interface(iface)?;
        tracing::info!(
            "Opened mDNS sockets (ipv4: {}, ipv6: {})",
            set.uses(Family::V4),
            set.uses(Family::V6)
        );
        Ok(set)
    }

    pub(crate) fn from_pairs(v4: Option<ProtocolPair>, v6: Option<ProtocolPair>) -> Self {
        Self { v4, v6 }
    }

    pub(crate) fn uses(&self, family: Family) -> bool {
        match family {
            Family::V4 => self.v4.is_some(),
            Family::V6 => self.v6.is_some(),
        }
    }

    fn pairs(&self) -> impl Iterator<Item = &ProtocolPair> {
        self.v4.iter().chain(self.v6.iter())
    }

    /// Re-select the multicast interface on every open socket.
    /// Sockets stay open; `None` restores the system default.
    pub fn set_interface(&self, iface: Option<&MulticastInterface>) -> Result<()> {
        if let Some(pair) = &self.v4 {
            if let Some(iface) = iface.filter(|iface| iface.ipv4.is_none()) {
                tracing::warn!("Interface {} has no IPv4 address, using default for IPv4", iface.name);
            }
            let ip = multicast_ipv4(iface);
            for socket in [&pair.unicast, &pair.multicast] {
                SockRef::from(&**socket)
                    .set_multicast_if_v4(&ip)
                    .context("Failed to set IPv4 multicast interface")?;
            }
        }
        if let Some(pair) = &self.v6 {
            let index = multicast_index(iface);
            for socket in [&pair.unicast, &pair.multicast] {
                SockRef::from(&**socket)
                    .set_multicast_if_v6(index)
                    .context("Failed to set IPv6 multicast interface")?;
            }
        }
        Ok(())
    }

    /// Unicast sockets to write a query to, restricted to the given families
    pub(crate) fn query_targets(&self, ipv4: bool, ipv6: bool) -> Vec<QueryTarget> {
        self.pairs()
            .filter(|pair| match pair.family {
                Family::V4 => ipv4,
                Family::V6 => ipv6,
            })
            .map(|pair| QueryTarget {
                family: pair.family,
                socket: pair.unicast.clone(),
                destination: pair.destination,
            })
            .collect()
    }

    /// Every open socket with a label for logging
    pub(crate) fn sockets(&self) -> Vec<(String, Arc<UdpSocket>)> {
        self.pairs()
            .flat_map(|pair| {
                [
                    (format!("{} unicast", pair.family), pair.unicast.clone()),
                    (format!("{} multicast", pair.family), pair.multicast.clone()),
                ]
            })
            .collect()
    }
}

impl ProtocolPair {
    fn from_std(
        family: Family,
        unicast: std::net::UdpSocket,
        multicast: std::net::UdpSocket,
    ) -> Result<Self> {
        Ok(Self {
            family,
            unicast: Arc::new(
                UdpSocket::from_std(unicast).context("Failed to register unicast socket")?,
            ),
            multicast: Arc::new(
                UdpSocket::from_std(multicast).context("Failed to register multicast socket")?,
            ),
            destination: family.group(),
        })
    }
}

/// Keep a family only when both of its sockets are present.
pub(crate) fn usable_pairs<S>(
    v4: (Option<S>, Option<S>),
    v6: (Option<S>, Option<S>),
) -> Result<(Option<(S, S)>, Option<(S, S)>)> {
    let pair = |family: Family, sockets: (Option<S>, Option<S>)| match sockets {
        (Some(unicast), Some(multicast)) => Some((unicast, multicast)),
        (None, None) => None,
        _ => {
            tracing::info!("Failed to listen on both unicast and multicast for {}, disabling it", family);
            None
        }
    };

    let v4 = pair(Family::V4, v4);
    let v6 = pair(Family::V6, v6);
    if v4.is_none() && v6.is_none() {
        return Err(Error::NoUsableProtocol.into());
    }
    Ok((v4, v6))
}

fn logged<T>(result: io::Result<T>, family: Family, kind: &str) -> Option<T> {
    match result {
        Ok(socket) => Some(socket),
        Err(e) => {
            tracing::warn!("Failed to bind {} {} socket: {}", family, kind, e);
            None
        }
    }
}

fn bind_unicast(family: Family) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(family.domain(), Type::DGRAM, Some(Protocol::UDP))?;
    if family == Family::V6 {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&SockAddr::from(family.unspecified(0)))?;
    Ok(socket.into())
}

fn bind_multicast(family: Family, iface: Option<&MulticastInterface>) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(family.domain(), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;

    match family {
        Family::V4 => {
            // Binding the group address filters unrelated traffic, but only Linux allows it
            let ip = if cfg!(target_os = "linux") {
                MDNS_GROUP_V4
            } else {
                Ipv4Addr::UNSPECIFIED
            };
            socket.bind(&SockAddr::from(SocketAddr::new(IpAddr::V4(ip), MDNS_PORT)))?;
            socket.join_multicast_v4(&MDNS_GROUP_V4, &multicast_ipv4(iface))?;
        }
        Family::V6 => {
            socket.set_only_v6(true)?;
            socket.bind(&SockAddr::from(family.unspecified(MDNS_PORT)))?;
            socket.join_multicast_v6(&MDNS_GROUP_V6, multicast_index(iface))?;
        }
    }

    Ok(socket.into())
}

#[cfg(test)]
impl ProtocolPair {
    /// Two loopback sockets standing in for a family's unicast and multicast sockets
    pub(crate) async fn loopback(destination: SocketAddr) -> Self {
        let unicast = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let multicast = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self {
            family: Family::V4,
            unicast: Arc::new(unicast),
            multicast: Arc::new(multicast),
            destination,
        }
    }
}
