use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use serde::{Serialize, Deserialize};

/// An IPv6 address together with the scope (interface index) it was seen on.
/// Link-local addresses are only routable when qualified with a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedIpv6 {
    pub ip: Ipv6Addr,

    /// Interface index, only set for link-local addresses
    pub scope_id: Option<u32>,
}

/// A service instance discovered by an mDNS query.
/// Fields are filled in as PTR, SRV, TXT, A and AAAA records arrive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Full record name, e.g. "node1._http._tcp.local"
    pub name: String,

    /// SRV target host, e.g. "node1.local"
    pub host: String,

    /// SRV port
    pub port: u16,

    pub addr_v4: Option<Ipv4Addr>,

    pub addr_v6: Option<ScopedIpv6>,

    /// Most recently seen address of either family
    pub addr: Option<IpAddr>,

    /// TXT segments joined with `|`
    pub info: String,

    /// Raw TXT segments in wire order
    pub info_fields: Vec<String>,

    /// Address the last reply for this entry came from
    pub source_ip: Option<IpAddr>,
}

impl ServiceEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True once either an A or AAAA record has been applied
    pub fn has_address(&self) -> bool {
        self.addr_v4.is_some() || self.addr_v6.is_some() || self.addr.is_some()
    }
}
