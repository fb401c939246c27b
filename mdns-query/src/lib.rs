//! Multicast DNS service discovery queries.
//!
//! A [`Client`] multicasts PTR queries for DNS-SD services, listens on
//! unicast and multicast sockets for both address families, and streams
//! [`ServiceEntry`] views that fill in as replies are assembled.

pub mod client;
pub mod config;
pub mod error;
pub mod mdns;

pub use client::{Client, ClientConfig, QueryParam};
pub use error::Error;
pub use mdns::correlator::{Completeness, EntryWatch};
pub use mdns::transport::MulticastInterface;
pub use shared::types::{ScopedIpv6, ServiceEntry};
