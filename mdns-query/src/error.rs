use thiserror::Error;

/// Classified failures surfaced by the query engine.
///
/// Public functions return `anyhow::Result`; callers that need to tell these
/// apart can `downcast_ref::<Error>()`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("at least one of IPv4 and IPv6 must be enabled for querying")]
    NoProtocolEnabled,

    #[error("failed to bind both unicast and multicast sockets for any protocol")]
    NoUsableProtocol,

    #[error("network interface {0:?} not found")]
    InterfaceNotFound(String),

    #[error("invalid DNS name {0:?}")]
    InvalidName(String),

    #[error("no open unicast socket left to send query for {0:?}")]
    NoQuerySocket(String),

    #[error("query for {0:?} does not fit in a single DNS message")]
    QueryTooLarge(String),

    #[error("client is closed")]
    Closed,
}
