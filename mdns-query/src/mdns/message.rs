//! Adapter over the `dns-parser` codec.
//!
//! Incoming packets borrow the receive buffer, so they are converted into an
//! owned [`DnsMessage`] before leaving the reader task.
//!
//! The codec only accepts ASCII labels: a response naming a UTF-8 instance
//! fails to decode as a whole and is dropped by the reader.

use std::net::{Ipv4Addr, Ipv6Addr};
use anyhow::{Context, Result};
use dns_parser::{Builder, Packet, QueryClass, QueryType, RData, ResourceRecord};
use shared::protocol::trim_dot;
use crate::error::Error;

/// Longest label the codec accepts
const MAX_LABEL_LEN: usize = 62;

/// The record kinds the correlator understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    Pointer(String),
    Service { target: String, port: u16 },
    Text(Vec<String>),
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Owner name, without trailing dot
    pub name: String,
    pub kind: RecordKind,
}

impl Record {
    pub fn new(name: impl Into<String>, kind: RecordKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    fn from_resource(rr: &ResourceRecord<'_>) -> Option<Self> {
        let kind = match &rr.data {
            RData::PTR(ptr) => RecordKind::Pointer(ptr.0.to_string()),
            RData::SRV(srv) => RecordKind::Service {
                target: srv.target.to_string(),
                port: srv.port,
            },
            RData::TXT(txt) => RecordKind::Text(
                txt.iter()
                    .map(|segment| String::from_utf8_lossy(segment).into_owned())
                    .collect(),
            ),
            RData::A(a) => RecordKind::A(a.0),
            RData::AAAA(aaaa) => RecordKind::Aaaa(aaaa.0),
            _ => return None,
        };
        Some(Self::new(rr.name.to_string(), kind))
    }
}

/// A decoded DNS message, reduced to the sections the correlator reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsMessage {
    pub answers: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl DnsMessage {
    /// Answers followed by additional records, in wire order
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.answers.iter().chain(self.additionals.iter())
    }
}

pub fn decode(buf: &[u8]) -> Result<DnsMessage> {
    let packet = Packet::parse(buf).context("failed to parse mDNS packet")?;

    Ok(DnsMessage {
        answers: packet.answers.iter().filter_map(Record::from_resource).collect(),
        additionals: packet.additional.iter().filter_map(Record::from_resource).collect(),
    })
}

/// Encode a PTR question for `name`.
///
/// RFC 6762 section 18.12: the top bit of the question class asks responders
/// for a unicast reply; the codec sets it from `want_unicast`.
pub fn encode_query(name: &str, want_unicast: bool) -> Result<Vec<u8>> {
    let name = trim_dot(name);
    validate_name(name)?;

    let mut builder = Builder::new_query(0, false);
    builder.add_question(name, want_unicast, QueryType::PTR, QueryClass::IN);
    builder
        .build()
        .map_err(|_| Error::QueryTooLarge(name.to_string()).into())
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .split('.')
            .all(|label| !label.is_empty() && label.len() <= MAX_LABEL_LEN);
    if !valid {
        return Err(Error::InvalidName(name.to_string()).into());
    }
    Ok(())
}
