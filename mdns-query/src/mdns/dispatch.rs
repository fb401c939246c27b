use anyhow::{Context, Result};
use shared::protocol::service_address;
use crate::client::QueryParam;
use crate::error::Error;
use crate::mdns::message;
use crate::mdns::transport::QueryTarget;

/// Encode a PTR query for `name` and write it to every target.
/// The first failed write aborts the rest.
pub(crate) async fn send_query(targets: &[QueryTarget], name: &str, want_unicast: bool) -> Result<()> {
    let packet = message::encode_query(name, want_unicast)?;

    for target in targets {
        target
            .socket
            .send_to(&packet, target.destination)
            .await
            .with_context(|| format!("Failed to send query for {} over {}", name, target.family))?;
    }

    Ok(())
}

/// Send the browse query described by `param`
pub(crate) async fn dispatch(targets: &[QueryTarget], param: &QueryParam) -> Result<()> {
    let name = service_address(&param.service, &param.domain);
    if targets.is_empty() {
        return Err(Error::NoQuerySocket(name).into());
    }

    tracing::debug!(
        "Querying {} on {} socket(s), unicast response {}",
        name,
        targets.len(),
        param.want_unicast_response
    );
    send_query(targets, &name, param.want_unicast_response).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use dns_parser::{Packet, QueryType};
    use tokio::net::UdpSocket;
    use crate::mdns::transport::Family;

    async fn target_for(responder: &UdpSocket) -> QueryTarget {
        QueryTarget {
            family: Family::V4,
            socket: Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap()),
            destination: responder.local_addr().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_writes_ptr_question() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = target_for(&responder).await;

        let mut param = QueryParam::new("_http._tcp");
        param.want_unicast_response = true;
        dispatch(&[target], &param).await.unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), responder.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let packet = Packet::parse(&buf[..len]).unwrap();
        assert!(!packet.header.recursion_desired);
        assert_eq!(packet.questions[0].qname.to_string(), "_http._tcp.local");
        assert_eq!(packet.questions[0].qtype, QueryType::PTR);
        assert!(packet.questions[0].prefer_unicast);
    }

    #[tokio::test]
    async fn test_dispatch_without_sockets_fails() {
        let err = dispatch(&[], &QueryParam::new("_http._tcp")).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<Error>(),
            Some(&Error::NoQuerySocket("_http._tcp.local".to_string()))
        );
    }

    #[tokio::test]
    async fn test_write_failure_aborts_dispatch() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut broken = target_for(&responder).await;
        // An IPv4 socket cannot send to an IPv6 destination
        broken.destination = "[::1]:5353".parse().unwrap();
        let good = target_for(&responder).await;

        assert!(dispatch(&[broken, good], &QueryParam::new("_http._tcp")).await.is_err());

        let mut buf = [0u8; 512];
        let received = tokio::time::timeout(Duration::from_millis(200), responder.recv_from(&mut buf)).await;
        assert!(received.is_err(), "no query should follow a failed write");
    }
}
