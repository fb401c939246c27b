use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use crate::mdns::message::{self, DnsMessage};

/// Large enough for any mDNS datagram
pub const MAX_PACKET_SIZE: usize = 65536;

/// A decoded message and the address it arrived from
#[derive(Debug, Clone)]
pub struct Inbound {
    pub message: DnsMessage,
    pub source: SocketAddr,
}

/// Shared state a reader watches to know when to stop
#[derive(Clone)]
pub(crate) struct ReaderContext {
    pub(crate) queue: flume::Sender<Inbound>,
    pub(crate) closed: Arc<AtomicBool>,
    pub(crate) shutdown: CancellationToken,
}

/// Read datagrams from `socket` until the client closes, pushing decoded
/// messages onto the shared queue.
///
/// Read and decode failures are logged and skipped. A push that is still
/// waiting for queue space when shutdown fires is abandoned.
pub(crate) async fn run_reader(label: String, socket: Arc<UdpSocket>, ctx: ReaderContext) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE];

    while !ctx.closed.load(Ordering::Acquire) {
        let result = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            result = socket.recv_from(&mut buf) => result,
        };

        if ctx.closed.load(Ordering::Acquire) {
            break;
        }

        let (len, source) = match result {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!("Failed to read packet on {}: {}", label, e);
                continue;
            }
        };

        let message = match message::decode(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("Failed to unpack packet from {} on {}: {:#}", source, label, e);
                continue;
            }
        };

        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            sent = ctx.queue.send_async(Inbound { message, source }) => {
                if sent.is_err() {
                    tracing::debug!("Message queue closed, stopping {} reader", label);
                    break;
                }
            }
        }
    }

    tracing::debug!("{} reader stopped", label);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::mdns::message::{Record, RecordKind};
    use crate::mdns::testing::encode_response;

    async fn spawn_reader(capacity: usize) -> (SocketAddr, flume::Receiver<Inbound>, ReaderContext, tokio::task::JoinHandle<()>) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let (tx, rx) = flume::bounded(capacity);
        let ctx = ReaderContext {
            queue: tx,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
        };
        let handle = tokio::spawn(run_reader("test".to_string(), socket, ctx.clone()));
        (addr, rx, ctx, handle)
    }

    #[tokio::test]
    async fn test_reader_skips_bad_packets() {
        let (addr, rx, ctx, handle) = spawn_reader(4).await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        sender.send_to(b"not dns", addr).await.unwrap();
        let packet = encode_response(&[Record::new("host.local", RecordKind::A([10, 0, 0, 1].into()))], &[]);
        sender.send_to(&packet, addr).await.unwrap();

        let inbound = tokio::time::timeout(Duration::from_secs(2), rx.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inbound.source, sender.local_addr().unwrap());
        assert_eq!(inbound.message.answers.len(), 1);

        ctx.closed.store(true, Ordering::Release);
        ctx.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reader_abandons_blocked_push_on_shutdown() {
        let (addr, rx, ctx, handle) = spawn_reader(1).await;
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let packet = encode_response(&[Record::new("host.local", RecordKind::A([10, 0, 0, 1].into()))], &[]);

        // Fill the queue, then leave a second push waiting for space
        sender.send_to(&packet, addr).await.unwrap();
        sender.send_to(&packet, addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(rx.len(), 1);

        ctx.closed.store(true, Ordering::Release);
        ctx.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(rx.len(), 1);
    }
}
