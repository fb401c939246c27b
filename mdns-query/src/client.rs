//! Query client: owns the sockets, the reader tasks and the close-once flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use anyhow::Result;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use shared::protocol::DEFAULT_DOMAIN;
use crate::error::Error;
use crate::mdns::correlator::{Completeness, Correlator, EntryWatch};
use crate::mdns::dispatch;
use crate::mdns::reader::{run_reader, Inbound, ReaderContext};
use crate::mdns::transport::{EndpointSet, MulticastInterface, QueryTarget};

/// How long a query listens when its parameters don't say
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Decoded messages buffered between the readers and the correlator
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// One service lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    /// Service to look up, e.g. "_http._tcp"
    pub service: String,
    /// Lookup domain, "local" when empty
    pub domain: String,
    /// How long to listen for answers; zero means the default
    pub timeout: Duration,
    /// Multicast interface to send this query on
    pub interface: Option<String>,
    /// Ask responders to reply unicast (RFC 6762 section 5.4)
    pub want_unicast_response: bool,
    /// Don't send over IPv4. Does not affect discovered addresses.
    pub disable_ipv4: bool,
    /// Don't send over IPv6. Does not affect discovered addresses.
    pub disable_ipv6: bool,
}

impl QueryParam {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            domain: DEFAULT_DOMAIN.to_string(),
            timeout: DEFAULT_TIMEOUT,
            interface: None,
            want_unicast_response: false,
            disable_ipv4: false,
            disable_ipv6: false,
        }
    }

    /// Fill in an empty domain and a zero timeout
    pub fn with_defaults(mut self) -> Self {
        if self.domain.is_empty() {
            self.domain = DEFAULT_DOMAIN.to_string();
        }
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub ipv4: bool,
    pub ipv6: bool,
    /// Interface name for multicast traffic, system default when unset
    pub interface: Option<String>,
    pub completeness: Completeness,
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ipv4: true,
            ipv6: true,
            interface: None,
            completeness: Completeness::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// An mDNS query client.
///
/// Construction opens the sockets and starts one reader task per socket.
/// [`Client::close`] is safe to call from several tasks at once; only the
/// first call does anything. Dropping the client closes it.
pub struct Client {
    endpoints: Mutex<Option<EndpointSet>>,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
    inbound: flume::Receiver<Inbound>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    completeness: Completeness,
}

impl Client {
    /// Open sockets and start the readers. Must run inside a Tokio runtime.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let iface = config
            .interface
            .as_deref()
            .map(MulticastInterface::by_name)
            .transpose()?;
        let endpoints = EndpointSet::open(config.ipv4, config.ipv6, iface.as_ref())?;

        Ok(Self::from_endpoints(endpoints, config))
    }

    pub(crate) fn from_endpoints(endpoints: EndpointSet, config: &ClientConfig) -> Self {
        let (queue, inbound) = flume::bounded(config.queue_capacity.max(1));
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        let ctx = ReaderContext {
            queue,
            closed: closed.clone(),
            shutdown: shutdown.clone(),
        };
        let readers = endpoints
            .sockets()
            .into_iter()
            .map(|(label, socket)| tokio::spawn(run_reader(label, socket, ctx.clone())))
            .collect();

        Self {
            endpoints: Mutex::new(Some(endpoints)),
            closed,
            shutdown,
            inbound,
            readers: Mutex::new(readers),
            completeness: config.completeness,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Re-select the multicast interface without reopening sockets
    pub fn set_interface(&self, iface: Option<&MulticastInterface>) -> Result<()> {
        let endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        match endpoints.as_ref() {
            Some(endpoints) => endpoints.set_interface(iface),
            None => Err(Error::Closed.into()),
        }
    }

    fn query_targets(&self, ipv4: bool, ipv6: bool) -> Result<Vec<QueryTarget>> {
        let endpoints = self.endpoints.lock().unwrap_or_else(PoisonError::into_inner);
        match endpoints.as_ref() {
            Some(endpoints) => Ok(endpoints.query_targets(ipv4, ipv6)),
            None => Err(Error::Closed.into()),
        }
    }

    /// Send one query per parameter set, then stream completed entries to
    /// `output` until the longest timeout among `params` elapses.
    ///
    /// Each entry is sent once, as a view that keeps receiving records merged
    /// into it later in the window. Sends to `output` never block: entries
    /// the consumer is not ready for are dropped. Returns early only on a
    /// dispatch error.
    pub async fn query(&self, params: &[QueryParam], output: &mpsc::Sender<EntryWatch>) -> Result<()> {
        self.query_with_cancel(params, output, CancellationToken::new()).await
    }

    /// Like [`Client::query`], but cancelling `cancel` closes the client and
    /// ends the query.
    pub async fn query_with_cancel(
        &self,
        params: &[QueryParam],
        output: &mpsc::Sender<EntryWatch>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed.into());
        }

        let params: Vec<QueryParam> = params.iter().cloned().map(QueryParam::with_defaults).collect();

        for param in &params {
            if cancel.is_cancelled() {
                tracing::info!("Query cancelled before dispatch");
                self.close();
                return Ok(());
            }
            if let Some(name) = &param.interface {
                let iface = MulticastInterface::by_name(name)?;
                self.set_interface(Some(&iface))?;
            }
            let targets = self.query_targets(!param.disable_ipv4, !param.disable_ipv6)?;
            dispatch::dispatch(&targets, param).await?;
        }

        let window = params.iter().map(|param| param.timeout).max().unwrap_or(DEFAULT_TIMEOUT);
        let deadline = Instant::now() + window;
        let targets = self.query_targets(true, true)?;
        let mut correlator = Correlator::new(self.completeness, output.clone());

        tokio::select! {
            _ = correlator.run(&self.inbound, deadline, &self.shutdown, &targets) => {}
            _ = cancel.cancelled() => {
                tracing::info!("Query cancelled");
                self.close();
            }
        }

        tracing::debug!("Query finished with {} entries seen", correlator.table().len());
        Ok(())
    }

    /// Close the client. Only the first call has any effect.
    pub fn close(&self) {
        self.close_once();
    }

    /// Returns whether this call performed the close
    fn close_once(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        tracing::info!("Closing mDNS client");
        self.shutdown.cancel();
        let endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(endpoints);
        true
    }

    /// Close and wait for every reader task to exit
    pub async fn shutdown(&self) {
        self.close();

        let readers = std::mem::take(&mut *self.readers.lock().unwrap_or_else(PoisonError::into_inner));
        for result in join_all(readers).await {
            if let Err(e) = result {
                tracing::warn!("Reader task failed: {}", e);
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
