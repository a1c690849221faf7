//! UDP receive loop.
//!
//! One task owns the socket and handles one datagram at a time: decode,
//! record write, rule evaluation and alert writes all finish before the next
//! `recv_from`. There is no application-side queue, so a slow store stalls
//! reception and the kernel socket buffer absorbs (or drops) the backlog.
//! Shutdown is only observed between datagrams.

use crate::pipeline::{IngestCounters, IngestStats, Pipeline};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to bind UDP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Signals a running listener to stop after its current datagram.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct IngestListener {
    socket: UdpSocket,
    local_addr: SocketAddr,
    pipeline: Pipeline,
    counters: Arc<IngestCounters>,
    max_datagram_bytes: usize,
    shutdown: ShutdownHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl IngestListener {
    pub async fn bind(
        addr: SocketAddr,
        pipeline: Pipeline,
        max_datagram_bytes: usize,
    ) -> Result<Self, IngestError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| IngestError::Bind { addr, source })?;
        let local_addr = socket.local_addr()?;
        let (tx, shutdown_rx) = watch::channel(false);

        info!(%local_addr, "UDP listener bound");

        Ok(Self {
            socket,
            local_addr,
            counters: pipeline.counters(),
            pipeline,
            max_datagram_bytes: max_datagram_bytes.max(1),
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }

    /// Receive until shutdown. Returns the final counters; the socket is
    /// released when this returns.
    pub async fn run(mut self) -> Result<IngestStats, IngestError> {
        let mut buf = vec![0u8; self.max_datagram_bytes];
        info!(local_addr = %self.local_addr, "listening for housekeeping frames");

        loop {
            if *self.shutdown_rx.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;

                // The sender lives in `self.shutdown`, so this only fires on a real signal
                _ = self.shutdown_rx.changed() => continue,
                received = self.socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            if len == buf.len() {
                                debug!(%peer, len, "datagram filled the receive buffer, may be truncated");
                            }
                            self.pipeline.process(&buf[..len], peer).await;
                        }
                        Err(e) => {
                            // ICMP errors surface here on some platforms; keep serving
                            warn!(error = %e, "receive failed");
                        }
                    }
                }
            }
        }

        let stats = self.counters.snapshot();
        info!(
            received = stats.received,
            decoded = stats.decoded,
            ingested = stats.ingested,
            dropped = stats.dropped.total(),
            alerts = stats.alerts_created,
            "UDP listener stopped"
        );
        Ok(stats)
    }
}
