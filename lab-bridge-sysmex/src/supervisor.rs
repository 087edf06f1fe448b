//! Connection supervision: dual client/server TCP modes, reconnect with
//! exponential backoff, and ownership of the per-connection exchange loop.

use crate::{
    coordinator::{LinkHealth, OutboundRequest, TransactionCoordinator},
    protocol::{
        record::split_lines,
        session::{AstmLink, IdleEvent},
        ProtocolError,
    },
    types::{AnalyzerConfig, LinkConnectionState},
};
use backoff::backoff::Backoff;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::{mpsc, watch},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Deadline for one TCP connect attempt in client mode.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Supervises the analyzer link for one driver instance.
///
/// The supervisor task owns the outbound-request receiver and lends it to
/// each connection loop in turn; a loop ends on transport failure or
/// cancellation, and in client mode the supervisor then reconnects with
/// exponential backoff (reset after every successful connect).
pub struct LinkSupervisor {
    config: Arc<AnalyzerConfig>,
    coordinator: Arc<TransactionCoordinator>,
    listening: Arc<AtomicBool>,
    health: Arc<LinkHealth>,
    cancel: CancellationToken,
    state_tx: watch::Sender<LinkConnectionState>,
    outbound_rx: mpsc::Receiver<OutboundRequest>,
}

impl LinkSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<AnalyzerConfig>,
        coordinator: Arc<TransactionCoordinator>,
        listening: Arc<AtomicBool>,
        health: Arc<LinkHealth>,
        cancel: CancellationToken,
        state_tx: watch::Sender<LinkConnectionState>,
        outbound_rx: mpsc::Receiver<OutboundRequest>,
    ) -> Self {
        Self {
            config,
            coordinator,
            listening,
            health,
            cancel,
            state_tx,
            outbound_rx,
        }
    }

    fn publish(&self, state: LinkConnectionState) {
        let _ = self.state_tx.send(state);
    }

    /// Client mode: dial the analyzer, run the exchange loop until the
    /// connection dies, back off, reconnect.
    pub async fn run_client(mut self) {
        let addr = self.config.analyzer_addr();
        let mut backoff = self.config.connection_policy.build_backoff();

        while self.listening.load(Ordering::Acquire) && !self.cancel.is_cancelled() {
            self.publish(LinkConnectionState::Connecting);

            let connect = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr));
            match connect.await {
                Ok(Ok(stream)) => {
                    info!(addr = %addr, "connected to analyzer");
                    stream.set_nodelay(true).ok();
                    backoff.reset();
                    self.connection_loop(stream).await;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    warn!(addr = %addr, "analyzer connection ended, will reconnect");
                    self.publish(LinkConnectionState::Reconnecting);
                }
                Ok(Err(e)) => {
                    warn!(addr = %addr, error = %e, "analyzer connect failed");
                    self.publish(LinkConnectionState::Failed(e.to_string()));
                }
                Err(_) => {
                    warn!(addr = %addr, "analyzer connect timed out");
                    self.publish(LinkConnectionState::Failed("connect timeout".to_string()));
                }
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| self.config.connection_policy.max_interval());
            debug!(delay_ms = delay.as_millis() as u64, "reconnect backoff");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.publish(LinkConnectionState::Disconnected);
    }

    /// Server mode: accept analyzer connections one at a time on an
    /// already-bound listener and run the exchange loop for each.
    pub async fn run_server(mut self, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(peer = %peer, "accepted analyzer connection");
                        stream.set_nodelay(true).ok();
                        self.connection_loop(stream).await;
                        info!(peer = %peer, "analyzer connection closed");
                        self.publish(LinkConnectionState::Disconnected);
                        if self.cancel.is_cancelled() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                },
            }
        }
        // Dropping the listener here releases the port for a future bind.
        self.publish(LinkConnectionState::Disconnected);
    }

    /// Exchange loop for one established transport.
    ///
    /// The link is half-duplex: while idle we wait for either an inbound
    /// ENQ or an outbound request (a LAB-28 order, or a reply produced by
    /// a previous exchange). A reception in progress always completes
    /// before anything is transmitted, which is the receiver-wins
    /// simplification of E1381 contention.
    async fn connection_loop<T>(&mut self, io: T)
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut link = AstmLink::new(io);
        // Health goes up before the Connected state is observable, so a
        // caller that saw Connected can immediately queue an order.
        self.health.set(true);
        self.publish(LinkConnectionState::Connected);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,

                request = self.outbound_rx.recv() => match request {
                    Some(request) => {
                        let result = link.send_message(&request.records).await;
                        let fatal = matches!(
                            &result,
                            Err(ProtocolError::Io(_)) | Err(ProtocolError::ConnectionClosed)
                        );
                        let _ = request.reply.send(result);
                        if fatal {
                            break;
                        }
                    }
                    // Driver dropped; nothing left to serve.
                    None => break,
                },

                event = link.wait_idle() => match event {
                    Ok(IdleEvent::Enq) => {
                        if let Err(e) = Self::run_exchange(&self.coordinator, &mut link).await {
                            warn!(error = %e, "exchange failed, closing connection");
                            break;
                        }
                    }
                    Ok(IdleEvent::Timeout) | Ok(IdleEvent::Noise(_)) => {}
                    Ok(IdleEvent::Eof) => {
                        info!("peer closed the analyzer connection");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "link error while idle, closing connection");
                        break;
                    }
                },
            }
        }

        self.health.set(false);
        // The transport drops here, closing the socket and unblocking any
        // reads still in flight on the peer side.
    }

    /// One complete inbound exchange: ACK the ENQ, assemble the message,
    /// dispatch it, and transmit the reply with the sender protocol.
    ///
    /// Errors returned from here are transport-fatal; protocol-level send
    /// failures (establishment refused, retries exhausted) leave the
    /// connection open for the next exchange.
    async fn run_exchange<T>(
        coordinator: &TransactionCoordinator,
        link: &mut AstmLink<T>,
    ) -> Result<(), ProtocolError>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        link.accept_enq().await?;
        let message = link.receive_message().await?;
        if message.is_empty() {
            warn!("empty ASTM message received, ignoring");
            return Ok(());
        }
        debug!(bytes = message.len(), "assembled ASTM message");

        let Some(reply) = coordinator.handle_incoming(&message).await else {
            return Ok(());
        };

        let records: Vec<String> = split_lines(&reply)
            .into_iter()
            .map(str::to_string)
            .collect();
        match link.send_message(&records).await {
            Ok(()) => Ok(()),
            Err(e @ (ProtocolError::Io(_) | ProtocolError::ConnectionClosed)) => Err(e),
            Err(e) => {
                warn!(error = %e, "reply transmission failed at the link layer");
                Ok(())
            }
        }
    }
}
