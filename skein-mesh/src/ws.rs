//! WebSocket transport.
//!
//! Each site runs one listener. A dialing site opens a WebSocket to the
//! target's peer id (its `ws://` URL), introduces itself with a hello frame
//! carrying its own peer id, and then uses the link to send. The accepting
//! side forwards every later text frame to the controller as a message from
//! that peer.
//!
//! ```text
//!  dialer                              listener
//!    │ connect_async(peer_id) ───────► │ accept_async
//!    │ {"hello":"ws://dialer"} ──────► │ Opened { dialer, Inbound }
//!    │ text frames ──────────────────► │ Message { dialer, text }
//! ```
//!
//! Every link gets a fresh id when it starts. A peer has at most one link per
//! direction, so a re-dial or a second hello replaces the older link. The
//! replaced link winds down without reporting `Opened` or `Closed`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::config::MeshConfig;
use crate::error::MeshError;
use crate::protocol::PeerId;
use crate::transport::{Direction, Transport, TransportEvent};

type LinkId = u64;

static NEXT_LINK: AtomicU64 = AtomicU64::new(1);

fn next_link() -> LinkId {
    NEXT_LINK.fetch_add(1, Ordering::Relaxed)
}

/// Current link per peer, tagged with the id of the task that owns it.
type Links<T> = Arc<Mutex<FxHashMap<PeerId, (LinkId, T)>>>;
type InboundClosers = Links<oneshot::Sender<()>>;
type OutboundQueues = Links<mpsc::Sender<String>>;

/// Whether `link` may report on `peer`: it is the current link, or there
/// is no current link at all because it was dropped on purpose.
fn is_current<T>(links: &Links<T>, peer: &PeerId, link: LinkId) -> bool {
    links
        .lock()
        .map(|links| links.get(peer).map_or(true, |(current, _)| *current == link))
        .unwrap_or(true)
}

/// Forgets `peer`'s link if `link` is still the current one. Returns `false`
/// when a newer link has replaced it.
fn retire<T>(links: &Links<T>, peer: &PeerId, link: LinkId) -> bool {
    let Ok(mut links) = links.lock() else {
        return true;
    };
    match links.get(peer) {
        Some((current, _)) if *current != link => false,
        Some(_) => {
            links.remove(peer);
            true
        }
        None => true,
    }
}

/// First frame on every outbound link.
#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    hello: PeerId,
}

pub struct WsTransport {
    local_peer: PeerId,
    local_addr: SocketAddr,
    outbound: OutboundQueues,
    inbound: InboundClosers,
    events: mpsc::Sender<TransportEvent>,
    channel_capacity: usize,
    connect_timeout: Duration,
    accept_task: JoinHandle<()>,
}

impl WsTransport {
    /// Binds the listener and starts accepting links. Events for both
    /// directions are sent to `events`.
    pub async fn bind(
        config: &MeshConfig,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<Self, MeshError> {
        let listener = TcpListener::bind(&config.listen_addr)
            .await
            .map_err(|e| MeshError::Transport(format!("bind {}: {e}", config.listen_addr)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| MeshError::Transport(e.to_string()))?;
        let local_peer = config.advertised_peer_id(local_addr);
        info!("listening on {local_addr} as {local_peer}");

        let inbound = InboundClosers::default();
        let accept_task = tokio::spawn(accept_loop(listener, events.clone(), inbound.clone()));

        Ok(Self {
            local_peer,
            local_addr,
            outbound: OutboundQueues::default(),
            inbound,
            events,
            channel_capacity: config.channel_capacity,
            connect_timeout: config.connect_timeout(),
            accept_task,
        })
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and drops every link.
    pub fn close(&mut self) {
        self.accept_task.abort();
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.clear();
        }
        if let Ok(mut inbound) = self.inbound.lock() {
            for (_, (_, closer)) in inbound.drain() {
                let _ = closer.send(());
            }
        }
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, peer: &PeerId) {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let link = next_link();
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.insert(peer.clone(), (link, tx));
        }
        tokio::spawn(run_outbound(
            OutboundLink {
                peer: peer.clone(),
                link,
                links: self.outbound.clone(),
            },
            self.local_peer.clone(),
            rx,
            self.events.clone(),
            self.connect_timeout,
        ));
    }

    fn send(&mut self, peer: &PeerId, text: String) -> Result<(), MeshError> {
        let mut outbound = self
            .outbound
            .lock()
            .map_err(|_| MeshError::Transport("outbound links poisoned".into()))?;
        let Some((_, tx)) = outbound.get(peer) else {
            return Err(MeshError::NotConnected(peer.clone()));
        };
        match tx.try_send(text) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(MeshError::Transport(format!("send queue to {peer} is full")))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                outbound.remove(peer);
                Err(MeshError::NotConnected(peer.clone()))
            }
        }
    }

    fn disconnect(&mut self, peer: &PeerId) {
        // Dropping the sender ends the writer, which closes the socket.
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.remove(peer);
        }
        if let Ok(mut inbound) = self.inbound.lock() {
            if let Some((_, closer)) = inbound.remove(peer) {
                let _ = closer.send(());
            }
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::Sender<TransportEvent>,
    inbound: InboundClosers,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("accept failed: {e}");
                continue;
            }
        };
        debug!("new TCP connection from {addr}");

        let events = events.clone();
        let inbound = inbound.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_inbound(stream, events, inbound).await {
                error!("inbound link from {addr} failed: {e}");
            }
        });
    }
}

async fn handle_inbound(
    stream: TcpStream,
    events: mpsc::Sender<TransportEvent>,
    inbound: InboundClosers,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (_ws_sender, mut ws_receiver) = ws_stream.split();

    let peer = loop {
        match ws_receiver.next().await {
            Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<Hello>(text.as_str()) {
                Ok(hello) => break hello.hello,
                Err(_) => {
                    warn!("inbound link opened without a hello frame");
                    return Ok(());
                }
            },
            Some(Ok(WsMessage::Close(_))) | None => return Ok(()),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e),
        }
    };

    let link = next_link();
    let (close_tx, mut close_rx) = oneshot::channel();
    if let Ok(mut closers) = inbound.lock() {
        // Dropping a replaced closer ends that link's task.
        closers.insert(peer.clone(), (link, close_tx));
    }
    let opened = TransportEvent::Opened {
        peer: peer.clone(),
        direction: Direction::Inbound,
    };
    if events.send(opened).await.is_err() {
        return Ok(());
    }

    loop {
        tokio::select! {
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let msg = TransportEvent::Message {
                        peer: peer.clone(),
                        text: text.as_str().to_owned(),
                    };
                    if events.send(msg).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("inbound link from {peer} errored: {e}");
                    break;
                }
            },
            _ = &mut close_rx => break,
        }
    }

    if !retire(&inbound, &peer, link) {
        debug!("inbound link {link} from {peer} replaced");
        return Ok(());
    }
    let _ = events
        .send(TransportEvent::Closed {
            peer,
            direction: Direction::Inbound,
        })
        .await;
    Ok(())
}

/// Identity of one outbound link task.
struct OutboundLink {
    peer: PeerId,
    link: LinkId,
    links: OutboundQueues,
}

impl OutboundLink {
    /// Reports the link as closed unless a newer link replaced it.
    async fn report_closed(&self, events: &mpsc::Sender<TransportEvent>) {
        if !retire(&self.links, &self.peer, self.link) {
            debug!("outbound link {} to {} replaced", self.link, self.peer);
            return;
        }
        let closed = TransportEvent::Closed {
            peer: self.peer.clone(),
            direction: Direction::Outbound,
        };
        let _ = events.send(closed).await;
    }
}

async fn run_outbound(
    this: OutboundLink,
    local_peer: PeerId,
    mut outgoing: mpsc::Receiver<String>,
    events: mpsc::Sender<TransportEvent>,
    connect_timeout: Duration,
) {
    let peer = &this.peer;
    let ws_stream = match tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(peer.as_str())).await {
        Ok(Ok((ws_stream, _))) => ws_stream,
        Ok(Err(e)) => {
            warn!("dialing {peer} failed: {e}");
            this.report_closed(&events).await;
            return;
        }
        Err(_) => {
            warn!("dialing {peer} timed out");
            this.report_closed(&events).await;
            return;
        }
    };
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let hello = match serde_json::to_string(&Hello { hello: local_peer }) {
        Ok(hello) => hello,
        Err(e) => {
            error!("failed to encode hello: {e}");
            this.report_closed(&events).await;
            return;
        }
    };
    if ws_sender.send(WsMessage::Text(hello.into())).await.is_err() {
        this.report_closed(&events).await;
        return;
    }
    if !is_current(&this.links, peer, this.link) {
        debug!("outbound link {} to {peer} replaced before opening", this.link);
        let _ = ws_sender.send(WsMessage::Close(None)).await;
        return;
    }
    let opened = TransportEvent::Opened {
        peer: peer.clone(),
        direction: Direction::Outbound,
    };
    if events.send(opened).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            text = outgoing.recv() => match text {
                Some(text) => {
                    if let Err(e) = ws_sender.send(WsMessage::Text(text.into())).await {
                        error!("send to {peer} failed: {e}");
                        break;
                    }
                }
                None => {
                    let _ = ws_sender.send(WsMessage::Close(None)).await;
                    break;
                }
            },
            frame = ws_receiver.next() => match frame {
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("outbound link to {peer} errored: {e}");
                    break;
                }
            },
        }
    }

    debug!("outbound link to {peer} finished");
    this.report_closed(&events).await;
}
