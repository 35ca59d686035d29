//! A running site: WebSocket transport plus one controller task.
//!
//! The controller lives on a single task. Transport events and commands from
//! [`NodeHandle`] are interleaved by one `select!` loop, so every mutation of
//! the document, clocks and membership happens in sequence.

use log::{error, info};
use skein_crdt::{new_site_id, LineCol, Replica, SiteId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::MeshConfig;
use crate::controller::Controller;
use crate::editor::{Editor, PeerList};
use crate::error::MeshError;
use crate::membership::NetworkMember;
use crate::protocol::PeerId;
use crate::transport::TransportEvent;
use crate::ws::WsTransport;

type Reply<T> = oneshot::Sender<T>;

/// Requests from the hosting application to the node task.
#[derive(Debug)]
pub enum Command {
    Insert {
        text: String,
        at: LineCol,
        reply: Reply<Result<(), MeshError>>,
    },
    Delete {
        start: LineCol,
        end: LineCol,
        reply: Reply<Result<(), MeshError>>,
    },
    Connect {
        peer: PeerId,
        reply: Reply<Result<(), MeshError>>,
    },
    Text {
        reply: Reply<String>,
    },
    Members {
        reply: Reply<Vec<NetworkMember>>,
    },
    Shutdown,
}

/// Cloneable handle to a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    peer_id: PeerId,
    site_id: SiteId,
    commands: mpsc::Sender<Command>,
}

impl NodeHandle {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn site_id(&self) -> SiteId {
        self.site_id
    }

    pub async fn insert(&self, text: impl Into<String>, at: LineCol) -> Result<(), MeshError> {
        let text = text.into();
        self.request(|reply| Command::Insert { text, at, reply }).await?
    }

    pub async fn delete(&self, start: LineCol, end: LineCol) -> Result<(), MeshError> {
        self.request(|reply| Command::Delete { start, end, reply }).await?
    }

    pub async fn connect(&self, peer: impl Into<PeerId>) -> Result<(), MeshError> {
        let peer = peer.into();
        self.request(|reply| Command::Connect { peer, reply }).await?
    }

    pub async fn text(&self) -> Result<String, MeshError> {
        self.request(|reply| Command::Text { reply }).await
    }

    pub async fn members(&self) -> Result<Vec<NetworkMember>, MeshError> {
        self.request(|reply| Command::Members { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), MeshError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| MeshError::Shutdown)
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| MeshError::Shutdown)?;
        rx.await.map_err(|_| MeshError::Shutdown)
    }
}

/// Starts a site on the configured address and joins `target` if given.
///
/// Returns once the listener is bound; the node runs until
/// [`NodeHandle::shutdown`] or until every handle is dropped.
pub async fn spawn<E, P>(
    config: MeshConfig,
    editor: E,
    peers: P,
    target: Option<PeerId>,
) -> Result<(NodeHandle, JoinHandle<()>), MeshError>
where
    E: Editor + Send + 'static,
    P: PeerList + Send + 'static,
{
    let (event_tx, event_rx) = mpsc::channel(config.channel_capacity);
    let (command_tx, command_rx) = mpsc::channel(config.channel_capacity);

    let transport = WsTransport::bind(&config, event_tx).await?;
    let peer_id = transport.local_peer().clone();
    let site_id = new_site_id();

    let mut controller = Controller::new(
        peer_id.clone(),
        Replica::new(site_id),
        &config,
        transport,
        editor,
        peers,
    );
    controller.start(target)?;

    let task = tokio::spawn(run(controller, event_rx, command_rx));
    let handle = NodeHandle {
        peer_id,
        site_id,
        commands: command_tx,
    };
    Ok((handle, task))
}

async fn run<E: Editor, P: PeerList>(
    mut controller: Controller<WsTransport, E, P>,
    mut events: mpsc::Receiver<TransportEvent>,
    mut commands: mpsc::Receiver<Command>,
) {
    loop {
        tokio::select! {
            Some(event) = events.recv() => controller.handle_event(event),
            command = commands.recv() => match command {
                Some(Command::Shutdown) | None => break,
                Some(command) => handle_command(&mut controller, command),
            },
        }
    }

    controller.shutdown();
    controller.transport_mut().close();
    info!("node {} stopped", controller.peer_id());
}

fn handle_command<E: Editor, P: PeerList>(
    controller: &mut Controller<WsTransport, E, P>,
    command: Command,
) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::Insert { text, at, reply } => {
            let _ = reply.send(controller.local_insert(&text, at));
        }
        Command::Delete { start, end, reply } => {
            let _ = reply.send(controller.local_delete(start, end));
        }
        Command::Connect { peer, reply } => {
            let result = controller.connect(peer);
            if let Err(e) = &result {
                error!("connect failed: {e}");
            }
            let _ = reply.send(result);
        }
        Command::Text { reply } => {
            let _ = reply.send(controller.text());
        }
        Command::Members { reply } => {
            let _ = reply.send(controller.network().members().to_vec());
        }
        Command::Shutdown => {}
    }
}
