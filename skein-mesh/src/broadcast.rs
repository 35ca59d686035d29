//! Link bookkeeping and flooding.
//!
//! Links are one-directional in use: we send only on links we dialed
//! (outbound) and receive on links others dialed (inbound). Two sites that
//! talk both ways therefore hold two links, one per direction.
//!
//! ```text
//!   A ──outbound──► B      ops, sync requests, sync-completed
//!   A ◄──inbound─── B      sync responses, ops
//! ```
//!
//! The most recent operations are kept in a bounded buffer and replayed to a
//! peer once its sync handshake finishes, covering edits that raced with the
//! snapshot.

use std::collections::VecDeque;

use log::{debug, warn};

use crate::protocol::PeerId;
use crate::transport::Transport;

/// Lifecycle of one outbound link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// Frame owed to a peer as soon as our link to it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnOpen {
    JoinRequest,
    SyncResponse,
    SyncCompleted,
}

/// Result of asking for an outbound link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dial {
    /// No link existed; the caller must start dialing.
    New,
    /// A dial is in flight; the intent was queued on it.
    Pending,
    /// The link is already open; the caller may send right away.
    Ready,
}

#[derive(Debug, Clone)]
struct OutLink {
    peer: PeerId,
    state: ConnectionState,
    on_open: Vec<OnOpen>,
}

#[derive(Debug, Clone)]
pub struct Broadcast {
    out_conns: Vec<OutLink>,
    in_conns: Vec<PeerId>,
    outgoing: VecDeque<String>,
    outgoing_capacity: usize,
    max_connections: usize,
}

impl Broadcast {
    pub fn new(max_connections: usize, outgoing_capacity: usize) -> Self {
        Self {
            out_conns: Vec::new(),
            in_conns: Vec::new(),
            outgoing: VecDeque::with_capacity(outgoing_capacity),
            outgoing_capacity,
            max_connections,
        }
    }

    // ---------------------------------------------------------------
    // Link state
    // ---------------------------------------------------------------

    /// Registers interest in an outbound link to `peer`.
    pub fn dial(&mut self, peer: &PeerId, on_open: Option<OnOpen>) -> Dial {
        if let Some(link) = self.out_conns.iter_mut().find(|l| &l.peer == peer) {
            return match link.state {
                ConnectionState::Open => Dial::Ready,
                _ => {
                    link.on_open.extend(on_open);
                    Dial::Pending
                }
            };
        }
        self.out_conns.push(OutLink {
            peer: peer.clone(),
            state: ConnectionState::Connecting,
            on_open: on_open.into_iter().collect(),
        });
        Dial::New
    }

    /// Marks the outbound link open and hands back what is owed on it.
    pub fn outbound_opened(&mut self, peer: &PeerId) -> Vec<OnOpen> {
        match self.out_conns.iter_mut().find(|l| &l.peer == peer) {
            Some(link) => {
                link.state = ConnectionState::Open;
                std::mem::take(&mut link.on_open)
            }
            None => {
                self.out_conns.push(OutLink {
                    peer: peer.clone(),
                    state: ConnectionState::Open,
                    on_open: Vec::new(),
                });
                Vec::new()
            }
        }
    }

    pub fn inbound_opened(&mut self, peer: &PeerId) {
        if !self.in_conns.contains(peer) {
            self.in_conns.push(peer.clone());
        }
    }

    /// Forgets both directions to `peer`. Returns `false` if nothing was
    /// tracked.
    pub fn remove(&mut self, peer: &PeerId) -> bool {
        let before = self.out_conns.len() + self.in_conns.len();
        self.out_conns.retain(|l| &l.peer != peer);
        self.in_conns.retain(|p| p != peer);
        before != self.out_conns.len() + self.in_conns.len()
    }

    pub fn state(&self, peer: &PeerId) -> ConnectionState {
        self.out_conns
            .iter()
            .find(|l| &l.peer == peer)
            .map_or(ConnectionState::Closed, |l| l.state)
    }

    pub fn is_linked(&self, peer: &PeerId) -> bool {
        self.out_conns.iter().any(|l| &l.peer == peer) || self.in_conns.contains(peer)
    }

    pub fn has_outbound(&self, peer: &PeerId) -> bool {
        self.out_conns.iter().any(|l| &l.peer == peer)
    }

    /// Peers with an open outbound link, in dial order.
    pub fn open_outbound(&self) -> Vec<PeerId> {
        self.out_conns
            .iter()
            .filter(|l| l.state == ConnectionState::Open)
            .map(|l| l.peer.clone())
            .collect()
    }

    /// Every peer we hold a link with, either direction.
    pub fn linked_peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.out_conns.iter().map(|l| l.peer.clone()).collect();
        for peer in &self.in_conns {
            if !peers.contains(peer) {
                peers.push(peer.clone());
            }
        }
        peers
    }

    pub fn outbound_count(&self) -> usize {
        self.out_conns.len()
    }

    pub fn inbound_count(&self) -> usize {
        self.in_conns.len()
    }

    /// Whether this site already carries its share of links for a mesh of
    /// `network_size` sites.
    pub fn has_reached_max(&self, network_size: usize) -> bool {
        let limit = network_size.div_ceil(2).max(self.max_connections);
        self.in_conns.len() > limit || self.out_conns.len() > limit
    }

    // ---------------------------------------------------------------
    // Sending
    // ---------------------------------------------------------------

    /// Sends `text` to `peer` if our link to it is open.
    pub fn send_to<T: Transport>(&self, transport: &mut T, peer: &PeerId, text: String) -> bool {
        if self.state(peer) != ConnectionState::Open {
            warn!("dropping frame for {peer}: no open link");
            return false;
        }
        match transport.send(peer, text) {
            Ok(()) => true,
            Err(e) => {
                warn!("send to {peer} failed: {e}");
                false
            }
        }
    }

    /// Sends `text` on every open outbound link except the one to `except`.
    pub fn flood<T: Transport>(&self, transport: &mut T, text: &str, except: Option<&PeerId>) -> usize {
        let mut sent = 0;
        for link in &self.out_conns {
            if link.state != ConnectionState::Open || Some(&link.peer) == except {
                continue;
            }
            match transport.send(&link.peer, text.to_string()) {
                Ok(()) => sent += 1,
                Err(e) => warn!("send to {} failed: {e}", link.peer),
            }
        }
        sent
    }

    /// Remembers an operation frame for later replay.
    pub fn record(&mut self, text: String) {
        if self.outgoing_capacity == 0 {
            return;
        }
        while self.outgoing.len() >= self.outgoing_capacity {
            self.outgoing.pop_front();
        }
        self.outgoing.push_back(text);
    }

    /// Resends the buffered operations to `peer`.
    pub fn replay<T: Transport>(&self, transport: &mut T, peer: &PeerId) -> usize {
        if self.outgoing.is_empty() || self.state(peer) != ConnectionState::Open {
            return 0;
        }
        debug!("replaying {} buffered operations to {peer}", self.outgoing.len());
        self.outgoing
            .iter()
            .filter(|text| transport.send(peer, (*text).clone()).is_ok())
            .count()
    }

    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }
}
