//! The per-process network controller.
//!
//! `Controller` owns everything one site knows: its replica, the membership
//! table and its links. All of it is mutated from one place, whoever calls
//! [`Controller::handle_event`] and the local edit methods, so nothing here
//! is shared or locked.
//!
//! ```text
//!  joiner J                     member M
//!     │  dial ───────────────────► │
//!     │  syncRequest {J} ────────► │  saturated? forward to a random link
//!     │ ◄─────────────────── dial  │  otherwise accept
//!     │ ◄──── syncResponse {snap}  │
//!     │  syncCompleted ──────────► │
//!     │ ◄────── replayed ops ───── │
//! ```

use log::{debug, error, info, trace, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use skein_crdt::{LineCol, Operation, Replica, SiteId, Snapshot, TextChange};

use crate::broadcast::{Broadcast, Dial, OnOpen};
use crate::config::MeshConfig;
use crate::editor::{Editor, PeerList};
use crate::error::MeshError;
use crate::membership::{Membership, NetworkMember};
use crate::protocol::{Message, PeerId};
use crate::transport::{Direction, Transport, TransportEvent};

pub struct Controller<T, E, P> {
    peer_id: PeerId,
    replica: Replica,
    network: Membership,
    broadcast: Broadcast,
    transport: T,
    editor: E,
    peers: P,
    rng: StdRng,
}

impl<T: Transport, E: Editor, P: PeerList> Controller<T, E, P> {
    pub fn new(
        peer_id: PeerId,
        replica: Replica,
        config: &MeshConfig,
        transport: T,
        editor: E,
        peers: P,
    ) -> Self {
        Self {
            peer_id,
            replica,
            network: Membership::new(),
            broadcast: Broadcast::new(config.max_connections, config.outgoing_buffer_size),
            transport,
            editor,
            peers,
            rng: StdRng::from_entropy(),
        }
    }

    /// Makes target selection deterministic.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn site_id(&self) -> SiteId {
        self.replica.site_id()
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn network(&self) -> &Membership {
        &self.network
    }

    pub fn broadcast(&self) -> &Broadcast {
        &self.broadcast
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn peer_list(&self) -> &P {
        &self.peers
    }

    pub fn text(&self) -> String {
        self.replica.to_text()
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Starts a new mesh (`None`) or joins the one `target` belongs to.
    pub fn start(&mut self, target: Option<PeerId>) -> Result<(), MeshError> {
        info!("site {} starting as {}", self.site_id(), self.peer_id);
        match target {
            None => {
                let me = NetworkMember::new(self.peer_id.clone(), self.site_id());
                self.add_to_network(me, None);
                Ok(())
            }
            Some(target) => self.connect(target),
        }
    }

    /// Dials `peer` and asks it for the document.
    pub fn connect(&mut self, peer: PeerId) -> Result<(), MeshError> {
        let peer = peer.trim().to_string();
        if peer.is_empty() {
            return Err(MeshError::EmptyPeerId);
        }
        if peer == self.peer_id {
            return Err(MeshError::SelfConnection);
        }
        if self.broadcast.has_outbound(&peer) {
            return Err(MeshError::AlreadyConnected(peer));
        }
        self.deliver(&peer, OnOpen::JoinRequest);
        Ok(())
    }

    /// Drops every link. The replica is left as is.
    pub fn shutdown(&mut self) {
        for peer in self.broadcast.linked_peers() {
            self.transport.disconnect(&peer);
            self.broadcast.remove(&peer);
        }
        info!("site {} left the mesh", self.site_id());
    }

    // ---------------------------------------------------------------
    // Local edits
    // ---------------------------------------------------------------

    pub fn local_insert(&mut self, text: &str, at: LineCol) -> Result<(), MeshError> {
        let ops = self.replica.local_insert(text, at)?;
        self.send_local(ops)
    }

    pub fn local_delete(&mut self, start: LineCol, end: LineCol) -> Result<(), MeshError> {
        let ops = self.replica.local_delete(start, end)?;
        self.send_local(ops)
    }

    fn send_local(&mut self, ops: Vec<Operation>) -> Result<(), MeshError> {
        for op in ops {
            let text = Message::from(op).encode()?;
            self.broadcast.flood(&mut self.transport, &text, None);
            self.broadcast.record(text);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Transport events
    // ---------------------------------------------------------------

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened { peer, direction: Direction::Outbound } => {
                debug!("outbound link to {peer} open");
                for owed in self.broadcast.outbound_opened(&peer) {
                    self.fulfil(&peer, owed);
                }
            }
            TransportEvent::Opened { peer, direction: Direction::Inbound } => {
                debug!("inbound link from {peer} open");
                self.broadcast.inbound_opened(&peer);
            }
            TransportEvent::Closed { peer, direction } => self.handle_close(&peer, direction),
            TransportEvent::Message { peer, text } => self.handle_message(&peer, &text),
        }
    }

    fn handle_close(&mut self, peer: &PeerId, direction: Direction) {
        if !self.broadcast.remove(peer) {
            return;
        }
        debug!("{direction:?} link with {peer} closed");
        self.transport.disconnect(peer);
        self.remove_from_network(peer, None);

        if !self.broadcast.has_reached_max(self.network.len()) {
            self.find_new_target();
        }
    }

    fn handle_message(&mut self, from: &PeerId, text: &str) {
        let msg = match Message::decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("dropping frame from {from}: {e}");
                return;
            }
        };
        trace!("{} from {from}", msg.kind());

        match msg {
            Message::Insert { character, version } => {
                self.handle_remote_operation(Operation::insert(character, version), from, text)
            }
            Message::Delete { character, version } => {
                self.handle_remote_operation(Operation::delete(character, version), from, text)
            }
            Message::SyncRequest { peer_id, site_id } => self.handle_join_request(from, peer_id, site_id),
            Message::SyncResponse {
                peer_id,
                network,
                initial_struct,
                initial_versions,
                ..
            } => {
                let snapshot = Snapshot {
                    lines: initial_struct,
                    versions: initial_versions,
                };
                self.handle_sync(peer_id, network, snapshot);
            }
            Message::SyncCompleted { peer_id } => {
                self.broadcast.replay(&mut self.transport, &peer_id);
            }
            Message::NetworkUpdate { peer_id, site_id } => {
                self.add_to_network(NetworkMember::new(peer_id, site_id), Some(from));
            }
            Message::NetworkRemove { peer_id } => self.remove_from_network(&peer_id, Some(from)),
        }
    }

    /// Applies a remote operation and floods it onward if it was new.
    fn handle_remote_operation(&mut self, op: Operation, from: &PeerId, text: &str) {
        let outcome = match self.replica.apply_remote(op) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("ignoring operation from {from}: {e}");
                return;
            }
        };
        if !outcome.fresh {
            return;
        }

        for change in outcome.changes {
            match change {
                TextChange::Insert { value, at, site_id } => {
                    self.editor.insert_text(value, at, at, site_id)
                }
                TextChange::Delete { value, from, to, site_id } => {
                    self.editor.delete_text(value, from, to, site_id)
                }
            }
        }
        self.broadcast.flood(&mut self.transport, text, Some(from));
        self.broadcast.record(text.to_string());
    }

    // ---------------------------------------------------------------
    // Joining
    // ---------------------------------------------------------------

    fn handle_join_request(&mut self, from: &PeerId, requester: PeerId, site_id: SiteId) {
        if requester == self.peer_id {
            debug!("own join request came back through {from}");
            return;
        }

        if self.broadcast.has_reached_max(self.network.len()) {
            let candidates: Vec<PeerId> = self
                .broadcast
                .open_outbound()
                .into_iter()
                .filter(|p| *p != requester && p != from)
                .collect();
            if let Some(next) = candidates.choose(&mut self.rng).cloned() {
                debug!("saturated; forwarding join request from {requester} to {next}");
                let msg = Message::SyncRequest {
                    peer_id: requester,
                    site_id,
                };
                self.send_message(&next, &msg);
                return;
            }
        }

        info!("accepting join request from {requester}");
        self.add_to_network(NetworkMember::new(requester.clone(), site_id), None);
        self.deliver(&requester, OnOpen::SyncResponse);
    }

    fn handle_sync(&mut self, sender: PeerId, network: Vec<NetworkMember>, snapshot: Snapshot) {
        for member in network {
            self.add_to_network(member, Some(&sender));
        }

        match self.replica.adopt_snapshot(snapshot) {
            Ok(true) => {
                info!("adopted document from {sender} ({} chars)", self.replica.total_chars());
                let text = self.replica.to_text();
                self.editor.replace_text(&text);
            }
            Ok(false) => debug!("local document not empty; kept it, merged membership from {sender}"),
            Err(e) => warn!("ignoring snapshot from {sender}: {e}"),
        }

        self.broadcast.replay(&mut self.transport, &sender);
        self.deliver(&sender, OnOpen::SyncCompleted);
    }

    /// Dials a random known member we have no outbound link to.
    pub fn find_new_target(&mut self) {
        let candidates: Vec<&NetworkMember> = self
            .network
            .members()
            .iter()
            .filter(|m| m.peer_id != self.peer_id && !self.broadcast.has_outbound(&m.peer_id))
            .collect();
        let target = candidates.choose(&mut self.rng).map(|m| m.peer_id.clone());

        match target {
            Some(target) => {
                debug!("repairing mesh through {target}");
                self.deliver(&target, OnOpen::JoinRequest);
            }
            None => debug!("no unlinked members to dial"),
        }
    }

    // ---------------------------------------------------------------
    // Membership
    // ---------------------------------------------------------------

    fn add_to_network(&mut self, member: NetworkMember, from: Option<&PeerId>) {
        if !self.network.add(member.clone()) {
            return;
        }
        if member.site_id != self.site_id() {
            self.peers.add_peer(member.site_id, &member.peer_id);
        }
        let msg = Message::NetworkUpdate {
            peer_id: member.peer_id,
            site_id: member.site_id,
        };
        self.flood_message(&msg, from);
    }

    fn remove_from_network(&mut self, peer_id: &PeerId, from: Option<&PeerId>) {
        if *peer_id == self.peer_id {
            return;
        }
        let Some(member) = self.network.remove_peer(peer_id) else {
            return;
        };
        self.peers.remove_peer(peer_id);
        self.editor.remove_cursor(member.site_id);

        let msg = Message::NetworkRemove {
            peer_id: member.peer_id,
        };
        self.flood_message(&msg, from);
    }

    // ---------------------------------------------------------------
    // Sending
    // ---------------------------------------------------------------

    /// Sends `owed` to `peer` now if the link is open, otherwise once it is.
    fn deliver(&mut self, peer: &PeerId, owed: OnOpen) {
        match self.broadcast.dial(peer, Some(owed)) {
            Dial::New => {
                debug!("dialing {peer}");
                self.transport.connect(peer);
            }
            Dial::Pending => {}
            Dial::Ready => self.fulfil(peer, owed),
        }
    }

    fn fulfil(&mut self, peer: &PeerId, owed: OnOpen) {
        let msg = match owed {
            OnOpen::JoinRequest => Message::SyncRequest {
                peer_id: self.peer_id.clone(),
                site_id: self.site_id(),
            },
            OnOpen::SyncResponse => Message::sync_response(
                self.peer_id.clone(),
                self.site_id(),
                self.network.members().to_vec(),
                self.replica.snapshot(),
            ),
            OnOpen::SyncCompleted => Message::SyncCompleted {
                peer_id: self.peer_id.clone(),
            },
        };
        self.send_message(peer, &msg);
    }

    fn send_message(&mut self, peer: &PeerId, msg: &Message) {
        match msg.encode() {
            Ok(text) => {
                self.broadcast.send_to(&mut self.transport, peer, text);
            }
            Err(e) => error!("failed to encode {}: {e}", msg.kind()),
        }
    }

    fn flood_message(&mut self, msg: &Message, except: Option<&PeerId>) {
        match msg.encode() {
            Ok(text) => {
                self.broadcast.flood(&mut self.transport, &text, except);
            }
            Err(e) => error!("failed to encode {}: {e}", msg.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[derive(Debug, Default)]
    struct FakeTransport {
        dialed: Vec<PeerId>,
        sent: Vec<(PeerId, String)>,
        dropped: Vec<PeerId>,
    }

    impl Transport for FakeTransport {
        fn connect(&mut self, peer: &PeerId) {
            self.dialed.push(peer.clone());
        }

        fn send(&mut self, peer: &PeerId, text: String) -> Result<(), MeshError> {
            self.sent.push((peer.clone(), text));
            Ok(())
        }

        fn disconnect(&mut self, peer: &PeerId) {
            self.dropped.push(peer.clone());
        }
    }

    #[derive(Debug, Default)]
    struct Recorder {
        inserted: Vec<(char, LineCol)>,
        deleted: Vec<(char, LineCol, LineCol)>,
        replaced: Vec<String>,
        cursors_removed: Vec<SiteId>,
        peers: Vec<PeerId>,
    }

    impl Editor for Recorder {
        fn insert_text(&mut self, value: char, from: LineCol, _to: LineCol, _origin: SiteId) {
            self.inserted.push((value, from));
        }
        fn delete_text(&mut self, value: char, from: LineCol, to: LineCol, _origin: SiteId) {
            self.deleted.push((value, from, to));
        }
        fn replace_text(&mut self, text: &str) {
            self.replaced.push(text.to_string());
        }
        fn remove_cursor(&mut self, site_id: SiteId) {
            self.cursors_removed.push(site_id);
        }
    }

    impl PeerList for Recorder {
        fn add_peer(&mut self, _site_id: SiteId, peer_id: &PeerId) {
            self.peers.push(peer_id.clone());
        }
        fn remove_peer(&mut self, peer_id: &PeerId) {
            self.peers.retain(|p| p != peer_id);
        }
    }

    type TestController = Controller<FakeTransport, Recorder, Recorder>;

    fn controller(n: u128) -> TestController {
        let site = Uuid::from_u128(n);
        Controller::new(
            format!("ws://site{n}"),
            Replica::with_seed(site, n as u64),
            &MeshConfig::default(),
            FakeTransport::default(),
            Recorder::default(),
            Recorder::default(),
        )
        .with_rng_seed(n as u64)
    }

    fn sent_messages(c: &TestController) -> Vec<(PeerId, Message)> {
        c.transport()
            .sent
            .iter()
            .map(|(p, t)| (p.clone(), Message::decode(t).unwrap()))
            .collect()
    }

    fn open_out(c: &mut TestController, peer: &str) {
        c.handle_event(TransportEvent::Opened {
            peer: peer.into(),
            direction: Direction::Outbound,
        });
    }

    #[test]
    fn test_start_alone_adds_self() {
        let mut c = controller(1);
        c.start(None).unwrap();
        assert_eq!(c.network().len(), 1);
        assert!(c.peer_list().peers.is_empty());
    }

    #[test]
    fn test_connect_validation() {
        let mut c = controller(1);
        assert_eq!(c.connect("  ".into()), Err(MeshError::EmptyPeerId));
        assert_eq!(c.connect("ws://site1".into()), Err(MeshError::SelfConnection));
        c.connect("ws://site2".into()).unwrap();
        assert_eq!(
            c.connect("ws://site2".into()),
            Err(MeshError::AlreadyConnected("ws://site2".into()))
        );
        assert_eq!(c.transport().dialed, vec!["ws://site2".to_string()]);
    }

    #[test]
    fn test_join_request_sent_once_link_opens() {
        let mut c = controller(1);
        c.start(Some("ws://site2".into())).unwrap();
        assert!(c.transport().sent.is_empty());

        open_out(&mut c, "ws://site2");
        let sent = sent_messages(&c);
        assert_eq!(
            sent,
            vec![(
                "ws://site2".to_string(),
                Message::SyncRequest {
                    peer_id: "ws://site1".into(),
                    site_id: c.site_id(),
                }
            )]
        );
    }

    #[test]
    fn test_accepting_join_dials_back_with_snapshot() {
        let mut c = controller(1);
        c.start(None).unwrap();
        c.local_insert("doc", LineCol::new(0, 0)).unwrap();

        let joiner = Uuid::from_u128(2);
        let request = Message::SyncRequest {
            peer_id: "ws://site2".into(),
            site_id: joiner,
        };
        c.handle_event(TransportEvent::Message {
            peer: "ws://site2".into(),
            text: request.encode().unwrap(),
        });
        assert_eq!(c.transport().dialed, vec!["ws://site2".to_string()]);
        assert!(c.network().contains_site(joiner));

        open_out(&mut c, "ws://site2");
        match &sent_messages(&c)[..] {
            [(peer, Message::SyncResponse { network, initial_struct, .. })] => {
                assert_eq!(peer, "ws://site2");
                assert_eq!(network.len(), 2);
                assert_eq!(initial_struct[0].len(), 3);
            }
            other => panic!("expected one sync response, got {other:?}"),
        }
    }

    #[test]
    fn test_sync_adopts_and_completes() {
        let mut source = controller(1);
        source.start(None).unwrap();
        source.local_insert("hello", LineCol::new(0, 0)).unwrap();
        let response = Message::sync_response(
            "ws://site1".into(),
            source.site_id(),
            source.network().members().to_vec(),
            source.replica().snapshot(),
        );

        let mut joiner = controller(2);
        joiner.start(Some("ws://site1".into())).unwrap();
        open_out(&mut joiner, "ws://site1");
        joiner.handle_event(TransportEvent::Message {
            peer: "ws://site1".into(),
            text: response.encode().unwrap(),
        });

        assert_eq!(joiner.text(), "hello");
        assert_eq!(joiner.editor().replaced, vec!["hello".to_string()]);
        assert_eq!(joiner.peer_list().peers, vec!["ws://site1".to_string()]);
        let last = sent_messages(&joiner).pop().unwrap();
        assert_eq!(
            last,
            (
                "ws://site1".to_string(),
                Message::SyncCompleted { peer_id: "ws://site2".into() }
            )
        );
    }

    #[test]
    fn test_remote_op_is_applied_and_flooded_once() {
        let mut c = controller(1);
        open_out(&mut c, "ws://site2");
        open_out(&mut c, "ws://site3");

        let mut author = Replica::with_seed(Uuid::from_u128(9), 9);
        let op = author.local_insert("x", LineCol::new(0, 0)).unwrap().remove(0);
        let text = Message::from(op).encode().unwrap();

        for _ in 0..2 {
            c.handle_event(TransportEvent::Message {
                peer: "ws://site2".into(),
                text: text.clone(),
            });
        }
        assert_eq!(c.text(), "x");
        assert_eq!(c.editor().inserted, vec![('x', LineCol::new(0, 0))]);
        assert_eq!(c.transport().sent, vec![("ws://site3".to_string(), text)]);
        assert_eq!(c.broadcast().outgoing_len(), 1);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let mut c = controller(1);
        open_out(&mut c, "ws://site2");
        c.handle_event(TransportEvent::Message {
            peer: "ws://site3".into(),
            text: r#"{"type":"insert","char":{}}"#.into(),
        });
        assert!(c.transport().sent.is_empty());
        assert_eq!(c.text(), "");
    }

    #[test]
    fn test_saturated_site_forwards_join_request() {
        let config = MeshConfig {
            max_connections: 1,
            ..MeshConfig::default()
        };
        let mut c = Controller::new(
            "ws://site1".to_string(),
            Replica::with_seed(Uuid::from_u128(1), 1),
            &config,
            FakeTransport::default(),
            Recorder::default(),
            Recorder::default(),
        );
        c.start(None).unwrap();
        open_out(&mut c, "ws://site2");
        open_out(&mut c, "ws://site3");
        assert!(c.broadcast().has_reached_max(c.network().len()));

        let request = Message::SyncRequest {
            peer_id: "ws://site4".into(),
            site_id: Uuid::from_u128(4),
        };
        c.handle_event(TransportEvent::Message {
            peer: "ws://site2".into(),
            text: request.encode().unwrap(),
        });

        assert!(c.transport().dialed.is_empty());
        assert!(!c.network().contains_peer("ws://site4"));
        assert_eq!(sent_messages(&c), vec![("ws://site3".to_string(), request)]);
    }

    #[test]
    fn test_close_removes_member_and_repairs() {
        let mut c = controller(1);
        c.start(None).unwrap();
        for n in [2u128, 3] {
            let update = Message::NetworkUpdate {
                peer_id: format!("ws://site{n}"),
                site_id: Uuid::from_u128(n),
            };
            c.handle_event(TransportEvent::Message {
                peer: "ws://site2".into(),
                text: update.encode().unwrap(),
            });
        }
        open_out(&mut c, "ws://site2");

        c.handle_event(TransportEvent::Closed {
            peer: "ws://site2".into(),
            direction: Direction::Outbound,
        });

        assert!(!c.network().contains_peer("ws://site2"));
        assert_eq!(c.editor().cursors_removed, vec![Uuid::from_u128(2)]);
        assert_eq!(c.peer_list().peers, vec!["ws://site3".to_string()]);
        assert_eq!(c.transport().dropped, vec!["ws://site2".to_string()]);
        assert_eq!(c.transport().dialed, vec!["ws://site3".to_string()]);

        // A second close for the same peer is a no-op.
        c.handle_event(TransportEvent::Closed {
            peer: "ws://site2".into(),
            direction: Direction::Inbound,
        });
        assert_eq!(c.transport().dropped.len(), 1);
    }

    #[test]
    fn test_sync_completed_replays_buffer() {
        let mut c = controller(1);
        c.start(None).unwrap();
        c.local_insert("ab", LineCol::new(0, 0)).unwrap();
        open_out(&mut c, "ws://site2");

        let done = Message::SyncCompleted { peer_id: "ws://site2".into() };
        c.handle_event(TransportEvent::Message {
            peer: "ws://site2".into(),
            text: done.encode().unwrap(),
        });

        let kinds: Vec<&str> = sent_messages(&c).iter().map(|(_, m)| m.kind()).collect();
        assert_eq!(kinds, vec!["insert", "insert"]);
    }
}
