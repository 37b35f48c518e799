//! End-to-end relay behavior driven through the server's command interface:
//! one task runs the relay server, test peers stand in for WebSocket
//! connection handlers.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

use relay::ResponsePacket;
use relay_server::ws::server::{RelayServer, RelayServerHandle};
use relay_server::ws::{ConnId, Msg};

struct Peer {
    handle: RelayServerHandle,
    conn: ConnId,
    rx: UnboundedReceiver<Msg>,
}

impl Peer {
    async fn connect(handle: &RelayServerHandle) -> Self {
        let (conn_tx, rx) = mpsc::unbounded_channel();
        let conn = handle.connect(conn_tx).await;

        Self {
            handle: handle.clone(),
            conn,
            rx,
        }
    }

    async fn send(&self, msg: impl Into<String>) {
        self.handle.text(self.conn, msg).await;
    }

    async fn send_binary(&self, bytes: impl Into<Bytes>) {
        self.handle.binary(self.conn, bytes.into()).await;
    }

    fn disconnect(&self) {
        self.handle.disconnect(self.conn);
    }

    async fn recv_text(&mut self) -> String {
        match timeout(Duration::from_secs(1), self.rx.recv()).await {
            Ok(Some(Msg::Text(text))) => text,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    async fn recv_binary(&mut self) -> Vec<u8> {
        match timeout(Duration::from_secs(1), self.rx.recv()).await {
            Ok(Some(Msg::Binary(bytes))) => bytes.to_vec(),
            other => panic!("expected a binary frame, got {other:?}"),
        }
    }

    async fn create_room(&mut self, size: Option<usize>) -> String {
        let request = size.map_or_else(
            || r#"{"type":"create"}"#.to_string(),
            |size| format!(r#"{{"type":"create","size":{size}}}"#),
        );
        self.send(request).await;

        match serde_json::from_str(&self.recv_text().await).unwrap() {
            ResponsePacket::Create { id } => id,
            other => panic!("expected a create ack, got {other:?}"),
        }
    }

    async fn join_room(&mut self, room_id: &str) {
        self.send(format!(r#"{{"type":"join","id":"{room_id}"}}"#))
            .await;
    }

    fn assert_silent(&mut self) {
        assert!(self.rx.try_recv().is_err(), "expected no pending frames");
    }
}

fn spawn_server() -> RelayServerHandle {
    let (server, handle) = RelayServer::new();
    tokio::spawn(server.run());

    handle
}

/// Fill a fresh room of capacity `size` with `size` peers, draining every
/// join acknowledgement and notification. Peers are returned in member-index
/// order.
async fn filled_room(handle: &RelayServerHandle, size: usize) -> (Vec<Peer>, String) {
    let mut peers = Vec::with_capacity(size);

    let mut creator = Peer::connect(handle).await;
    let room_id = creator.create_room(Some(size)).await;
    peers.push(creator);

    for prior in 1..size {
        let mut joiner = Peer::connect(handle).await;
        joiner.join_room(&room_id).await;

        assert_eq!(
            joiner.recv_text().await,
            format!(r#"{{"type":"join","size":{prior}}}"#)
        );
        for peer in &mut peers {
            assert_eq!(peer.recv_text().await, r#"{"type":"join"}"#);
        }

        peers.push(joiner);
    }

    (peers, room_id)
}

#[tokio::test]
async fn full_session_walkthrough() {
    let handle = spawn_server();

    // a creates a default-sized room
    let mut a = Peer::connect(&handle).await;
    let room_id = a.create_room(None).await;
    assert_eq!(room_id.len(), 36);

    // b joins: b is told one member was present, a is notified
    let mut b = Peer::connect(&handle).await;
    b.join_room(&room_id).await;
    assert_eq!(b.recv_text().await, r#"{"type":"join","size":1}"#);
    assert_eq!(a.recv_text().await, r#"{"type":"join"}"#);

    // c bounces off the full room
    let mut c = Peer::connect(&handle).await;
    c.join_room(&room_id).await;
    assert_eq!(
        c.recv_text().await,
        r#"{"type":"error","message":"IsFull"}"#
    );

    // a broadcasts; b sees a's index in the header, a hears nothing back
    a.send_binary(vec![255, 0x68, 0x69]).await;
    assert_eq!(b.recv_binary().await, vec![0, 0x68, 0x69]);
    a.assert_silent();

    // b unicasts to member 0
    b.send_binary(vec![0, 0x79, 0x6F]).await;
    assert_eq!(a.recv_binary().await, vec![1, 0x79, 0x6F]);

    // a drops; b is told index 0 left and now occupies it
    a.disconnect();
    assert_eq!(b.recv_text().await, r#"{"type":"leave","index":0}"#);

    // a fresh connection with a bad size is rejected but stays usable
    let mut d = Peer::connect(&handle).await;
    d.send(r#"{"type":"create","size":0}"#).await;
    assert_eq!(
        d.recv_text().await,
        r#"{"type":"error","message":"InvalidSize"}"#
    );
    d.join_room(&room_id).await;
    assert_eq!(d.recv_text().await, r#"{"type":"join","size":1}"#);
    assert_eq!(b.recv_text().await, r#"{"type":"join"}"#);
}

#[tokio::test]
async fn broadcasts_reach_every_other_member() {
    let handle = spawn_server();
    let (mut peers, _) = filled_room(&handle, 4).await;

    for source in 0..peers.len() {
        peers[source].send_binary(vec![255]).await;
        peers[source].send_binary(vec![255, 0, 1, 2, 3]).await;

        for destination in 0..peers.len() {
            if destination == source {
                peers[destination].assert_silent();
                continue;
            }

            assert_eq!(peers[destination].recv_binary().await, vec![source as u8]);
            assert_eq!(
                peers[destination].recv_binary().await,
                vec![source as u8, 0, 1, 2, 3]
            );
        }
    }
}

#[tokio::test]
async fn every_member_can_unicast_every_member() {
    let handle = spawn_server();
    let (mut peers, _) = filled_room(&handle, 4).await;

    for source in 0..peers.len() {
        for destination in 0..peers.len() {
            peers[source]
                .send_binary(vec![destination as u8, 0xAB])
                .await;

            assert_eq!(
                peers[destination].recv_binary().await,
                vec![source as u8, 0xAB]
            );
        }
    }

    for peer in &mut peers {
        peer.assert_silent();
    }
}

#[tokio::test]
async fn capacity_overflow_leaves_the_room_intact() {
    let handle = spawn_server();
    let (mut peers, room_id) = filled_room(&handle, 3).await;

    let mut overflow = Peer::connect(&handle).await;
    overflow.join_room(&room_id).await;
    assert_eq!(
        overflow.recv_text().await,
        r#"{"type":"error","message":"IsFull"}"#
    );

    // the room still routes between its original members
    peers[0].send_binary(vec![255, 7]).await;
    assert_eq!(peers[1].recv_binary().await, vec![0, 7]);
    assert_eq!(peers[2].recv_binary().await, vec![0, 7]);
    overflow.assert_silent();
}

#[tokio::test]
async fn front_departures_always_report_index_zero() {
    let handle = spawn_server();
    let (mut peers, _) = filled_room(&handle, 5).await;

    while peers.len() > 1 {
        let departing = peers.remove(0);
        departing.disconnect();

        for peer in &mut peers {
            assert_eq!(peer.recv_text().await, r#"{"type":"leave","index":0}"#);
        }
    }
}

#[tokio::test]
async fn back_departures_report_the_tail_index() {
    let handle = spawn_server();
    let (mut peers, _) = filled_room(&handle, 5).await;

    while peers.len() > 1 {
        let departing = peers.pop().unwrap();
        departing.disconnect();

        let expected = format!(r#"{{"type":"leave","index":{}}}"#, peers.len());
        for peer in &mut peers {
            assert_eq!(peer.recv_text().await, expected);
        }
    }
}

#[tokio::test]
async fn a_drained_room_is_destroyed_and_its_id_is_forgotten() {
    let handle = spawn_server();
    let (peers, room_id) = filled_room(&handle, 2).await;

    for peer in &peers {
        peer.disconnect();
    }

    let mut late = Peer::connect(&handle).await;
    late.join_room(&room_id).await;
    assert_eq!(
        late.recv_text().await,
        r#"{"type":"error","message":"DoesNotExist"}"#
    );
}

#[tokio::test]
async fn middle_departure_repacks_the_routing_indices() {
    let handle = spawn_server();
    let (mut peers, _) = filled_room(&handle, 3).await;

    let departing = peers.remove(1);
    departing.disconnect();

    assert_eq!(peers[0].recv_text().await, r#"{"type":"leave","index":1}"#);
    assert_eq!(peers[1].recv_text().await, r#"{"type":"leave","index":1}"#);

    // the former index 2 member now answers to index 1
    peers[0].send_binary(vec![1, 0x11]).await;
    assert_eq!(peers[1].recv_binary().await, vec![0, 0x11]);

    peers[1].send_binary(vec![0, 0x22]).await;
    assert_eq!(peers[0].recv_binary().await, vec![1, 0x22]);
}
