//! The relay server: room registry plus frame routing.
//!
//! [`RelayServer`] owns the room [`Registry`] and every connection's outbound
//! frame sender, and consumes commands sent by the per-connection handlers.
//! Commands are processed one at a time, which is what makes each registry
//! operation atomic; deliveries to peers go through unbounded channel sends,
//! so no command ever suspends while the registry is mid-mutation.
//!
//! Call and spawn [`run`](RelayServer::run) to start processing commands.

use std::collections::HashMap;
use std::io;

use bytes::{BufMut as _, Bytes, BytesMut};
use log::{debug, error, info, warn};
use rand::{thread_rng, Rng as _};
use tokio::sync::{mpsc, oneshot};

use relay::{ErrorMessage, RequestPacket, ResponsePacket, RouteTarget};

use super::registry::{CreateRoomError, JoinRoomError, Registry};
use super::{ConnId, Msg};

/// A command received by the [`RelayServer`].
#[derive(Debug)]
enum Command {
    Connect {
        conn_tx: mpsc::UnboundedSender<Msg>,
        res_tx: oneshot::Sender<ConnId>,
    },

    Disconnect {
        conn: ConnId,
    },

    Text {
        conn: ConnId,
        msg: String,
        res_tx: oneshot::Sender<()>,
    },

    Binary {
        conn: ConnId,
        bytes: Bytes,
        res_tx: oneshot::Sender<()>,
    },
}

/// The relay server.
///
/// Every inbound frame either produces a response, mutates the registry, or
/// is dropped by an explicit rule here; protocol errors never close the
/// connection.
pub struct RelayServer {
    /// Map of connection IDs to their outbound frame senders.
    sessions: HashMap<ConnId, mpsc::UnboundedSender<Msg>>,

    /// Rooms and the reverse index from connection to membership.
    registry: Registry,

    /// Command receiver.
    cmd_rx: mpsc::UnboundedReceiver<Command>,
}

impl RelayServer {
    #[must_use]
    pub fn new() -> (Self, RelayServerHandle) {
        Self::with_registry(Registry::new())
    }

    /// Server over a caller-provided registry. Tests use this to inject a
    /// deterministic room id source.
    #[must_use]
    pub fn with_registry(registry: Registry) -> (Self, RelayServerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        (
            Self {
                sessions: HashMap::new(),
                registry,
                cmd_rx,
            },
            RelayServerHandle { cmd_tx },
        )
    }

    /// Register new session and assign unique ID to this session.
    fn connect(&mut self, tx: mpsc::UnboundedSender<Msg>) -> ConnId {
        let mut id = thread_rng().gen::<ConnId>();
        while self.sessions.contains_key(&id) {
            id = thread_rng().gen::<ConnId>();
        }

        info!("Someone joined {id}");

        self.sessions.insert(id, tx);

        id
    }

    /// Unregister the connection and reconcile its room membership.
    ///
    /// If the connection was a room member, every remaining member learns the
    /// departed index; the room itself is destroyed when it empties.
    fn disconnect(&mut self, conn: ConnId) {
        info!("Someone disconnected {conn}");

        self.sessions.remove(&conn);

        let Some(departure) = self.registry.handle_disconnect(conn) else {
            return;
        };

        debug!(
            "Connection {conn} left room '{}' at index {}",
            departure.room, departure.index
        );

        for member in departure.remaining {
            self.send_packet(
                member,
                &ResponsePacket::Leave {
                    index: departure.index,
                },
            );
        }
    }

    /// Dispatch one control-plane frame.
    fn on_text(&mut self, conn: ConnId, msg: &str) {
        let Ok(packet) = serde_json::from_str::<RequestPacket>(msg) else {
            debug!("Dropping unparseable control frame from {conn}");
            return;
        };

        match packet {
            RequestPacket::Create { size } => self.create_room(conn, size),
            RequestPacket::Join { id } => self.join_room(conn, &id),
        }
    }

    fn create_room(&mut self, conn: ConnId, size: Option<usize>) {
        match self.registry.create_room(conn, size) {
            Ok(room_id) => {
                debug!("Connection {conn} created room '{room_id}'");
                self.send_packet(conn, &ResponsePacket::Create { id: room_id });
            }
            Err(CreateRoomError::InvalidSize) => {
                self.send_error(conn, ErrorMessage::InvalidSize);
            }
            Err(CreateRoomError::AlreadyExists) => {
                self.send_error(conn, ErrorMessage::AlreadyExists);
            }
            Err(CreateRoomError::AlreadyInRoom) => {
                debug!("Dropping create from {conn}: already in a room");
            }
        }
    }

    fn join_room(&mut self, conn: ConnId, room_id: &str) {
        match self.registry.join_room(conn, room_id) {
            Ok(joined) => {
                debug!(
                    "Connection {conn} joined room '{room_id}' at index {}",
                    joined.index
                );

                self.send_packet(
                    conn,
                    &ResponsePacket::Join {
                        size: Some(joined.peers.len()),
                    },
                );
                for peer in joined.peers {
                    self.send_packet(peer, &ResponsePacket::Join { size: None });
                }
            }
            Err(JoinRoomError::DoesNotExist) => {
                self.send_error(conn, ErrorMessage::DoesNotExist);
            }
            Err(JoinRoomError::IsFull) => {
                self.send_error(conn, ErrorMessage::IsFull);
            }
            Err(JoinRoomError::AlreadyInRoom) => {
                debug!("Dropping join from {conn}: already in a room");
            }
        }
    }

    /// Route one data-plane frame by its leading index byte.
    ///
    /// The frame delivered to recipients always carries the sender's current
    /// index in byte 0, regardless of what the sender addressed.
    fn on_binary(&self, conn: ConnId, bytes: &Bytes) {
        let Some(&index_byte) = bytes.first() else {
            debug!("Dropping empty binary frame from {conn}");
            return;
        };

        let Some(membership) = self.registry.lookup(conn) else {
            debug!("Dropping binary frame from {conn}: not in a room");
            return;
        };

        let source = u8::try_from(membership.index).expect("room indices fit in the routing byte");

        let mut frame = BytesMut::with_capacity(bytes.len());
        frame.put_u8(source);
        frame.extend_from_slice(&bytes[1..]);
        let frame = frame.freeze();

        match RouteTarget::from_index_byte(index_byte) {
            RouteTarget::Broadcast => {
                let recipients = self
                    .registry
                    .room_members_except(conn)
                    .expect("membership was just looked up");

                for recipient in recipients {
                    self.send_to(recipient, Msg::Binary(frame.clone()));
                }
            }
            RouteTarget::Member(index) => {
                let Some(recipient) = self
                    .registry
                    .member_at(&membership.room, usize::from(index))
                else {
                    debug!("Dropping binary frame from {conn}: no member at index {index}");
                    return;
                };

                self.send_to(recipient, Msg::Binary(frame));
            }
        }
    }

    /// Send a control packet to a single connection.
    fn send_packet(&self, conn: ConnId, packet: &ResponsePacket) {
        let text = serde_json::to_string(packet).expect("response packets always serialize");

        self.send_to(conn, Msg::Text(text));
    }

    fn send_error(&self, conn: ConnId, message: ErrorMessage) {
        debug!("Rejecting request from {conn}: {message}");

        self.send_packet(conn, &ResponsePacket::Error { message });
    }

    /// Send a frame directly to a connection.
    fn send_to(&self, conn: ConnId, msg: Msg) {
        if let Some(session) = self.sessions.get(&conn) {
            // errors if the client disconnected abruptly and its handler
            // hasn't reconciled yet
            if session.send(msg).is_err() {
                warn!("Dropping frame for concurrently disconnecting connection {conn}");
            }
        }
    }

    pub async fn run(mut self) -> io::Result<()> {
        while let Some(cmd) = self.cmd_rx.recv().await {
            match cmd {
                Command::Connect { conn_tx, res_tx } => {
                    if let Err(error) = res_tx.send(self.connect(conn_tx)) {
                        error!("Failed to connect {error:?}");
                    }
                }

                Command::Disconnect { conn } => self.disconnect(conn),

                Command::Text { conn, msg, res_tx } => {
                    self.on_text(conn, &msg);
                    let _ = res_tx.send(());
                }

                Command::Binary { conn, bytes, res_tx } => {
                    self.on_binary(conn, &bytes);
                    let _ = res_tx.send(());
                }
            }
        }

        Ok(())
    }
}

/// Handle and command sender for the relay server.
///
/// Reduces boilerplate of setting up response channels in WebSocket handlers.
#[derive(Debug, Clone)]
pub struct RelayServerHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl RelayServerHandle {
    /// Register client frame sender and obtain connection ID.
    pub async fn connect(&self, conn_tx: mpsc::UnboundedSender<Msg>) -> ConnId {
        let (res_tx, res_rx) = oneshot::channel();

        // unwrap: relay server should not have been dropped
        self.cmd_tx.send(Command::Connect { conn_tx, res_tx }).unwrap();

        // unwrap: relay server does not drop our response channel
        res_rx.await.unwrap()
    }

    /// Dispatch a control-plane text frame from `conn`.
    pub async fn text(&self, conn: ConnId, msg: impl Into<String>) {
        let (res_tx, res_rx) = oneshot::channel();

        // unwrap: relay server should not have been dropped
        self.cmd_tx
            .send(Command::Text {
                conn,
                msg: msg.into(),
                res_tx,
            })
            .unwrap();

        // unwrap: relay server does not drop our response channel
        res_rx.await.unwrap();
    }

    /// Route a data-plane binary frame from `conn`.
    pub async fn binary(&self, conn: ConnId, bytes: Bytes) {
        let (res_tx, res_rx) = oneshot::channel();

        // unwrap: relay server should not have been dropped
        self.cmd_tx
            .send(Command::Binary {
                conn,
                bytes,
                res_tx,
            })
            .unwrap();

        // unwrap: relay server does not drop our response channel
        res_rx.await.unwrap();
    }

    /// Unregister connection and notify its room of the departure.
    pub fn disconnect(&self, conn: ConnId) {
        // unwrap: relay server should not have been dropped
        self.cmd_tx.send(Command::Disconnect { conn }).unwrap();
    }
}
