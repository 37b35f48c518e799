//! WebSocket connection handler for relay clients.
//!
//! Runs one loop per connection: inbound frames are forwarded to the relay
//! server as commands, frames addressed to this client by other room members
//! arrive on the connection's channel, and a heartbeat detects dead peers.
//! When the loop exits, for whatever reason, the relay server is told to
//! reconcile the connection's room membership before the session is closed.

use std::time::{Duration, Instant};

use actix_ws::Message;
use futures_util::{
    future::{select, Either},
    StreamExt as _,
};
use log::{error, info};
use tokio::{pin, sync::mpsc, time::interval};

use crate::ws::server::RelayServerHandle;
use crate::ws::Msg;

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay frames between this client and the rest of its room, respond to ping
/// messages, and monitor connection health to detect network issues and free
/// up resources.
pub async fn relay_ws(
    relay_server: RelayServerHandle,
    mut session: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
) {
    info!("Connected");

    let mut last_heartbeat = Instant::now();
    let mut interval = interval(HEARTBEAT_INTERVAL);

    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();

    // unwrap: relay server is not dropped before the HTTP server
    let conn_id = relay_server.connect(conn_tx).await;

    info!("Connection id: {conn_id}");

    let close_reason = loop {
        // most of the futures we process need to be stack-pinned to work with select()

        let tick = interval.tick();
        pin!(tick);

        let msg_rx = conn_rx.recv();
        pin!(msg_rx);

        let messages = select(msg_stream.next(), msg_rx);
        pin!(messages);

        match select(messages, tick).await {
            // frames received from the client
            Either::Left((Either::Left((Some(Ok(msg)), _)), _)) => match msg {
                Message::Ping(bytes) => {
                    last_heartbeat = Instant::now();
                    if session.pong(&bytes).await.is_err() {
                        break None;
                    }
                }

                Message::Pong(_) => {
                    last_heartbeat = Instant::now();
                }

                Message::Text(text) => {
                    last_heartbeat = Instant::now();
                    relay_server.text(conn_id, text.to_string()).await;
                }

                Message::Binary(bytes) => {
                    last_heartbeat = Instant::now();
                    relay_server.binary(conn_id, bytes).await;
                }

                Message::Close(reason) => break reason,

                _ => {
                    break None;
                }
            },

            // client WebSocket stream error
            Either::Left((Either::Left((Some(Err(err)), _)), _)) => {
                error!("WebSocket stream error: {err}");
                break None;
            }

            // client WebSocket stream ended
            Either::Left((Either::Left((None, _)), _)) => break None,

            // frames routed to this client by its room
            Either::Left((Either::Right((Some(msg), _)), _)) => {
                let sent = match msg {
                    Msg::Text(text) => session.text(text).await,
                    Msg::Binary(bytes) => session.binary(bytes).await,
                };

                if sent.is_err() {
                    break None;
                }
            }

            // all connection's message senders were dropped
            Either::Left((Either::Right((None, _)), _)) => unreachable!(
                "all connection message senders were dropped; relay server may have panicked"
            ),

            // heartbeat internal tick
            Either::Right((_inst, _)) => {
                // if no heartbeat ping/pong received recently, close the connection
                if Instant::now().duration_since(last_heartbeat) > CLIENT_TIMEOUT {
                    info!(
                        "client has not sent heartbeat in over {CLIENT_TIMEOUT:?}; disconnecting"
                    );
                    break None;
                }

                // send heartbeat ping
                let _ = session.ping(b"").await;
            }
        }
    };

    relay_server.disconnect(conn_id);

    // attempt to close connection gracefully
    let _ = session.close(close_reason).await;
}
