use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use chitchat_types::UserId;
use chitchat_types::events::GatewayEvent;

use crate::registry::{Registration, Registry};

/// Ping cadence and how many consecutive missed Pongs end a connection.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub max_missed: u8,
}

impl Default for HeartbeatConfig {
    /// Ping every 15 seconds; two missed Pongs (~30s) drop the connection.
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            max_missed: 2,
        }
    }
}

/// Why a connection loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// The registry closed the outbound queue (unregistered or replaced).
    QueueClosed,
    /// The peer sent Close or the stream ended.
    PeerClosed,
    ReadError,
    WriteError,
    HeartbeatTimeout,
    /// A loop task panicked or was cancelled.
    TaskFailed,
}

/// Handle an upgraded, already-authenticated websocket for `user_id`.
///
/// Registers the connection, confirms the account with `still_active`,
/// sends `Ready`, then runs the pump until either loop exits. Unregisters
/// on the way out unless a newer connection has taken over the user's slot.
pub async fn handle_connection<A>(
    socket: WebSocket,
    registry: Registry,
    heartbeat: HeartbeatConfig,
    user_id: UserId,
    username: String,
    still_active: A,
) where
    A: Future<Output = bool>,
{
    let (mut sender, receiver) = socket.split();
    let Registration { conn_id, outbound } = registry.register(user_id).await;

    // Checked after registering: a deactivation racing this upgrade either
    // evicts the new entry or is seen here.
    if !still_active.await {
        registry.unregister(user_id, conn_id).await;
        let _ = sender.close().await;
        info!("{} ({}) refused at gateway: account inactive [conn={}]", username, user_id, conn_id);
        return;
    }

    info!("{} ({}) connected to gateway [conn={}]", username, user_id, conn_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    let sent = match ready.to_json() {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize Ready for {}: {}", user_id, e);
            false
        }
    };

    let exit = if sent {
        run_pump(sender, receiver, outbound, heartbeat).await
    } else {
        LoopExit::WriteError
    };

    registry.unregister(user_id, conn_id).await;
    info!(
        "{} ({}) disconnected from gateway [conn={}, reason={:?}]",
        username, user_id, conn_id, exit
    );
}

/// Run the read and write loops as independent tasks and wait for the first
/// to finish; the other is aborted. Both socket halves are owned by the
/// tasks, so the socket is released on every exit path, panics included.
pub async fn run_pump<S, R, E>(
    sink: S,
    stream: R,
    outbound: mpsc::Receiver<String>,
    heartbeat: HeartbeatConfig,
) -> LoopExit
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let pong_received = Arc::new(AtomicBool::new(true));

    let mut write_task = tokio::spawn(write_loop(sink, outbound, pong_received.clone(), heartbeat));
    let mut read_task = tokio::spawn(read_loop(stream, pong_received));

    let joined = tokio::select! {
        res = &mut write_task => {
            read_task.abort();
            res
        }
        res = &mut read_task => {
            write_task.abort();
            res
        }
    };

    joined.unwrap_or_else(|e| {
        warn!("Connection task failed: {}", e);
        LoopExit::TaskFailed
    })
}

/// Drain the outbound queue into text frames and keep the heartbeat going.
pub async fn write_loop<S>(
    mut sink: S,
    mut outbound: mpsc::Receiver<String>,
    pong_received: Arc<AtomicBool>,
    heartbeat: HeartbeatConfig,
) -> LoopExit
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ticker = tokio::time::interval(heartbeat.interval);
    ticker.tick().await;
    let mut missed_heartbeats: u8 = 0;

    let exit = loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else {
                    break LoopExit::QueueClosed;
                };
                if let Err(e) = sink.send(Message::Text(payload.into())).await {
                    debug!("Write failed: {}", e);
                    break LoopExit::WriteError;
                }
            }
            _ = ticker.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= heartbeat.max_missed {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break LoopExit::HeartbeatTimeout;
                    }
                }
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    debug!("Ping failed: {}", e);
                    break LoopExit::WriteError;
                }
            }
        }
    };

    let _ = sink.close().await;
    exit
}

/// Watch the socket for disconnects and Pongs. The gateway is send-only, so
/// inbound data frames are ignored.
pub async fn read_loop<R, E>(mut stream: R, pong_received: Arc<AtomicBool>) -> LoopExit
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Pong(_)) => pong_received.store(true, Ordering::Release),
            Ok(Message::Close(_)) => return LoopExit::PeerClosed,
            Ok(Message::Text(text)) => {
                debug!("Ignoring inbound text frame ({} bytes)", text.len());
            }
            Ok(Message::Binary(data)) => {
                debug!("Ignoring inbound binary frame ({} bytes)", data.len());
            }
            // Pings are answered by the websocket layer.
            Ok(Message::Ping(_)) => {}
            Err(e) => {
                debug!("Read failed: {}", e);
                return LoopExit::ReadError;
            }
        }
    }
    LoopExit::PeerClosed
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    use crate::registry::{OutboundConfig, OverflowPolicy};

    fn slow_heartbeat() -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(3600),
            max_missed: 2,
        }
    }

    fn text_frames(frames: &[Message]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|m| match m {
                Message::Text(t) => Some(t.as_str().to_string()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn write_loop_forwards_in_order_and_exits_when_queue_closes() {
        let (tx, rx) = mpsc::channel(8);
        tx.send("one".to_string()).await.unwrap();
        tx.send("two".to_string()).await.unwrap();
        drop(tx);

        let mut frames: Vec<Message> = Vec::new();
        let exit = write_loop(&mut frames, rx, Arc::new(AtomicBool::new(true)), slow_heartbeat()).await;

        assert_eq!(exit, LoopExit::QueueClosed);
        assert_eq!(text_frames(&frames), ["one", "two"]);
    }

    #[tokio::test]
    async fn write_loop_times_out_without_pongs() {
        let (_tx, rx) = mpsc::channel::<String>(8);
        let heartbeat = HeartbeatConfig {
            interval: Duration::from_millis(10),
            max_missed: 2,
        };

        let mut frames: Vec<Message> = Vec::new();
        let exit = write_loop(&mut frames, rx, Arc::new(AtomicBool::new(false)), heartbeat).await;

        assert_eq!(exit, LoopExit::HeartbeatTimeout);
        assert!(frames.iter().any(|m| matches!(m, Message::Ping(_))));
    }

    #[tokio::test]
    async fn read_loop_records_pongs_and_stops_on_close() {
        let pong = Arc::new(AtomicBool::new(false));
        let frames = stream::iter(vec![
            Ok::<_, axum::Error>(Message::Text("ignored".into())),
            Ok(Message::Pong(Default::default())),
            Ok(Message::Close(None)),
            Ok(Message::Text("never read".into())),
        ]);

        let exit = read_loop(frames, pong.clone()).await;
        assert_eq!(exit, LoopExit::PeerClosed);
        assert!(pong.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn read_loop_stops_on_error() {
        let frames = stream::iter(vec![Err::<Message, _>("connection reset")]);
        let exit = read_loop(frames, Arc::new(AtomicBool::new(true))).await;
        assert_eq!(exit, LoopExit::ReadError);
    }

    #[tokio::test]
    async fn pump_ends_when_peer_closes() {
        let (_tx, rx) = mpsc::channel::<String>(8);
        let frames = stream::iter(vec![Ok::<_, axum::Error>(Message::Close(None))]);

        let exit = run_pump(futures_util::sink::drain(), frames, rx, slow_heartbeat()).await;
        assert_eq!(exit, LoopExit::PeerClosed);
    }

    #[tokio::test]
    async fn pump_ends_when_registry_replaces_connection() {
        let registry = Registry::new(OutboundConfig {
            capacity: 4,
            overflow: OverflowPolicy::Drop,
        });
        let first = registry.register(9).await;
        let _second = registry.register(9).await;

        // Peer never closes; only the closed queue can end this pump.
        let frames = stream::pending::<Result<Message, axum::Error>>();
        let exit = run_pump(futures_util::sink::drain(), frames, first.outbound, slow_heartbeat()).await;
        assert_eq!(exit, LoopExit::QueueClosed);
    }

    mod over_tcp {
        use super::*;
        use std::net::SocketAddr;

        use axum::extract::WebSocketUpgrade;
        use tokio_tungstenite::tungstenite::Message as WsMessage;

        /// Serve `/ws` for user 7 ("alice") on an ephemeral port.
        async fn serve(registry: Registry, heartbeat: HeartbeatConfig, active: bool) -> SocketAddr {
            let app = axum::Router::new().route(
                "/ws",
                axum::routing::get(move |ws: WebSocketUpgrade| {
                    let registry = registry.clone();
                    async move {
                        ws.on_upgrade(move |socket| {
                            handle_connection(socket, registry, heartbeat, 7, "alice".into(), async move {
                                active
                            })
                        })
                    }
                }),
            );
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
            addr
        }

        /// Next text frame, or `None` once the server closes.
        async fn next_text<S>(ws: &mut S) -> Option<String>
        where
            S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
        {
            let read = async {
                while let Some(frame) = ws.next().await {
                    match frame {
                        Ok(WsMessage::Text(text)) => return Some(text.as_str().to_string()),
                        Ok(WsMessage::Close(_)) | Err(_) => return None,
                        Ok(_) => {}
                    }
                }
                None
            };
            tokio::time::timeout(Duration::from_secs(5), read).await.unwrap()
        }

        async fn wait_until_empty(registry: &Registry) {
            for _ in 0..200 {
                if registry.connection_count().await == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            panic!("connection still registered");
        }

        #[tokio::test]
        async fn ready_first_then_pushes_then_unregister_on_close() {
            let registry = Registry::new(OutboundConfig::default());
            let addr = serve(registry.clone(), HeartbeatConfig::default(), true).await;
            let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
                .await
                .unwrap();

            let ready: GatewayEvent = serde_json::from_str(&next_text(&mut ws).await.unwrap()).unwrap();
            assert_eq!(
                ready,
                GatewayEvent::Ready {
                    user_id: 7,
                    username: "alice".into()
                }
            );
            assert!(registry.lookup(7).await.is_some());

            assert_eq!(registry.push(7, "payload".into()).await, crate::PushOutcome::Queued);
            assert_eq!(next_text(&mut ws).await.as_deref(), Some("payload"));

            ws.close(None).await.unwrap();
            wait_until_empty(&registry).await;
        }

        #[tokio::test]
        async fn silent_peer_is_dropped_by_heartbeat() {
            let registry = Registry::new(OutboundConfig::default());
            let heartbeat = HeartbeatConfig {
                interval: Duration::from_millis(20),
                max_missed: 2,
            };
            let addr = serve(registry.clone(), heartbeat, true).await;
            let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
                .await
                .unwrap();
            assert!(next_text(&mut ws).await.is_some());

            // The client stops reading, so no Pong is ever sent back.
            wait_until_empty(&registry).await;
            drop(ws);
        }

        #[tokio::test]
        async fn inactive_account_is_unregistered_without_ready() {
            let registry = Registry::new(OutboundConfig::default());
            let addr = serve(registry.clone(), HeartbeatConfig::default(), false).await;
            let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
                .await
                .unwrap();

            assert_eq!(next_text(&mut ws).await, None);
            wait_until_empty(&registry).await;
        }
    }
}
