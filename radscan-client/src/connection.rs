//! Connection ownership and byte routing.
//!
//! The connection manager owns every live connection, keyed by a
//! process-unique, monotonically increasing id. All mutation of the
//! id-to-connection map happens on the manager's own worker; other
//! components request mutations through enqueued commands.
//!
//! Each connection runs a receive task (socket -> framer -> message
//! events) and a send task (byte queue -> socket, with partial writes
//! resumed by `write_all`). Any receive error, including a clean peer
//! close, tears the connection down and publishes `Disconnected`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use radscan_core::protocol::colossus::tcp::{TcpFramer, TcpMessage};

use crate::event::{ClientEvent, ConnectionId, EventDispatcher};

/// Receive buffer size per connection.
const RECV_BUFFER: usize = 16 * 1024;

enum ManagerCmd {
    Create(TcpStream),
    Close(ConnectionId),
    Send(ConnectionId, Vec<u8>),
    Broadcast(Vec<u8>),
    Shutdown,
}

struct Entry {
    peer: Option<SocketAddr>,
    send_tx: mpsc::UnboundedSender<Vec<u8>>,
    // Dropping this wakes the receive task out of its blocking read
    shutdown_tx: watch::Sender<bool>,
    recv_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
}

/// Owns live connections and routes inbound/outbound bytes.
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<ManagerCmd>,
    task: JoinHandle<()>,
}

impl ConnectionManager {
    pub fn spawn(events: Arc<EventDispatcher<TcpMessage>>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let loop_cmd_tx = cmd_tx.clone();
        let task = tokio::spawn(manager_loop(cmd_rx, loop_cmd_tx, events));
        ConnectionManager { cmd_tx, task }
    }

    pub fn handle(&self) -> ConnectionManagerHandle {
        ConnectionManagerHandle {
            cmd_tx: self.cmd_tx.clone(),
        }
    }

    /// Close every connection (publishing their `Disconnected` events)
    /// and join the manager worker.
    pub async fn stop(self) {
        let _ = self.cmd_tx.send(ManagerCmd::Shutdown);
        let _ = self.task.await;
    }
}

/// Clonable command handle onto the connection manager.
#[derive(Clone)]
pub struct ConnectionManagerHandle {
    cmd_tx: mpsc::UnboundedSender<ManagerCmd>,
}

impl ConnectionManagerHandle {
    /// Adopt a connected socket; assigns the next connection id and
    /// publishes `Connected`.
    pub fn create_connection(&self, stream: TcpStream) -> bool {
        self.cmd_tx.send(ManagerCmd::Create(stream)).is_ok()
    }

    pub fn close_connection(&self, id: ConnectionId) {
        let _ = self.cmd_tx.send(ManagerCmd::Close(id));
    }

    /// Queue bytes for one connection's send worker.
    pub fn send(&self, id: ConnectionId, bytes: Vec<u8>) -> bool {
        self.cmd_tx.send(ManagerCmd::Send(id, bytes)).is_ok()
    }

    /// Queue bytes for every connection.
    pub fn broadcast(&self, bytes: Vec<u8>) -> bool {
        self.cmd_tx.send(ManagerCmd::Broadcast(bytes)).is_ok()
    }
}

async fn manager_loop(
    mut cmd_rx: mpsc::UnboundedReceiver<ManagerCmd>,
    cmd_tx: mpsc::UnboundedSender<ManagerCmd>,
    events: Arc<EventDispatcher<TcpMessage>>,
) {
    let mut connections: HashMap<ConnectionId, Entry> = HashMap::new();
    let mut next_id: ConnectionId = 1;

    while let Some(command) = cmd_rx.recv().await {
        match command {
            ManagerCmd::Create(stream) => {
                let id = next_id;
                next_id += 1;

                let peer = stream.peer_addr().ok();
                let (read_half, write_half) = stream.into_split();
                let (send_tx, send_rx) = mpsc::unbounded_channel();
                let (shutdown_tx, shutdown_rx) = watch::channel(false);

                debug!("connection {} established with {:?}", id, peer);

                // Connected must precede any message event for this id,
                // so publish before the receive task can run.
                events.publish(ClientEvent::Connected(id));

                let recv_task = tokio::spawn(receive_loop(
                    id,
                    read_half,
                    shutdown_rx,
                    events.clone(),
                    cmd_tx.clone(),
                ));
                let send_task = tokio::spawn(send_loop(id, write_half, send_rx, events.clone()));

                connections.insert(
                    id,
                    Entry {
                        peer,
                        send_tx,
                        shutdown_tx,
                        recv_task,
                        send_task,
                    },
                );
            }
            ManagerCmd::Close(id) => {
                if let Some(entry) = connections.remove(&id) {
                    debug!("connection {} closed ({:?})", id, entry.peer);
                    // Dropping the entry drops shutdown_tx and send_tx,
                    // which ends both workers.
                }
            }
            ManagerCmd::Send(id, bytes) => match connections.get(&id) {
                Some(entry) => {
                    if entry.send_tx.send(bytes).is_err() {
                        events.publish(ClientEvent::SendFailed(id));
                    }
                }
                None => {
                    warn!("send to unknown connection {}", id);
                    events.publish(ClientEvent::SendFailed(id));
                }
            },
            ManagerCmd::Broadcast(bytes) => {
                for (id, entry) in &connections {
                    if entry.send_tx.send(bytes.clone()).is_err() {
                        events.publish(ClientEvent::SendFailed(*id));
                    }
                }
            }
            ManagerCmd::Shutdown => {
                let entries: Vec<Entry> = connections.drain().map(|(_, entry)| entry).collect();
                for entry in &entries {
                    let _ = entry.shutdown_tx.send(true);
                }
                // Join the workers so every Disconnected event has been
                // published by the time stop() returns.
                for entry in entries {
                    let _ = entry.recv_task.await;
                    drop(entry.send_tx);
                    let _ = entry.send_task.await;
                }
                break;
            }
        }
    }
}

async fn receive_loop(
    id: ConnectionId,
    mut read_half: OwnedReadHalf,
    mut shutdown_rx: watch::Receiver<bool>,
    events: Arc<EventDispatcher<TcpMessage>>,
    cmd_tx: mpsc::UnboundedSender<ManagerCmd>,
) {
    let mut framer = TcpFramer::new();
    let mut buf = vec![0u8; RECV_BUFFER];

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                break;
            }
            received = read_half.read(&mut buf) => {
                match received {
                    Ok(0) => {
                        debug!("connection {}: peer closed", id);
                        break;
                    }
                    Ok(len) => {
                        for message in framer.push(&buf[..len]) {
                            events.publish(ClientEvent::Message(id, message));
                        }
                    }
                    Err(err) => {
                        debug!("connection {}: receive failed: {}", id, err);
                        break;
                    }
                }
            }
        }
    }

    events.publish(ClientEvent::Disconnected(id));
    let _ = cmd_tx.send(ManagerCmd::Close(id));
}

async fn send_loop(
    id: ConnectionId,
    mut write_half: OwnedWriteHalf,
    mut send_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    events: Arc<EventDispatcher<TcpMessage>>,
) {
    while let Some(bytes) = send_rx.recv().await {
        if let Err(err) = write_half.write_all(&bytes).await {
            warn!("connection {}: send failed: {}", id, err);
            events.publish(ClientEvent::SendFailed(id));
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radscan_core::protocol::colossus::tcp::{TcpMessage, TcpMessageType};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpListener;

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_connection_lifecycle_events_in_order() {
        let events = Arc::new(EventDispatcher::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        events.attach(move |event| {
            let tag = match event {
                ClientEvent::Connected(_) => "connected",
                ClientEvent::Message(_, _) => "message",
                ClientEvent::Disconnected(_) => "disconnected",
                ClientEvent::SendFailed(_) => "send_failed",
            };
            log_clone.lock().unwrap().push(tag);
        });

        let manager = ConnectionManager::spawn(events.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        manager.handle().create_connection(server_side);

        // Peer sends one message then closes
        let msg = TcpMessage::new(TcpMessageType::Health, &[1, 2, 3]);
        {
            use tokio::io::AsyncWriteExt;
            let mut client = client;
            client.write_all(msg.as_bytes()).await.unwrap();
            client.shutdown().await.unwrap();
        }

        wait_for(|| log.lock().unwrap().len() >= 3).await;
        manager.stop().await;

        let log = log.lock().unwrap();
        assert_eq!(&log[..3], &["connected", "message", "disconnected"]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_peer() {
        let events = Arc::new(EventDispatcher::new());
        let manager = ConnectionManager::spawn(events);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        manager.handle().create_connection(server_side);

        let msg = TcpMessage::from_type(TcpMessageType::KeepAlive);
        manager.handle().broadcast(msg.as_bytes().to_vec());

        let mut buf = vec![0u8; msg.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut buf))
            .await
            .expect("broadcast not received")
            .unwrap();
        assert_eq!(buf, msg.as_bytes());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_reports_failure() {
        let events = Arc::new(EventDispatcher::new());
        let failed = Arc::new(Mutex::new(false));

        let failed_clone = failed.clone();
        events.attach(move |event| {
            if matches!(event, ClientEvent::SendFailed(99)) {
                *failed_clone.lock().unwrap() = true;
            }
        });

        let manager = ConnectionManager::spawn(events);
        manager.handle().send(99, vec![1, 2, 3]);

        wait_for(|| *failed.lock().unwrap()).await;
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_publishes_disconnected() {
        let events = Arc::new(EventDispatcher::new());
        let disconnected = Arc::new(Mutex::new(false));

        let disconnected_clone = disconnected.clone();
        events.attach(move |event| {
            if matches!(event, ClientEvent::Disconnected(_)) {
                *disconnected_clone.lock().unwrap() = true;
            }
        });

        let manager = ConnectionManager::spawn(events);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        manager.handle().create_connection(server_side);

        manager.stop().await;
        assert!(*disconnected.lock().unwrap());
    }
}
