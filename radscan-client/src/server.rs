//! Colossus TCP server façade.
//!
//! An acceptor worker listens for inbound radar-client connections and
//! hands each accepted socket to the connection manager; the same
//! handler surface as the client applies to received messages. The
//! server is also what the test suite uses as a mock radar.

use std::net::SocketAddrV4;
use std::sync::Arc;

use log::{debug, info};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use radscan_core::protocol::colossus::tcp::{TcpMessage, TcpMessageType};

use crate::connection::{ConnectionManager, ConnectionManagerHandle};
use crate::dispatch::MessageDispatcher;
use crate::error::ClientError;
use crate::event::{ClientEvent, ConnectionId, EventDispatcher, SubscriptionId};

/// Handle passed to server-side message handlers.
#[derive(Clone)]
pub struct ServerHandle {
    manager: ConnectionManagerHandle,
}

impl ServerHandle {
    /// Send to one client connection.
    pub fn send(&self, id: ConnectionId, message: TcpMessage) {
        self.manager.send(id, message.into_bytes());
    }

    /// Send to every client connection.
    pub fn broadcast(&self, message: TcpMessage) {
        self.manager.broadcast(message.into_bytes());
    }

    pub fn close(&self, id: ConnectionId) {
        self.manager.close_connection(id);
    }
}

fn message_key(message: &TcpMessage) -> TcpMessageType {
    message.msg_type()
}

struct Running {
    manager_handle: ConnectionManagerHandle,
    manager: ConnectionManager,
    acceptor_task: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
    feed_subscription: SubscriptionId,
    local_addr: SocketAddrV4,
}

/// Accepts Colossus TCP connections and dispatches their messages.
pub struct ColossusTcpServer {
    listen: SocketAddrV4,
    events: Arc<EventDispatcher<TcpMessage>>,
    dispatcher: MessageDispatcher<ServerHandle, TcpMessage, TcpMessageType>,
    running: Option<Running>,
}

impl ColossusTcpServer {
    pub fn new(listen: SocketAddrV4) -> Self {
        ColossusTcpServer {
            listen,
            events: Arc::new(EventDispatcher::new()),
            dispatcher: MessageDispatcher::new("tcp server dispatcher", message_key),
            running: None,
        }
    }

    pub fn events(&self) -> &Arc<EventDispatcher<TcpMessage>> {
        &self.events
    }

    pub fn set_handler(
        &mut self,
        msg_type: TcpMessageType,
        handler: impl FnMut(&ServerHandle, ConnectionId, TcpMessage) + Send + 'static,
    ) {
        self.dispatcher.set_handler(msg_type, handler);
    }

    pub fn remove_handler(&mut self, msg_type: TcpMessageType) {
        self.dispatcher.remove_handler(msg_type);
    }

    pub fn ignore(&mut self, msg_type: TcpMessageType) {
        self.dispatcher.ignore(msg_type);
    }

    /// Bind and start accepting. Returns the bind error if the listen
    /// endpoint is unavailable. Idempotent.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        if self.running.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = match listener.local_addr()? {
            std::net::SocketAddr::V4(addr) => addr,
            other => {
                return Err(ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("unexpected local address {}", other),
                )))
            }
        };
        info!("colossus tcp server listening on {}", local_addr);

        let manager = ConnectionManager::spawn(self.events.clone());
        let manager_handle = manager.handle();

        self.dispatcher.start(ServerHandle {
            manager: manager_handle.clone(),
        });
        let feed = self.dispatcher.feed().expect("dispatcher just started");

        let feed_subscription = self.events.attach(move |event| {
            if let ClientEvent::Message(id, message) = event {
                feed.push(id, message);
            }
        });

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let acceptor_manager = manager_handle.clone();
        let acceptor_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!("acceptor: connection from {}", peer);
                                let _ = stream.set_nodelay(true);
                                acceptor_manager.create_connection(stream);
                            }
                            Err(err) => {
                                // A system error ends the accept loop
                                debug!("acceptor: accept failed: {}", err);
                                break;
                            }
                        }
                    }
                }
            }
            debug!("acceptor: stopped");
        });

        self.running = Some(Running {
            manager_handle,
            manager,
            acceptor_task,
            stop_tx,
            feed_subscription,
            local_addr,
        });
        Ok(())
    }

    /// The bound listen address; useful when listening on port 0.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Stop accepting, close every connection and join the workers.
    /// Idempotent.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("colossus tcp server stopping");

        let _ = running.stop_tx.send(true);
        let _ = running.acceptor_task.await;
        running.manager.stop().await;
        self.dispatcher.stop().await;
        self.events.detach(running.feed_subscription);
    }

    /// Send a message to one client.
    pub fn send(&self, id: ConnectionId, message: TcpMessage) -> Result<(), ClientError> {
        match &self.running {
            Some(running) => {
                running.manager_handle.send(id, message.into_bytes());
                Ok(())
            }
            None => Err(ClientError::NotRunning),
        }
    }

    /// Send a message to every connected client.
    pub fn broadcast(&self, message: TcpMessage) -> Result<(), ClientError> {
        match &self.running {
            Some(running) => {
                running.manager_handle.broadcast(message.into_bytes());
                Ok(())
            }
            None => Err(ClientError::NotRunning),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for ColossusTcpServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(true);
            running.acceptor_task.abort();
        }
    }
}
