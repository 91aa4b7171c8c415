//! Colossus TCP client façade.
//!
//! Composes the connection manager, framer-driven receive path, event
//! dispatcher and message dispatcher into one user-facing object:
//!
//! ```rust,no_run
//! use radscan_client::client::ColossusTcpClient;
//! use radscan_core::protocol::colossus::tcp::TcpMessageType;
//! use std::net::{Ipv4Addr, SocketAddrV4};
//!
//! # async fn run() {
//! let mut radar = ColossusTcpClient::new(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 6317));
//! radar.set_handler(TcpMessageType::Configuration, |radar, _id, _msg| {
//!     // The radar always sends a configuration message on connect
//!     radar.send_type(TcpMessageType::StartFftData);
//! });
//! radar.ignore(TcpMessageType::KeepAlive);
//! radar.start().await.unwrap();
//! # }
//! ```
//!
//! Start and stop are idempotent; stop joins every owned worker.

use std::net::SocketAddrV4;
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use radscan_core::protocol::colossus::tcp::{TcpMessage, TcpMessageType};

use crate::connection::{ConnectionManager, ConnectionManagerHandle};
use crate::dispatch::MessageDispatcher;
use crate::error::ClientError;
use crate::event::{ClientEvent, ConnectionId, EventDispatcher, SubscriptionId};
use crate::transport::connect_with_retry;

/// Handle passed to message handlers; send operations go back to the
/// radar connection this client maintains.
#[derive(Clone)]
pub struct ClientHandle {
    manager: ConnectionManagerHandle,
}

impl ClientHandle {
    pub fn send(&self, message: TcpMessage) {
        self.manager.broadcast(message.into_bytes());
    }

    /// Send a header-only message for the given type tag.
    pub fn send_type(&self, msg_type: TcpMessageType) {
        self.send(TcpMessage::from_type(msg_type));
    }
}

fn message_key(message: &TcpMessage) -> TcpMessageType {
    message.msg_type()
}

type TcpDispatcher = MessageDispatcher<ClientHandle, TcpMessage, TcpMessageType>;

struct Running {
    manager_handle: ConnectionManagerHandle,
    manager: ConnectionManager,
    connect_task: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
    feed_subscription: SubscriptionId,
}

/// Client for a Colossus radar over TCP.
pub struct ColossusTcpClient {
    endpoint: SocketAddrV4,
    events: Arc<EventDispatcher<TcpMessage>>,
    dispatcher: TcpDispatcher,
    running: Option<Running>,
}

impl ColossusTcpClient {
    pub fn new(endpoint: SocketAddrV4) -> Self {
        ColossusTcpClient {
            endpoint,
            events: Arc::new(EventDispatcher::new()),
            dispatcher: MessageDispatcher::new("tcp client dispatcher", message_key),
            running: None,
        }
    }

    /// The radar endpoint this client connects to.
    pub fn endpoint(&self) -> SocketAddrV4 {
        self.endpoint
    }

    /// Lifecycle events (connected / disconnected / send failures) for
    /// subscribers that want more than message handlers.
    pub fn events(&self) -> &Arc<EventDispatcher<TcpMessage>> {
        &self.events
    }

    /// Install a handler for a message type. Handlers installed while
    /// stopped take effect on the next start.
    pub fn set_handler(
        &mut self,
        msg_type: TcpMessageType,
        handler: impl FnMut(&ClientHandle, ConnectionId, TcpMessage) + Send + 'static,
    ) {
        self.dispatcher.set_handler(msg_type, handler);
    }

    pub fn remove_handler(&mut self, msg_type: TcpMessageType) {
        self.dispatcher.remove_handler(msg_type);
    }

    /// Suppress the "no handler" log for a type. The radar sends
    /// keep-alives unsolicited, so clients that don't want them
    /// normally call `ignore(TcpMessageType::KeepAlive)`.
    pub fn ignore(&mut self, msg_type: TcpMessageType) {
        self.dispatcher.ignore(msg_type);
    }

    /// Connect (retrying until the radar answers) and begin
    /// dispatching. Idempotent.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        if self.running.is_some() {
            debug!("client already started");
            return Ok(());
        }
        info!("colossus tcp client connecting to {}", self.endpoint);

        let manager = ConnectionManager::spawn(self.events.clone());
        let manager_handle = manager.handle();

        self.dispatcher.start(ClientHandle {
            manager: manager_handle.clone(),
        });
        let feed = self.dispatcher.feed().expect("dispatcher just started");

        // Route decoded messages into the dispatcher's queue and use
        // disconnects to drive reconnection.
        let disconnected = Arc::new(Notify::new());
        let notify = disconnected.clone();
        let feed_subscription = self.events.attach(move |event| match event {
            ClientEvent::Message(id, message) => {
                feed.push(id, message);
            }
            ClientEvent::Connected(id) => {
                info!("radar connection {} up", id);
            }
            ClientEvent::Disconnected(id) => {
                info!("radar connection {} down", id);
                notify.notify_one();
            }
            ClientEvent::SendFailed(id) => {
                debug!("send failed on connection {}", id);
            }
        });

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let endpoint = self.endpoint;
        let connect_manager = manager_handle.clone();
        let connect_task = tokio::spawn(async move {
            loop {
                let Some(stream) = connect_with_retry(endpoint, &mut stop_rx).await else {
                    break;
                };
                connect_manager.create_connection(stream);

                // Hold off until this connection drops, then reconnect
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = disconnected.notified() => {}
                }
            }
        });

        self.running = Some(Running {
            manager_handle,
            manager,
            connect_task,
            stop_tx,
            feed_subscription,
        });
        Ok(())
    }

    /// Disconnect and join every owned worker. Idempotent; handlers
    /// stay installed for a later start.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("colossus tcp client stopping");

        let _ = running.stop_tx.send(true);
        let _ = running.connect_task.await;
        running.manager.stop().await;
        self.dispatcher.stop().await;
        self.events.detach(running.feed_subscription);
    }

    /// Send a message to the radar.
    pub fn send(&self, message: TcpMessage) -> Result<(), ClientError> {
        match &self.running {
            Some(running) => {
                running.manager_handle.broadcast(message.into_bytes());
                Ok(())
            }
            None => Err(ClientError::NotRunning),
        }
    }

    /// Send a header-only message for the given type tag.
    pub fn send_type(&self, msg_type: TcpMessageType) -> Result<(), ClientError> {
        self.send(TcpMessage::from_type(msg_type))
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for ColossusTcpClient {
    fn drop(&mut self) {
        // Best effort: fire the stop signals so the workers wind down
        // even when the owner forgot to stop(). The graceful path that
        // joins the workers is stop().
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(true);
            running.connect_task.abort();
        }
    }
}
