//! Colossus UDP client façade.
//!
//! Binds a datagram socket (optionally joining a multicast group) and
//! dispatches each datagram as exactly one message. Undecodable or
//! truncated datagrams are dropped with a debug log; there is no
//! resynchronisation state to keep between datagrams.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use log::{debug, info};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use radscan_core::protocol::colossus::udp::{UdpMessage, UdpMessageType};

use crate::dispatch::MessageDispatcher;
use crate::error::ClientError;
use crate::event::{ClientEvent, ConnectionId, EventDispatcher, SubscriptionId};
use crate::transport::bind_udp;

/// Synthetic connection id used for the bound datagram socket.
pub const DATAGRAM_CONNECTION: ConnectionId = 1;

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 65_536;

/// Handle passed to UDP message handlers.
#[derive(Clone)]
pub struct UdpHandle {
    socket: Arc<UdpSocket>,
}

impl UdpHandle {
    /// Fire one message at a peer. Errors (full socket buffer, etc.)
    /// are reported to the caller.
    pub fn send_datagram(
        &self,
        message: &UdpMessage,
        peer: SocketAddrV4,
    ) -> std::io::Result<usize> {
        self.socket.try_send_to(message.as_bytes(), peer.into())
    }
}

fn message_key(message: &UdpMessage) -> UdpMessageType {
    message.msg_type()
}

struct Running {
    socket: Arc<UdpSocket>,
    recv_task: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
    feed_subscription: SubscriptionId,
}

/// Client for Colossus point-cloud / IMU streams over UDP.
pub struct ColossusUdpClient {
    bind: SocketAddrV4,
    multicast_group: Option<Ipv4Addr>,
    interface: Ipv4Addr,
    events: Arc<EventDispatcher<UdpMessage>>,
    dispatcher: MessageDispatcher<UdpHandle, UdpMessage, UdpMessageType>,
    running: Option<Running>,
}

impl ColossusUdpClient {
    pub fn new(bind: SocketAddrV4) -> Self {
        ColossusUdpClient {
            bind,
            multicast_group: None,
            interface: Ipv4Addr::UNSPECIFIED,
            events: Arc::new(EventDispatcher::new()),
            dispatcher: MessageDispatcher::new("udp client dispatcher", message_key),
            running: None,
        }
    }

    /// Join a multicast group on start.
    pub fn with_multicast(mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Self {
        self.multicast_group = Some(group);
        self.interface = interface;
        self
    }

    pub fn events(&self) -> &Arc<EventDispatcher<UdpMessage>> {
        &self.events
    }

    pub fn set_handler(
        &mut self,
        msg_type: UdpMessageType,
        handler: impl FnMut(&UdpHandle, ConnectionId, UdpMessage) + Send + 'static,
    ) {
        self.dispatcher.set_handler(msg_type, handler);
    }

    pub fn remove_handler(&mut self, msg_type: UdpMessageType) {
        self.dispatcher.remove_handler(msg_type);
    }

    pub fn ignore(&mut self, msg_type: UdpMessageType) {
        self.dispatcher.ignore(msg_type);
    }

    /// Bind the socket and begin dispatching datagrams. Idempotent.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        if self.running.is_some() {
            return Ok(());
        }

        let socket = Arc::new(bind_udp(self.bind, self.multicast_group, self.interface)?);
        info!("colossus udp client listening on {}", self.bind);

        self.dispatcher.start(UdpHandle {
            socket: socket.clone(),
        });
        let feed = self.dispatcher.feed().expect("dispatcher just started");

        let feed_subscription = self.events.attach(move |event| {
            if let ClientEvent::Message(id, message) = event {
                feed.push(id, message);
            }
        });

        self.events
            .publish(ClientEvent::Connected(DATAGRAM_CONNECTION));

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let events = self.events.clone();
        let recv_socket = socket.clone();
        let recv_task = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        break;
                    }
                    received = recv_socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, peer)) => {
                                match UdpMessage::from_datagram(buf[..len].to_vec()) {
                                    Ok(message) => events
                                        .publish(ClientEvent::Message(DATAGRAM_CONNECTION, message)),
                                    Err(err) => {
                                        debug!("dropped datagram from {}: {}", peer, err);
                                    }
                                }
                            }
                            Err(err) => {
                                debug!("udp receive failed: {}", err);
                                break;
                            }
                        }
                    }
                }
            }
            events.publish(ClientEvent::Disconnected(DATAGRAM_CONNECTION));
        });

        self.running = Some(Running {
            socket,
            recv_task,
            stop_tx,
            feed_subscription,
        });
        Ok(())
    }

    /// The bound local address; useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddrV4> {
        let running = self.running.as_ref()?;
        match running.socket.local_addr() {
            Ok(std::net::SocketAddr::V4(addr)) => Some(addr),
            _ => None,
        }
    }

    /// Stop receiving and join the workers. Idempotent.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        info!("colossus udp client stopping");

        let _ = running.stop_tx.send(true);
        let _ = running.recv_task.await;
        self.dispatcher.stop().await;
        self.events.detach(running.feed_subscription);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for ColossusUdpClient {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(true);
            running.recv_task.abort();
        }
    }
}
