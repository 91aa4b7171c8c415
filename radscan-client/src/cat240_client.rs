//! CAT-240 video client façade.
//!
//! Receives ASTERIX category 240 records over UDP. A datagram may
//! carry several records back to back; each is decoded and dispatched
//! independently, and a malformed tail is dropped with a debug log.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;

use log::{debug, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use radscan_core::protocol::cat240::{Cat240Framer, Cat240Message, Cat240MessageType};

use crate::dispatch::MessageDispatcher;
use crate::error::ClientError;
use crate::event::{ClientEvent, ConnectionId, EventDispatcher, SubscriptionId};
use crate::transport::bind_udp;
use crate::udp_client::DATAGRAM_CONNECTION;

const MAX_DATAGRAM: usize = 65_536;

/// Handle passed to CAT-240 handlers. Video reception is one-way;
/// nothing is sent back to the radar.
#[derive(Clone)]
pub struct Cat240Handle;

fn message_key(message: &Cat240Message) -> Cat240MessageType {
    message.msg_type()
}

struct Running {
    socket: Arc<tokio::net::UdpSocket>,
    recv_task: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
    feed_subscription: SubscriptionId,
}

/// Client for CAT-240 radar video over UDP.
pub struct Cat240Client {
    bind: SocketAddrV4,
    multicast_group: Option<Ipv4Addr>,
    interface: Ipv4Addr,
    events: Arc<EventDispatcher<Cat240Message>>,
    dispatcher: MessageDispatcher<Cat240Handle, Cat240Message, Cat240MessageType>,
    running: Option<Running>,
}

impl Cat240Client {
    pub fn new(bind: SocketAddrV4) -> Self {
        Cat240Client {
            bind,
            multicast_group: None,
            interface: Ipv4Addr::UNSPECIFIED,
            events: Arc::new(EventDispatcher::new()),
            dispatcher: MessageDispatcher::new("cat240 dispatcher", message_key),
            running: None,
        }
    }

    /// Join a multicast group on start.
    pub fn with_multicast(mut self, group: Ipv4Addr, interface: Ipv4Addr) -> Self {
        self.multicast_group = Some(group);
        self.interface = interface;
        self
    }

    pub fn events(&self) -> &Arc<EventDispatcher<Cat240Message>> {
        &self.events
    }

    pub fn set_handler(
        &mut self,
        msg_type: Cat240MessageType,
        handler: impl FnMut(&Cat240Handle, ConnectionId, Cat240Message) + Send + 'static,
    ) {
        self.dispatcher.set_handler(msg_type, handler);
    }

    pub fn remove_handler(&mut self, msg_type: Cat240MessageType) {
        self.dispatcher.remove_handler(msg_type);
    }

    pub fn ignore(&mut self, msg_type: Cat240MessageType) {
        self.dispatcher.ignore(msg_type);
    }

    /// Bind the socket and begin dispatching records. Idempotent.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        if self.running.is_some() {
            return Ok(());
        }

        let socket = Arc::new(bind_udp(self.bind, self.multicast_group, self.interface)?);
        info!("cat240 client listening on {}", self.bind);

        self.dispatcher.start(Cat240Handle);
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
                                // Records never straddle datagrams, so a
                                // fresh framer per datagram is correct and
                                // a leftover tail is a decode error.
                                let mut framer = Cat240Framer::new();
                                for message in framer.push(&buf[..len]) {
                                    events.publish(ClientEvent::Message(
                                        DATAGRAM_CONNECTION,
                                        message,
                                    ));
                                }
                                if framer.pending() > 0 {
                                    debug!(
                                        "dropped {} trailing bytes from {}",
                                        framer.pending(),
                                        peer
                                    );
                                }
                            }
                            Err(err) => {
                                debug!("cat240 receive failed: {}", err);
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
        info!("cat240 client stopping");

        let _ = running.stop_tx.send(true);
        let _ = running.recv_task.await;
        self.dispatcher.stop().await;
        self.events.detach(running.feed_subscription);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for Cat240Client {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop_tx.send(true);
            running.recv_task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radscan_core::protocol::cat240::{encode_video, VideoRecord};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn test_video_record_dispatch() {
        let mut client = Cat240Client::new(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        client.set_handler(Cat240MessageType::VideoMessage, move |_, _, message| {
            seen_clone.lock().unwrap().push(message.sweep_counter());
        });

        client.start().await.unwrap();
        let addr = client.local_addr().unwrap();

        // Two records in one datagram
        let mut datagram = Vec::new();
        for sweep in [7u32, 8] {
            let record = encode_video(&VideoRecord {
                sac: 0,
                sic: 1,
                sweep_counter: sweep,
                start_azimuth_raw: 100,
                end_azimuth_raw: 263,
                start_range: 0,
                cell_duration: 584,
                compressed: false,
                resolution: 4,
                time_of_day_128s: 0,
                cells: &[1, 2, 3, 4],
            });
            datagram.extend_from_slice(record.as_bytes());
        }

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(&datagram, addr).await.unwrap();

        for _ in 0..200 {
            if seen.lock().unwrap().len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        client.stop().await;

        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
    }
}
