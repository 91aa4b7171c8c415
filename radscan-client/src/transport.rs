//! Socket plumbing: TCP connect-with-retry and UDP binding.
//!
//! Socket options that tokio does not expose directly (reuse-address,
//! multicast membership) are set through socket2 before the socket is
//! handed to the runtime.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;

/// Delay between TCP connection attempts.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Connect to the radar, retrying until it answers or the stop signal
/// fires. Returns `None` when stopped.
pub async fn connect_with_retry(
    endpoint: SocketAddrV4,
    stop: &mut watch::Receiver<bool>,
) -> Option<TcpStream> {
    loop {
        if *stop.borrow() {
            return None;
        }
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    return None;
                }
            }
            connected = TcpStream::connect(SocketAddr::V4(endpoint)) => {
                match connected {
                    Ok(stream) => {
                        let _ = stream.set_nodelay(true);
                        debug!("connected to {}", endpoint);
                        return Some(stream);
                    }
                    Err(err) => {
                        debug!("connect to {} failed: {}, retrying", endpoint, err);
                        tokio::select! {
                            _ = stop.changed() => {}
                            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                        }
                    }
                }
            }
        }
    }
}

/// Bind a UDP socket on `bind_addr`, optionally joining a multicast
/// group on the given interface.
pub fn bind_udp(
    bind_addr: SocketAddrV4,
    multicast_group: Option<Ipv4Addr>,
    interface: Ipv4Addr,
) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(bind_addr).into())?;

    if let Some(group) = multicast_group {
        socket.join_multicast_v4(&group, &interface)?;
        debug!("joined multicast group {} on {}", group, interface);
    }

    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_with_retry_stops_on_signal() {
        // Nothing listens on this port; the retry loop must exit as
        // soon as the stop signal fires.
        let endpoint = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1);
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move { connect_with_retry(endpoint, &mut stop_rx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("retry loop did not stop")
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn test_bind_udp_plain() {
        let socket = bind_udp(
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            None,
            Ipv4Addr::UNSPECIFIED,
        )
        .unwrap();
        assert!(socket.local_addr().unwrap().port() != 0);
    }

    #[tokio::test]
    async fn test_udp_datagram_roundtrip() {
        let receiver = bind_udp(
            SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            None,
            Ipv4Addr::UNSPECIFIED,
        )
        .unwrap();
        let addr = receiver.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"ping", addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], b"ping");
    }
}
