//! Offline playback of recorded sessions.
//!
//! Replays a capture file through the same dispatcher surface a live
//! client uses, so handler code cannot tell a recording from a radar.
//! `RealTime` timing reproduces the recorded inter-arrival spacing
//! from the monotonic timestamps; `AsFastAsPossible` never sleeps.
//! At end of file the client publishes a synthetic `Disconnected` and
//! the playback worker finishes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use radscan_core::protocol::colossus::tcp::{TcpMessage, TcpMessageType};
use radscan_core::protocol::colossus::udp::{UdpMessage, UdpMessageType};
use radscan_core::recording::{RecordingMetadata, RecordingReader, Transport};

use crate::dispatch::MessageDispatcher;
use crate::error::ClientError;
use crate::event::{ClientEvent, ConnectionId, EventDispatcher, SubscriptionId};

/// Synthetic connection id a recording plays back on.
pub const PLAYBACK_CONNECTION: ConnectionId = 1;

/// Pacing of replayed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackTiming {
    /// Sleep between records to reproduce the original spacing
    #[default]
    RealTime,
    /// Deliver records back to back
    AsFastAsPossible,
}

/// Handle passed to playback handlers. A recording cannot be sent to,
/// so send requests are logged and dropped.
#[derive(Clone)]
pub struct PlaybackHandle;

impl PlaybackHandle {
    pub fn send(&self, _message: TcpMessage) {
        debug!("send ignored during playback");
    }

    pub fn send_type(&self, _msg_type: TcpMessageType) {
        debug!("send ignored during playback");
    }
}

fn tcp_key(message: &TcpMessage) -> TcpMessageType {
    message.msg_type()
}

fn udp_key(message: &UdpMessage) -> UdpMessageType {
    message.msg_type()
}

type FileClosedCallback = Arc<dyn Fn(ConnectionId) + Send + Sync>;

struct Running {
    // Taken by whichever of join/stop gets there first
    playback_task: Option<JoinHandle<()>>,
    stop_tx: watch::Sender<bool>,
    feed_subscription: SubscriptionId,
}

/// Replays a recording through the live-client handler surface.
pub struct OfflineClient {
    path: PathBuf,
    timing: PlaybackTiming,
    events: Arc<EventDispatcher<TcpMessage>>,
    tcp_dispatcher: MessageDispatcher<PlaybackHandle, TcpMessage, TcpMessageType>,
    udp_dispatcher: MessageDispatcher<PlaybackHandle, UdpMessage, UdpMessageType>,
    file_closed: Option<FileClosedCallback>,
    metadata: Option<RecordingMetadata>,
    running: Option<Running>,
}

impl OfflineClient {
    pub fn new(path: impl Into<PathBuf>, timing: PlaybackTiming) -> Self {
        OfflineClient {
            path: path.into(),
            timing,
            events: Arc::new(EventDispatcher::new()),
            tcp_dispatcher: MessageDispatcher::new("playback tcp dispatcher", tcp_key),
            udp_dispatcher: MessageDispatcher::new("playback udp dispatcher", udp_key),
            file_closed: None,
            metadata: None,
            running: None,
        }
    }

    pub fn events(&self) -> &Arc<EventDispatcher<TcpMessage>> {
        &self.events
    }

    /// Metadata of the opened recording; available after `start`.
    pub fn metadata(&self) -> Option<&RecordingMetadata> {
        self.metadata.as_ref()
    }

    pub fn set_handler(
        &mut self,
        msg_type: TcpMessageType,
        handler: impl FnMut(&PlaybackHandle, ConnectionId, TcpMessage) + Send + 'static,
    ) {
        self.tcp_dispatcher.set_handler(msg_type, handler);
    }

    pub fn remove_handler(&mut self, msg_type: TcpMessageType) {
        self.tcp_dispatcher.remove_handler(msg_type);
    }

    pub fn ignore(&mut self, msg_type: TcpMessageType) {
        self.tcp_dispatcher.ignore(msg_type);
    }

    pub fn set_udp_handler(
        &mut self,
        msg_type: UdpMessageType,
        handler: impl FnMut(&PlaybackHandle, ConnectionId, UdpMessage) + Send + 'static,
    ) {
        self.udp_dispatcher.set_handler(msg_type, handler);
    }

    pub fn ignore_udp(&mut self, msg_type: UdpMessageType) {
        self.udp_dispatcher.ignore(msg_type);
    }

    /// Invoked once the recording has been fully replayed.
    pub fn set_file_closed_handler(&mut self, handler: impl Fn(ConnectionId) + Send + Sync + 'static) {
        self.file_closed = Some(Arc::new(handler));
    }

    /// Open the recording and start replaying. Fails if the file is
    /// missing or its header is corrupt. Idempotent.
    pub async fn start(&mut self) -> Result<(), ClientError> {
        if self.running.is_some() {
            return Ok(());
        }

        let file = std::fs::File::open(&self.path)?;
        let mut reader = RecordingReader::open(std::io::BufReader::new(file))?;
        let metadata = *reader.metadata();
        info!(
            "playback of {} ({} us of recording from {})",
            self.path.display(),
            metadata.duration_us(),
            metadata.radar_ip
        );
        self.metadata = Some(metadata);

        self.tcp_dispatcher.start(PlaybackHandle);
        self.udp_dispatcher.start(PlaybackHandle);
        let tcp_feed = self.tcp_dispatcher.feed().expect("dispatcher just started");
        let udp_feed = self.udp_dispatcher.feed().expect("dispatcher just started");

        let feed_subscription = self.events.attach(move |event| {
            if let ClientEvent::Message(id, message) = event {
                tcp_feed.push(id, message);
            }
        });

        self.events
            .publish(ClientEvent::Connected(PLAYBACK_CONNECTION));

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let events = self.events.clone();
        let timing = self.timing;
        let file_closed = self.file_closed.clone();
        let playback_task = tokio::spawn(async move {
            let started = Instant::now();
            let mut first_timestamp: Option<u64> = None;

            loop {
                if *stop_rx.borrow() {
                    break;
                }

                let record = match reader.next_record() {
                    Ok(Some(record)) => record,
                    Ok(None) => {
                        debug!("playback: end of recording");
                        break;
                    }
                    Err(err) => {
                        warn!("playback: read failed: {}", err);
                        break;
                    }
                };

                if timing == PlaybackTiming::RealTime {
                    let first = *first_timestamp.get_or_insert(record.timestamp_us);
                    let target = Duration::from_micros(record.timestamp_us - first);
                    let elapsed = started.elapsed();
                    if target > elapsed {
                        tokio::select! {
                            _ = stop_rx.changed() => continue,
                            _ = tokio::time::sleep(target - elapsed) => {}
                        }
                    }
                }

                match record.transport {
                    Transport::Tcp => match TcpMessage::from_frame(record.data) {
                        Ok(message) => {
                            events.publish(ClientEvent::Message(PLAYBACK_CONNECTION, message));
                        }
                        Err(err) => debug!("playback: bad TCP record: {}", err),
                    },
                    Transport::Udp => match UdpMessage::from_datagram(record.data) {
                        Ok(message) => {
                            udp_feed.push(PLAYBACK_CONNECTION, message);
                        }
                        Err(err) => debug!("playback: bad UDP record: {}", err),
                    },
                }
            }

            events.publish(ClientEvent::Disconnected(PLAYBACK_CONNECTION));
            if let Some(callback) = file_closed {
                callback(PLAYBACK_CONNECTION);
            }
        });

        self.running = Some(Running {
            playback_task: Some(playback_task),
            stop_tx,
            feed_subscription,
        });
        Ok(())
    }

    /// Wait for the recording to finish replaying.
    pub async fn join(&mut self) {
        if let Some(running) = &mut self.running {
            if let Some(task) = running.playback_task.take() {
                let _ = task.await;
            }
        }
    }

    /// Stop replaying and join the workers. Idempotent.
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        info!("playback stopping");

        let _ = running.stop_tx.send(true);
        if let Some(task) = running.playback_task.take() {
            let _ = task.await;
        }
        self.tcp_dispatcher.stop().await;
        self.udp_dispatcher.stop().await;
        self.events.detach(running.feed_subscription);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

impl Drop for OfflineClient {
    fn drop(&mut self) {
        if let Some(mut running) = self.running.take() {
            let _ = running.stop_tx.send(true);
            if let Some(task) = running.playback_task.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radscan_core::protocol::colossus::tcp::encode_fft_data;
    use radscan_core::recording::{Record, RecordingMetadata, RecordingWriter};
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn write_recording(name: &str, timestamps_us: &[u64]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "radscan-playback-{}-{}.rec",
            std::process::id(),
            name
        ));
        let file = std::fs::File::create(&path).unwrap();
        let metadata = RecordingMetadata {
            start_wall_us: 1_000,
            end_wall_us: 0,
            start_mono_us: 0,
            end_mono_us: 0,
            radar_ip: Ipv4Addr::LOCALHOST,
        };
        let mut writer = RecordingWriter::new(file, metadata).unwrap();
        for (index, &timestamp_us) in timestamps_us.iter().enumerate() {
            let message = encode_fft_data(index as u16, index as u16, 0, 0, &[0u8; 8]);
            writer
                .write_record(&Record {
                    timestamp_us,
                    transport: radscan_core::recording::Transport::Tcp,
                    data: message.as_bytes().to_vec(),
                })
                .unwrap();
        }
        let last = timestamps_us.last().copied().unwrap_or(0);
        writer.finish(2_000, last).unwrap();
        path
    }

    #[tokio::test]
    async fn test_replays_all_records() {
        let path = write_recording("all", &[0, 100, 200]);
        let mut client = OfflineClient::new(&path, PlaybackTiming::AsFastAsPossible);

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        client.set_handler(TcpMessageType::FftData, move |_, _, _| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let closed = Arc::new(AtomicUsize::new(0));
        let closed_clone = closed.clone();
        client.set_file_closed_handler(move |_| {
            closed_clone.fetch_add(1, Ordering::SeqCst);
        });

        client.start().await.unwrap();
        client.join().await;
        client.stop().await;

        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_real_time_pacing() {
        // Two records 250 ms apart in monotonic time
        let path = write_recording("pacing", &[1_000_000, 1_250_000]);
        let mut client = OfflineClient::new(&path, PlaybackTiming::RealTime);

        let arrivals = Arc::new(Mutex::new(Vec::new()));
        let arrivals_clone = arrivals.clone();
        client.set_handler(TcpMessageType::FftData, move |_, _, _| {
            arrivals_clone.lock().unwrap().push(Instant::now());
        });

        client.start().await.unwrap();
        client.join().await;
        client.stop().await;

        let arrivals = arrivals.lock().unwrap();
        assert_eq!(arrivals.len(), 2);
        // The second record must not arrive sooner than the recorded gap
        assert!(arrivals[1].duration_since(arrivals[0]) >= Duration::from_millis(250));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_missing_file_fails_start() {
        let mut client =
            OfflineClient::new("/nonexistent/radscan.rec", PlaybackTiming::RealTime);
        assert!(client.start().await.is_err());
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let path = write_recording("events", &[0]);
        let mut client = OfflineClient::new(&path, PlaybackTiming::AsFastAsPossible);
        client.ignore(TcpMessageType::FftData);

        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        client.events().attach(move |event| {
            let tag = match event {
                ClientEvent::Connected(_) => "connected",
                ClientEvent::Disconnected(_) => "disconnected",
                ClientEvent::Message(_, _) => "message",
                ClientEvent::SendFailed(_) => "send_failed",
            };
            log_clone.lock().unwrap().push(tag);
        });

        client.start().await.unwrap();
        client.join().await;
        client.stop().await;

        let log = log.lock().unwrap();
        assert_eq!(log.first(), Some(&"connected"));
        assert_eq!(log.last(), Some(&"disconnected"));
        let _ = std::fs::remove_file(path);
    }
}
