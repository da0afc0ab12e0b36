//! UDP broadcast transport: owns the sockets, runs the receive loop, applies
//! dedup, delivers decoded messages to the registered listener.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use lanchat_core::{decode_frame, encode_frame, Message, SeenIds, MAX_FRAME_LEN};
use tokio::net::UdpSocket;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::keepalive::RadioLock;

/// Well-known chat port.
pub const BROADCAST_PORT: u16 = 9876;
/// Limited broadcast: every device on the local segment.
pub const BROADCAST_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::BROADCAST);

/// Delivery/error callback surface. Callbacks run on the receive-loop task
/// and must not block; hand off to a channel for anything slow.
pub trait ChatListener: Send + Sync {
    fn on_message(&self, message: Message);
    fn on_error(&self, error: String);
}

/// Point-in-time transport snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportStats {
    pub initialized: bool,
    pub receiving: bool,
    pub seen_count: usize,
}

struct Sockets {
    send: Arc<UdpSocket>,
    // Held so close() drops the receive socket together with the send one;
    // the loop task owns its own clone.
    _recv: Arc<UdpSocket>,
}

struct Inner {
    broadcast_addr: IpAddr,
    port: u16,
    radio: Mutex<Box<dyn RadioLock + Send>>,
    sockets: Mutex<Option<Sockets>>,
    seen: Mutex<SeenIds>,
    listener: Mutex<Option<Arc<dyn ChatListener>>>,
    receiving: AtomicBool,
    bound_port: AtomicU16,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

/// Broadcast chat transport. All operations may be called from concurrent
/// tasks; `close` drops the sockets under the state lock so a racing
/// `send_message` fails cleanly instead of writing to a closed descriptor.
pub struct BroadcastTransport {
    inner: Arc<Inner>,
}

impl BroadcastTransport {
    pub fn new(broadcast_addr: IpAddr, port: u16, radio: Box<dyn RadioLock + Send>) -> Self {
        BroadcastTransport {
            inner: Arc::new(Inner {
                broadcast_addr,
                port,
                radio: Mutex::new(radio),
                sockets: Mutex::new(None),
                seen: Mutex::new(SeenIds::new()),
                listener: Mutex::new(None),
                receiving: AtomicBool::new(false),
                bound_port: AtomicU16::new(0),
                shutdown: Mutex::new(None),
                loop_task: Mutex::new(None),
            }),
        }
    }

    /// Acquire the radio lock, open both sockets and start the receive loop.
    /// Returns false (after an error callback, if a listener is registered)
    /// when any resource acquisition fails; the transport stays inactive.
    pub async fn init(&self) -> bool {
        match self.try_init().await {
            Ok(()) => {
                info!(port = self.local_port(), "broadcast transport ready");
                true
            }
            Err(e) => {
                warn!("initialization failed: {e}");
                self.inner
                    .report_error(format!("initialization failed: {e}"))
                    .await;
                false
            }
        }
    }

    /// Build, encode and broadcast one message. Returns false for blank
    /// input (silently), for an oversized frame (with an error callback),
    /// when the transport is not active, or on a socket write failure.
    pub async fn send_message(&self, sender: &str, content: &str) -> bool {
        if sender.trim().is_empty() || content.trim().is_empty() {
            debug!("refusing blank sender or content");
            return false;
        }
        let message = Message::create(sender, content);
        let frame = match encode_frame(&message) {
            Ok(f) => f,
            Err(e) => {
                warn!("cannot encode message: {e}");
                self.inner.report_error(format!("message rejected: {e}")).await;
                return false;
            }
        };
        let send_socket = {
            let sockets = self.inner.sockets.lock().await;
            match sockets.as_ref() {
                Some(s) => s.send.clone(),
                None => {
                    self.inner
                        .report_error("transport not initialized".to_string())
                        .await;
                    return false;
                }
            }
        };
        // Pre-register the id: the receive loop observes our own broadcast
        // and must recognize it as self-echo.
        self.inner.seen.lock().await.insert(&message.id);
        let dest = SocketAddr::new(self.inner.broadcast_addr, self.local_port());
        match send_socket.send_to(&frame, dest).await {
            Ok(_) => {
                debug!("sent {} ({} bytes)", message.id, frame.len());
                true
            }
            Err(e) => {
                warn!("send failed: {e}");
                self.inner
                    .report_error(format!("failed to send message: {e}"))
                    .await;
                false
            }
        }
    }

    /// Register the delivery/error callback, replacing any previous one.
    pub async fn set_listener(&self, listener: Arc<dyn ChatListener>) {
        *self.inner.listener.lock().await = Some(listener);
    }

    pub async fn stats(&self) -> TransportStats {
        TransportStats {
            initialized: self.inner.sockets.lock().await.is_some(),
            receiving: self.inner.receiving.load(Ordering::SeqCst),
            seen_count: self.inner.seen.lock().await.len(),
        }
    }

    /// Port the receive socket is bound to; 0 before init. Differs from the
    /// configured port only when the transport was configured with port 0.
    pub fn local_port(&self) -> u16 {
        self.inner.bound_port.load(Ordering::SeqCst)
    }

    async fn try_init(&self) -> io::Result<()> {
        let mut sockets = self.inner.sockets.lock().await;
        if sockets.is_some() {
            return Ok(());
        }
        self.inner.radio.lock().await.acquire()?;
        let (send, recv, port) = match open_sockets(self.inner.port) {
            Ok(triple) => triple,
            Err(e) => {
                self.inner.radio.lock().await.release();
                return Err(e);
            }
        };
        self.inner.bound_port.store(port, Ordering::SeqCst);

        let recv = Arc::new(recv);
        *sockets = Some(Sockets {
            send: Arc::new(send),
            _recv: recv.clone(),
        });
        let (tx, rx) = watch::channel(false);
        *self.inner.shutdown.lock().await = Some(tx);
        self.inner.receiving.store(true, Ordering::SeqCst);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { recv_loop(inner, recv, rx).await });
        *self.inner.loop_task.lock().await = Some(handle);
        Ok(())
    }

    /// Stop the receive loop, drop both sockets, release the radio lock and
    /// clear the seen-id set. Idempotent.
    pub async fn close(&self) {
        self.inner.receiving.store(false, Ordering::SeqCst);
        let shutdown = self.inner.shutdown.lock().await.take();
        if let Some(tx) = shutdown {
            let _ = tx.send(true);
        }
        let task = self.inner.loop_task.lock().await.take();
        if let Some(handle) = task {
            let _ = handle.await;
        }
        *self.inner.sockets.lock().await = None;
        self.inner.radio.lock().await.release();
        self.inner.seen.lock().await.clear();
        info!("broadcast transport closed");
    }
}

impl Inner {
    async fn handle_datagram(&self, bytes: &[u8], from: SocketAddr) {
        let message = match decode_frame(bytes) {
            Ok(m) => m,
            // Malformed or corrupt frames are dropped with no callback.
            Err(e) => {
                debug!("dropping invalid frame from {from}: {e}");
                return;
            }
        };
        let fresh = self.seen.lock().await.insert(&message.id);
        if !fresh {
            debug!("dropping duplicate {} from {from}", message.id);
            return;
        }
        debug!("message {} from {} ({from})", message.id, message.sender);
        let listener = self.listener.lock().await.clone();
        if let Some(l) = listener {
            l.on_message(message);
        }
    }

    async fn report_error(&self, error: String) {
        let listener = self.listener.lock().await.clone();
        if let Some(l) = listener {
            l.on_error(error);
        }
    }
}

/// Open the send socket (any port, SO_BROADCAST) and the receive socket
/// (bound to `port`). Configured as std sockets, then handed to tokio.
/// Also returns the port the receive socket actually bound to.
fn open_sockets(port: u16) -> io::Result<(UdpSocket, UdpSocket, u16)> {
    let send = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    send.set_broadcast(true)?;
    send.set_nonblocking(true)?;
    let recv = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    recv.set_broadcast(true)?;
    recv.set_nonblocking(true)?;
    let bound = recv.local_addr()?.port();
    Ok((UdpSocket::from_std(send)?, UdpSocket::from_std(recv)?, bound))
}

/// One iteration per datagram. Socket errors are reported and the loop keeps
/// going; it exits only on the shutdown signal (or an error after deactivation).
async fn recv_loop(inner: Arc<Inner>, socket: Arc<UdpSocket>, mut shutdown: watch::Receiver<bool>) {
    let mut buf = vec![0u8; MAX_FRAME_LEN];
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            res = socket.recv_from(&mut buf) => match res {
                Ok((n, from)) => inner.handle_datagram(&buf[..n], from).await,
                Err(e) => {
                    if !inner.receiving.load(Ordering::SeqCst) {
                        break;
                    }
                    warn!("receive error: {e}");
                    inner.report_error(format!("receive error: {e}")).await;
                }
            },
        }
    }
    inner.receiving.store(false, Ordering::SeqCst);
    debug!("receive loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keepalive::NoopRadioLock;
    use lanchat_core::HEADER_SIZE;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct RecordingListener {
        messages: mpsc::UnboundedSender<Message>,
        errors: mpsc::UnboundedSender<String>,
    }

    impl ChatListener for RecordingListener {
        fn on_message(&self, message: Message) {
            let _ = self.messages.send(message);
        }

        fn on_error(&self, error: String) {
            let _ = self.errors.send(error);
        }
    }

    type Channels = (
        mpsc::UnboundedReceiver<Message>,
        mpsc::UnboundedReceiver<String>,
    );

    fn localhost_transport() -> BroadcastTransport {
        BroadcastTransport::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
            Box::new(NoopRadioLock),
        )
    }

    async fn attach_listener(transport: &BroadcastTransport) -> Channels {
        let (mtx, mrx) = mpsc::unbounded_channel();
        let (etx, erx) = mpsc::unbounded_channel();
        transport
            .set_listener(Arc::new(RecordingListener {
                messages: mtx,
                errors: etx,
            }))
            .await;
        (mrx, erx)
    }

    async fn active_transport() -> (BroadcastTransport, Channels) {
        let transport = localhost_transport();
        let channels = attach_listener(&transport).await;
        assert!(transport.init().await);
        (transport, channels)
    }

    async fn expect_nothing<T>(rx: &mut mpsc::UnboundedReceiver<T>) {
        assert!(
            timeout(Duration::from_millis(300), rx.recv()).await.is_err(),
            "expected no delivery"
        );
    }

    #[tokio::test]
    async fn delivers_frame_once_and_suppresses_second_arrival() {
        let (transport, (mut messages, _errors)) = active_transport().await;
        let sent = Message::create("Alice", "Hello");
        let frame = encode_frame(&sent).unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = (Ipv4Addr::LOCALHOST, transport.local_port());
        peer.send_to(&frame, dest).await.unwrap();
        peer.send_to(&frame, dest).await.unwrap();

        let got = timeout(Duration::from_secs(2), messages.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.sender, "Alice");
        assert_eq!(got.content, "Hello");
        assert_eq!(got.id, sent.id);
        expect_nothing(&mut messages).await;
        transport.close().await;
    }

    #[tokio::test]
    async fn invalid_frames_are_dropped_without_any_event() {
        let (transport, (mut messages, mut errors)) = active_transport().await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = (Ipv4Addr::LOCALHOST, transport.local_port());
        peer.send_to(b"not a chat frame", dest).await.unwrap();

        let mut wrong_version = encode_frame(&Message::create("Alice", "Hi")).unwrap();
        wrong_version[0] = 9;
        peer.send_to(&wrong_version, dest).await.unwrap();

        expect_nothing(&mut messages).await;
        expect_nothing(&mut errors).await;
        transport.close().await;
    }

    #[tokio::test]
    async fn own_broadcast_is_suppressed_as_self_echo() {
        let (transport, (mut messages, _errors)) = active_transport().await;
        assert!(transport.send_message("Alice", "Hello").await);
        expect_nothing(&mut messages).await;
        assert_eq!(transport.stats().await.seen_count, 1);
        transport.close().await;
    }

    #[tokio::test]
    async fn blank_input_fails_silently() {
        let (transport, (mut messages, mut errors)) = active_transport().await;
        assert!(!transport.send_message("", "hello").await);
        assert!(!transport.send_message("Alice", "   ").await);
        assert_eq!(transport.stats().await.seen_count, 0);
        expect_nothing(&mut messages).await;
        expect_nothing(&mut errors).await;
        transport.close().await;
    }

    #[tokio::test]
    async fn oversized_message_is_rejected_with_error() {
        let (transport, (_messages, mut errors)) = active_transport().await;
        let content = "x".repeat(MAX_FRAME_LEN);
        assert!(!transport.send_message("Alice", &content).await);
        let err = timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(err.contains("too large"), "unexpected error: {err}");
        transport.close().await;
    }

    #[tokio::test]
    async fn frame_at_exact_cap_is_sent() {
        let (transport, (_messages, mut errors)) = active_transport().await;
        let fit = MAX_FRAME_LEN - HEADER_SIZE - "Alice".len();
        assert!(transport.send_message("Alice", &"x".repeat(fit)).await);
        assert!(!transport.send_message("Alice", &"x".repeat(fit + 1)).await);
        let err = timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(err.contains("too large"), "unexpected error: {err}");
        transport.close().await;
    }

    #[tokio::test]
    async fn send_fails_before_init_and_after_close() {
        let transport = localhost_transport();
        assert!(!transport.send_message("Alice", "Hello").await);

        let _channels = attach_listener(&transport).await;
        assert!(transport.init().await);
        transport.close().await;
        assert!(!transport.send_message("Alice", "Hello").await);

        let stats = transport.stats().await;
        assert!(!stats.initialized);
        assert!(!stats.receiving);
        assert_eq!(stats.seen_count, 0);
    }

    #[tokio::test]
    async fn init_reports_failure_when_port_is_taken() {
        let (first, _channels) = active_transport().await;
        let second = BroadcastTransport::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            first.local_port(),
            Box::new(NoopRadioLock),
        );
        let (_messages, mut errors) = attach_listener(&second).await;
        assert!(!second.init().await);
        let err = timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(err.contains("initialization failed"), "unexpected error: {err}");
        assert!(!second.stats().await.initialized);
        first.close().await;
    }

    #[tokio::test]
    async fn radio_lock_is_held_from_init_to_close() {
        struct FlagLock(Arc<AtomicBool>);
        impl RadioLock for FlagLock {
            fn acquire(&mut self) -> io::Result<()> {
                self.0.store(true, Ordering::SeqCst);
                Ok(())
            }
            fn release(&mut self) {
                self.0.store(false, Ordering::SeqCst);
            }
        }

        let held = Arc::new(AtomicBool::new(false));
        let transport = BroadcastTransport::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
            Box::new(FlagLock(held.clone())),
        );
        assert!(transport.init().await);
        assert!(held.load(Ordering::SeqCst));
        transport.close().await;
        assert!(!held.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn lifecycle_is_reflected_in_stats_and_close_is_idempotent() {
        let transport = localhost_transport();
        assert!(!transport.stats().await.initialized);

        assert!(transport.init().await);
        assert!(transport.init().await);
        let stats = transport.stats().await;
        assert!(stats.initialized);
        assert!(stats.receiving);

        transport.close().await;
        transport.close().await;
        let stats = transport.stats().await;
        assert!(!stats.initialized);
        assert!(!stats.receiving);
        assert_eq!(stats.seen_count, 0);
    }
}
