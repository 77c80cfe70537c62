//! Background receive loop
//!
//! Turns the raw byte stream of a [`Transport`] into discrete messages. The
//! device protocol has no length prefix or delimiter, so a message is a run of
//! bytes followed by at least [`FramingConfig::idle_timeout`] of silence.

use crate::core::queue::{Message, MessageSender};
use crate::core::transport::{telnet, Transport, TransportError, TransportKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Silence that ends a message
pub const DATA_TIMEOUT: Duration = Duration::from_millis(500);

/// Sleep between "bytes available" checks on serial lines
pub const SERIAL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long teardown waits for the loop to exit
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Shortest accepted idle timeout; anything lower would spin the TCP poll
pub const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(10);

/// Framing parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramingConfig {
    /// Silence that ends a message
    pub idle_timeout: Duration,
    /// Serial polling interval
    pub poll_interval: Duration,
    /// Answer and strip Telnet negotiation (TCP only)
    pub telnet: bool,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DATA_TIMEOUT,
            poll_interval: SERIAL_POLL_INTERVAL,
            telnet: true,
        }
    }
}

impl FramingConfig {
    /// Set idle timeout, raised to at least [`MIN_IDLE_TIMEOUT`]
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout.max(MIN_IDLE_TIMEOUT);
        self
    }

    /// Set serial poll interval
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable or disable Telnet handling
    #[must_use]
    pub fn telnet(mut self, enable: bool) -> Self {
        self.telnet = enable;
        self
    }
}

/// Handle to a running receiver loop.
///
/// Dropping the handle without [`ReceiverHandle::stop`] cancels and aborts the
/// loop, releasing its reference to the transport.
pub struct ReceiverHandle {
    stop: CancellationToken,
    fault: CancellationToken,
    task: JoinHandle<()>,
}

impl ReceiverHandle {
    /// Start the loop for `transport`, delivering messages to `out`
    pub fn spawn(
        transport: Arc<dyn Transport>,
        framing: FramingConfig,
        out: MessageSender,
    ) -> Self {
        let stop = CancellationToken::new();
        let fault = CancellationToken::new();

        // Serial lines never negotiate
        let telnet = framing.telnet && transport.kind() == TransportKind::Tcp;

        let receiver = Receiver {
            transport,
            framing,
            telnet,
            out,
            buffer: Vec::new(),
            carry: Vec::new(),
            last_rx: Instant::now(),
        };

        let task = tokio::spawn(receiver.run(stop.clone(), fault.clone()));

        Self { stop, fault, task }
    }

    /// The loop hit a fatal error and wants the transport closed
    pub fn disconnect_requested(&self) -> bool {
        self.fault.is_cancelled()
    }

    /// Signal the loop to stop and wait up to `join_timeout` for it.
    ///
    /// Returns `false` if the loop had to be aborted.
    pub async fn stop(mut self, join_timeout: Duration) -> bool {
        self.stop.cancel();

        match tokio::time::timeout(join_timeout, &mut self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!("Receiver task ended abnormally: {}", e);
                true
            }
            Err(_) => {
                tracing::warn!("Receiver did not stop within {:?}, aborting", join_timeout);
                self.task.abort();
                false
            }
        }
    }
}

impl Drop for ReceiverHandle {
    fn drop(&mut self) {
        self.stop.cancel();
        self.task.abort();
    }
}

struct Receiver {
    transport: Arc<dyn Transport>,
    framing: FramingConfig,
    telnet: bool,
    out: MessageSender,
    buffer: Vec<u8>,
    /// Negotiation bytes cut off at the end of the previous buffer
    carry: Vec<u8>,
    last_rx: Instant,
}

impl Receiver {
    async fn run(mut self, stop: CancellationToken, fault: CancellationToken) {
        tracing::debug!("Receiver started on {}", self.transport.connection_info());

        loop {
            if stop.is_cancelled() {
                break;
            }
            if self.out.is_closed() {
                tracing::debug!("Message queue dropped, receiver exiting");
                return;
            }

            // Only the waits race the stop signal; reading and framing always
            // run to completion so no taken bytes are lost
            let readable = tokio::select! {
                () = stop.cancelled() => break,
                readable = self.wait() => readable,
            };

            if let Err(e) = self.step(readable).await {
                self.fail(&e);
                fault.cancel();
                return;
            }
        }

        // Stopped on request: hand over whatever arrived but was not framed yet
        self.deliver_remaining();
        tracing::debug!("Receiver stopped");
    }

    /// Wait for input: a bounded readiness poll on TCP, one check plus the
    /// poll interval on serial lines
    async fn wait(&self) -> Result<bool, TransportError> {
        match self.transport.kind() {
            TransportKind::Tcp => self.transport.is_readable(self.framing.idle_timeout).await,
            TransportKind::Serial => {
                let readable = self.transport.is_readable(Duration::ZERO).await?;
                if !readable {
                    tokio::time::sleep(self.framing.poll_interval).await;
                }
                Ok(readable)
            }
        }
    }

    async fn step(&mut self, readable: Result<bool, TransportError>) -> Result<(), TransportError> {
        if readable? {
            let data = self.transport.read_available().await?;
            if !data.is_empty() {
                tracing::trace!("Received {} bytes", data.len());
                if !self.carry.is_empty() {
                    self.buffer.append(&mut self.carry);
                }
                self.buffer.extend_from_slice(&data);
                self.last_rx = Instant::now();
            }
            return Ok(());
        }

        if !self.buffer.is_empty() && self.last_rx.elapsed() >= self.framing.idle_timeout {
            self.frame().await?;
        }

        Ok(())
    }

    /// Close the current message: negotiate, strip, enqueue
    async fn frame(&mut self) -> Result<(), TransportError> {
        let mut data = std::mem::take(&mut self.buffer);

        if self.telnet && telnet::contains_iac(&data) {
            let tail = telnet::incomplete_tail(&data);
            self.carry = data.split_off(data.len() - tail);

            let reply = telnet::negotiate(&data);
            data = telnet::strip(&data);

            if !reply.is_empty() {
                if let Err(e) = self.transport.write_all(&reply).await {
                    // Payload is already clean; deliver it before the error
                    self.enqueue(data);
                    return Err(e);
                }
            }
        }

        self.enqueue(data);
        Ok(())
    }

    fn enqueue(&self, data: Vec<u8>) {
        if !data.is_empty() {
            tracing::debug!("Framed message of {} bytes", data.len());
            self.out.push(Message::data(data));
        }
    }

    /// Enqueue the unframed buffer as it stands
    fn deliver_remaining(&mut self) {
        let data = std::mem::take(&mut self.buffer);
        let data = if self.telnet { telnet::strip(&data) } else { data };
        self.enqueue(data);
    }

    fn fail(&mut self, err: &TransportError) {
        tracing::warn!("Receiver stopping on {}: {}", self.transport.connection_info(), err);

        self.deliver_remaining();

        let text = match err {
            TransportError::ClosedByPeer => "Connection closed by remote host".to_string(),
            other => format!("Receive error: {}", other),
        };
        self.out.push(Message::error(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::TextEncoding;
    use crate::core::queue::{MessageKind, MessageQueue};
    use crate::core::transport::telnet::{DO, IAC, OPT_ECHO, WILL};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    /// Transport fed from a channel; dropping the sender simulates peer close
    /// and an empty chunk simulates a read failure
    struct ScriptedTransport {
        kind: TransportKind,
        feed: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        pending: parking_lot::Mutex<VecDeque<u8>>,
        eof: AtomicBool,
        broken: AtomicBool,
        written: parking_lot::Mutex<Vec<u8>>,
        write_delay: parking_lot::Mutex<Duration>,
        fail_writes: AtomicBool,
    }

    impl ScriptedTransport {
        fn new(kind: TransportKind) -> (Arc<Self>, mpsc::UnboundedSender<Vec<u8>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let transport = Arc::new(Self {
                kind,
                feed: tokio::sync::Mutex::new(rx),
                pending: parking_lot::Mutex::new(VecDeque::new()),
                eof: AtomicBool::new(false),
                broken: AtomicBool::new(false),
                written: parking_lot::Mutex::new(Vec::new()),
                write_delay: parking_lot::Mutex::new(Duration::ZERO),
                fail_writes: AtomicBool::new(false),
            });
            (transport, tx)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn is_open(&self) -> bool {
            true
        }

        async fn disconnect(&self) {}

        async fn is_readable(&self, timeout: Duration) -> Result<bool, TransportError> {
            if !self.pending.lock().is_empty()
                || self.eof.load(Ordering::SeqCst)
                || self.broken.load(Ordering::SeqCst)
            {
                return Ok(true);
            }
            let mut feed = self.feed.lock().await;
            match tokio::time::timeout(timeout, feed.recv()).await {
                Ok(Some(chunk)) if chunk.is_empty() => {
                    self.broken.store(true, Ordering::SeqCst);
                    Ok(true)
                }
                Ok(Some(chunk)) => {
                    self.pending.lock().extend(chunk);
                    Ok(true)
                }
                Ok(None) => {
                    self.eof.store(true, Ordering::SeqCst);
                    Ok(true)
                }
                Err(_) => Ok(false),
            }
        }

        async fn read_available(&self) -> Result<Bytes, TransportError> {
            let mut pending = self.pending.lock();
            if pending.is_empty() && self.broken.load(Ordering::SeqCst) {
                return Err(std::io::Error::other("framing error on line").into());
            }
            if pending.is_empty() && self.eof.load(Ordering::SeqCst) {
                return Err(TransportError::ClosedByPeer);
            }
            Ok(pending.drain(..).collect::<Vec<u8>>().into())
        }

        async fn write_all(&self, data: &[u8]) -> Result<(), TransportError> {
            let delay = *self.write_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
            }
            self.written.lock().extend_from_slice(data);
            Ok(())
        }

        fn set_timeout(&self, _timeout: Duration) {}

        fn connection_info(&self) -> String {
            "scripted".to_string()
        }
    }

    #[test]
    fn test_idle_timeout_has_floor() {
        let framing = FramingConfig::default().idle_timeout(Duration::ZERO);
        assert_eq!(framing.idle_timeout, MIN_IDLE_TIMEOUT);
        let framing = framing.idle_timeout(Duration::from_millis(250));
        assert_eq!(framing.idle_timeout, Duration::from_millis(250));
    }

    fn fast_framing() -> FramingConfig {
        FramingConfig::default()
            .idle_timeout(Duration::from_millis(60))
            .poll_interval(Duration::from_millis(10))
    }

    fn texts(queue: &mut MessageQueue) -> Vec<String> {
        queue
            .drain()
            .iter()
            .map(|m| m.text(TextEncoding::Latin1))
            .collect()
    }

    const GAP: Duration = Duration::from_millis(300);

    #[tokio::test]
    async fn test_silence_splits_messages() {
        for kind in [TransportKind::Tcp, TransportKind::Serial] {
            let (transport, feed) = ScriptedTransport::new(kind);
            let (tx, mut queue) = MessageQueue::channel();
            let handle = ReceiverHandle::spawn(transport, fast_framing(), tx);

            feed.send(b"AB".to_vec()).unwrap();
            tokio::time::sleep(GAP).await;
            feed.send(b"CD".to_vec()).unwrap();
            tokio::time::sleep(GAP).await;

            assert_eq!(texts(&mut queue), ["AB", "CD"], "{kind}");
            assert!(handle.stop(JOIN_TIMEOUT).await);
        }
    }

    #[tokio::test]
    async fn test_back_to_back_chunks_form_one_message() {
        for kind in [TransportKind::Tcp, TransportKind::Serial] {
            let (transport, feed) = ScriptedTransport::new(kind);
            let (tx, mut queue) = MessageQueue::channel();
            let handle = ReceiverHandle::spawn(transport, fast_framing(), tx);

            feed.send(b"AB".to_vec()).unwrap();
            feed.send(b"CD".to_vec()).unwrap();
            tokio::time::sleep(GAP).await;

            assert_eq!(texts(&mut queue), ["ABCD"], "{kind}");
            assert!(handle.stop(JOIN_TIMEOUT).await);
        }
    }

    #[tokio::test]
    async fn test_negotiation_is_answered_and_stripped() {
        let (transport, feed) = ScriptedTransport::new(TransportKind::Tcp);
        let (tx, mut queue) = MessageQueue::channel();
        let handle = ReceiverHandle::spawn(transport.clone(), fast_framing(), tx);

        feed.send(vec![IAC, DO, OPT_ECHO, b'O', b'K']).unwrap();
        tokio::time::sleep(GAP).await;

        assert_eq!(texts(&mut queue), ["OK"]);
        assert_eq!(*transport.written.lock(), vec![IAC, WILL, OPT_ECHO]);
        handle.stop(JOIN_TIMEOUT).await;
    }

    #[tokio::test]
    async fn test_negotiation_split_across_messages_is_carried() {
        let (transport, feed) = ScriptedTransport::new(TransportKind::Tcp);
        let (tx, mut queue) = MessageQueue::channel();
        let handle = ReceiverHandle::spawn(transport.clone(), fast_framing(), tx);

        feed.send(vec![b'A', IAC]).unwrap();
        tokio::time::sleep(GAP).await;
        assert_eq!(texts(&mut queue), ["A"]);
        assert!(transport.written.lock().is_empty());

        feed.send(vec![DO, OPT_ECHO, b'B']).unwrap();
        tokio::time::sleep(GAP).await;
        assert_eq!(texts(&mut queue), ["B"]);
        assert_eq!(*transport.written.lock(), vec![IAC, WILL, OPT_ECHO]);
        handle.stop(JOIN_TIMEOUT).await;
    }

    #[tokio::test]
    async fn test_serial_never_negotiates() {
        let (transport, feed) = ScriptedTransport::new(TransportKind::Serial);
        let (tx, mut queue) = MessageQueue::channel();
        let handle = ReceiverHandle::spawn(transport.clone(), fast_framing(), tx);

        feed.send(vec![IAC, DO, OPT_ECHO]).unwrap();
        tokio::time::sleep(GAP).await;

        let messages = queue.drain();
        assert_eq!(messages.len(), 1);
        assert_eq!(&messages[0].payload()[..], &[IAC, DO, OPT_ECHO]);
        assert!(transport.written.lock().is_empty());
        handle.stop(JOIN_TIMEOUT).await;
    }

    #[tokio::test]
    async fn test_peer_close_flushes_then_reports() {
        let (transport, feed) = ScriptedTransport::new(TransportKind::Tcp);
        let (tx, mut queue) = MessageQueue::channel();
        let handle = ReceiverHandle::spawn(transport, fast_framing(), tx);

        feed.send(b"PART".to_vec()).unwrap();
        drop(feed);
        tokio::time::sleep(GAP).await;

        let messages = queue.drain();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].kind(), MessageKind::Data);
        assert_eq!(&messages[0].payload()[..], b"PART");
        assert!(messages[1].is_error());
        assert!(messages[1].text(TextEncoding::Utf8).contains("closed"));

        assert!(handle.disconnect_requested());
        assert!(handle.stop(JOIN_TIMEOUT).await);
    }

    #[tokio::test]
    async fn test_read_failure_flushes_then_reports() {
        let (transport, feed) = ScriptedTransport::new(TransportKind::Tcp);
        let (tx, mut queue) = MessageQueue::channel();
        let handle = ReceiverHandle::spawn(transport, fast_framing(), tx);

        feed.send(b"HALF".to_vec()).unwrap();
        feed.send(Vec::new()).unwrap();
        tokio::time::sleep(GAP).await;

        let messages = queue.drain();
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[0].payload()[..], b"HALF");
        assert!(messages[1].is_error());
        let text = messages[1].text(TextEncoding::Utf8);
        assert!(text.starts_with("Receive error:"), "{text}");
        assert!(text.contains("framing error on line"), "{text}");

        assert!(handle.disconnect_requested());
        assert!(handle.stop(JOIN_TIMEOUT).await);
    }

    #[tokio::test]
    async fn test_failed_reply_delivers_payload_stripped_once() {
        let (transport, feed) = ScriptedTransport::new(TransportKind::Tcp);
        transport.fail_writes.store(true, Ordering::SeqCst);
        let (tx, mut queue) = MessageQueue::channel();
        let handle = ReceiverHandle::spawn(transport.clone(), fast_framing(), tx);

        // Stripping the inner triple leaves IAC DO 1 behind, which is payload
        feed.send(vec![IAC, IAC, DO, OPT_ECHO, DO, OPT_ECHO]).unwrap();
        tokio::time::sleep(GAP).await;

        let messages = queue.drain();
        assert_eq!(messages.len(), 2);
        assert_eq!(&messages[0].payload()[..], &[IAC, DO, OPT_ECHO]);
        assert!(messages[1].is_error());
        assert!(transport.written.lock().is_empty());

        assert!(handle.disconnect_requested());
        assert!(handle.stop(JOIN_TIMEOUT).await);
    }

    #[tokio::test]
    async fn test_stop_during_reply_keeps_message() {
        let (transport, feed) = ScriptedTransport::new(TransportKind::Tcp);
        *transport.write_delay.lock() = Duration::from_millis(300);
        let (tx, mut queue) = MessageQueue::channel();
        let handle = ReceiverHandle::spawn(transport.clone(), fast_framing(), tx);

        feed.send(vec![IAC, DO, OPT_ECHO, b'O', b'K']).unwrap();
        // Idle timeout has passed, the reply write is in flight
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(handle.stop(JOIN_TIMEOUT).await);

        assert_eq!(texts(&mut queue), ["OK"]);
        assert_eq!(*transport.written.lock(), vec![IAC, WILL, OPT_ECHO]);
    }

    #[tokio::test]
    async fn test_dropping_queue_ends_loop() {
        let (transport, feed) = ScriptedTransport::new(TransportKind::Tcp);
        let (tx, queue) = MessageQueue::channel();
        let handle = ReceiverHandle::spawn(transport.clone(), fast_framing(), tx);
        assert_eq!(Arc::strong_count(&transport), 2);

        drop(queue);
        tokio::time::sleep(GAP).await;

        // The loop released its transport without being stopped
        assert_eq!(Arc::strong_count(&transport), 1);
        assert!(!handle.disconnect_requested());
        drop(feed);
    }

    #[tokio::test]
    async fn test_dropping_handle_releases_transport() {
        let (transport, _feed) = ScriptedTransport::new(TransportKind::Serial);
        let (tx, _queue) = MessageQueue::channel();
        let handle = ReceiverHandle::spawn(transport.clone(), fast_framing(), tx);
        assert_eq!(Arc::strong_count(&transport), 2);

        drop(handle);
        tokio::time::sleep(GAP).await;
        assert_eq!(Arc::strong_count(&transport), 1);
    }

    #[tokio::test]
    async fn test_stop_joins_quickly_and_delivers_pending() {
        let (transport, feed) = ScriptedTransport::new(TransportKind::Tcp);
        let (tx, mut queue) = MessageQueue::channel();
        let framing = FramingConfig::default().idle_timeout(Duration::from_secs(30));
        let handle = ReceiverHandle::spawn(transport, framing, tx);

        feed.send(b"unfinished".to_vec()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        assert!(handle.stop(JOIN_TIMEOUT).await);
        assert!(started.elapsed() < JOIN_TIMEOUT);
        assert!(!queue.is_empty());
        assert_eq!(texts(&mut queue), ["unfinished"]);
    }
}
