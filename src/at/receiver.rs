//! Background line receiver.
//!
//! One task owns the read half of the transport. Every completed line goes
//! to exactly one place: the reply channel of the outstanding command, or
//! the event queue.

use super::line::{Line, LineKind, LineSplitter};
use crate::error::{Error, Result};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

/// Read chunk size for the transport.
const READ_CHUNK: usize = 256;

/// State shared between the receiver task and the command engine.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    /// Reply sink of the outstanding command, if any.
    slot: Mutex<Option<mpsc::UnboundedSender<Line>>>,
    /// Set by `+EVT:JOINED`, cleared by an explicit status refresh.
    joined: AtomicBool,
    /// The receiver task has exited.
    closed: AtomicBool,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Line>>> {
        // A panic while holding the slot leaves only an Option behind.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Install the reply sink for a new command.
    ///
    /// The returned guard clears the slot on every exit path.
    pub(crate) fn install(&self, tx: mpsc::UnboundedSender<Line>) -> SlotGuard<'_> {
        *self.slot() = Some(tx);
        SlotGuard { shared: self }
    }

    pub(crate) fn is_joined(&self) -> bool {
        self.joined.load(Ordering::Acquire)
    }

    pub(crate) fn set_joined(&self, joined: bool) {
        self.joined.store(joined, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Route one line to the reply slot or the event channel.
    fn route(&self, line: Line, events: &EventQueue) {
        debug!("< {}", line);

        let kind = line.kind();
        if kind == LineKind::Event {
            if line.is_joined_event() {
                info!("Network joined");
                self.set_joined(true);
            } else if line.is_join_failed_event() {
                warn!("Join attempt failed: {}", line);
            }
            events.push(line);
            return;
        }

        let mut slot = self.slot();
        if let Some(tx) = slot.as_ref() {
            if let Err(mpsc::error::SendError(line)) = tx.send(line) {
                debug!("Reply for abandoned command dropped: {}", line);
            }
            if kind.is_terminal() {
                *slot = None;
            }
            return;
        }
        drop(slot);
        events.push(line);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the sender wakes a waiting command with `Closed`.
        self.slot().take();
    }
}

/// Clears the outstanding-command slot when dropped.
pub(crate) struct SlotGuard<'a> {
    shared: &'a Shared,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.shared.slot().take();
    }
}

/// Spawn the receiver task on the read half of the transport.
pub(crate) fn spawn<R>(
    mut reader: R,
    shared: Arc<Shared>,
    events: Arc<EventQueue>,
    max_line_len: usize,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut splitter = LineSplitter::new(max_line_len);
        let mut buf = [0u8; READ_CHUNK];

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Line receiver shutting down");
                    break;
                }

                result = reader.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            warn!("Transport closed");
                            break;
                        }
                        Ok(n) => {
                            for line in splitter.feed(&buf[..n]) {
                                shared.route(line, &events);
                            }
                        }
                        Err(e) => {
                            error!("Transport read failed: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        if splitter.pending() > 0 {
            debug!("Discarding {} bytes of partial line", splitter.pending());
        }
        shared.close();
        events.finish();
    })
}

/// Unsolicited lines waiting for a consumer.
///
/// Bounded: once full, the oldest line is evicted to make room, so an
/// incoming line is never refused.
#[derive(Debug)]
pub(crate) struct EventQueue {
    lines: Mutex<VecDeque<Line>>,
    depth: usize,
    notify: Notify,
    /// The receiver has stopped; nothing more will be pushed.
    ended: AtomicBool,
}

impl EventQueue {
    pub(crate) fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(depth)),
            depth,
            notify: Notify::new(),
            ended: AtomicBool::new(false),
        }
    }

    fn lines(&self) -> MutexGuard<'_, VecDeque<Line>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, line: Line) {
        let mut lines = self.lines();
        if lines.len() >= self.depth {
            if let Some(stale) = lines.pop_front() {
                warn!("Event queue full, evicting: {}", stale);
            }
        }
        lines.push_back(line);
        drop(lines);
        self.notify.notify_one();
    }

    /// Mark the end of input. Queued lines stay available.
    pub(crate) fn finish(&self) {
        self.ended.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    /// Wait up to `within` for the next event.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and `Closed` once the
    /// receiver has stopped and the queue is empty.
    pub(crate) async fn next(&self, within: Duration) -> Result<Option<Line>> {
        let deadline = Instant::now() + within;
        loop {
            let popped = self.lines().pop_front();
            if popped.is_some() {
                return Ok(popped);
            }
            if self.ended.load(Ordering::Acquire) {
                return Err(Error::Closed);
            }
            if timeout_at(deadline, self.notify.notified()).await.is_err() {
                let popped = self.lines().pop_front();
                return Ok(popped);
            }
        }
    }

    /// Discard every queued event, returning how many were dropped.
    pub(crate) fn drain(&self) -> usize {
        let mut lines = self.lines();
        let dropped = lines.len();
        for line in lines.drain(..) {
            debug!("Discarding event: {}", line);
        }
        dropped
    }

    /// Release buffered lines and refuse further waits.
    pub(crate) fn close(&self) {
        self.finish();
        self.lines().clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lines().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    fn setup(depth: usize) -> (Arc<Shared>, Arc<EventQueue>) {
        (Arc::new(Shared::default()), Arc::new(EventQueue::new(depth)))
    }

    #[tokio::test]
    async fn test_lines_without_command_are_events() {
        let (shared, events) = setup(4);
        shared.route(Line::new("RAKwireless RAK3172"), &events);
        shared.route(Line::new("+EVT:TX_DONE"), &events);

        let first = events.next(Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.unwrap().as_str(), "RAKwireless RAK3172");
        let second = events.next(Duration::from_millis(10)).await.unwrap();
        assert_eq!(second.unwrap().as_str(), "+EVT:TX_DONE");
    }

    #[tokio::test]
    async fn test_reply_goes_to_slot_and_terminal_clears_it() {
        let (shared, events) = setup(4);
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        let guard = shared.install(reply_tx);

        shared.route(Line::new("AT+NJS=1"), &events);
        shared.route(Line::new("+EVT:JOINED"), &events);
        shared.route(Line::new("OK"), &events);
        // Slot is clear after the terminal line.
        shared.route(Line::new("late"), &events);

        assert_eq!(reply_rx.recv().await.unwrap().as_str(), "AT+NJS=1");
        assert_eq!(reply_rx.recv().await.unwrap().as_str(), "OK");
        assert!(reply_rx.recv().await.is_none());
        drop(guard);

        assert!(shared.is_joined());
        let event = events.next(Duration::from_millis(10)).await.unwrap();
        assert_eq!(event.unwrap().as_str(), "+EVT:JOINED");
        let late = events.next(Duration::from_millis(10)).await.unwrap();
        assert_eq!(late.unwrap().as_str(), "late");
    }

    #[tokio::test]
    async fn test_guard_clears_slot_on_drop() {
        let (shared, events) = setup(4);
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        drop(shared.install(reply_tx));

        shared.route(Line::new("OK"), &events);
        let line = events.next(Duration::from_millis(10)).await.unwrap();
        assert_eq!(line.unwrap().as_str(), "OK");
    }

    #[tokio::test]
    async fn test_full_queue_evicts_oldest() {
        let (shared, events) = setup(2);
        shared.route(Line::new("+EVT:A"), &events);
        shared.route(Line::new("+EVT:B"), &events);
        shared.route(Line::new("+EVT:C"), &events);

        assert_eq!(events.len(), 2);
        let first = events.next(Duration::from_millis(5)).await.unwrap();
        assert_eq!(first.unwrap().as_str(), "+EVT:B");
        let second = events.next(Duration::from_millis(5)).await.unwrap();
        assert_eq!(second.unwrap().as_str(), "+EVT:C");
        assert!(events.next(Duration::from_millis(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_drain_and_close() {
        let (shared, events) = setup(4);
        shared.route(Line::new("+EVT:A"), &events);
        shared.route(Line::new("+EVT:B"), &events);
        assert_eq!(events.drain(), 2);
        assert_eq!(events.len(), 0);

        shared.route(Line::new("+EVT:C"), &events);
        events.close();
        assert_eq!(events.len(), 0);
        assert!(matches!(
            events.next(Duration::from_millis(5)).await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_push() {
        let (shared, events) = setup(4);
        let waiter = {
            let events = events.clone();
            tokio::spawn(async move { events.next(Duration::from_secs(5)).await })
        };
        tokio::task::yield_now().await;

        shared.route(Line::new("+EVT:TX_DONE"), &events);
        let line = waiter.await.unwrap().unwrap();
        assert_eq!(line.unwrap().as_str(), "+EVT:TX_DONE");
    }

    #[tokio::test]
    async fn test_task_splits_and_closes_on_eof() {
        let (shared, events) = setup(8);
        let (mut module, host) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let task = spawn(host, shared.clone(), events.clone(), 128, cancel);

        module.write_all(b"+EVT:JOINED\r\n+EVT:TX_DONE\r\n").await.unwrap();
        let first = events.next(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(first.as_str(), "+EVT:JOINED");
        assert!(shared.is_joined());

        drop(module);
        task.await.unwrap();
        assert!(shared.is_closed());

        // Buffered line survives until consumed, then the queue reports closed.
        let second = events.next(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(second.as_str(), "+EVT:TX_DONE");
        assert!(matches!(
            events.next(Duration::from_secs(1)).await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn test_task_stops_on_cancel() {
        let (shared, events) = setup(8);
        let (_module, host) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let task = spawn(host, shared.clone(), events, 128, cancel.clone());

        cancel.cancel();
        task.await.unwrap();
        assert!(shared.is_closed());
    }
}
