//! Paced outbound queue.
//!
//! Every (network, destination) pair gets its own FIFO drained by a tokio
//! task that waits `line_delay` after each line it sends. Queues for
//! different destinations drain independently. A drain task exits after it
//! has been idle for `idle_timeout`; the next line for that destination
//! starts a fresh one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::mask::irc_to_lower;
use crate::transport::ChatTransport;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// One line waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundLine {
    /// Channel or nickname.
    pub destination: String,
    /// Send as a notice instead of a message.
    pub notice: bool,
    /// The fully rendered line.
    pub text: String,
}

impl OutboundLine {
    /// A line for `destination`.
    pub fn new(destination: &str, notice: bool, text: &str) -> Self {
        Self {
            destination: destination.to_string(),
            notice,
            text: text.to_string(),
        }
    }
}

type QueueKey = (String, String);

struct Queue {
    generation: u64,
    tx: mpsc::UnboundedSender<OutboundLine>,
}

struct Inner {
    line_delay: Duration,
    idle_timeout: Duration,
    queues: Mutex<HashMap<QueueKey, Queue>>,
    generations: AtomicU64,
}

impl Inner {
    fn queues(&self) -> MutexGuard<'_, HashMap<QueueKey, Queue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands rendered lines to per-destination drain tasks.
///
/// Cloning is cheap; clones share the same queues.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher pacing lines `line_delay` apart.
    pub fn new(line_delay: Duration) -> Self {
        Self::with_idle_timeout(line_delay, DEFAULT_IDLE_TIMEOUT)
    }

    /// Create a dispatcher whose drain tasks exit after `idle_timeout`
    /// without work.
    pub fn with_idle_timeout(line_delay: Duration, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                line_delay,
                idle_timeout,
                queues: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    /// The configured delay between lines to one destination.
    pub fn line_delay(&self) -> Duration {
        self.inner.line_delay
    }

    /// Queue `lines` for sending through `transport`, in order.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, transport: &Arc<dyn ChatTransport>, lines: Vec<OutboundLine>) {
        if lines.is_empty() {
            return;
        }
        let network = transport.network_name().to_lowercase();
        let mut queues = self.inner.queues();

        for line in lines {
            let key = (network.clone(), irc_to_lower(&line.destination));
            let line = match queues.get(&key) {
                Some(queue) => match queue.tx.send(line) {
                    Ok(()) => continue,
                    Err(mpsc::error::SendError(line)) => line,
                },
                None => line,
            };

            let (tx, rx) = mpsc::unbounded_channel();
            let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
            debug!(network = %key.0, destination = %key.1, "Outbound queue started");
            tokio::spawn(drain(
                Arc::clone(&self.inner),
                key.clone(),
                generation,
                Arc::clone(transport),
                line,
                rx,
            ));
            queues.insert(key, Queue { generation, tx });
        }
    }

    /// Number of destinations that currently have a drain task.
    pub fn active_queues(&self) -> usize {
        self.inner.queues().len()
    }
}

async fn drain(
    inner: Arc<Inner>,
    key: QueueKey,
    generation: u64,
    transport: Arc<dyn ChatTransport>,
    first: OutboundLine,
    mut rx: mpsc::UnboundedReceiver<OutboundLine>,
) {
    send_paced(&inner, transport.as_ref(), first).await;
    loop {
        let line = match timeout(inner.idle_timeout, rx.recv()).await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(_) => {
                // Enqueuers send while holding the map lock, so nothing can
                // arrive between this check and the removal.
                let mut queues = inner.queues();
                if !rx.is_empty() {
                    continue;
                }
                if queues.get(&key).is_some_and(|q| q.generation == generation) {
                    queues.remove(&key);
                }
                debug!(network = %key.0, destination = %key.1, "Outbound queue idle, stopping");
                break;
            }
        };
        send_paced(&inner, transport.as_ref(), line).await;
    }
}

async fn send_paced(inner: &Inner, transport: &dyn ChatTransport, line: OutboundLine) {
    if let Err(e) = transport
        .send(&line.destination, line.notice, &line.text)
        .await
    {
        warn!(destination = %line.destination, error = %e, "Failed to send line");
    }
    sleep(inner.line_delay).await;
}
