//! Recording chat transport.
//!
//! [`MockTransport`] implements [`ChatTransport`] with `#`/`&` channel
//! prefixes and RFC 1459 case mapping, and records every sent line with the
//! time it was sent. Tests wait for output with
//! [`MockTransport::wait_for_sent`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use factoid_core::BoxFuture;
use factoid_core::mask::irc_eq;
use factoid_core::{ChatTransport, TransportError};
use tokio::sync::Notify;

/// One line handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentLine {
    pub destination: String,
    pub notice: bool,
    pub text: String,
    pub at: Instant,
}

pub struct MockTransport {
    network: String,
    address: String,
    nickname: String,
    sent: Mutex<Vec<SentLine>>,
    notify: Notify,
    fail_sends: AtomicBool,
}

impl MockTransport {
    pub fn new(network: &str, address: &str, nickname: &str) -> Self {
        Self {
            network: network.to_string(),
            address: address.to_string(),
            nickname: nickname.to_string(),
            sent: Mutex::new(Vec::new()),
            notify: Notify::new(),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// A transport for `Freenode` / `irc.freenode.net`, bot nick `factbot`.
    pub fn freenode() -> Arc<Self> {
        Arc::new(Self::new("Freenode", "irc.freenode.net", "factbot"))
    }

    /// Make every later send fail (the line is still recorded).
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<SentLine> {
        self.sent.lock().expect("sent lock poisoned").clone()
    }

    /// Texts sent so far, in order.
    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|l| l.text).collect()
    }

    /// Wait until at least `n` lines were sent, or panic after `limit`.
    pub async fn wait_for_sent(&self, n: usize, limit: Duration) -> Vec<SentLine> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let notified = self.notify.notified();
            let sent = self.sent();
            if sent.len() >= n {
                return sent;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                panic!("expected {n} sent lines, got {}: {sent:?}", sent.len());
            }
        }
    }
}

impl ChatTransport for MockTransport {
    fn network_name(&self) -> &str {
        &self.network
    }

    fn network_address(&self) -> &str {
        &self.address
    }

    fn bot_nickname(&self) -> String {
        self.nickname.clone()
    }

    fn is_channel_name(&self, name: &str) -> bool {
        name.starts_with('#') || name.starts_with('&')
    }

    fn casefold_eq(&self, a: &str, b: &str) -> bool {
        irc_eq(a, b)
    }

    fn send(
        &self,
        destination: &str,
        notice: bool,
        text: &str,
    ) -> BoxFuture<'_, Result<(), TransportError>> {
        self.sent.lock().expect("sent lock poisoned").push(SentLine {
            destination: destination.to_string(),
            notice,
            text: text.to_string(),
            at: Instant::now(),
        });
        self.notify.notify_waiters();

        let result = if self.fail_sends.load(Ordering::SeqCst) {
            Err(TransportError::SendFailed {
                destination: destination.to_string(),
                reason: "mock failure".to_string(),
            })
        } else {
            Ok(())
        };
        Box::pin(async move { result })
    }
}
