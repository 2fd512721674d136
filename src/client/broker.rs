//! Request broker: many concurrent callers, one inbound stream.
//!
//! The server puts no request ids on the wire, so every reply lands in a
//! shared, bounded FIFO of unclaimed frames and each waiting request scans it
//! for the earliest frame of its type. A claimed frame is removed under the
//! lock, so no frame is ever handed to two requests. Two requests waiting for
//! the same type with the same filter may still receive each other's reply.

use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::client::transport::{FrameReceiver, FrameSender};
use crate::common::codec::{self, Frame};
use crate::common::error::{ClientError, DecodeError, Result};
use crate::common::models::Message;
use crate::common::protocol::SERVER_ID;

/// Whether a buffered server frame answers a request for `expected`.
///
/// Structured frames match on their `type`. Untyped text matches when it
/// starts with the keyword (optionally signed `+`/`-`) and contains `filter`.
pub fn matches_reply(text: &str, expected: &str, filter: Option<&str>) -> bool {
    match codec::classify_text(text) {
        Frame::Structured(env) => env.kind == expected,
        Frame::Legacy(line) => {
            codec::parse_ack(&line, expected).is_some() && filter.map_or(true, |f| line.contains(f))
        }
        Frame::Malformed(_) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Sent,
    Waiting,
    Resolved,
    TimedOut,
}

#[derive(Debug)]
enum Reply {
    Text(String),
    /// Server-reported error, addressed to the request that was oldest when it arrived.
    Error { src: String, reason: String, ticket: u64 },
}

#[derive(Debug)]
struct BrokerState {
    replies: VecDeque<Reply>,
    capacity: usize,
    waiters: VecDeque<u64>,
}

pub struct RequestBroker {
    username: String,
    sender: Arc<dyn FrameSender>,
    state: Mutex<BrokerState>,
    arrivals: Notify,
    connected: AtomicBool,
    torn_down: AtomicBool,
    next_ticket: AtomicU64,
}

/// Bookkeeping for one blocking call; leaving scope unregisters it.
struct PendingRequest<'a> {
    broker: &'a RequestBroker,
    ticket: u64,
    expected: &'a str,
    filter: Option<&'a str>,
    deadline: Instant,
    state: RequestState,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.broker.unregister(self.ticket);
        debug!("Request '{}' #{} finished in state {:?}", self.expected, self.ticket, self.state);
    }
}

impl RequestBroker {
    pub fn new(username: &str, sender: Arc<dyn FrameSender>, capacity: usize) -> Self {
        Self {
            username: username.to_string(),
            sender,
            state: Mutex::new(BrokerState {
                replies: VecDeque::with_capacity(capacity.min(256)),
                capacity: capacity.max(1),
                waiters: VecDeque::new(),
            }),
            arrivals: Notify::new(),
            connected: AtomicBool::new(true),
            torn_down: AtomicBool::new(false),
            next_ticket: AtomicU64::new(1),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of unclaimed server frames.
    pub fn buffered(&self) -> usize {
        self.lock().replies.len()
    }

    /// Number of requests currently waiting for a reply.
    pub fn pending(&self) -> usize {
        self.lock().waiters.len()
    }

    async fn transmit(&self, frame: Vec<u8>) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::Disconnected);
        }
        match self.sender.send(&frame).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("Error sending frame: {}", e);
                self.disconnect().await;
                Err(ClientError::Transport(e))
            }
        }
    }

    /// Sends `!<command> <args>` without waiting for an answer.
    pub async fn send_command(&self, command: &str, args: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.transmit(codec::encode_command(command, args, &self.username, now)).await
    }

    pub async fn send_user_message(&self, body: &str, dst: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.transmit(codec::encode_user_message(body, dst, &self.username, now)).await
    }

    /// Sends a command and waits for the first matching reply.
    ///
    /// A server error that arrives while this is the oldest waiting request is
    /// returned as [`ClientError::Protocol`]. No match before `timeout` yields
    /// [`ClientError::Timeout`]; the caller may retry.
    pub async fn request(
        &self,
        command: &str,
        args: &str,
        filter: Option<&str>,
        timeout: Duration,
    ) -> Result<String> {
        let mut pending = PendingRequest {
            broker: self,
            ticket: self.register(),
            expected: command,
            filter: filter.filter(|f| !f.is_empty()),
            deadline: Instant::now() + timeout,
            state: RequestState::Idle,
        };

        self.send_command(command, args).await?;
        pending.state = RequestState::Sent;
        self.wait_for(&mut pending).await
    }

    async fn wait_for(&self, pending: &mut PendingRequest<'_>) -> Result<String> {
        pending.state = RequestState::Waiting;
        loop {
            let arrived = self.arrivals.notified();
            tokio::pin!(arrived);
            // Register before scanning so a push between scan and await is not missed.
            arrived.as_mut().enable();

            if let Some(reply) = self.claim(pending.ticket, pending.expected, pending.filter) {
                pending.state = RequestState::Resolved;
                return reply;
            }
            if !self.is_connected() {
                return Err(ClientError::Disconnected);
            }
            if tokio::time::timeout_at(pending.deadline, arrived).await.is_err() {
                pending.state = RequestState::TimedOut;
                warn!("Timeout waiting for server response to '{}'", pending.expected);
                return Err(ClientError::Timeout { command: pending.expected.to_string() });
            }
        }
    }

    fn register(&self) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        self.lock().waiters.push_back(ticket);
        ticket
    }

    fn unregister(&self, ticket: u64) {
        let mut state = self.lock();
        state.waiters.retain(|t| *t != ticket);
        // An error nobody will claim any more is stale.
        state.replies.retain(|r| !matches!(r, Reply::Error { ticket: t, .. } if *t == ticket));
    }

    fn claim(&self, ticket: u64, expected: &str, filter: Option<&str>) -> Option<Result<String>> {
        let mut state = self.lock();
        let pos = state.replies.iter().position(|reply| match reply {
            Reply::Text(text) => matches_reply(text, expected, filter),
            Reply::Error { ticket: target, .. } => *target == ticket,
        })?;
        match state.replies.remove(pos)? {
            Reply::Text(text) => Some(Ok(text)),
            Reply::Error { src, reason, .. } => Some(Err(ClientError::Protocol { src, reason })),
        }
    }

    fn push(&self, reply: Reply) {
        {
            let mut state = self.lock();
            state.replies.push_back(reply);
            while state.replies.len() > state.capacity {
                if let Some(dropped) = state.replies.pop_front() {
                    debug!("Response buffer full, dropping oldest: {:?}", dropped);
                }
            }
        }
        self.arrivals.notify_waiters();
    }

    /// Queues the text of a server frame for waiting requests.
    pub fn push_reply(&self, text: String) {
        self.push(Reply::Text(text));
    }

    /// Hands a server error to the oldest waiting request, or drops it if none waits.
    pub fn push_error(&self, src: String, reason: String) {
        let oldest = self.lock().waiters.front().copied();
        match oldest {
            Some(ticket) => self.push(Reply::Error { src, reason, ticket }),
            None => warn!("Server error with no request in flight (from {}): {}", src, reason),
        }
    }

    /// Routes one inbound frame: server replies to the buffer, chat traffic to `live`.
    pub fn dispatch(&self, frame: &[u8], live: &mpsc::UnboundedSender<Message>) {
        match codec::decode(frame) {
            Ok(msg) if msg.src == SERVER_ID => self.push_reply(msg.body),
            Ok(msg) => {
                if live.send(msg).is_err() {
                    debug!("Live message dropped, session receiver is gone");
                }
            }
            Err(DecodeError::Remote { src, reason }) => {
                error!("An error has occurred! Source: {} Text: {}", src, reason);
                self.push_error(src, reason);
            }
            Err(DecodeError::Malformed(why)) => warn!("Dropping malformed frame: {}", why),
        }
    }

    /// Reads frames until the transport fails or the broker is disconnected.
    pub async fn run_reader<R: FrameReceiver>(
        self: Arc<Self>,
        mut receiver: R,
        live: mpsc::UnboundedSender<Message>,
    ) {
        info!("Reader loop started for {}", self.username);
        while self.is_connected() {
            match receiver.receive().await {
                Ok(frame) => self.dispatch(&frame, &live),
                Err(e) => {
                    if self.is_connected() {
                        error!("Error receiving message: {}", e);
                    }
                    break;
                }
            }
        }
        self.disconnect().await;
        info!("Reader loop ended for {}", self.username);
    }

    pub fn spawn_reader<R: FrameReceiver + 'static>(
        self: &Arc<Self>,
        receiver: R,
        live: mpsc::UnboundedSender<Message>,
    ) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        tokio::spawn(broker.run_reader(receiver, live))
    }

    /// Closes the transport. Safe to call any number of times from any task.
    pub async fn disconnect(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connected.store(false, Ordering::SeqCst);
        self.sender.close().await;
        self.arrivals.notify_waiters();
        info!("Disconnected {}", self.username);
    }
}
