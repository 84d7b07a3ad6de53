//! Bus abstraction: message output, message input, and test fixtures.
//!
//! The engine is a pure consumer of the vehicle bus. Output goes through
//! the [`Bus`] trait; input arrives through a [`MessageSource`], the async
//! trait the main loop selects on together with cancellation. Transport
//! (serial, radio, IP) is someone else's problem: the implementations here
//! are JSON-per-line stdio for harness integration, an in-process channel
//! pair, and a recording bus for tests.

use std::io::Write;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tracing::warn;

use crate::messages::Message;

// ============================================================================
// Output
// ============================================================================

/// Message output half of the bus.
///
/// `dispatch` must not block: implementations either buffer or forward to
/// an unbounded in-process queue. The bus delivers messages in dispatch
/// order per sender.
pub trait Bus {
    fn dispatch(&mut self, msg: Message);
}

/// Collects dispatched messages in order. The bus fixture every engine
/// test drives scenarios with.
#[derive(Debug, Default)]
pub struct RecordingBus {
    pub sent: Vec<Message>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything dispatched so far.
    pub fn take(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.sent)
    }
}

impl Bus for RecordingBus {
    fn dispatch(&mut self, msg: Message) {
        self.sent.push(msg);
    }
}

/// Forwards dispatched messages to an in-process channel.
pub struct ChannelBus {
    tx: tokio::sync::mpsc::UnboundedSender<Message>,
}

impl ChannelBus {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<Message>) -> Self {
        Self { tx }
    }
}

impl Bus for ChannelBus {
    fn dispatch(&mut self, msg: Message) {
        // The receiver dropping means the consumer is gone; nothing useful
        // to do with the message then.
        if self.tx.send(msg).is_err() {
            warn!("[ChannelBus] Receiver dropped, discarding message");
        }
    }
}

/// Writes dispatched messages to stdout as JSON lines.
///
/// Counterpart of [`StdinSource`] for harness integration: downstream
/// tooling reads one JSON message per line. Writes are synchronous but
/// line-sized and bounded, which keeps the engine loop free of await
/// points outside the bus wait.
#[derive(Debug, Default)]
pub struct StdoutBus;

impl StdoutBus {
    pub fn new() -> Self {
        Self
    }
}

impl Bus for StdoutBus {
    fn dispatch(&mut self, msg: Message) {
        match serde_json::to_string(&msg) {
            Ok(line) => {
                let mut out = std::io::stdout().lock();
                if writeln!(out, "{}", line).is_err() {
                    warn!("[StdoutBus] Failed to write message");
                }
            }
            Err(e) => warn!("[StdoutBus] Failed to serialize message: {}", e),
        }
    }
}

// ============================================================================
// Input
// ============================================================================

/// Events produced by a message source.
pub enum BusEvent {
    /// A message arrived.
    Message(Message),
    /// Source reached end of data (EOF for stdin, closed channel).
    Eof,
}

/// Trait abstracting where bus messages come from.
///
/// Implementations handle format parsing internally. The engine loop calls
/// [`next_event`](MessageSource::next_event) in a select! with cancellation
/// and a timer deadline.
#[async_trait]
pub trait MessageSource: Send + 'static {
    /// Read the next message from the source.
    ///
    /// Returns `BusEvent::Eof` when no more data is available. Returns
    /// `Err` on unrecoverable errors.
    async fn next_event(&mut self) -> Result<BusEvent>;

    /// Human-readable name for logging (e.g. "stdin", "channel").
    fn source_name(&self) -> &str;
}

/// Reads JSON-formatted messages from stdin, one per line.
///
/// Used with simulation harnesses: `vehicle_sim | helmsman`.
/// Malformed lines are skipped with a warning. Uses `Lines` because the
/// engine loop waits on it behind a timeout and `next_line` is
/// cancellation safe.
pub struct StdinSource {
    lines: tokio::io::Lines<tokio::io::BufReader<tokio::io::Stdin>>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            lines: tokio::io::BufReader::new(tokio::io::stdin()).lines(),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageSource for StdinSource {
    async fn next_event(&mut self) -> Result<BusEvent> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Ok(BusEvent::Eof);
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(line) {
                Ok(msg) => return Ok(BusEvent::Message(msg)),
                Err(e) => {
                    warn!("[StdinSource] Failed to parse message: {}", e);
                    // Skip malformed lines and keep reading
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

/// Reads messages from an in-process channel.
pub struct ChannelSource {
    rx: tokio::sync::mpsc::UnboundedReceiver<Message>,
}

impl ChannelSource {
    pub fn new(rx: tokio::sync::mpsc::UnboundedReceiver<Message>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn next_event(&mut self) -> Result<BusEvent> {
        match self.rx.recv().await {
            Some(msg) => Ok(BusEvent::Message(msg)),
            None => Ok(BusEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "channel"
    }
}
