//! Per-deployment log buffer with live fan-out.
//!
//! The buffer is the authoritative, append-only history. The live queue is a
//! bounded broadcast ring: producers never wait on it, and a subscriber that
//! falls behind loses the oldest undelivered lines and is told how many.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

/// Item delivered to live subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Line(Arc<str>),
    /// The deployment reached a terminal status; no more lines follow
    Closed,
}

#[derive(Debug, Default)]
struct LogBuffer {
    lines: Vec<Arc<str>>,
    closed: bool,
}

/// Buffer replay plus a live receiver attached at the exact end of that replay
#[derive(Debug)]
pub struct LogSubscription {
    pub replay: Vec<Arc<str>>,
    pub closed: bool,
    pub live: broadcast::Receiver<LogEvent>,
}

/// Log distributor for a single deployment
#[derive(Debug)]
pub struct LogDistributor {
    buffer: Mutex<LogBuffer>,
    live: broadcast::Sender<LogEvent>,
}

impl LogDistributor {
    /// Create a distributor whose live queue holds `capacity` undelivered lines
    pub fn new(capacity: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(1));
        Self {
            buffer: Mutex::new(LogBuffer::default()),
            live,
        }
    }

    /// Append a line to the history and offer it to live subscribers.
    ///
    /// Lines pushed after [`close`](Self::close) are ignored.
    pub fn push(&self, line: impl Into<String>) {
        let line: Arc<str> = Arc::from(line.into());
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buffer.closed {
            return;
        }
        buffer.lines.push(line.clone());
        // No receivers is not an error here
        let _ = self.live.send(LogEvent::Line(line));
    }

    /// Mark the stream finished and release live subscribers
    pub fn close(&self) {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        if buffer.closed {
            return;
        }
        buffer.closed = true;
        let _ = self.live.send(LogEvent::Closed);
    }

    /// Replay the history and attach to the live queue without gaps or duplicates
    pub fn subscribe(&self) -> LogSubscription {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        LogSubscription {
            replay: buffer.lines.clone(),
            closed: buffer.closed,
            live: self.live.subscribe(),
        }
    }

    /// Copy of the full history
    pub fn snapshot(&self) -> Vec<Arc<str>> {
        let buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.lines.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).closed
    }
}
