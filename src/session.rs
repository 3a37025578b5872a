//! Per-connection state: negotiated window, render mode, the input
//! scanner and the backpressured write path.
//!
//! Each session owns a writer thread fed through a channel. The channel
//! is gated by a shared unflushed-byte counter: once a slow client's
//! backlog crosses the limit, frames for that client are dropped on the
//! floor until it drains. Nothing ever queues per-client beyond that
//! backlog and nothing retries.

use std::io::Write;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use log::debug;

use crate::render::RenderMode;
use crate::server::Event;
use crate::telnet::NawsScanner;

/// Outcome of handing one payload to a session's write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// Over the unflushed-byte limit; payload discarded for this client.
    Dropped,
    /// Write path is gone; the session should be evicted.
    Closed,
}

/// Channel into a session's writer thread, with the pending-byte gate.
pub struct SessionWriter {
    tx: Option<Sender<Vec<u8>>>,
    pending: Arc<AtomicUsize>,
    limit: usize,
}

impl SessionWriter {
    /// Spawn the writer thread over `stream`. A write failure reports
    /// back through `events` and ends the thread; later sends then
    /// return [`SendOutcome::Closed`].
    pub fn spawn(
        id: u64,
        stream: TcpStream,
        limit: usize,
        events: Sender<Event>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::clone(&pending);

        thread::Builder::new()
            .name(format!("telecine-write-{id}"))
            .spawn(move || {
                let mut stream = stream;
                while let Ok(payload) = rx.recv() {
                    let written = stream.write_all(&payload);
                    drained.fetch_sub(payload.len(), Ordering::AcqRel);
                    if written.is_err() {
                        let _ = events.send(Event::SessionClosed { id });
                        break;
                    }
                }
            })
            .context("failed to spawn session writer thread")?;

        Ok(Self {
            tx: Some(tx),
            pending,
            limit,
        })
    }

    /// Hand `payload` to the writer unless the client is over its
    /// backlog limit.
    pub fn send(&self, payload: Vec<u8>) -> SendOutcome {
        let Some(tx) = self.tx.as_ref() else {
            return SendOutcome::Closed;
        };
        if self.pending.load(Ordering::Acquire) > self.limit {
            return SendOutcome::Dropped;
        }
        self.pending.fetch_add(payload.len(), Ordering::AcqRel);
        match tx.send(payload) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::SendError(payload)) => {
                self.pending.fetch_sub(payload.len(), Ordering::AcqRel);
                SendOutcome::Closed
            }
        }
    }

    /// Let the writer thread drain what it has and exit.
    fn disconnect(&mut self) {
        self.tx = None;
    }

    #[cfg(test)]
    pub fn with_backlog(limit: usize, backlog: usize) -> Self {
        let (tx, rx) = mpsc::channel();
        let pending = Arc::new(AtomicUsize::new(backlog));
        // Keep the receiver alive so sends succeed without a socket.
        std::mem::forget(rx);
        Self {
            tx: Some(tx),
            pending,
            limit,
        }
    }

    #[cfg(test)]
    pub fn closed() -> Self {
        let (tx, _) = mpsc::channel();
        Self {
            tx: Some(tx),
            pending: Arc::new(AtomicUsize::new(0)),
            limit: usize::MAX,
        }
    }
}

/// What one input chunk asked the server to do.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InputOutcome {
    pub resized: bool,
    pub quit: bool,
}

pub struct ClientSession {
    pub id: u64,
    pub addr: SocketAddr,
    stream: Option<TcpStream>,
    writer: SessionWriter,
    scanner: NawsScanner,
    /// Negotiated terminal size; rendering stays off until known.
    pub window: Option<(u16, u16)>,
    pub mode: RenderMode,
}

impl ClientSession {
    pub fn new(
        id: u64,
        addr: SocketAddr,
        stream: TcpStream,
        writer: SessionWriter,
        mode: RenderMode,
    ) -> Self {
        Self {
            id,
            addr,
            stream: Some(stream),
            writer,
            scanner: NawsScanner::new(),
            window: None,
            mode,
        }
    }

    /// Run one input chunk through negotiation scanning, then check the
    /// stripped text for the mode toggle and quit keys. The checks are
    /// independent; a single chunk may both toggle and quit.
    pub fn handle_input(&mut self, data: &[u8], quit_keys: &[u8]) -> InputOutcome {
        let scan = self.scanner.scan(data);
        let mut outcome = InputOutcome::default();

        if let Some((cols, rows)) = scan.window {
            debug!("client {} window is {}x{}", self.addr, cols, rows);
            self.window = Some((cols, rows));
            outcome.resized = true;
        }

        for &byte in &scan.text {
            if byte == b'm' || byte == b'M' {
                self.mode = self.mode.toggled();
                debug!("client {} switched to {:?}", self.addr, self.mode);
            }
            if quit_keys.contains(&byte) {
                outcome.quit = true;
            }
        }
        outcome
    }

    pub fn send(&self, payload: Vec<u8>) -> SendOutcome {
        self.writer.send(payload)
    }

    /// Tear the connection down: best-effort flush of queued output,
    /// then both socket halves shut so the reader thread unblocks.
    pub fn close(mut self) {
        self.writer.disconnect();
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    #[cfg(test)]
    pub fn for_tests(id: u64, writer: SessionWriter, mode: RenderMode) -> Self {
        Self {
            id,
            addr: ([127, 0, 0, 1], 0).into(),
            stream: None,
            writer,
            scanner: NawsScanner::new(),
            window: None,
            mode,
        }
    }
}
