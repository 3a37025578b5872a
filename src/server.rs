//! Accepts terminal clients and runs the single event loop that owns all
//! mutable state.
//!
//! Every producer (accept thread, per-client reader threads, decoder
//! reader thread, the signal handler) only sends events; the loop thread
//! alone touches the registry, the demuxer and the decoder handle.
//! Handlers therefore never interleave and no locks guard that state.

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::decoding::DecoderLifecycle;
use crate::demux::FrameDemuxer;
use crate::playlist::Playlist;
use crate::render::RenderMode;
use crate::session::{ClientSession, SessionWriter};
use crate::telnet::{self, CURSOR_RESTORE, SCREEN_SETUP};

const READ_BUF_LEN: usize = 512;

/// Everything that can happen, serialized through one channel.
pub enum Event {
    Connected(TcpStream, SocketAddr),
    Input { session: u64, data: Vec<u8> },
    SessionClosed { id: u64 },
    DecoderChunk { generation: u64, data: Vec<u8> },
    DecoderEof { generation: u64, stderr: String },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub fps: u32,
    pub base_w: u32,
    pub base_h: u32,
    pub char_aspect: f64,
    pub default_mode: RenderMode,
    pub backpressure_limit: usize,
    pub quit_keys: Vec<u8>,
}

pub struct Server {
    config: ServerConfig,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    fanout: Broadcaster,
    demux: FrameDemuxer,
    decoder: DecoderLifecycle,
}

impl Server {
    pub fn new(config: ServerConfig, playlist: Playlist) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        let fanout = Broadcaster::new(config.base_w, config.base_h, config.char_aspect);
        let demux = FrameDemuxer::new((config.base_w * config.base_h * 3) as usize);
        let decoder = DecoderLifecycle::new(config.base_w, config.base_h, config.fps, playlist);
        Self {
            config,
            events_tx,
            events_rx,
            fanout,
            demux,
            decoder,
        }
    }

    /// Bind, start the decoder and process events until shutdown or a
    /// fatal decoder error.
    pub fn run(mut self) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.config.port))
            .with_context(|| format!("failed to bind port {}", self.config.port))?;
        info!("listening on port {}", self.config.port);

        spawn_acceptor(listener, self.events_tx.clone())?;

        let shutdown_tx = self.events_tx.clone();
        ctrlc::set_handler(move || {
            let _ = shutdown_tx.send(Event::Shutdown);
        })
        .context("failed to install shutdown handler")?;

        self.decoder.start(&self.events_tx)?;

        while let Ok(event) = self.events_rx.recv() {
            match event {
                Event::Connected(stream, addr) => self.on_connected(stream, addr),
                Event::Input { session, data } => self.on_input(session, &data),
                Event::SessionClosed { id } => self.fanout.evict(id, "connection closed"),
                Event::DecoderChunk { generation, data } => self.on_chunk(generation, &data),
                Event::DecoderEof { generation, stderr } => {
                    if let Err(error) = self.on_decoder_eof(generation, &stderr) {
                        self.fanout.close_all();
                        self.decoder.shutdown();
                        return Err(error);
                    }
                }
                Event::Shutdown => {
                    info!("shutting down");
                    self.decoder.shutdown();
                    self.fanout.close_all();
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn on_connected(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("client {addr}: set_nodelay failed: {e}");
        }
        let id = self.fanout.allocate_id();

        let write_half = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!("client {addr}: failed to clone stream: {e}");
                return;
            }
        };
        let writer = match SessionWriter::spawn(
            id,
            write_half,
            self.config.backpressure_limit,
            self.events_tx.clone(),
        ) {
            Ok(writer) => writer,
            Err(e) => {
                warn!("client {addr}: {e}");
                return;
            }
        };
        if let Err(e) = spawn_session_reader(id, stream.try_clone().ok(), self.events_tx.clone()) {
            warn!("client {addr}: {e}");
            return;
        }

        let session = ClientSession::new(id, addr, stream, writer, self.config.default_mode);
        // Ask for window reports, then set the screen up once; frames
        // only home the cursor from here on.
        let mut hello = telnet::negotiation_request();
        hello.extend_from_slice(SCREEN_SETUP);
        session.send(hello);
        self.fanout.register(session);
        debug!("{} active session(s)", self.fanout.len());
    }

    fn on_input(&mut self, id: u64, data: &[u8]) {
        let Some(session) = self.fanout.session_mut(id) else {
            return;
        };
        let outcome = session.handle_input(data, &self.config.quit_keys);
        if outcome.quit {
            session.send(CURSOR_RESTORE.to_vec());
            self.fanout.evict(id, "quit");
        }
    }

    fn on_chunk(&mut self, generation: u64, data: &[u8]) {
        if !self.decoder.is_current(generation) {
            return;
        }
        self.decoder.note_streaming();
        for frame in self.demux.push(data) {
            self.fanout.broadcast(&frame);
        }
    }

    fn on_decoder_eof(&mut self, generation: u64, stderr: &str) -> Result<()> {
        if self.decoder.is_current(generation) {
            // Frame boundaries do not survive a decoder swap.
            self.demux.reset();
        }
        let result = self.decoder.handle_eof(generation, stderr, &self.events_tx);
        debug!("decoder state after stream end: {:?}", self.decoder.state());
        result
    }
}

fn spawn_acceptor(listener: TcpListener, events: Sender<Event>) -> Result<()> {
    thread::Builder::new()
        .name("telecine-accept".to_owned())
        .spawn(move || {
            for connection in listener.incoming() {
                match connection {
                    Ok(stream) => {
                        let Ok(addr) = stream.peer_addr() else {
                            continue;
                        };
                        if events.send(Event::Connected(stream, addr)).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        })
        .context("failed to spawn accept thread")?;
    Ok(())
}

fn spawn_session_reader(
    id: u64,
    stream: Option<TcpStream>,
    events: Sender<Event>,
) -> Result<()> {
    let mut stream = stream.context("failed to clone stream for reading")?;
    thread::Builder::new()
        .name(format!("telecine-read-{id}"))
        .spawn(move || {
            let mut buffer = [0u8; READ_BUF_LEN];
            loop {
                match stream.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let event = Event::Input {
                            session: id,
                            data: buffer[..n].to_vec(),
                        };
                        if events.send(event).is_err() {
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
            let _ = events.send(Event::SessionClosed { id });
        })
        .context("failed to spawn session reader thread")?;
    Ok(())
}
