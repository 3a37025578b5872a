//! Spawns and supervises the external ffmpeg decoder.
//!
//! ffmpeg is treated as a black box that, given a size, frame rate and a
//! source path, writes back-to-back raw RGB frames to stdout at the
//! requested rate and exits when the source runs out. The lifecycle keeps
//! exactly one decoder alive, advances the playlist when a stream ends,
//! and tells deliberate shutdown apart from a crash.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::Sender;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info};

use crate::playlist::Playlist;
use crate::server::Event;

const READ_CHUNK_LEN: usize = 64 * 1024;

/// One live ffmpeg process; its stdout is drained by a named thread.
struct FfmpegDecoder {
    child: Child,
}

impl FfmpegDecoder {
    /// Spawn ffmpeg decoding `path` to raw RGB frames on stdout. `-re`
    /// paces output at the source rate so the pipe itself is the frame
    /// clock. Stdout chunks and the final EOF are forwarded as events
    /// tagged with `generation`.
    fn spawn(
        path: &Path,
        width: u32,
        height: u32,
        fps: u32,
        generation: u64,
        events: Sender<Event>,
    ) -> Result<Self> {
        let size = format!("{}x{}", width, height);
        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-re")
            .arg("-i")
            .arg(path)
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-s")
            .arg(size)
            .arg("-r")
            .arg(fps.to_string())
            .arg("-an")
            .arg("-")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to spawn ffmpeg decoder")?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stderr"))?;

        thread::Builder::new()
            .name(format!("telecine-decode-{generation}"))
            .spawn(move || {
                let mut buffer = vec![0u8; READ_CHUNK_LEN];
                loop {
                    match stdout.read(&mut buffer) {
                        Ok(0) => break,
                        Ok(n) => {
                            let event = Event::DecoderChunk {
                                generation,
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
                let mut captured = String::new();
                let _ = stderr.read_to_string(&mut captured);
                let _ = events.send(Event::DecoderEof {
                    generation,
                    stderr: captured,
                });
            })
            .context("failed to spawn ffmpeg reader thread")?;

        Ok(Self { child })
    }

    fn wait(&mut self) -> Result<ExitStatus> {
        self.child.wait().context("failed to reap ffmpeg decoder")
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Starting,
    Streaming,
    Ended,
    Failed,
    Stopped,
}

/// Owns the active decoder and drives the playlist forward.
///
/// Every spawn bumps `generation`; events carrying an older generation
/// are stale leftovers from a replaced decoder and are discarded, so
/// overlapping end-of-stream events can never start two decoders.
pub struct DecoderLifecycle {
    width: u32,
    height: u32,
    fps: u32,
    playlist: Playlist,
    current: Option<FfmpegDecoder>,
    generation: u64,
    state: DecoderState,
}

impl DecoderLifecycle {
    pub fn new(width: u32, height: u32, fps: u32, playlist: Playlist) -> Self {
        Self {
            width,
            height,
            fps,
            playlist,
            current: None,
            generation: 0,
            state: DecoderState::Starting,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// True when `generation` identifies the decoder currently live.
    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.generation
    }

    /// Spawn the decoder for the playlist's current item and advance the
    /// cursor.
    pub fn start(&mut self, events: &Sender<Event>) -> Result<()> {
        self.generation += 1;
        let index = self.playlist.position();
        let path = self.playlist.next();
        info!(
            "decoding {} (playlist {}/{})",
            path.display(),
            index + 1,
            self.playlist.len()
        );
        let decoder = FfmpegDecoder::spawn(
            &path,
            self.width,
            self.height,
            self.fps,
            self.generation,
            events.clone(),
        )?;
        self.current = Some(decoder);
        self.state = DecoderState::Starting;
        Ok(())
    }

    /// Called on the first output chunk of the live decoder.
    pub fn note_streaming(&mut self) {
        if self.state == DecoderState::Starting {
            self.state = DecoderState::Streaming;
        }
    }

    /// Handle the end of the live decoder's output stream.
    ///
    /// Stale generations are ignored. During shutdown the exit is
    /// expected and nothing restarts. A clean exit advances to the next
    /// playlist item; a non-zero exit logs the captured stderr and is
    /// escalated to the caller as fatal.
    pub fn handle_eof(
        &mut self,
        generation: u64,
        stderr: &str,
        events: &Sender<Event>,
    ) -> Result<()> {
        if !self.is_current(generation) {
            debug!("ignoring end of replaced decoder (generation {generation})");
            return Ok(());
        }
        let Some(mut decoder) = self.current.take() else {
            return Ok(());
        };
        let status = decoder.wait()?;

        if self.state == DecoderState::Stopped {
            return Ok(());
        }

        if status.success() {
            self.state = DecoderState::Ended;
            self.start(events)
        } else {
            self.state = DecoderState::Failed;
            for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
                error!("ffmpeg: {line}");
            }
            bail!("ffmpeg decoder exited with {status}");
        }
    }

    /// Deliberate shutdown: mark stopped before killing the process so a
    /// racing EOF event cannot trigger a restart.
    pub fn shutdown(&mut self) {
        self.state = DecoderState::Stopped;
        if let Some(mut decoder) = self.current.take() {
            decoder.kill();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::{DecoderLifecycle, DecoderState};
    use crate::playlist::Playlist;

    fn lifecycle() -> DecoderLifecycle {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"x").unwrap();
        DecoderLifecycle::new(240, 135, 15, Playlist::single(&path).unwrap())
    }

    #[test]
    fn stale_generation_events_are_ignored() {
        let (tx, rx) = mpsc::channel();
        let mut lifecycle = lifecycle();
        // Leftover event from a replaced decoder must be a no-op.
        lifecycle.handle_eof(3, "", &tx).unwrap();
        assert_eq!(lifecycle.state(), DecoderState::Starting);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn shutdown_marks_stopped_without_a_live_decoder() {
        let mut lifecycle = lifecycle();
        lifecycle.shutdown();
        assert_eq!(lifecycle.state(), DecoderState::Stopped);
    }

    #[test]
    fn eof_during_shutdown_does_not_restart() {
        let (tx, rx) = mpsc::channel();
        let mut lifecycle = lifecycle();
        lifecycle.shutdown();
        lifecycle.handle_eof(0, "", &tx).unwrap();
        assert_eq!(lifecycle.state(), DecoderState::Stopped);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn streaming_is_noted_only_while_starting() {
        let mut lifecycle = lifecycle();
        lifecycle.note_streaming();
        assert_eq!(lifecycle.state(), DecoderState::Streaming);
        lifecycle.shutdown();
        lifecycle.note_streaming();
        assert_eq!(lifecycle.state(), DecoderState::Stopped);
    }
}
