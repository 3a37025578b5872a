//! Fans one decoded frame out to every registered session.
//!
//! Rendering happens per session because every client has its own
//! geometry and color model. A session that has not negotiated a window
//! yet, or whose outbound backlog is over the limit, is skipped for this
//! frame only; a session whose write path died is evicted. One broken
//! client never interrupts the pass for the rest.

use std::collections::HashMap;

use log::{info, trace, warn};

use crate::geometry;
use crate::render;
use crate::session::{ClientSession, SendOutcome};
use crate::telnet::CURSOR_RESTORE;

pub struct Broadcaster {
    base_w: u32,
    base_h: u32,
    char_aspect: f64,
    sessions: HashMap<u64, ClientSession>,
    next_id: u64,
}

impl Broadcaster {
    pub fn new(base_w: u32, base_h: u32, char_aspect: f64) -> Self {
        Self {
            base_w,
            base_h,
            char_aspect,
            sessions: HashMap::new(),
            next_id: 0,
        }
    }

    pub fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn register(&mut self, session: ClientSession) {
        info!("client {} connected (session {})", session.addr, session.id);
        self.sessions.insert(session.id, session);
    }

    pub fn session_mut(&mut self, id: u64) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Remove and tear down one session.
    pub fn evict(&mut self, id: u64, reason: &str) {
        if let Some(session) = self.sessions.remove(&id) {
            info!("client {} disconnected ({reason})", session.addr);
            session.close();
        }
    }

    /// Render and write `frame` for every eligible session.
    pub fn broadcast(&mut self, frame: &[u8]) {
        debug_assert_eq!(frame.len(), (self.base_w * self.base_h * 3) as usize);

        let mut dead = Vec::new();
        for session in self.sessions.values_mut() {
            let Some((cols, rows)) = session.window else {
                continue;
            };
            let fit = geometry::fit(cols, rows, self.base_w, self.base_h, self.char_aspect);
            let payload = render::render(session.mode, frame, self.base_w, self.base_h, &fit);
            match session.send(payload) {
                SendOutcome::Sent => {}
                SendOutcome::Dropped => {
                    trace!("client {} over backlog limit, frame dropped", session.addr);
                }
                SendOutcome::Closed => dead.push(session.id),
            }
        }
        for id in dead {
            self.evict(id, "write failed");
        }
    }

    /// Best-effort cursor restore to everyone, then tear all sessions
    /// down. Used for shutdown and for fatal decoder errors.
    pub fn close_all(&mut self) {
        if !self.sessions.is_empty() {
            warn!("closing {} client session(s)", self.sessions.len());
        }
        for (_, session) in self.sessions.drain() {
            let _ = session.send(CURSOR_RESTORE.to_vec());
            session.close();
        }
    }
}
