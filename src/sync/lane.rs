//! Per-repo serialization of sync work.
//!
//! All VCS mutation for one repo flows through one lane: at most one pass
//! runs at a time, and at most one more per direction is pending. While the
//! lane is busy, fresh work requests collapse into a dirty bit; when a pass
//! completes, one pending direction (routing first) is drained. A failed
//! pass leaves its dirty bit alone so the next watcher event — not a hot
//! loop — retries it.

/// Which way a pass moves bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Preview working tree → owning agent workspaces.
    Route,
    /// Agent workspaces → preview working tree.
    Sync,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Direction::Route => 0,
            Direction::Sync => 1,
        }
    }
}

/// Lane state: `{idle, running, running-dirty}` per direction, folded into
/// a busy flag plus two dirty bits.
#[derive(Debug, Default)]
pub struct Lane {
    busy: bool,
    dirty: [bool; 2],
}

impl Lane {
    /// Ask to run a pass in the given direction. Returns `true` when the
    /// caller should start it now; otherwise the request is remembered in
    /// the direction's dirty bit.
    pub fn request(&mut self, direction: Direction) -> bool {
        if self.busy {
            self.dirty[direction.index()] = true;
            return false;
        }
        self.busy = true;
        true
    }

    /// A pass finished. On success, drain one pending direction (routing
    /// preferred — a route completed first is observed by the following
    /// sync). On failure the dirty bits are left as they are; the lane goes
    /// idle and the next event retries.
    pub fn complete(&mut self, success: bool) -> Option<Direction> {
        debug_assert!(self.busy, "complete without a running pass");
        if !success {
            self.busy = false;
            return None;
        }
        for direction in [Direction::Route, Direction::Sync] {
            if self.dirty[direction.index()] {
                self.dirty[direction.index()] = false;
                return Some(direction);
            }
        }
        self.busy = false;
        None
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Mark a direction dirty without scheduling (failed-pass bookkeeping).
    pub fn mark_dirty(&mut self, direction: Direction) {
        self.dirty[direction.index()] = true;
    }

    pub fn is_dirty(&self, direction: Direction) -> bool {
        self.dirty[direction.index()]
    }
}
