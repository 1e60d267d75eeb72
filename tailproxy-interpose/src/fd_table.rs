//! Per-process FD -> socket metadata table (spec.md §4.A).
//!
//! A flat, bounded array beats a hash map here: FD numbers are small and
//! dense in practice, and every lookup sits on the hot syscall path for
//! every `connect`/`bind`/`listen`/`close` the application makes.
//!
//! `dup`-family descriptor duplication is not tracked (spec.md §9, a
//! known limitation): a duplicated listener FD whose original is closed
//! first will emit a spurious CLOSE to the supervisor and leak the
//! export entry until the last duplicate is closed, at which point no
//! further CLOSE is sent at all since this table no longer has a record
//! of it.

use std::sync::Mutex;
use tailproxy_proto::Family;

/// Ceiling covering any FD a normal process will open; out-of-range FDs are
/// treated as untracked rather than erroring (spec.md §4.A: "Failure to
/// record an entry ... causes the shim to proceed without tracking but
/// never to fail the underlying call").
const MAX_TRACKED_FD: usize = 4096;

#[derive(Debug, Clone, Copy, Default)]
pub struct FdEntry {
    pub is_tcp: bool,
    pub is_listener: bool,
    pub family: Option<Family>,
    pub port: u16,
}

impl FdEntry {
    fn empty() -> Self {
        Self::default()
    }
}

pub struct FdTable {
    entries: Mutex<Box<[FdEntry; MAX_TRACKED_FD]>>,
}

impl FdTable {
    fn new() -> Self {
        Self {
            entries: Mutex::new(Box::new([FdEntry::empty(); MAX_TRACKED_FD])),
        }
    }

    pub fn global() -> &'static FdTable {
        static TABLE: std::sync::OnceLock<FdTable> = std::sync::OnceLock::new();
        TABLE.get_or_init(FdTable::new)
    }

    /// Records that `fd` is a TCP socket bound (or about to be bound) to
    /// `family`. Out-of-range FDs are silently ignored.
    pub fn mark_bound(&self, fd: i32, family: Family) {
        self.with_entry_mut(fd, |entry| {
            entry.is_tcp = true;
            entry.family = Some(family);
        });
    }

    /// Records that `fd` is now a listener on `port`. Requires `mark_bound`
    /// to have tagged it TCP first, upholding the invariant that a listener
    /// implies the TCP flag and a strictly positive port.
    pub fn mark_listener(&self, fd: i32, family: Family, port: u16) {
        debug_assert!(port > 0, "listener port must be positive");
        self.with_entry_mut(fd, |entry| {
            entry.is_tcp = true;
            entry.is_listener = true;
            entry.family = Some(family);
            entry.port = port;
        });
    }

    pub fn lookup(&self, fd: i32) -> Option<FdEntry> {
        let idx = Self::index(fd)?;
        let guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = guard[idx];
        if entry.is_tcp || entry.is_listener {
            Some(entry)
        } else {
            None
        }
    }

    /// Clears any tracked state for `fd`, returning what was there (so
    /// `close` can decide whether to emit a CLOSE control message).
    pub fn clear(&self, fd: i32) -> Option<FdEntry> {
        let idx = Self::index(fd)?;
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let prior = guard[idx];
        guard[idx] = FdEntry::empty();
        if prior.is_tcp || prior.is_listener {
            Some(prior)
        } else {
            None
        }
    }

    fn with_entry_mut(&self, fd: i32, f: impl FnOnce(&mut FdEntry)) {
        let Some(idx) = Self::index(fd) else {
            return;
        };
        let mut guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard[idx]);
    }

    fn index(fd: i32) -> Option<usize> {
        if fd < 0 {
            return None;
        }
        let idx = fd as usize;
        if idx >= MAX_TRACKED_FD {
            None
        } else {
            Some(idx)
        }
    }
}
