//! Three-queue request scheduler (C4, spec §4.4).
//!
//! Admission, deduplication, blocking dispatch, and per-metatile requester
//! fan-out, all under a single lock. Ported from `RequestQueues` in
//! `original_source/renderd.py`; the `Mutex`-guarded shared-state shape
//! (state behind a lock, signaled via condition variable, no I/O under
//! the lock) follows the teacher's `scheduler.rs`/`slide_pool.rs`.
//!
//! `requested`/`dirty` use `IndexMap` (not a plain `HashMap`) so dispatch
//! can pop in insertion order — a concrete, cheap resolution of the
//! "tie-breaking is unspecified" open question in spec §9.

use std::collections::HashMap;

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};

use crate::coord::MetatileKey;
use crate::protocol::{Command, Request};

/// Default bound on the `requested` queue (spec §3).
pub const DEFAULT_REQUEST_LIMIT: usize = 32;
/// Default bound on the `dirty` queue (spec §3).
pub const DEFAULT_DIRTY_LIMIT: usize = 1000;

/// Which tier a request was admitted (or not admitted) into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Rendering,
    Requested,
    Dirty,
    Dropped,
}

struct Inner {
    requested: IndexMap<MetatileKey, Vec<Request>>,
    dirty: IndexMap<MetatileKey, Vec<Request>>,
    rendering: HashMap<MetatileKey, Vec<Request>>,
}

/// The shared scheduler. Cheap to pass around by `Arc` reference to
/// accept/handler/worker threads (spec §9 "Global shared scheduler state").
pub struct Scheduler {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    request_limit: usize,
    dirty_limit: usize,
}

impl Scheduler {
    pub fn new(request_limit: usize, dirty_limit: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                requested: IndexMap::new(),
                dirty: IndexMap::new(),
                rendering: HashMap::new(),
            }),
            not_empty: Condvar::new(),
            request_limit,
            dirty_limit,
        }
    }

    /// Admit a request, in the exact order specified by spec §4.4.
    /// Never blocks on I/O or the renderer — only touches in-memory state.
    ///
    /// On `Dropped`, the request is handed back to the caller (it was
    /// never queued) so the caller can synchronously respond `NotDone`
    /// for Render commands per spec §4.4/§4.6 step 4.
    pub fn add(&self, req: Request) -> Result<Admission, Request> {
        let key = req.metatile_key();
        let mut inner = self.inner.lock();

        if let Some(list) = inner.rendering.get_mut(&key) {
            list.push(req);
            return Ok(Admission::Rendering);
        }
        if let Some(list) = inner.requested.get_mut(&key) {
            list.push(req);
            return Ok(Admission::Requested);
        }
        if let Some(list) = inner.dirty.get_mut(&key) {
            list.push(req);
            return Ok(Admission::Dirty);
        }

        if req.command == Command::Render && inner.requested.len() < self.request_limit {
            inner.requested.insert(key, vec![req]);
            self.not_empty.notify_one();
            return Ok(Admission::Requested);
        }

        if inner.dirty.len() < self.dirty_limit {
            inner.dirty.insert(key, vec![req]);
            self.not_empty.notify_one();
            return Ok(Admission::Dirty);
        }

        Err(req)
    }

    /// Block until a metatile key is available, move it into `rendering`,
    /// and return the key. `requested` is preferred over `dirty`; within a
    /// tier, the oldest-admitted key is chosen (insertion-order FIFO).
    pub fn fetch(&self) -> MetatileKey {
        let mut inner = self.inner.lock();
        loop {
            if let Some((key, _)) = inner.requested.first() {
                let key = key.clone();
                let (key, list) = inner.requested.shift_remove_entry(&key).unwrap();
                inner.rendering.insert(key.clone(), list);
                return key;
            }
            if let Some((key, _)) = inner.dirty.first() {
                let key = key.clone();
                let (key, list) = inner.dirty.shift_remove_entry(&key).unwrap();
                inner.rendering.insert(key.clone(), list);
                return key;
            }
            self.not_empty.wait(&mut inner);
        }
    }

    /// Drain the requester list for a completed (or failed) metatile key.
    /// A missing key is an internal invariant violation (spec §4.4): log
    /// and return an empty list rather than panicking (spec §7 general
    /// policy — never crash the daemon on a per-request error).
    pub fn pop_requests(&self, key: &MetatileKey) -> Vec<Request> {
        let mut inner = self.inner.lock();
        match inner.rendering.remove(key) {
            Some(list) => list,
            None => {
                eprintln!("[SCHED] pop_requests: key not found in rendering map: {key:?}");
                Vec::new()
            }
        }
    }

    /// Snapshot queue depths, for diagnostics/tests.
    pub fn depths(&self) -> (usize, usize, usize) {
        let inner = self.inner.lock();
        (inner.requested.len(), inner.dirty.len(), inner.rendering.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::TileCoord;
    use crate::protocol::{ResponseSink, Variant};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct NullSink;
    impl ResponseSink for NullSink {
        fn write_response(&self, _bytes: &[u8]) -> io::Result<()> {
            Ok(())
        }
    }

    fn render_req(style: &str, x: i64, y: i64, z: u32) -> Request {
        Request {
            variant: Variant::V1,
            command: Command::Render,
            coord: TileCoord::new(z, x, y),
            style: style.to_string(),
            origin: Arc::new(NullSink),
        }
    }

    fn dirty_req(style: &str, x: i64, y: i64, z: u32) -> Request {
        Request {
            command: Command::Dirty,
            ..render_req(style, x, y, z)
        }
    }

    #[test]
    fn dedup_coalesces_into_one_requested_entry() {
        let sched = Scheduler::new(DEFAULT_REQUEST_LIMIT, DEFAULT_DIRTY_LIMIT);
        assert_eq!(sched.add(render_req("default", 511, 340, 10)).unwrap(), Admission::Requested);
        assert_eq!(sched.add(render_req("default", 510, 341, 10)).unwrap(), Admission::Requested);
        assert_eq!(sched.add(render_req("default", 508, 338, 10)).unwrap(), Admission::Requested);

        let (requested, dirty, rendering) = sched.depths();
        assert_eq!((requested, dirty, rendering), (1, 0, 0));
    }

    #[test]
    fn demotes_overflow_render_requests_to_dirty() {
        let sched = Scheduler::new(2, DEFAULT_DIRTY_LIMIT);
        assert_eq!(sched.add(render_req("default", 0, 0, 10)).unwrap(), Admission::Requested);
        assert_eq!(sched.add(render_req("default", 8, 0, 10)).unwrap(), Admission::Requested);
        assert_eq!(sched.add(render_req("default", 16, 0, 10)).unwrap(), Admission::Dirty);
    }

    #[test]
    fn drops_when_both_tiers_saturated() {
        let sched = Scheduler::new(1, 1);
        assert_eq!(sched.add(render_req("default", 0, 0, 10)).unwrap(), Admission::Requested);
        assert_eq!(sched.add(render_req("default", 8, 0, 10)).unwrap(), Admission::Dirty);
        let dropped = sched.add(render_req("default", 16, 0, 10));
        assert!(dropped.is_err());
        let req = dropped.unwrap_err();
        assert_eq!(req.coord.x, 16);
    }

    #[test]
    fn fetch_prefers_requested_over_dirty() {
        let sched = Scheduler::new(DEFAULT_REQUEST_LIMIT, DEFAULT_DIRTY_LIMIT);
        sched.add(dirty_req("default", 0, 0, 10)).unwrap();
        sched.add(render_req("default", 16, 0, 10)).unwrap();

        let key = sched.fetch();
        assert_eq!(key.mx, 16);
    }

    #[test]
    fn fetch_blocks_until_signalled() {
        let sched = Arc::new(Scheduler::new(DEFAULT_REQUEST_LIMIT, DEFAULT_DIRTY_LIMIT));
        let fetched = Arc::new(AtomicUsize::new(0));

        let sched2 = Arc::clone(&sched);
        let fetched2 = Arc::clone(&fetched);
        let handle = std::thread::spawn(move || {
            sched2.fetch();
            fetched2.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(fetched.load(Ordering::SeqCst), 0);

        sched.add(render_req("default", 0, 0, 10));
        handle.join().unwrap();
        assert_eq!(fetched.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pop_requests_drains_rendering_entry() {
        let sched = Scheduler::new(DEFAULT_REQUEST_LIMIT, DEFAULT_DIRTY_LIMIT);
        sched.add(render_req("default", 0, 0, 10));
        sched.add(render_req("default", 1, 0, 10));
        let key = sched.fetch();

        let reqs = sched.pop_requests(&key);
        assert_eq!(reqs.len(), 2);
        assert_eq!(sched.depths().2, 0);
    }

    #[test]
    fn missing_key_returns_empty_without_panicking() {
        let sched = Scheduler::new(DEFAULT_REQUEST_LIMIT, DEFAULT_DIRTY_LIMIT);
        let key = MetatileKey { style: "default".into(), mx: 0, my: 0, z: 10 };
        assert!(sched.pop_requests(&key).is_empty());
    }
}
