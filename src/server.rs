//! Unix domain socket server (C6, spec §4.3/§4.6).
//!
//! Binds one `UnixListener`, then spawns a detached thread per accepted
//! connection — the teacher's `tile_reader.rs` request-handling shape
//! (accept loop + per-connection worker, threads not joined so they
//! never block process exit), adapted from a TCP/file reader to a Unix
//! stream socket. Read/decode/dispatch loop follows
//! `RequestQueues.request_handler`/`handle_request` in
//! `original_source/renderd.py`.

use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::RenderdResult;
use crate::protocol::{self, Command, Request, ResponseSink, V2_LEN};
use crate::scheduler::Scheduler;

/// Largest packet the wire protocol defines; a single `read` never needs
/// more than this many bytes (spec §4.3).
const MAX_PACKET_LEN: usize = V2_LEN;

/// A `ResponseSink` backed by a cloned write half of the accepted stream.
/// Cheap to clone and share with the scheduler/worker pool, which may
/// hold a request (and thus this sink) long after `handle_connection`
/// has moved on to its next `read` (spec §9 "origin socket is a weak
/// reference" in spirit, `Arc`-shared in practice since `UnixStream`
/// itself has no separate read/write halves to split).
struct StreamSink {
    stream: Mutex<UnixStream>,
}

impl ResponseSink for StreamSink {
    fn write_response(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.stream.lock().unwrap().write_all(bytes)
    }
}

/// Bind `socket_path`, removing a stale socket file left by a previous
/// run, and open it up for any local user to connect to (spec §4.6
/// "bind, unlink any stale socket file first, then chmod 0666").
pub fn bind(socket_path: &Path) -> RenderdResult<UnixListener> {
    match fs::remove_file(socket_path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let listener = UnixListener::bind(socket_path)?;
    fs::set_permissions(socket_path, fs::Permissions::from_mode(0o666))?;
    Ok(listener)
}

/// Accept connections forever, handing each to its own detached thread.
/// Never returns under normal operation.
pub fn serve(listener: UnixListener, scheduler: Arc<Scheduler>) {
    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(s) => s,
            Err(e) => {
                eprintln!("[SERVER] accept error: {e}");
                continue;
            }
        };
        let scheduler = Arc::clone(&scheduler);
        std::thread::spawn(move || handle_connection(stream, scheduler));
    }
}

fn handle_connection(stream: UnixStream, scheduler: Arc<Scheduler>) {
    let sink: Arc<dyn ResponseSink> = Arc::new(StreamSink {
        stream: Mutex::new(stream.try_clone().expect("clone connected unix stream")),
    });
    let mut read_half = stream;
    let mut buf = [0u8; MAX_PACKET_LEN];

    loop {
        let n = match read_half.read(&mut buf) {
            Ok(0) => return, // clean close (spec §4.3)
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => return,
            Err(e) => {
                eprintln!("[SERVER] read error: {e}");
                return;
            }
        };

        match protocol::decode(&buf[..n], Arc::clone(&sink)) {
            Ok(Some(req)) => dispatch(req, &scheduler),
            Ok(None) => return,
            Err(e) => {
                eprintln!("[SERVER] malformed packet, closing connection: {e}");
                return;
            }
        }
    }
}

/// Validate, admit, and (on saturation) synchronously respond to one
/// decoded request (spec §4.4 admission order, §4.6 step 4).
fn dispatch(req: Request, scheduler: &Scheduler) {
    if req.command != Command::Render && req.command != Command::Dirty {
        return;
    }

    if req.is_bad_request() {
        if req.command == Command::Render {
            req.respond(Command::NotDone);
        }
        return;
    }

    if let Err(req) = scheduler.add(req) {
        eprintln!("[SERVER] queue saturated, dropping request for {:?}", req.metatile_key());
        if req.command == Command::Render {
            req.respond(Command::NotDone);
        }
    }
}
