//! One thread per client connection
//!
//! The thread reads straight into its ring, runs the protocol engine over
//! whatever is buffered, and flushes replies. Canvas read locks are held
//! for a single engine pass and never across a socket call.
//!
//! # Teardown
//!
//! On every exit path (EOF, error, cancellation) the thread, in order:
//! drops its ring, shuts the socket down, and removes itself from the
//! acceptor's [`ConnectionSet`] under the set's lock.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use shoreline_core::error::ProtocolViolation;
use shoreline_core::{
    Board, CancellationToken, Outcome, PixelMode, ProtocolEngine, Result, RingBuffer, ShorelineError,
};

use crate::locality::Topology;

/// Per-connection parameters shared by all connections
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub ring_size: usize,
    pub garbage_limit: usize,
    pub mode: PixelMode,
}

/// The parts of a connection other threads may touch
#[derive(Debug)]
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    bytes_received: AtomicU64,
    token: CancellationToken,
}

impl Connection {
    pub fn new(id: u64, peer: SocketAddr, stream: TcpStream, token: CancellationToken) -> Self {
        Self {
            id,
            peer,
            stream,
            bytes_received: AtomicU64::new(0),
            token,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Bytes received since the last call
    pub fn take_bytes_received(&self) -> u64 {
        self.bytes_received.swap(0, Ordering::Relaxed)
    }

    /// Cancel and unblock the connection thread
    pub fn close(&self) {
        self.token.cancel();
        shutdown_stream(&self.stream);
    }
}

/// Live connections of one acceptor
#[derive(Debug, Default)]
pub struct ConnectionSet {
    connections: Mutex<HashMap<u64, Arc<Connection>>>,
    drained: Condvar,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Arc<Connection>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `conn` unless `token` was cancelled. Checked under the lock
    /// so a concurrent [`close_all`](Self::close_all) cannot miss it.
    pub fn insert_unless_cancelled(&self, conn: Arc<Connection>, token: &CancellationToken) -> bool {
        let mut connections = self.lock();
        if token.is_cancelled() {
            return false;
        }
        connections.insert(conn.id, conn);
        true
    }

    pub fn remove(&self, id: u64) {
        let mut connections = self.lock();
        connections.remove(&id);
        if connections.is_empty() {
            self.drained.notify_all();
        }
    }

    pub fn close_all(&self) {
        for conn in self.lock().values() {
            conn.close();
        }
    }

    /// Block until every connection has removed itself
    pub fn wait_drained(&self) {
        let mut connections = self.lock();
        while !connections.is_empty() {
            connections = self
                .drained
                .wait(connections)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn take_bytes_received(&self) -> u64 {
        self.lock().values().map(|c| c.take_bytes_received()).sum()
    }
}

/// Releases the socket and the set entry, in that order, however the
/// connection thread exits.
struct Teardown<'a> {
    conn: &'a Connection,
    set: &'a ConnectionSet,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        shutdown_stream(&self.conn.stream);
        self.set.remove(self.conn.id);
    }
}

/// Connection thread body
pub fn run(conn: Arc<Connection>, set: Arc<ConnectionSet>, board: Arc<Board>, topology: Topology, settings: ConnectionSettings) {
    let _teardown = Teardown { conn: &conn, set: &set };
    tracing::debug!(peer = %conn.peer, id = conn.id, "connection opened");

    match serve(&conn, &board, &topology, &settings) {
        Ok(()) => tracing::debug!(peer = %conn.peer, "connection closed"),
        Err(ShorelineError::Cancelled) => tracing::debug!(peer = %conn.peer, "connection cancelled"),
        Err(ShorelineError::ProtocolViolation(violation)) => {
            tracing::warn!(peer = %conn.peer, %violation, "dropping misbehaving client")
        }
        Err(ShorelineError::Transport(err)) if conn.token.is_cancelled() => {
            tracing::debug!(peer = %conn.peer, %err, "connection cancelled")
        }
        Err(err) if err.is_connection_local() => tracing::debug!(peer = %conn.peer, %err, "connection failed"),
        Err(err) => tracing::error!(peer = %conn.peer, %err, "connection could not start"),
    }
}

/// Read/parse/reply loop. Returns `Ok` on orderly EOF; the ring is dropped
/// when this returns.
fn serve(conn: &Connection, board: &Board, topology: &Topology, settings: &ConnectionSettings) -> Result<()> {
    let locality = topology.current();
    let shard = board.shard_for(locality)?;
    let mut ring = RingBuffer::with_capacity(settings.ring_size)?;
    let mut engine = ProtocolEngine::new(settings.mode, settings.garbage_limit);
    let mut replies = Vec::new();
    let mut stream = &conn.stream;

    loop {
        conn.token.check()?;

        let buf = ring.writable();
        if buf.is_empty() {
            return Err(ProtocolViolation::CommandTooLong { capacity: ring.capacity() }.into());
        }
        let n = match stream.read(buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        ring.advance_write(n);
        conn.bytes_received.fetch_add(n as u64, Ordering::Relaxed);

        loop {
            let outcome = {
                let canonical = board.canonical().read();
                let view = shard.read();
                engine.process(&mut ring, &view, &canonical, &mut replies)?
            };
            if !replies.is_empty() {
                stream.write_all(&replies)?;
                replies.clear();
            }
            if outcome == Outcome::NeedMoreData {
                break;
            }
        }
    }
}

fn shutdown_stream(stream: &TcpStream) {
    match stream.shutdown(Shutdown::Both) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
        Err(err) => tracing::trace!(%err, "socket shutdown"),
    }
}
