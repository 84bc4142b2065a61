//! Listening socket, acceptor threads and connection lifecycle
//!
//! ```text
//!  Idle ──listen()──▶ Listening ──shutdown()──▶ ShuttingDown ──▶ Stopped
//! ```
//!
//! Every acceptor blocks in `accept` on the shared listener and spawns one
//! thread per client. Shutdown cancels the acceptor tokens, shuts the
//! listener down to wake the acceptors, closes every registered
//! connection, waits for all of them to deregister, then joins the
//! acceptors.
//!
//! A fatal listener error cancels the root token handed to
//! [`Supervisor::new`], which brings the whole process down.

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use shoreline_core::constants::LISTEN_BACKLOG;
use shoreline_core::{Board, CancellationToken, Result, ShorelineError};

use super::connection::{self, Connection, ConnectionSet, ConnectionSettings};
use super::listener::{self, AcceptAction};
use crate::config::ServerConfig;
use crate::locality::Topology;
use crate::stats::TrafficSource;

/// Pause after running out of descriptors or memory
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Listening,
    ShuttingDown,
    Stopped,
}

struct Acceptor {
    connections: Arc<ConnectionSet>,
    handle: Option<JoinHandle<()>>,
}

/// Everything an acceptor thread needs
#[derive(Clone)]
struct AcceptContext {
    index: usize,
    listener: Arc<TcpListener>,
    connections: Arc<ConnectionSet>,
    board: Arc<Board>,
    topology: Topology,
    settings: ConnectionSettings,
    token: CancellationToken,
    root: CancellationToken,
    next_id: Arc<AtomicU64>,
}

pub struct Supervisor {
    state: Mutex<SupervisorState>,
    board: Arc<Board>,
    topology: Topology,
    config: ServerConfig,
    root: CancellationToken,
    token: CancellationToken,
    listener: Option<Arc<TcpListener>>,
    local_addr: Option<SocketAddr>,
    acceptors: Vec<Acceptor>,
}

impl Supervisor {
    /// `root` is cancelled if the listener fails for good.
    pub fn new(board: Arc<Board>, config: ServerConfig, topology: Topology, root: CancellationToken) -> Self {
        Self {
            state: Mutex::new(SupervisorState::Idle),
            board,
            topology,
            config,
            token: root.child(),
            root,
            listener: None,
            local_addr: None,
            acceptors: Vec::new(),
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: SupervisorState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        tracing::info!(?state, "supervisor state");
    }

    /// Bound address, once listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Live connections across all acceptors
    pub fn connection_count(&self) -> usize {
        self.acceptors.iter().map(|a| a.connections.len()).sum()
    }

    /// Bind, listen and start the acceptor threads.
    pub fn listen(&mut self) -> Result<SocketAddr> {
        if self.state() != SupervisorState::Idle {
            return Err(ShorelineError::config("supervisor already started"));
        }
        if self.config.acceptors == 0 {
            return Err(ShorelineError::config("acceptors must be > 0"));
        }

        let listener = Arc::new(listener::bind(self.config.listen, LISTEN_BACKLOG)?);
        let local_addr = listener.local_addr()?;
        let settings = ConnectionSettings {
            ring_size: self.config.ring_size,
            garbage_limit: self.config.garbage_limit,
            mode: self.config.pixel_mode(),
        };
        let next_id = Arc::new(AtomicU64::new(0));

        self.listener = Some(Arc::clone(&listener));
        self.local_addr = Some(local_addr);
        self.set_state(SupervisorState::Listening);

        for index in 0..self.config.acceptors {
            let connections = Arc::new(ConnectionSet::new());
            let ctx = AcceptContext {
                index,
                listener: Arc::clone(&listener),
                connections: Arc::clone(&connections),
                board: Arc::clone(&self.board),
                topology: self.topology.clone(),
                settings: settings.clone(),
                token: self.token.child(),
                root: self.root.clone(),
                next_id: Arc::clone(&next_id),
            };
            let spawned = thread::Builder::new()
                .name(format!("shoreline-accept-{}", index))
                .spawn(move || accept_loop(ctx));
            match spawned {
                Ok(handle) => self.acceptors.push(Acceptor {
                    connections,
                    handle: Some(handle),
                }),
                Err(err) => {
                    tracing::error!(acceptor = index, %err, "could not spawn acceptor");
                    self.shutdown();
                    return Err(err.into());
                }
            }
        }

        tracing::info!(addr = %local_addr, acceptors = self.acceptors.len(), "listening");
        Ok(local_addr)
    }

    /// Stop accepting, close every connection and join all threads.
    ///
    /// Idempotent; a supervisor that never listened goes straight to
    /// `Stopped`.
    pub fn shutdown(&mut self) {
        match self.state() {
            SupervisorState::Stopped => return,
            SupervisorState::Idle => {
                self.set_state(SupervisorState::Stopped);
                return;
            }
            _ => {}
        }
        self.set_state(SupervisorState::ShuttingDown);

        self.token.cancel();
        if let Some(listener) = &self.listener {
            listener::shutdown(listener);
        }

        for acceptor in &self.acceptors {
            acceptor.connections.close_all();
        }
        for acceptor in &self.acceptors {
            acceptor.connections.wait_drained();
        }
        for (index, acceptor) in self.acceptors.iter_mut().enumerate() {
            if let Some(handle) = acceptor.handle.take() {
                if handle.join().is_err() {
                    tracing::error!(acceptor = index, "acceptor panicked");
                }
            }
        }
        // Connections accepted while the acceptors were winding down
        for acceptor in &self.acceptors {
            acceptor.connections.close_all();
            acceptor.connections.wait_drained();
        }

        self.listener = None;
        self.set_state(SupervisorState::Stopped);
    }
}

impl TrafficSource for Supervisor {
    fn take_bytes_received(&self) -> u64 {
        self.acceptors
            .iter()
            .map(|a| a.connections.take_bytes_received())
            .sum()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if thread::panicking() {
            return;
        }
        let state = self.state();
        assert!(
            matches!(state, SupervisorState::Idle | SupervisorState::Stopped),
            "supervisor dropped while {:?}; call shutdown() first",
            state
        );
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr)
            .field("acceptors", &self.acceptors.len())
            .finish()
    }
}

fn accept_loop(ctx: AcceptContext) {
    tracing::debug!(acceptor = ctx.index, "acceptor started");
    while !ctx.token.is_cancelled() {
        let (stream, peer) = match ctx.listener.accept() {
            Ok(accepted) => accepted,
            Err(_) if ctx.token.is_cancelled() => break,
            Err(err) => match listener::classify_accept_error(&err) {
                AcceptAction::Retry => continue,
                AcceptAction::Backoff => {
                    tracing::warn!(acceptor = ctx.index, %err, "accept failed, backing off");
                    ctx.token.sleep(ACCEPT_BACKOFF);
                    continue;
                }
                AcceptAction::Fatal => {
                    tracing::error!(acceptor = ctx.index, %err, "listener failed, shutting down");
                    ctx.root.cancel();
                    break;
                }
            },
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::trace!(%err, "TCP_NODELAY");
        }
        let id = ctx.next_id.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(Connection::new(id, peer, stream, ctx.token.child()));
        if !ctx.connections.insert_unless_cancelled(Arc::clone(&conn), &ctx.token) {
            break;
        }

        let (set, board) = (Arc::clone(&ctx.connections), Arc::clone(&ctx.board));
        let (topology, settings) = (ctx.topology.clone(), ctx.settings.clone());
        let thread_conn = Arc::clone(&conn);
        let spawned = thread::Builder::new()
            .name(format!("shoreline-conn-{}", id))
            .spawn(move || connection::run(thread_conn, set, board, topology, settings));
        if let Err(err) = spawned {
            tracing::error!(acceptor = ctx.index, %peer, %err, "could not spawn connection thread");
            conn.close();
            ctx.connections.remove(id);
        }
    }
    tracing::debug!(acceptor = ctx.index, "acceptor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoreline_core::{Pixel, PixelMode, Size};
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpStream;
    use std::time::Instant;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn start(acceptors: usize) -> (Supervisor, Arc<Board>, SocketAddr, CancellationToken) {
        let board = Arc::new(Board::new(Size::new(64, 48), PixelMode::Overwrite).unwrap());
        let config = ServerConfig::new()
            .listen("127.0.0.1:0".parse().unwrap())
            .acceptors(acceptors);
        let root = CancellationToken::new();
        let mut sup = Supervisor::new(Arc::clone(&board), config, Topology::single(), root.clone());
        let addr = sup.listen().unwrap();
        (sup, board, addr, root)
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        stream
    }

    fn read_line(stream: &TcpStream) -> String {
        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();
        line
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + TIMEOUT;
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_set_and_query_over_tcp() {
        let (mut sup, board, addr, _root) = start(2);
        assert_eq!(sup.state(), SupervisorState::Listening);

        let mut client = connect(addr);
        client.write_all(b"PX 5 5 FF0000\n").unwrap();
        wait_for(|| {
            board.coalesce_tick();
            board.canonical().read().get(5, 5) == Some(Pixel::from_rgb(255, 0, 0))
        });

        client.write_all(b"PX 5 5\nSIZE\n").unwrap();
        let mut reader = BufReader::new(&client);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "PX 5 5 ff0000\n");
        line.clear();
        reader.read_line(&mut line).unwrap();
        assert_eq!(line, "SIZE 64 48\n");

        sup.shutdown();
        assert_eq!(sup.state(), SupervisorState::Stopped);
    }

    #[test]
    fn test_split_command_across_writes() {
        let (mut sup, board, addr, _root) = start(1);
        let mut client = connect(addr);
        client.write_all(b"OFFSET 10 10\nPX 1 ").unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(30));
        client.write_all(b"1 00FF00\n").unwrap();

        wait_for(|| {
            board.coalesce_tick();
            board.canonical().read().get(11, 11) == Some(Pixel::from_rgb(0, 255, 0))
        });
        assert_eq!(board.canonical().read().get(1, 1), Some(Pixel::TRANSPARENT));
        sup.shutdown();
    }

    #[test]
    fn test_abusive_client_isolated() {
        let (mut sup, _board, addr, _root) = start(1);
        let good = connect(addr);
        let mut bad = connect(addr);
        wait_for(|| sup.connection_count() == 2);

        let _ = bad.write_all(&[b'z'; 100]);
        let mut buf = [0u8; 16];
        assert!(matches!(bad.read(&mut buf), Ok(0) | Err(_)));
        wait_for(|| sup.connection_count() == 1);

        (&good).write_all(b"SIZE\n").unwrap();
        assert_eq!(read_line(&good), "SIZE 64 48\n");
        sup.shutdown();
    }

    #[test]
    fn test_shutdown_closes_idle_connections() {
        let (mut sup, _board, addr, root) = start(2);
        let clients: Vec<TcpStream> = (0..4).map(|_| connect(addr)).collect();
        wait_for(|| sup.connection_count() == 4);

        sup.shutdown();
        assert_eq!(sup.state(), SupervisorState::Stopped);
        assert_eq!(sup.connection_count(), 0);
        // Orderly shutdown is not a listener failure
        assert!(!root.is_cancelled());

        for mut client in clients {
            let mut buf = [0u8; 1];
            assert!(matches!(client.read(&mut buf), Ok(0) | Err(_)));
        }
        assert!(TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err());
        sup.shutdown();
    }

    #[test]
    fn test_shutdown_mid_command() {
        let (mut sup, board, addr, _root) = start(1);
        let mut client = connect(addr);
        client.write_all(b"PX 1 1 FF00").unwrap();
        wait_for(|| sup.connection_count() == 1);
        wait_for(|| sup.take_bytes_received() > 0);

        sup.shutdown();
        assert_eq!(sup.state(), SupervisorState::Stopped);
        assert_eq!(sup.connection_count(), 0);

        // The unterminated command is never applied
        board.coalesce_tick();
        assert_eq!(board.canonical().read().get(1, 1), Some(Pixel::TRANSPARENT));
        let mut buf = [0u8; 1];
        assert!(matches!(client.read(&mut buf), Ok(0) | Err(_)));
    }

    #[test]
    fn test_bind_conflict_is_configuration_error() {
        let (mut sup, board, addr, root) = start(1);
        let config = ServerConfig::new().listen(addr);
        let mut second = Supervisor::new(board, config, Topology::single(), root);
        assert!(matches!(second.listen(), Err(ShorelineError::Configuration(_))));
        assert_eq!(second.state(), SupervisorState::Idle);
        sup.shutdown();
    }

    #[test]
    fn test_traffic_counter() {
        let (mut sup, board, addr, _root) = start(1);
        let mut client = connect(addr);
        client.write_all(b"PX 0 0 FFFFFF\n").unwrap();
        wait_for(|| {
            board.coalesce_tick();
            board.canonical().read().get(0, 0).is_some_and(|p| p.is_opaque())
        });
        assert_eq!(sup.take_bytes_received(), 14);
        assert_eq!(sup.take_bytes_received(), 0);
        sup.shutdown();
    }

    #[test]
    fn test_state_machine() {
        let root = CancellationToken::new();
        let board = Arc::new(Board::new(Size::new(4, 4), PixelMode::Overwrite).unwrap());
        let idle = Supervisor::new(Arc::clone(&board), ServerConfig::new(), Topology::single(), root.clone());
        assert_eq!(idle.state(), SupervisorState::Idle);
        assert!(idle.local_addr().is_none());
        drop(idle);

        let (mut sup, _board, _addr, _root) = start(1);
        assert!(matches!(sup.listen(), Err(ShorelineError::Configuration(_))));
        sup.shutdown();
        assert!(matches!(sup.listen(), Err(ShorelineError::Configuration(_))));
    }

    #[test]
    #[should_panic(expected = "call shutdown() first")]
    fn test_drop_while_listening_asserts() {
        let (sup, _board, _addr, _root) = start(1);
        drop(sup);
    }
}
