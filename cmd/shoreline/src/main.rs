//! shoreline: pixelflut canvas server
//!
//! Usage:
//!     shoreline [--listen ADDR] [--acceptors N] [--width W --height H] [--blend]
//!
//! Every flag falls back to its `SHORELINE_*` environment variable, then to
//! the built-in default. Log filtering uses `SHORELINE_LOG` (default `info`).
//!
//! Try it:
//!     echo "SIZE" | nc localhost 1234

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shoreline_core::{Board, CancellationToken, Result};
use shoreline_runtime::signal::{self, SignalWaiter};
use shoreline_runtime::{Headless, Renderer, ServerConfig, Supervisor, Topology, WorkQueue};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on, e.g. [::]:1234
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Number of acceptor threads
    #[arg(short, long)]
    acceptors: Option<usize>,

    /// Canvas width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Canvas height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Receive buffer per connection in bytes
    #[arg(long)]
    ring_size: Option<usize>,

    /// Frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Alpha-blend non-opaque pixels instead of overwriting
    #[arg(long)]
    blend: bool,

    /// Keep a single canvas shard regardless of NUMA layout
    #[arg(long)]
    no_numa: bool,

    /// Statistics sampling interval in milliseconds
    #[arg(long)]
    stats_interval_ms: Option<u64>,
}

impl Args {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(listen) = self.listen {
            config = config.listen(listen);
        }
        if let Some(n) = self.acceptors {
            config = config.acceptors(n);
        }
        let width = self.width.unwrap_or(config.size.width);
        let height = self.height.unwrap_or(config.size.height);
        config = config.canvas_size(width, height);
        if let Some(bytes) = self.ring_size {
            config = config.ring_size(bytes);
        }
        if let Some(fps) = self.fps {
            config = config.fps(fps);
        }
        if self.blend {
            config = config.blend(true);
        }
        if self.no_numa {
            config = config.numa(false);
        }
        if let Some(ms) = self.stats_interval_ms {
            config = config.stats_interval(Duration::from_millis(ms));
        }
        config
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SHORELINE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(config: ServerConfig) -> Result<()> {
    config.validate()?;
    config.log();

    // Before any thread exists, so all of them inherit the mask
    signal::block_shutdown_signals()?;

    let root = CancellationToken::new();
    let waiter = SignalWaiter::spawn(root.clone())?;

    let topology = Topology::detect(config.numa);
    let board = Arc::new(Board::new(config.size, config.pixel_mode())?);
    let workqueue = WorkQueue::new(&topology, config.work_queue_depth)?;

    let mut supervisor = Supervisor::new(Arc::clone(&board), config.clone(), topology, root.clone());
    let result = supervisor.listen().and_then(|_| {
        let mut renderer = Renderer::new(&board, &workqueue, config.frame_interval(), config.stats_interval)
            .traffic(&supervisor);
        renderer.add_frontend(Box::new(Headless::new(config.stats_interval)));
        renderer.run(&root)
    });

    root.cancel();
    supervisor.shutdown();
    workqueue.stop();
    waiter.stop();
    result
}

fn main() -> ExitCode {
    init_logging();
    let config = Args::parse().apply(ServerConfig::from_env());

    match run(config) {
        Ok(()) => {
            tracing::info!("bye");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(%err, "shoreline failed");
            ExitCode::FAILURE
        }
    }
}
