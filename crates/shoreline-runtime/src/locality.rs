//! NUMA locality discovery
//!
//! A *locality* is a NUMA node id. Connection threads write into the shard
//! of the node they run on; work queue threads are bound to the CPUs of
//! their node so a resized shard is first touched from local memory.
//!
//! On non-Linux targets, or with NUMA disabled, there is one locality: 0.

use std::io;
use std::path::Path;

use shoreline_core::{Result, ShorelineError};

const NODE_ROOT: &str = "/sys/devices/system/node";

/// Node layout of this host
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: usize,
    enabled: bool,
}

impl Topology {
    /// Probe the host. `enabled = false` collapses everything onto node 0.
    pub fn detect(enabled: bool) -> Self {
        if !enabled {
            return Self::single();
        }
        let nodes = std::fs::read_to_string(Path::new(NODE_ROOT).join("possible"))
            .ok()
            .map(|s| parse_cpu_list(&s))
            .and_then(|ids| ids.into_iter().max())
            .map_or(1, |max| max + 1);
        tracing::debug!(nodes, "detected NUMA topology");
        Self {
            nodes,
            enabled: nodes > 1,
        }
    }

    /// One node, no binding
    pub fn single() -> Self {
        Self {
            nodes: 1,
            enabled: false,
        }
    }

    pub fn nodes(&self) -> usize {
        self.nodes
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Node the calling thread is running on right now
    pub fn current(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        current_node().filter(|&n| n < self.nodes).unwrap_or(0)
    }

    /// Restrict the calling thread to the CPUs of `node`.
    ///
    /// No-op when NUMA is disabled.
    pub fn bind_current_thread(&self, node: usize) -> Result<()> {
        if node >= self.nodes {
            return Err(ShorelineError::config(format!(
                "locality {} out of range (nodes: {})",
                node, self.nodes
            )));
        }
        if !self.enabled {
            return Ok(());
        }
        let path = Path::new(NODE_ROOT).join(format!("node{}", node)).join("cpulist");
        let cpus = parse_cpu_list(&std::fs::read_to_string(path)?);
        if cpus.is_empty() {
            // Memory-only node
            return Ok(());
        }
        bind_to_cpus(&cpus)?;
        Ok(())
    }
}

/// Parse the kernel's list format: `0-3,8,10-11`
pub fn parse_cpu_list(list: &str) -> Vec<usize> {
    let mut out = Vec::new();
    for part in list.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.parse::<usize>(), hi.parse::<usize>()) {
                    out.extend(lo..=hi);
                }
            }
            None => {
                if let Ok(id) = part.parse() {
                    out.push(id);
                }
            }
        }
    }
    out
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        fn current_node() -> Option<usize> {
            let mut cpu: libc::c_uint = 0;
            let mut node: libc::c_uint = 0;
            // SAFETY: getcpu writes two c_uints; the cache argument is unused
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_getcpu,
                    &mut cpu as *mut libc::c_uint,
                    &mut node as *mut libc::c_uint,
                    std::ptr::null_mut::<libc::c_void>(),
                )
            };
            (ret == 0).then_some(node as usize)
        }

        fn bind_to_cpus(cpus: &[usize]) -> io::Result<()> {
            // SAFETY: cpu_set_t is plain data, all-zero is the empty set
            let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
            for &cpu in cpus.iter().filter(|&&c| c < libc::CPU_SETSIZE as usize) {
                unsafe { libc::CPU_SET(cpu, &mut set) };
            }
            let ret = unsafe {
                libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
            };
            if ret != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    } else {
        fn current_node() -> Option<usize> {
            None
        }

        fn bind_to_cpus(_cpus: &[usize]) -> io::Result<()> {
            Ok(())
        }
    }
}
