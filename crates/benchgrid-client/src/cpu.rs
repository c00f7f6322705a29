//! CPU topology of a client host and hardware-thread selection.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ClientError, ClientResult};

/// `CPU,Core,Node` rows of `lscpu --parse`; comment lines start with `#`.
static LSCPU_ROW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+),(\d+),(\d+)").expect("static pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Core {
    pub id: u32,
    pub threads: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socket {
    pub node: u32,
    pub cores: Vec<Core>,
}

/// Socket → core → hardware thread, each level in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuTopology {
    sockets: Vec<Socket>,
}

impl CpuTopology {
    /// Parse the output of `lscpu --parse=CPU,Core,Node`.
    pub fn parse(lscpu: &str) -> Self {
        let mut topology = Self::default();
        for line in lscpu.lines() {
            let Some(caps) = LSCPU_ROW.captures(line.trim()) else {
                continue;
            };
            let field = |i: usize| caps[i].parse::<u32>().ok();
            if let (Some(cpu), Some(core), Some(node)) = (field(1), field(2), field(3)) {
                topology.insert(node, core, cpu);
            }
        }
        topology
    }

    fn insert(&mut self, node: u32, core: u32, cpu: u32) {
        let index = match self.sockets.iter().position(|s| s.node == node) {
            Some(i) => i,
            None => {
                self.sockets.push(Socket {
                    node,
                    cores: Vec::new(),
                });
                self.sockets.len() - 1
            }
        };
        let socket = &mut self.sockets[index];
        match socket.cores.iter_mut().find(|c| c.id == core) {
            Some(c) => c.threads.push(cpu),
            None => socket.cores.push(Core {
                id: core,
                threads: vec![cpu],
            }),
        }
    }

    pub fn sockets(&self) -> &[Socket] {
        &self.sockets
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    /// Total hardware threads.
    pub fn available(&self) -> usize {
        self.sockets
            .iter()
            .flat_map(|s| &s.cores)
            .map(|c| c.threads.len())
            .sum()
    }

    /// The first `n` hardware threads, taking every thread of a core before
    /// moving to the next core, and every core of a socket before the next
    /// socket.
    pub fn get_ht(&self, n: usize) -> ClientResult<Vec<u32>> {
        let available = self.available();
        if n > available {
            return Err(ClientError::Capacity {
                requested: n,
                available,
            });
        }
        Ok(self
            .sockets
            .iter()
            .flat_map(|s| &s.cores)
            .flat_map(|c| c.threads.iter().copied())
            .take(n)
            .collect())
    }
}
