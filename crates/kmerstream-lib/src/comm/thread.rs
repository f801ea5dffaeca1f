//! Shared-memory communicator: ranks are threads of one process
//!
//! Ranks are grouped into simulated nodes of `ranks_per_node` consecutive
//! ranks, which is what `split_shared` returns. Each collective is a mailbox
//! exchange fenced by two barrier waits: one so every message is posted before
//! anyone reads, one so nobody posts the next round before everyone has read.
//!
//! All barriers of a run share one abort flag. A rank that panics raises it,
//! and every rank waiting in (or later entering) a barrier panics in turn
//! instead of waiting for a peer that will never arrive.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::Communicator;
use crate::error::ConfigError;

const PEER_PANICKED: &str = "peer rank panicked during a collective";

/// Reusable barrier that gives up once the run is aborted
struct Fence {
    size: usize,
    /// (ranks arrived in this generation, generation)
    state: Mutex<(usize, u64)>,
    released: Condvar,
    aborted: Arc<AtomicBool>,
}

impl Fence {
    fn new(size: usize, aborted: Arc<AtomicBool>) -> Self {
        Self {
            size,
            state: Mutex::new((0, 0)),
            released: Condvar::new(),
            aborted,
        }
    }

    fn wait(&self) {
        let mut state = self.state.lock();
        if self.aborted.load(Ordering::Acquire) {
            panic!("{PEER_PANICKED}");
        }
        let generation = state.1;
        state.0 += 1;
        if state.0 == self.size {
            *state = (0, generation.wrapping_add(1));
            self.released.notify_all();
            return;
        }
        while state.1 == generation {
            self.released.wait(&mut state);
            if state.1 == generation && self.aborted.load(Ordering::Acquire) {
                panic!("{PEER_PANICKED}");
            }
        }
    }

    /// Wake every waiter so it can observe the abort flag
    fn wake_all(&self) {
        let _state = self.state.lock();
        self.released.notify_all();
    }
}

struct Exchange {
    size: usize,
    barrier: Fence,
    /// `mailboxes[dst][src]`
    mailboxes: Mutex<Vec<Vec<Vec<u8>>>>,
}

impl Exchange {
    fn new(size: usize, aborted: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            size,
            barrier: Fence::new(size, aborted),
            mailboxes: Mutex::new(vec![vec![Vec::new(); size]; size]),
        })
    }
}

/// One rank of an in-process run
pub struct ThreadComm {
    rank: usize,
    group: Arc<Exchange>,
    node_rank: usize,
    node: Arc<Exchange>,
}

impl ThreadComm {
    /// Create all ranks of a run of `size` ranks, `ranks_per_node` per node
    pub fn world(size: usize, ranks_per_node: usize) -> Result<Vec<ThreadComm>, ConfigError> {
        if size == 0 {
            return Err(ConfigError::InvalidTopology("at least one rank is required".into()));
        }
        if ranks_per_node == 0 {
            return Err(ConfigError::InvalidTopology(
                "ranks per node must be positive".into(),
            ));
        }

        let aborted = Arc::new(AtomicBool::new(false));
        let world = Exchange::new(size, Arc::clone(&aborted));
        let mut comms = Vec::with_capacity(size);
        for node_begin in (0..size).step_by(ranks_per_node) {
            let node_end = (node_begin + ranks_per_node).min(size);
            let node = Exchange::new(node_end - node_begin, Arc::clone(&aborted));
            for rank in node_begin..node_end {
                comms.push(ThreadComm {
                    rank,
                    group: Arc::clone(&world),
                    node_rank: rank - node_begin,
                    node: Arc::clone(&node),
                });
            }
        }
        Ok(comms)
    }

    /// Raise the run's abort flag and wake this rank's barriers
    ///
    /// Ranks on other nodes are woken by the world barrier, or by a node peer
    /// that panics out of it.
    fn abort(&self) {
        self.group.barrier.aborted.store(true, Ordering::Release);
        self.group.barrier.wake_all();
        self.node.barrier.wake_all();
    }

    fn handle(&self) -> ThreadComm {
        ThreadComm {
            rank: self.rank,
            group: Arc::clone(&self.group),
            node_rank: self.node_rank,
            node: Arc::clone(&self.node),
        }
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.group.size
    }

    fn barrier(&self) {
        self.group.barrier.wait();
    }

    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        assert_eq!(
            outgoing.len(),
            self.group.size,
            "all_to_all needs one message per rank"
        );
        {
            let mut mailboxes = self.group.mailboxes.lock();
            for (dst, message) in outgoing.into_iter().enumerate() {
                mailboxes[dst][self.rank] = message;
            }
        }
        self.group.barrier.wait();

        let incoming: Vec<Vec<u8>> = {
            let mut mailboxes = self.group.mailboxes.lock();
            mailboxes[self.rank].iter_mut().map(std::mem::take).collect()
        };
        self.group.barrier.wait();
        incoming
    }

    fn split_shared(&self) -> Self {
        ThreadComm {
            rank: self.node_rank,
            group: Arc::clone(&self.node),
            node_rank: self.node_rank,
            node: Arc::clone(&self.node),
        }
    }
}

/// Run `f` once per rank on its own thread and collect the results by rank
///
/// If any rank panics, the run is aborted: ranks blocked in a collective panic
/// as well, and once every thread has finished the first panic is resumed on
/// the calling thread.
pub fn run_ranks<F, R>(size: usize, ranks_per_node: usize, f: F) -> Result<Vec<R>, ConfigError>
where
    F: Fn(ThreadComm) -> R + Sync,
    R: Send,
{
    let comms = ThreadComm::world(size, ranks_per_node)?;
    let first_panic: Mutex<Option<Box<dyn Any + Send>>> = Mutex::new(None);
    let f = &f;
    let first = &first_panic;
    let results: Vec<Option<R>> = std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                scope.spawn(move || {
                    let handle = comm.handle();
                    match panic::catch_unwind(AssertUnwindSafe(|| f(comm))) {
                        Ok(result) => Some(result),
                        Err(payload) => {
                            // recorded before the flag is raised, so peers that
                            // panic in response never come first
                            first.lock().get_or_insert(payload);
                            handle.abort();
                            None
                        }
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|e| panic::resume_unwind(e)))
            .collect()
    });

    if let Some(payload) = first_panic.into_inner() {
        panic::resume_unwind(payload);
    }
    // no rank panicked, so every rank produced a result
    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ReduceOp;

    #[test]
    fn test_world_topology() {
        let comms = ThreadComm::world(5, 2).unwrap();
        assert_eq!(comms.len(), 5);
        let node_sizes: Vec<usize> = comms.iter().map(|c| c.node.size).collect();
        assert_eq!(node_sizes, vec![2, 2, 2, 2, 1]);
        let node_ranks: Vec<usize> = comms.iter().map(|c| c.node_rank).collect();
        assert_eq!(node_ranks, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_world_rejects_empty() {
        assert!(ThreadComm::world(0, 1).is_err());
        assert!(ThreadComm::world(4, 0).is_err());
    }

    #[test]
    fn test_all_to_all_routes_messages() {
        let results = run_ranks(3, 3, |comm| {
            let outgoing = (0..comm.size())
                .map(|dst| vec![comm.rank() as u8, dst as u8])
                .collect();
            comm.all_to_all_bytes(outgoing)
        })
        .unwrap();

        for (rank, incoming) in results.iter().enumerate() {
            for (src, message) in incoming.iter().enumerate() {
                assert_eq!(message, &vec![src as u8, rank as u8]);
            }
        }
    }

    #[test]
    fn test_split_shared_groups_by_node() {
        let results = run_ranks(6, 4, |comm| {
            let node = comm.split_shared();
            let node_total = node.all_reduce_u64(1, ReduceOp::Sum);
            let max_node = comm.all_reduce_u64(node.size() as u64, ReduceOp::Max);
            (node.rank(), node_total, max_node)
        })
        .unwrap();

        assert_eq!(
            results,
            vec![(0, 4, 4), (1, 4, 4), (2, 4, 4), (3, 4, 4), (0, 2, 4), (1, 2, 4)]
        );
    }

    #[test]
    #[should_panic(expected = "rank 1 gave up")]
    fn test_panicking_rank_releases_peers_in_barrier() {
        let _ = run_ranks(3, 2, |comm| {
            if comm.rank() == 1 {
                panic!("rank 1 gave up");
            }
            comm.barrier();
            comm.all_reduce_u64(1, ReduceOp::Sum)
        });
    }

    #[test]
    fn test_panicking_rank_releases_peers_in_node_and_exchange() {
        // rank 0 waits on its node, rank 2 inside an all-to-all
        let outcome = panic::catch_unwind(|| {
            run_ranks(3, 2, |comm| match comm.rank() {
                0 => comm.split_shared().barrier(),
                1 => panic!("rank 1 gave up"),
                _ => {
                    comm.all_to_all_bytes(vec![Vec::new(); 3]);
                }
            })
        });
        let payload = outcome.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"rank 1 gave up"));
    }

    #[test]
    fn test_repeated_collectives_do_not_mix_rounds() {
        let results = run_ranks(4, 1, |comm| {
            (0..50u64)
                .map(|round| comm.all_reduce_u64(round * 4 + comm.rank() as u64, ReduceOp::Sum))
                .collect::<Vec<_>>()
        })
        .unwrap();
        for sums in results {
            for (round, sum) in sums.into_iter().enumerate() {
                assert_eq!(sum, 16 * round as u64 + 6);
            }
        }
    }
}
