//! Collective communication between ranks
//!
//! Every decision that changes which collective calls a rank will make next
//! (window boundaries, growth triggers, write iteration counts) goes through
//! one of these reductions first, so all ranks issue the same sequence of
//! collectives. Every method blocks until all ranks of the communicator have
//! reached it. There is no timeout: a stalled rank stalls the run.

use std::io;

mod single;
mod thread;

pub use single::SelfComm;
pub use thread::{run_ranks, ThreadComm};

/// Reduction operator for integer collectives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    /// Sum of all contributions
    Sum,
    /// Minimum contribution
    Min,
    /// Maximum contribution
    Max,
}

impl ReduceOp {
    #[inline]
    fn apply(self, a: u64, b: u64) -> u64 {
        match self {
            ReduceOp::Sum => a.wrapping_add(b),
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
        }
    }

    fn fold(self, values: impl IntoIterator<Item = u64>) -> u64 {
        let mut iter = values.into_iter();
        let first = iter.next().unwrap_or(0);
        iter.fold(first, |acc, v| self.apply(acc, v))
    }
}

/// A group of ranks that take part in collective operations together
pub trait Communicator: Send {
    /// This rank's index in `[0, size)`
    fn rank(&self) -> usize;

    /// Number of ranks in the group
    fn size(&self) -> usize;

    /// Block until every rank has arrived
    fn barrier(&self);

    /// Personalized exchange: `outgoing[r]` is delivered to rank `r`.
    ///
    /// The result holds, at index `r`, the message rank `r` sent to this rank.
    /// `outgoing.len()` must equal `size()`.
    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>>;

    /// Sub-communicator of the ranks sharing this rank's node
    fn split_shared(&self) -> Self
    where
        Self: Sized;

    /// Every rank's `data`, indexed by rank
    fn all_gather_bytes(&self, data: &[u8]) -> Vec<Vec<u8>> {
        self.all_to_all_bytes(vec![data.to_vec(); self.size()])
    }

    /// Every rank's `value`, indexed by rank
    fn all_gather_u64(&self, value: u64) -> Vec<u64> {
        self.all_gather_bytes(&value.to_le_bytes())
            .into_iter()
            .map(|bytes| decode_u64(&bytes))
            .collect()
    }

    /// Reduce `value` over all ranks; every rank gets the result
    fn all_reduce_u64(&self, value: u64, op: ReduceOp) -> u64 {
        op.fold(self.all_gather_u64(value))
    }

    /// Reduce `value` over all ranks; only `root` gets `Some(result)`
    fn reduce_u64(&self, value: u64, op: ReduceOp, root: usize) -> Option<u64> {
        let result = self.all_reduce_u64(value, op);
        (self.rank() == root).then_some(result)
    }

    /// Sum of `value` over all ranks with a smaller index (0 on rank 0)
    fn exclusive_scan_u64(&self, value: u64) -> u64 {
        let all = self.all_gather_u64(value);
        all[..self.rank()].iter().fold(0u64, |acc, &v| acc.wrapping_add(v))
    }

    /// True on every rank if `flag` is true on any rank
    fn any_of(&self, flag: bool) -> bool {
        self.all_reduce_u64(flag as u64, ReduceOp::Max) != 0
    }

    /// `root`'s `value` on every rank
    fn broadcast_u64(&self, value: u64, root: usize) -> u64 {
        self.all_gather_u64(value)[root]
    }

    /// `root`'s `data` on every rank; other ranks' `data` is ignored
    fn broadcast_bytes(&self, data: Vec<u8>, root: usize) -> Vec<u8> {
        let size = self.size();
        let outgoing = if self.rank() == root {
            vec![data; size]
        } else {
            vec![Vec::new(); size]
        };
        let mut incoming = self.all_to_all_bytes(outgoing);
        std::mem::take(&mut incoming[root])
    }

    /// Sum of an `f64` over all ranks
    fn all_reduce_f64_sum(&self, value: f64) -> f64 {
        self.all_gather_u64(value.to_bits())
            .into_iter()
            .map(f64::from_bits)
            .sum()
    }

    /// Decode an I/O failure into "rank R error class [description]"
    fn describe_error(&self, err: &io::Error) -> String {
        let class = match err.raw_os_error() {
            Some(code) => format!("{:?} (os error {})", err.kind(), code),
            None => format!("{:?}", err.kind()),
        };
        format!("rank {} error class {} [{}]", self.rank(), class, err)
    }
}

fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    u64::from_le_bytes(buf)
}
