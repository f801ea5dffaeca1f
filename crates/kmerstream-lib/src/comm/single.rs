//! Single-rank communicator

use super::Communicator;

/// Communicator of exactly one rank; every collective returns immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_to_all_bytes(&self, outgoing: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
        debug_assert_eq!(outgoing.len(), 1);
        outgoing
    }

    fn split_shared(&self) -> Self {
        SelfComm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ReduceOp;

    #[test]
    fn test_self_comm_collectives_are_identity() {
        let comm = SelfComm;
        assert_eq!(comm.all_reduce_u64(7, ReduceOp::Sum), 7);
        assert_eq!(comm.exclusive_scan_u64(7), 0);
        assert!(comm.any_of(true));
        assert!(!comm.any_of(false));
        assert_eq!(comm.broadcast_bytes(b"abc".to_vec(), 0), b"abc");
        assert_eq!(comm.split_shared().size(), 1);
    }
}
