//! Communicator contract between SPMD ranks.
//!
//! The transport core synchronizes only through the handful of collective
//! operations defined here. [SerialComm] is the single-rank stub; [ThreadComm]
//! runs the same contract between OS threads of one process, which is how the
//! multi-rank tests and [run_simulation_threaded](crate::run_simulation_threaded)
//! work without an MPI installation.
//!
//! All collectives combine contributions in rank order, so their results are
//! deterministic for a fixed rank count.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Collective operations the transport core requires.
///
/// Every method is synchronous, blocking and collective: all ranks of the
/// communicator must call it in the same order.
pub trait Communicator {
    /// This rank's index in `0..n_ranks`
    fn rank(&self) -> usize;

    /// Number of ranks
    fn n_ranks(&self) -> usize;

    /// Exclusive prefix sum of `value` in rank order; rank 0 receives 0
    fn exscan_sum(&self, value: u64) -> u64;

    /// Every rank receives the last rank's `value`
    fn bcast_from_last(&self, value: u64) -> u64;

    /// Every rank receives the sum of all contributed values
    fn allreduce_sum(&self, value: f64) -> f64;

    /// Elementwise sum of the contributed slices, written to `out` on rank 0
    /// only; `out` is left untouched on the other ranks
    fn reduce_sum_master(&self, values: &[f64], out: &mut [f64]);

    /// True on rank 0
    fn is_master(&self) -> bool {
        self.rank() == 0
    }
}

/// Single-rank communicator: every collective degenerates to the identity
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn n_ranks(&self) -> usize {
        1
    }

    fn exscan_sum(&self, _value: u64) -> u64 {
        0
    }

    fn bcast_from_last(&self, value: u64) -> u64 {
        value
    }

    fn allreduce_sum(&self, value: f64) -> f64 {
        value
    }

    fn reduce_sum_master(&self, values: &[f64], out: &mut [f64]) {
        out.copy_from_slice(values);
    }
}

enum Message {
    Count(u64),
    Scalar(f64),
    Buffer(Vec<f64>),
}

/// In-process communicator over one channel per ordered rank pair.
///
/// Per-pair FIFO ordering is what keeps successive collectives from mixing:
/// a rank cannot finish collective k+1 with some peer before that peer's
/// collective k message has been drained.
pub struct ThreadComm {
    rank: usize,
    n_ranks: usize,
    /// senders[r] feeds the channel from this rank to rank r
    senders: Vec<Sender<Message>>,
    /// receivers[r] drains the channel from rank r to this rank
    receivers: Vec<Receiver<Message>>,
}

impl ThreadComm {
    /// Creates a fully connected communicator; element `r` of the returned
    /// vector belongs to rank `r`
    pub fn create(n_ranks: usize) -> Vec<ThreadComm> {
        let mut senders: Vec<Vec<Sender<Message>>> =
            (0..n_ranks).map(|_| Vec::with_capacity(n_ranks)).collect();
        let mut receivers: Vec<Vec<Option<Receiver<Message>>>> =
            (0..n_ranks).map(|_| (0..n_ranks).map(|_| None).collect()).collect();
        for from in 0..n_ranks {
            for to in 0..n_ranks {
                let (sender, receiver) = unbounded();
                senders[from].push(sender);
                receivers[to][from] = Some(receiver);
            }
        }
        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (senders, receivers))| ThreadComm {
                rank,
                n_ranks,
                senders,
                receivers: receivers
                    .into_iter()
                    .map(|r| r.expect("channel matrix is fully populated"))
                    .collect(),
            })
            .collect()
    }

    fn receive(&self, from: usize) -> Message {
        self.receivers[from]
            .recv()
            .expect("peer rank disconnected mid-collective")
    }

    fn send(&self, to: usize, message: Message) {
        self.senders[to]
            .send(message)
            .expect("peer rank disconnected mid-collective");
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    fn exscan_sum(&self, value: u64) -> u64 {
        let mut prefix = 0;
        for peer in 0..self.n_ranks {
            if peer != self.rank {
                self.send(peer, Message::Count(value));
            }
        }
        for peer in 0..self.rank {
            match self.receive(peer) {
                Message::Count(v) => prefix += v,
                _ => unreachable!("exscan expects counts"),
            }
        }
        // Contributions from higher ranks are drained but do not enter the prefix
        for peer in self.rank + 1..self.n_ranks {
            let _ = self.receive(peer);
        }
        prefix
    }

    fn bcast_from_last(&self, value: u64) -> u64 {
        let last = self.n_ranks - 1;
        if self.rank == last {
            for peer in 0..last {
                self.send(peer, Message::Count(value));
            }
            value
        } else {
            match self.receive(last) {
                Message::Count(v) => v,
                _ => unreachable!("bcast expects counts"),
            }
        }
    }

    fn allreduce_sum(&self, value: f64) -> f64 {
        for peer in 0..self.n_ranks {
            if peer != self.rank {
                self.send(peer, Message::Scalar(value));
            }
        }
        let mut total = 0.0;
        for peer in 0..self.n_ranks {
            if peer == self.rank {
                total += value;
            } else {
                match self.receive(peer) {
                    Message::Scalar(v) => total += v,
                    _ => unreachable!("allreduce expects scalars"),
                }
            }
        }
        total
    }

    fn reduce_sum_master(&self, values: &[f64], out: &mut [f64]) {
        if self.rank == 0 {
            out.copy_from_slice(values);
            for peer in 1..self.n_ranks {
                match self.receive(peer) {
                    Message::Buffer(buffer) => {
                        debug_assert_eq!(buffer.len(), out.len());
                        for (accumulated, contribution) in out.iter_mut().zip(&buffer) {
                            *accumulated += contribution;
                        }
                    }
                    _ => unreachable!("reduce expects buffers"),
                }
            }
        } else {
            self.send(0, Message::Buffer(values.to_vec()));
        }
    }
}
