//! Windowed sender for bulk upload: up to `window_size` chunks in flight, timeouts swept
//! periodically, one commit with the whole-payload hash at the end.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::chunk::split_into_chunks;
use crate::config::TransportConfig;
use crate::integrity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    pub sent_at: Instant,
    pub retries: u32,
}

/// Outcome of one sweep over the in-flight set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Sweep {
    /// Timed out and due for another send; already re-marked in flight.
    pub retry: Vec<u32>,
    /// Timed out past the retry limit and removed.
    pub dropped: Vec<u32>,
}

/// Final step of a windowed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub final_hash: [u8; 32],
    pub total_chunks: u32,
}

pub struct WindowedSender {
    chunks: Vec<Vec<u8>>,
    hash: [u8; 32],
    next: u32,
    in_flight: BTreeMap<u32, InFlight>,
    acked: BTreeSet<u32>,
    dropped: BTreeSet<u32>,
    window: usize,
    timeout: Duration,
    max_retries: u32,
}

impl WindowedSender {
    /// `config.max_attempts - 1` retries per chunk after its first send.
    pub fn new(payload: &[u8], config: &TransportConfig) -> Self {
        let chunks = split_into_chunks(payload, config.max_chunk_bytes)
            .into_iter()
            .map(<[u8]>::to_vec)
            .collect();
        Self {
            chunks,
            hash: integrity::hash_payload(payload),
            next: 0,
            in_flight: BTreeMap::new(),
            acked: BTreeSet::new(),
            dropped: BTreeSet::new(),
            window: config.window_size.max(1),
            timeout: config.ack_timeout,
            max_retries: config.max_attempts.saturating_sub(1),
        }
    }

    pub fn total_chunks(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn chunk(&self, seq: u32) -> Option<&[u8]> {
        self.chunks.get(seq as usize).map(Vec::as_slice)
    }

    pub fn in_flight(&self) -> &BTreeMap<u32, InFlight> {
        &self.in_flight
    }

    pub fn acked_count(&self) -> usize {
        self.acked.len()
    }

    pub fn acked_bytes(&self) -> usize {
        self.acked
            .iter()
            .filter_map(|seq| self.chunks.get(*seq as usize))
            .map(Vec::len)
            .sum()
    }

    pub fn dropped(&self) -> impl Iterator<Item = u32> + '_ {
        self.dropped.iter().copied()
    }

    /// Take new chunks until the window is full or none remain. Returned sequences are in flight.
    pub fn fill_window(&mut self, now: Instant) -> Vec<u32> {
        let mut out = Vec::new();
        while self.in_flight.len() < self.window && self.next < self.total_chunks() {
            let seq = self.next;
            self.next += 1;
            self.in_flight.insert(
                seq,
                InFlight {
                    sent_at: now,
                    retries: 0,
                },
            );
            out.push(seq);
        }
        out
    }

    /// Returns false for sequences not in flight (duplicates, dropped or unknown).
    pub fn acknowledge(&mut self, seq: u32) -> bool {
        if self.in_flight.remove(&seq).is_none() {
            return false;
        }
        self.acked.insert(seq);
        true
    }

    /// Mark an in-flight chunk as failed so the next sweep handles it without waiting out
    /// its timeout.
    pub fn reject(&mut self, seq: u32) {
        let timeout = self.timeout;
        if let Some(entry) = self.in_flight.get_mut(&seq) {
            if let Some(expired) = entry.sent_at.checked_sub(timeout) {
                entry.sent_at = expired;
            }
        }
    }

    /// Retry or drop every chunk whose timeout has elapsed.
    pub fn sweep(&mut self, now: Instant) -> Sweep {
        let mut sweep = Sweep::default();
        for (&seq, entry) in self.in_flight.iter_mut() {
            if now.saturating_duration_since(entry.sent_at) < self.timeout {
                continue;
            }
            if entry.retries >= self.max_retries {
                sweep.dropped.push(seq);
            } else {
                entry.retries += 1;
                entry.sent_at = now;
                sweep.retry.push(seq);
            }
        }
        for seq in &sweep.dropped {
            self.in_flight.remove(seq);
            self.dropped.insert(*seq);
            warn!(seq, "chunk dropped after retries");
        }
        if !sweep.retry.is_empty() {
            debug!(retry = ?sweep.retry, "retrying timed-out chunks");
        }
        sweep
    }

    /// When the oldest in-flight chunk times out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.in_flight
            .values()
            .map(|f| f.sent_at + self.timeout)
            .min()
    }

    /// Every chunk has been sent and nothing is left in flight.
    pub fn is_finished(&self) -> bool {
        self.next >= self.total_chunks() && self.in_flight.is_empty()
    }

    /// Hash of the whole payload and the number of chunks acknowledged.
    pub fn commit(&self) -> Commit {
        Commit {
            final_hash: self.hash,
            total_chunks: self.acked.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(len: usize, chunk: usize, window: usize) -> WindowedSender {
        let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
        WindowedSender::new(
            &payload,
            &TransportConfig {
                max_chunk_bytes: chunk,
                window_size: window,
                ack_timeout: Duration::from_secs(1),
                max_attempts: 3,
                ..TransportConfig::default()
            },
        )
    }

    #[test]
    fn window_bounds_in_flight() {
        let t0 = Instant::now();
        let mut tx = sender(100, 10, 4);
        assert_eq!(tx.fill_window(t0), vec![0, 1, 2, 3]);
        assert!(tx.fill_window(t0).is_empty());
        assert!(tx.acknowledge(1));
        assert_eq!(tx.fill_window(t0), vec![4]);
        assert_eq!(tx.in_flight().len(), 4);
    }

    #[test]
    fn full_transfer_commits_hash_and_count() {
        let t0 = Instant::now();
        let payload: Vec<u8> = (0..95u8).collect();
        let mut tx = WindowedSender::new(
            &payload,
            &TransportConfig {
                max_chunk_bytes: 10,
                ..TransportConfig::default()
            },
        );
        while !tx.is_finished() {
            for seq in tx.fill_window(t0) {
                assert!(tx.acknowledge(seq));
            }
        }
        assert_eq!(tx.acked_bytes(), 95);
        assert_eq!(
            tx.commit(),
            Commit {
                final_hash: integrity::hash_payload(&payload),
                total_chunks: 10
            }
        );
    }

    #[test]
    fn sweep_retries_then_drops() {
        let t0 = Instant::now();
        let s = Duration::from_secs(1);
        let mut tx = sender(10, 10, 4);
        assert_eq!(tx.fill_window(t0), vec![0]);

        assert_eq!(tx.sweep(t0 + s / 2), Sweep::default());
        assert_eq!(tx.sweep(t0 + s).retry, vec![0]);
        assert_eq!(tx.sweep(t0 + s * 2).retry, vec![0]);
        let last = tx.sweep(t0 + s * 3);
        assert_eq!(last.dropped, vec![0]);
        assert!(tx.is_finished());
        assert_eq!(tx.dropped().collect::<Vec<_>>(), vec![0]);
        assert_eq!(tx.commit().total_chunks, 0);
    }

    #[test]
    fn rejected_chunk_is_due_immediately() {
        let t0 = Instant::now() + Duration::from_secs(5);
        let mut tx = sender(20, 10, 4);
        tx.fill_window(t0);
        tx.reject(1);
        assert_eq!(tx.sweep(t0).retry, vec![1]);
        assert_eq!(tx.in_flight()[&1].retries, 1);
    }

    #[test]
    fn late_ack_after_drop_is_ignored() {
        let t0 = Instant::now();
        let mut tx = sender(10, 10, 1);
        tx.fill_window(t0);
        for i in 1..=3 {
            tx.sweep(t0 + Duration::from_secs(i));
        }
        assert!(!tx.acknowledge(0));
        assert!(!tx.acknowledge(0));
    }

    #[test]
    fn empty_payload_is_immediately_finished() {
        let tx = sender(0, 10, 4);
        assert!(tx.is_finished());
        assert_eq!(tx.commit().total_chunks, 0);
        assert!(tx.next_deadline().is_none());
    }
}
