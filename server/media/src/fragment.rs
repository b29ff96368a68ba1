//! Splits outbound TTS chunks into MTU-sized fragments, and reassembles them
//! back on the receiving side.
//!
//! The fragmenter is used by the server's send path; the assembler mirrors it
//! and is exercised both by tests (property 3: reassembly is exact or the
//! chunk is dropped, never corrupted) and by any client-side consumer of this
//! crate.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::wire::{FragmentHeader, FRAGMENT_HEADER_LEN, HEADER_LEN, MAX_DATAGRAM_BYTES};

/// Payload budget per fragment after the outer wire header and inner fragment
/// header: 1400 - 5 - 24 = 1371 bytes of MP3 per fragment.
pub const FRAGMENT_PAYLOAD_BUDGET: usize = MAX_DATAGRAM_BYTES - HEADER_LEN - FRAGMENT_HEADER_LEN;

/// Client-side fragment reassembly timeout.
pub const REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Split `chunk` into `(FragmentHeader, payload)` pairs, each with payload
/// length `<= FRAGMENT_PAYLOAD_BUDGET`, in send order.
pub fn fragment(
    session_id: [u8; 16],
    chunk_index: u32,
    chunk: &[u8],
) -> Vec<(FragmentHeader, Vec<u8>)> {
    if chunk.is_empty() {
        return vec![(
            FragmentHeader { session_id, chunk_index, fragment_index: 0, fragment_count: 1 },
            Vec::new(),
        )];
    }

    let fragment_count = chunk.len().div_ceil(FRAGMENT_PAYLOAD_BUDGET) as u16;
    chunk
        .chunks(FRAGMENT_PAYLOAD_BUDGET)
        .enumerate()
        .map(|(idx, slice)| {
            (
                FragmentHeader {
                    session_id,
                    chunk_index,
                    fragment_index: idx as u16,
                    fragment_count,
                },
                slice.to_vec(),
            )
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyCounters {
    pub completed: u64,
    pub timed_out: u64,
    pub superseded: u64,
}

struct PendingChunk {
    chunk_index: u32,
    fragments: Vec<Option<Vec<u8>>>,
    received: usize,
    last_update: Instant,
}

/// Client-side reassembler, keyed by session id (one chunk in flight at a
/// time per session — a newer `chunk_index` always supersedes an older,
/// incomplete one).
#[derive(Default)]
pub struct FragmentAssembler {
    pending: HashMap<[u8; 16], PendingChunk>,
    pub counters: ReassemblyCounters,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment. Returns `Some(chunk_bytes)` the moment every
    /// fragment of a chunk has arrived.
    pub fn accept(&mut self, header: FragmentHeader, payload: Vec<u8>, now: Instant) -> Option<Vec<u8>> {
        self.evict_expired(now);

        let entry = self.pending.get(&header.session_id);
        let is_stale_or_new = match entry {
            Some(p) if p.chunk_index == header.chunk_index => false,
            Some(p) if header.chunk_index < p.chunk_index => {
                // Fragment from an already-superseded chunk: drop silently.
                return None;
            }
            Some(_) => {
                // Newer chunk_index for this session supersedes the old one.
                self.counters.superseded += 1;
                true
            }
            None => true,
        };

        if is_stale_or_new {
            self.pending.insert(
                header.session_id,
                PendingChunk {
                    chunk_index: header.chunk_index,
                    fragments: vec![None; header.fragment_count as usize],
                    received: 0,
                    last_update: now,
                },
            );
        }

        let pending = self.pending.get_mut(&header.session_id).unwrap();
        let idx = header.fragment_index as usize;
        if idx >= pending.fragments.len() {
            return None;
        }
        if pending.fragments[idx].is_none() {
            pending.fragments[idx] = Some(payload);
            pending.received += 1;
        }
        pending.last_update = now;

        if pending.received == pending.fragments.len() {
            let done = self.pending.remove(&header.session_id).unwrap();
            self.counters.completed += 1;
            let mut out = Vec::new();
            for piece in done.fragments {
                out.extend(piece.expect("all fragments present"));
            }
            Some(out)
        } else {
            None
        }
    }

    /// Drop any chunk that has not made progress within [`REASSEMBLY_TIMEOUT`].
    pub fn evict_expired(&mut self, now: Instant) {
        let timed_out: Vec<[u8; 16]> = self
            .pending
            .iter()
            .filter(|(_, p)| now.duration_since(p.last_update) >= REASSEMBLY_TIMEOUT)
            .map(|(k, _)| *k)
            .collect();
        for key in timed_out {
            self.pending.remove(&key);
            self.counters.timed_out += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_respect_the_payload_budget() {
        let chunk = vec![0xAAu8; 4100];
        let frags = fragment([1u8; 16], 0, &chunk);
        assert_eq!(frags.len(), 4100usize.div_ceil(FRAGMENT_PAYLOAD_BUDGET));
        for (hdr, payload) in &frags {
            assert!(payload.len() <= FRAGMENT_PAYLOAD_BUDGET);
            assert_eq!(hdr.fragment_count as usize, frags.len());
        }
    }

    #[test]
    fn reassembly_reconstructs_exact_bytes_when_nothing_is_lost() {
        let chunk: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let session_id = [9u8; 16];
        let frags = fragment(session_id, 7, &chunk);

        let mut asm = FragmentAssembler::new();
        let now = Instant::now();
        let mut result = None;
        for (hdr, payload) in frags {
            result = asm.accept(hdr, payload, now);
        }

        assert_eq!(result.unwrap(), chunk);
        assert_eq!(asm.counters.completed, 1);
    }

    #[test]
    fn newer_chunk_supersedes_an_incomplete_older_one() {
        let session_id = [3u8; 16];
        let old = fragment(session_id, 1, &vec![1u8; 3000]);
        let new = fragment(session_id, 2, &vec![2u8; 100]);

        let mut asm = FragmentAssembler::new();
        let now = Instant::now();

        // Feed only the first fragment of the old chunk (incomplete).
        asm.accept(old[0].0, old[0].1.clone(), now);

        let mut result = None;
        for (hdr, payload) in new {
            result = asm.accept(hdr, payload, now);
        }

        assert_eq!(result.unwrap(), vec![2u8; 100]);
        assert_eq!(asm.counters.superseded, 1);
    }

    #[test]
    fn late_fragment_of_a_superseded_chunk_is_dropped() {
        let session_id = [4u8; 16];
        let old = fragment(session_id, 1, &vec![1u8; 3000]);
        let new = fragment(session_id, 2, &vec![2u8; 100]);

        let mut asm = FragmentAssembler::new();
        let now = Instant::now();

        asm.accept(old[0].0, old[0].1.clone(), now);
        for (hdr, payload) in new {
            asm.accept(hdr, payload, now);
        }

        // A late fragment from the old (now superseded) chunk must not
        // resurrect or corrupt the already-completed new chunk.
        let result = asm.accept(old[1].0, old[1].1.clone(), now);
        assert!(result.is_none());
    }

    #[test]
    fn incomplete_chunk_times_out() {
        let session_id = [5u8; 16];
        let frags = fragment(session_id, 1, &vec![1u8; 3000]);

        let mut asm = FragmentAssembler::new();
        let t0 = Instant::now();
        asm.accept(frags[0].0, frags[0].1.clone(), t0);

        let later = t0 + REASSEMBLY_TIMEOUT + Duration::from_millis(1);
        asm.evict_expired(later);

        assert_eq!(asm.counters.timed_out, 1);
        // The remaining fragment of the timed-out chunk starts a fresh entry.
        let result = asm.accept(frags[1].0, frags[1].1.clone(), later);
        assert!(result.is_none());
    }
}
