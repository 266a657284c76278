//! Concurrent sets of 16-bit sequence numbers and the completion predicate
//! built on top of them.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Notify;

const WORD_BITS: usize = 64;
const WORDS: usize = (u16::MAX as usize + 1) / WORD_BITS;

/// A lock-free bitset over the full `u16` sequence space.
///
/// `insert` and `contains` may be called from any number of tasks without
/// external locking. `len` counts distinct insertions.
pub struct SeqSet {
    words: Box<[AtomicU64]>,
    len: AtomicUsize,
}

impl SeqSet {
    pub fn new() -> Self {
        Self {
            words: (0..WORDS).map(|_| AtomicU64::new(0)).collect(),
            len: AtomicUsize::new(0),
        }
    }

    /// Returns `true` if `seq` was not present before.
    pub fn insert(&self, seq: u16) -> bool {
        let (word, mask) = Self::locate(seq);
        let previous = self.words[word].fetch_or(mask, Ordering::AcqRel);
        let fresh = previous & mask == 0;
        if fresh {
            self.len.fetch_add(1, Ordering::AcqRel);
        }
        fresh
    }

    pub fn contains(&self, seq: u16) -> bool {
        let (word, mask) = Self::locate(seq);
        self.words[word].load(Ordering::Acquire) & mask != 0
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn locate(seq: u16) -> (usize, u64) {
        let index = usize::from(seq);
        (index / WORD_BITS, 1u64 << (index % WORD_BITS))
    }
}

impl Default for SeqSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SeqSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqSet").field("len", &self.len()).finish()
    }
}

/// Per-session set of acknowledged sequence numbers.
///
/// The dispatcher records ACKs; the owning handler waits on [`changed`]
/// and re-reads the set. A notification raised while the handler is busy
/// is kept until its next wait, so no ACK is missed.
///
/// [`changed`]: AckTracker::changed
#[derive(Debug, Default)]
pub struct AckTracker {
    acked: SeqSet,
    notify: Notify,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an ACK. Duplicates are ignored and do not wake the handler.
    pub fn add_ack(&self, seq: u16) -> bool {
        let fresh = self.acked.insert(seq);
        if fresh {
            self.notify.notify_one();
        }
        fresh
    }

    pub fn is_acked(&self, seq: u16) -> bool {
        self.acked.contains(seq)
    }

    /// Resolves after at least one new ACK has been recorded.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}

/// Where a transfer stands with respect to its final packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The final packet has not been seen yet.
    Receiving,
    /// The final packet was seen but earlier sequence numbers are missing.
    LastSeen,
    /// Every sequence number up to and including the final one was seen.
    AllSeen,
}

const NO_FINAL: u32 = u32::MAX;

/// Tracks distinct sequence numbers plus the final one, if known.
#[derive(Debug)]
pub struct CompletionTracker {
    seen: SeqSet,
    final_seq: AtomicU32,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self {
            seen: SeqSet::new(),
            final_seq: AtomicU32::new(NO_FINAL),
        }
    }

    /// Returns `true` if `seq` had not been recorded before.
    pub fn record(&self, seq: u16, is_final: bool) -> bool {
        if is_final {
            self.final_seq.store(u32::from(seq), Ordering::Release);
        }
        self.seen.insert(seq)
    }

    pub fn phase(&self) -> Phase {
        match self.final_seq() {
            None => Phase::Receiving,
            Some(last) if self.seen.len() > usize::from(last) => Phase::AllSeen,
            Some(_) => Phase::LastSeen,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase() == Phase::AllSeen
    }

    pub fn final_seq(&self) -> Option<u16> {
        match self.final_seq.load(Ordering::Acquire) {
            NO_FINAL => None,
            seq => u16::try_from(seq).ok(),
        }
    }
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new()
    }
}
