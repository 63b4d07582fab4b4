use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

// Session id epoch: 2024-01-01T00:00:00Z
const EPOCH: u64 = 1_704_067_200_000;
const SEQUENCE_BITS: u32 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Hands out session ids. Injected into the socket handler so tests can
/// control the sequence.
pub trait SessionIdGenerator: Send + Sync {
    fn next_id(&self) -> u64;
}

/// Plain counter starting after `start`.
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    last: AtomicU64,
}

impl SequenceIdGenerator {
    pub fn starting_after(start: u64) -> Self {
        Self {
            last: AtomicU64::new(start),
        }
    }
}

impl SessionIdGenerator for SequenceIdGenerator {
    fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Time-ordered ids: milliseconds since [`EPOCH`] in the high bits, a
/// per-millisecond sequence in the low 12 bits.
#[derive(Debug, Default)]
pub struct SnowflakeIdGenerator {
    // (last timestamp, sequence)
    state: Mutex<(u64, u64)>,
}

impl SnowflakeIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(EPOCH)
}

impl SessionIdGenerator for SnowflakeIdGenerator {
    fn next_id(&self) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let (last, seq) = *state;
        let mut timestamp = now_ms().saturating_sub(EPOCH).max(last);

        let seq = if timestamp == last {
            let next = (seq + 1) & SEQUENCE_MASK;
            if next == 0 {
                // Sequence exhausted for this millisecond
                while timestamp <= last {
                    std::hint::spin_loop();
                    timestamp = now_ms().saturating_sub(EPOCH);
                }
            }
            next
        } else {
            0
        };

        *state = (timestamp, seq);
        (timestamp << SEQUENCE_BITS) | seq
    }
}
