use std::collections::HashMap;
use std::sync::Mutex;

use ftx_core::{charset_index, CHARSET_HASH};

/// Longest callsign the hash covers; shorter calls are padded with spaces.
pub const HASH_CALL_CHARS: usize = 11;

const HASH_MULTIPLIER: u64 = 47_055_833_459;

/// Width of a truncated hash as it appears in a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashWidth {
    H22,
    H12,
    H10,
}

impl HashWidth {
    #[must_use]
    pub fn truncate(self, n22: u32) -> u32 {
        match self {
            Self::H22 => n22,
            Self::H12 => n22 >> 10,
            Self::H10 => n22 >> 12,
        }
    }
}

/// Compute the 22-bit hash of a callsign. Characters outside the base-38
/// alphabet index as zero, matching the padding value.
#[must_use]
pub fn hash22(call: &str) -> u32 {
    let mut n58 = 0u64;
    let bytes = call.as_bytes();
    for i in 0..HASH_CALL_CHARS {
        let c = bytes.get(i).copied().unwrap_or(b' ');
        let idx = charset_index(CHARSET_HASH, c.to_ascii_uppercase()).unwrap_or(0);
        n58 = n58.wrapping_mul(38).wrapping_add(idx as u64);
    }
    ((HASH_MULTIPLIER.wrapping_mul(n58)) >> 42) as u32 & 0x3F_FFFF
}

#[must_use]
pub fn hash12(call: &str) -> u32 {
    hash22(call) >> 10
}

#[must_use]
pub fn hash10(call: &str) -> u32 {
    hash22(call) >> 12
}

/// Storage interface for hashed callsigns. The message codec only needs
/// save-by-call and lookup-by-truncated-hash; consumers may supply their own
/// (for example disk-backed) implementation.
pub trait CallsignStore: Send + Sync {
    /// Record `call`, returning its 22-bit hash.
    fn save(&self, call: &str) -> u32;
    /// Find a previously saved call whose hash truncates to `hash` at `width`.
    fn lookup(&self, width: HashWidth, hash: u32) -> Option<String>;
}

/// In-memory hash table. Interleaved save/lookup from concurrent decodes is
/// serialised by a single mutex.
#[derive(Debug, Default)]
pub struct CallsignHashTable {
    calls: Mutex<HashMap<u32, String>>,
}

impl CallsignHashTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.lock().expect("hash table poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CallsignStore for CallsignHashTable {
    fn save(&self, call: &str) -> u32 {
        let n22 = hash22(call);
        let mut calls = self.calls.lock().expect("hash table poisoned");
        calls.insert(n22, call.trim().to_ascii_uppercase());
        n22
    }

    fn lookup(&self, width: HashWidth, hash: u32) -> Option<String> {
        let calls = self.calls.lock().expect("hash table poisoned");
        calls
            .iter()
            .find(|(&n22, _)| width.truncate(n22) == hash)
            .map(|(_, call)| call.clone())
    }
}
