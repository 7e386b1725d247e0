//! Probabilistic membership filter for classified addresses
//!
//! Fixed-size bit array with two independent string hashes (polynomial and
//! FNV-1a). False positives are possible and bounded by the bit-array size;
//! false negatives are not. A positive answer therefore means "maybe
//! already classified, check the memo", never the reverse.

/// Fixed-size bloom filter over address strings
pub struct BloomFilter {
    bits: Vec<u64>,
    bit_count: usize,
    inserted: u64,
}

impl BloomFilter {
    /// Create a filter with the given number of bits (rounded up to 64)
    pub fn new(bit_count: usize) -> Self {
        let bit_count = bit_count.max(64);
        Self {
            bits: vec![0; bit_count.div_ceil(64)],
            bit_count,
            inserted: 0,
        }
    }

    /// Mark an address as present
    pub fn insert(&mut self, address: &str) {
        for position in self.positions(address) {
            self.bits[position / 64] |= 1 << (position % 64);
        }
        self.inserted += 1;
    }

    /// Whether an address may be present (false positives possible,
    /// false negatives not)
    pub fn may_contain(&self, address: &str) -> bool {
        self.positions(address)
            .iter()
            .all(|&position| self.bits[position / 64] & (1 << (position % 64)) != 0)
    }

    /// Number of inserts performed (not distinct members)
    pub fn inserted(&self) -> u64 {
        self.inserted
    }

    pub fn clear(&mut self) {
        self.bits.fill(0);
        self.inserted = 0;
    }

    /// Two independent bit positions per key
    fn positions(&self, address: &str) -> [usize; 2] {
        [
            (polynomial_hash(address) % self.bit_count as u64) as usize,
            (fnv1a_hash(address) % self.bit_count as u64) as usize,
        ]
    }
}

/// Simple base-31 polynomial string hash
fn polynomial_hash(s: &str) -> u64 {
    let mut hash: u64 = 0;
    for byte in s.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(byte as u64);
    }
    hash
}

/// FNV-1a, independent mixing from the polynomial hash
fn fnv1a_hash(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
