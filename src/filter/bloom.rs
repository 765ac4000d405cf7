use xxhash_rust::xxh3::xxh3_128;

use super::FilterPolicy;

/// Built-in bloom filter.
///
/// - If any checked bit is 0 → key is DEFINITELY NOT in the block
/// - If all checked bits are 1 → key is PROBABLY in the block
///
/// Sizing: `bits_per_key` bits per key, `k = bits_per_key * ln(2)` hash functions.
/// 10 bits/key gives roughly a 1% false positive rate.
///
/// Double hashing: `h_i = h1 + i * h2 (mod m)`, where h1/h2 are the two halves
/// of a 128-bit xxh3 hash.
///
/// Encoded filter: `[bit array][k: u8]`.
#[derive(Debug, Clone)]
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    num_hashes: u8,
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> Self {
        let bits_per_key = bits_per_key.max(1);
        // 0.69 =~ ln(2)
        let num_hashes = ((bits_per_key as f64) * 0.69) as usize;
        let num_hashes = num_hashes.clamp(1, 30) as u8;
        Self {
            bits_per_key,
            num_hashes,
        }
    }

    fn hash_key(key: &[u8]) -> (u64, u64) {
        let hash = xxh3_128(key);
        (hash as u64, (hash >> 64) as u64)
    }
}

impl Default for BloomFilterPolicy {
    fn default() -> Self {
        Self::new(10)
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &str {
        "stratakv.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        // Tiny filters have a very high false positive rate; use at least 64 bits
        let bits = (keys.len() * self.bits_per_key).max(64);
        let bytes = bits.div_ceil(8);
        let bits = (bytes * 8) as u64;

        let start = dst.len();
        dst.resize(start + bytes, 0);
        dst.push(self.num_hashes);

        let array = &mut dst[start..start + bytes];
        for key in keys {
            let (h1, h2) = Self::hash_key(key);
            for i in 0..self.num_hashes as u64 {
                let pos = h1.wrapping_add(i.wrapping_mul(h2)) % bits;
                array[(pos / 8) as usize] |= 1 << (pos % 8);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        if filter.len() < 2 {
            return false;
        }
        let (array, k) = filter.split_at(filter.len() - 1);
        let k = k[0];
        if k > 30 {
            // Reserved for other encodings: treat as a match
            return true;
        }

        let bits = (array.len() * 8) as u64;
        let (h1, h2) = Self::hash_key(key);
        for i in 0..k as u64 {
            let pos = h1.wrapping_add(i.wrapping_mul(h2)) % bits;
            if array[(pos / 8) as usize] & (1 << (pos % 8)) == 0 {
                return false;
            }
        }
        true
    }
}
