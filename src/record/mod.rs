pub mod store;
pub mod types;

use xxhash_rust::xxh3::xxh3_64;

/// 64-bit simhash over a token stream, used as the content fingerprint for
/// near-duplicate detection. Tokens hash with xxh3; each hash votes per bit.
pub fn simhash(tokens: impl IntoIterator<Item = impl AsRef<str>>) -> u64 {
    let mut counts = [0i32; 64];
    let mut any = false;
    for token in tokens {
        any = true;
        let h = xxh3_64(token.as_ref().as_bytes());
        for (i, count) in counts.iter_mut().enumerate() {
            if (h >> i) & 1 == 1 {
                *count += 1;
            } else {
                *count -= 1;
            }
        }
    }
    if !any {
        return 0;
    }
    let mut out = 0u64;
    for (i, count) in counts.iter().enumerate() {
        if *count > 0 {
            out |= 1 << i;
        }
    }
    out
}

/// Hamming distance between two fingerprints.
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Canonical content fingerprint: simhash over lowercased whitespace tokens.
pub fn fingerprint_of(content: &str) -> u64 {
    simhash(content.split_whitespace().map(|t| t.to_lowercase()))
}
