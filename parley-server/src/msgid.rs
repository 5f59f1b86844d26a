//! Time-sortable message ID generation.
//!
//! Messages get a 26-character Crockford-base32 identifier (ULID layout:
//! 48 bits of millisecond timestamp followed by 80 bits of randomness), so
//! lexicographic order matches posting order within a room.

use rand::Rng;

const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Generate a new message id.
pub fn generate() -> String {
    let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;

    let mut rng = rand::thread_rng();
    let entropy: u128 = ((rng.r#gen::<u16>() as u128) << 64) | rng.r#gen::<u64>() as u128;

    let mut out = [0u8; 26];
    let mut ts = now_ms;
    for slot in out[..10].iter_mut().rev() {
        *slot = ALPHABET[(ts & 0x1F) as usize];
        ts >>= 5;
    }
    let mut r = entropy;
    for slot in out[10..].iter_mut().rev() {
        *slot = ALPHABET[(r & 0x1F) as usize];
        r >>= 5;
    }

    out.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_and_uniqueness() {
        let a = generate();
        let b = generate();
        assert_eq!(a.len(), 26);
        assert_ne!(a, b);
    }

    #[test]
    fn chronological_ordering() {
        let a = generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = generate();
        assert!(a < b, "ids should sort by time: {a} vs {b}");
    }

    #[test]
    fn alphabet_is_crockford() {
        for c in generate().chars() {
            assert!(ALPHABET.contains(&(c as u8)), "unexpected char {c}");
        }
    }
}
