//! Streaming integrity accumulation
//!
//! Both transfer directions and the diagnostic walker fold cleartext
//! through the same accumulator: a streaming SHA-1 plus a byte counter,
//! compared against the author's claims at end of stream.

use drive_core::DriveError;
use sha1::{Digest, Sha1};

/// Streaming SHA-1 and size accumulator.
#[derive(Default)]
pub struct IntegrityAccumulator {
    hasher: Sha1,
    size: u64,
}

impl IntegrityAccumulator {
    /// Empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one cleartext chunk.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
    }

    /// Bytes folded so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Finish: hex SHA-1 and total size.
    pub fn finalize(self) -> (String, u64) {
        (hex::encode(self.hasher.finalize()), self.size)
    }
}

/// Whether a claimed digest is a well-formed SHA-1: exactly 40 hex digits,
/// case-insensitive.
pub fn is_well_formed_sha1(digest: &str) -> bool {
    digest.len() == 40 && digest.chars().all(|c| c.is_ascii_hexdigit())
}

/// Compare computed digest and size against the author's claims. `None`
/// claims pass; a present claim must match.
pub fn check_claims(
    computed_sha1: &str,
    computed_size: u64,
    claimed_sha1: Option<&str>,
    claimed_size: Option<u64>,
) -> Result<(), DriveError> {
    if let Some(claimed) = claimed_sha1 {
        if !claimed.eq_ignore_ascii_case(computed_sha1) {
            return Err(DriveError::integrity(format!(
                "content digest mismatch: claimed {claimed}, computed {computed_sha1}"
            )));
        }
    }
    if let Some(claimed) = claimed_size {
        if claimed != computed_size {
            return Err(DriveError::integrity(format!(
                "content size mismatch: claimed {claimed}, computed {computed_size}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_chunks() {
        let mut one = IntegrityAccumulator::new();
        one.update(b"hello ");
        one.update(b"world");
        let (split, split_size) = one.finalize();

        let mut whole = IntegrityAccumulator::new();
        whole.update(b"hello world");
        let (joined, joined_size) = whole.finalize();

        assert_eq!(split, joined);
        assert_eq!(split_size, joined_size);
        assert_eq!(split_size, 11);
    }

    #[test]
    fn claims_are_checked_case_insensitively() {
        let mut acc = IntegrityAccumulator::new();
        acc.update(b"data");
        let (sha1, size) = acc.finalize();

        assert!(check_claims(&sha1, size, Some(&sha1.to_uppercase()), Some(4)).is_ok());
        assert!(check_claims(&sha1, size, Some(&sha1), Some(5)).is_err());
        assert!(check_claims(&sha1, size, Some("0".repeat(40).as_str()), None).is_err());
        assert!(check_claims(&sha1, size, None, None).is_ok());
    }

    #[test]
    fn sha1_shape_check() {
        assert!(is_well_formed_sha1(&"a".repeat(40)));
        assert!(is_well_formed_sha1(&"ABCDEF0123".repeat(4)));
        assert!(!is_well_formed_sha1(&"a".repeat(39)));
        assert!(!is_well_formed_sha1(&"g".repeat(40)));
    }
}
