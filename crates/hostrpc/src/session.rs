//! Session identity and the shared-memory capability state negotiated
//! during `Register`.

use std::fmt;

/// A random session token, minted fresh on every `Client::open`. Plain hex
/// of 16 random bytes; carried as a string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session(String);

impl Session {
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::fill(&mut bytes).expect("system randomness unavailable");
        let mut hex = String::with_capacity(32);
        for b in bytes {
            hex.push_str(&format!("{:02x}", b));
        }
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shared-memory policy as discovered by `Register`. `min_sm_size` and
/// `min_sm_byte` only ever grow across repeated registers within a
/// session (register monotonicity).
#[derive(Debug, Clone, Copy, Default)]
pub struct ShmNegotiation {
    pub possible_shared_memory: bool,
    pub disable_shared_memory: bool,
    pub min_sm_size: i64,
    pub min_sm_byte: i64,
}

impl ShmNegotiation {
    pub fn is_active(&self) -> bool {
        self.possible_shared_memory && !self.disable_shared_memory
    }

    /// Merge in a newer `RegisterA`, keeping thresholds monotonically
    /// non-decreasing.
    pub fn absorb(&mut self, is_sm: bool, min_sm_size: i64, min_sm_byte: i64) {
        self.possible_shared_memory = is_sm;
        self.min_sm_size = self.min_sm_size.max(min_sm_size);
        self.min_sm_byte = self.min_sm_byte.max(min_sm_byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_tokens_are_distinct_32_char_hex() {
        let a = Session::new();
        let b = Session::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn negotiation_thresholds_are_monotonically_non_decreasing() {
        let mut neg = ShmNegotiation::default();
        neg.absorb(true, 1024, 65536);
        assert_eq!((neg.min_sm_size, neg.min_sm_byte), (1024, 65536));

        // A later register with smaller numbers must not lower the thresholds.
        neg.absorb(true, 512, 100);
        assert_eq!((neg.min_sm_size, neg.min_sm_byte), (1024, 65536));

        neg.absorb(true, 2048, 65536);
        assert_eq!((neg.min_sm_size, neg.min_sm_byte), (2048, 65536));
    }

    #[test]
    fn negotiation_is_active_only_when_possible_and_not_disabled() {
        let mut neg = ShmNegotiation {
            possible_shared_memory: true,
            disable_shared_memory: false,
            ..Default::default()
        };
        assert!(neg.is_active());
        neg.disable_shared_memory = true;
        assert!(!neg.is_active());
    }
}
