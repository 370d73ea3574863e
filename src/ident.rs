//! Identifier generation and retry jitter.
//!
//! Session and segment ids are alphabet-sampled strings rather than UUIDs so
//! the alphabet and length stay under the integrator's control. Both the id
//! generator and the jitter factor draw from the OS CSPRNG.

use crate::config::ConfigError;
use rand::rngs::OsRng;
use rand::Rng;

/// Characters used by [`IdGenerator::alphanumeric`].
pub const ALPHANUMERIC: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Default length of generated identifiers.
pub const DEFAULT_ID_LEN: usize = 36;

/// Generates fixed-length random identifier strings from a configured
/// alphabet, seeded by the OS CSPRNG.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    alphabet: Vec<char>,
    len: usize,
}

impl IdGenerator {
    /// Create a generator producing `len`-character ids from `alphabet`.
    ///
    /// Fails fast on a zero length or an alphabet with fewer than two
    /// characters.
    pub fn new(len: usize, alphabet: &str) -> Result<Self, ConfigError> {
        if len == 0 {
            return Err(ConfigError::InvalidIdLength);
        }
        let alphabet: Vec<char> = alphabet.chars().collect();
        if alphabet.len() < 2 {
            return Err(ConfigError::InvalidIdAlphabet);
        }
        Ok(Self { alphabet, len })
    }

    /// Generator with the default 36-character alphanumeric format.
    pub fn alphanumeric() -> Self {
        Self {
            alphabet: ALPHANUMERIC.chars().collect(),
            len: DEFAULT_ID_LEN,
        }
    }

    /// Produce a new random identifier.
    pub fn generate(&self) -> String {
        let mut rng = OsRng;
        (0..self.len)
            .map(|_| self.alphabet[rng.gen_range(0..self.alphabet.len())])
            .collect()
    }
}

/// Uniform random factor in `[1 - randomization, 1 + randomization]`,
/// applied to retry intervals so clients do not retry in lockstep.
pub fn jitter_factor(randomization: f64) -> f64 {
    if randomization <= 0.0 {
        return 1.0;
    }
    OsRng.gen_range(1.0 - randomization..=1.0 + randomization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_length_and_alphabet() {
        let ids = IdGenerator::alphanumeric();
        let id = ids.generate();
        assert_eq!(id.len(), DEFAULT_ID_LEN);
        assert!(id.chars().all(|c| ALPHANUMERIC.contains(c)));
    }

    #[test]
    fn test_ids_are_unique() {
        let ids = IdGenerator::alphanumeric();
        assert_ne!(ids.generate(), ids.generate());
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        assert!(matches!(
            IdGenerator::new(0, ALPHANUMERIC),
            Err(ConfigError::InvalidIdLength)
        ));
        assert!(matches!(
            IdGenerator::new(8, "x"),
            Err(ConfigError::InvalidIdAlphabet)
        ));
    }

    #[test]
    fn test_custom_alphabet() {
        let ids = IdGenerator::new(10, "01").unwrap();
        let id = ids.generate();
        assert_eq!(id.len(), 10);
        assert!(id.chars().all(|c| c == '0' || c == '1'));
    }

    #[test]
    fn test_jitter_within_range() {
        for _ in 0..100 {
            let f = jitter_factor(0.4);
            assert!((0.6..=1.4).contains(&f));
        }
        assert_eq!(jitter_factor(0.0), 1.0);
    }
}
