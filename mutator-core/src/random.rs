//! Random value generation for RANDOM-mode rules

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const NUMERIC: &[u8] = b"0123456789";
const ALPHA: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const ALPHANUMERIC: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const HEX: &[u8] = b"0123456789abcdef";

/// Kind of random value a rule inserts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RandomType {
    Numeric,
    Alpha,
    #[default]
    Alphanumeric,
    Hex,
    Uuid,
}

impl RandomType {
    fn alphabet(self) -> Option<&'static [u8]> {
        match self {
            RandomType::Numeric => Some(NUMERIC),
            RandomType::Alpha => Some(ALPHA),
            RandomType::Alphanumeric => Some(ALPHANUMERIC),
            RandomType::Hex => Some(HEX),
            RandomType::Uuid => None,
        }
    }
}

/// Generates random strings from a per-thread generator, so concurrent
/// callers never contend on shared state.
pub struct RandomValueGenerator;

impl RandomValueGenerator {
    /// Produce a random value of the given type.
    ///
    /// `Uuid` ignores `length` and returns a hyphenated version-4 UUID. The
    /// other types draw `max(length, 1)` characters uniformly from their
    /// alphabet.
    pub fn random_string(kind: RandomType, length: i32) -> String {
        let Some(alphabet) = kind.alphabet() else {
            return Uuid::new_v4().to_string();
        };

        let len = usize::try_from(length).unwrap_or(0).max(1);
        let mut rng = rand::thread_rng();
        (0..len)
            .map(|_| char::from(alphabet[rng.gen_range(0..alphabet.len())]))
            .collect()
    }
}
