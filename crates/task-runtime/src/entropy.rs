//! Entropy abstraction for the runtime's own use of randomness (currently
//! just heartbeat jitter).

pub trait Entropy: Send + Sync {
    /// Generate a random value in the given range `[low, high)`.
    fn random_range(&self, range: std::ops::Range<u128>) -> u128;
}

/// The default entropy source, backed by the system RNG.
pub struct SystemEntropy;

impl Entropy for SystemEntropy {
    fn random_range(&self, range: std::ops::Range<u128>) -> u128 {
        use rand::Rng;
        rand::thread_rng().gen_range(range)
    }
}
