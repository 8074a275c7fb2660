//! Random byte source, injected into the engine as a capability

use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};

/// Source of cryptographically secure random bytes.
///
/// Implementations must fail rather than return weak or partial output.
pub trait RandomSource {
    fn fill(&self, buf: &mut [u8]) -> CryptoResult<()>;
}

/// Operating-system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> CryptoResult<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| CryptoError::RandomnessUnavailable(e.to_string()))
    }
}

/// A source that is always exhausted. Exercises the failure paths.
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingRandom;

#[cfg(test)]
impl RandomSource for FailingRandom {
    fn fill(&self, _buf: &mut [u8]) -> CryptoResult<()> {
        Err(CryptoError::RandomnessUnavailable(
            "entropy source exhausted".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_random_fills_distinct_buffers() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        OsRandom.fill(&mut a).unwrap();
        OsRandom.fill(&mut b).unwrap();
        assert_ne!(a, b, "random bytes must differ");
    }

    #[test]
    fn test_failing_random() {
        let mut buf = [0u8; 4];
        assert!(matches!(
            FailingRandom.fill(&mut buf),
            Err(CryptoError::RandomnessUnavailable(_))
        ));
    }
}
