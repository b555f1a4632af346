//! One-time numeric confirmation codes.

use rand::Rng;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

/// Six-digit numeric secret proving control of the registered email.
///
/// Drawn with a single bounded call on the OS CSPRNG.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ConfirmationCode(u32);

impl ConfirmationCode {
    /// Smallest issued code (inclusive).
    pub const MIN: u32 = 100_000;
    /// Upper bound of issued codes (exclusive).
    pub const MAX: u32 = 1_000_000;

    pub fn generate() -> Self {
        Self(OsRng.gen_range(Self::MIN..Self::MAX))
    }

    /// Wrap a stored value. No range check: legacy or foreign values simply
    /// never match a well-formed submission.
    pub fn from_stored(value: u32) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    /// Exact numeric match, compared in constant time.
    pub fn matches(&self, submitted: u32) -> bool {
        self.0.ct_eq(&submitted).into()
    }
}

impl core::fmt::Debug for ConfirmationCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ConfirmationCode(******)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn matches_only_exact_value() {
        let code = ConfirmationCode::from_stored(123_456);
        assert!(code.matches(123_456));
        assert!(!code.matches(123_457));
        assert!(!code.matches(0));
    }

    #[test]
    fn debug_does_not_leak_value() {
        let code = ConfirmationCode::from_stored(424_242);
        assert!(!format!("{code:?}").contains("424242"));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: generated codes always have exactly six digits.
        #[test]
        fn generated_codes_are_six_digits(_seed in any::<u8>()) {
            let code = ConfirmationCode::generate();
            prop_assert!(code.value() >= ConfirmationCode::MIN);
            prop_assert!(code.value() < ConfirmationCode::MAX);
            prop_assert_eq!(code.value().to_string().len(), 6);
        }
    }
}
