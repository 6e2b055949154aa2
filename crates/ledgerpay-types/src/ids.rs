use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Per-account transaction counter. The ledger stores it as a 32-bit field.
pub type Sequence = u32;

/// Amounts and fees are denominated in drops, the ledger's smallest unit.
pub type Drops = u64;

pub type NetworkId = u32;

macro_rules! impl_fixed_bytes_id {
    ($name:ident, $len:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name([u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, ValidationError> {
                if bytes.len() != Self::LEN {
                    return Err(ValidationError::InvalidLength {
                        kind: stringify!($name),
                        expected: Self::LEN,
                        actual: bytes.len(),
                    });
                }
                let mut out = [0u8; Self::LEN];
                out.copy_from_slice(bytes);
                Ok(Self(out))
            }

            pub fn from_hex(value: &str) -> Result<Self, ValidationError> {
                let trimmed = value.strip_prefix("0x").unwrap_or(value);
                let bytes =
                    hex::decode(trimmed).map_err(|err| ValidationError::InvalidHex(err.to_string()))?;
                Self::from_slice(&bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub const fn into_inner(self) -> [u8; $len] {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self([0u8; Self::LEN])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(value: [u8; $len]) -> Self {
                Self::new(value)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = ValidationError;

            fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
                Self::from_slice(value)
            }
        }
    };
}

impl_fixed_bytes_id!(Address, 20);
impl_fixed_bytes_id!(PublicKey, 32);
impl_fixed_bytes_id!(TxHash, 32);

#[cfg(test)]
mod tests {
    use super::{Address, TxHash};
    use crate::ValidationError;

    #[test]
    fn parses_hex_with_and_without_prefix() {
        let addr = Address::new([0xab; 20]);
        assert_eq!(Address::from_hex(&addr.to_string()).unwrap(), addr);
        assert_eq!(
            Address::from_hex(&hex::encode([0xab; 20])).unwrap(),
            addr
        );
    }

    #[test]
    fn rejects_wrong_length() {
        let err = TxHash::from_slice(&[0u8; 20]).expect_err("20 bytes is not a tx hash");
        assert_eq!(
            err,
            ValidationError::InvalidLength {
                kind: "TxHash",
                expected: 32,
                actual: 20,
            }
        );
    }
}
