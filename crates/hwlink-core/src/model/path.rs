// ── Derivation path ──

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const HARDENED: u32 = 0x8000_0000;

/// A BIP-32 style key path such as `m/44'/5757'/0'/0/0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<u32>);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid derivation path '{input}': {reason}")]
pub struct ParsePathError {
    input: String,
    reason: String,
}

impl DerivationPath {
    /// `m/44'/5757'/0'/0/0`, the first Stacks account.
    pub fn stacks_default() -> Self {
        Self(vec![44 | HARDENED, 5757 | HARDENED, HARDENED, 0, 0])
    }

    pub fn components(&self) -> &[u32] {
        &self.0
    }

    /// Big-endian wire encoding, four bytes per component.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|c| c.to_be_bytes()).collect()
    }
}

impl FromStr for DerivationPath {
    type Err = ParsePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason: &str| ParsePathError {
            input: s.to_owned(),
            reason: reason.to_owned(),
        };

        let mut parts = s.trim().split('/');
        if parts.next() != Some("m") {
            return Err(err("must start with 'm'"));
        }

        let components = parts
            .map(|part| {
                let (digits, hardened) = match part.strip_suffix(['\'', 'h']) {
                    Some(digits) => (digits, true),
                    None => (part, false),
                };
                let index: u32 = digits
                    .parse()
                    .map_err(|_| err(&format!("'{part}' is not an index")))?;
                if index >= HARDENED {
                    return Err(err(&format!("index {index} out of range")));
                }
                Ok(if hardened { index | HARDENED } else { index })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if components.is_empty() {
            return Err(err("no components"));
        }
        Ok(Self(components))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for component in &self.0 {
            if component & HARDENED == 0 {
                write!(f, "/{component}")?;
            } else {
                write!(f, "/{}'", component & !HARDENED)?;
            }
        }
        Ok(())
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
