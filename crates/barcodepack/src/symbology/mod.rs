//! UPC-A and EAN-13 check digits and module patterns.

pub mod checksum;
pub mod modules;

use serde::{Deserialize, Serialize};

use crate::error::SymbologyError;

pub use checksum::{ean13_check_digit, ean13_from_upc12, upc12_from_base, upc_check_digit};
pub use modules::{dark_runs, encode_modules, is_guard_module, SYMBOL_MODULES};

/// Barcode symbology of a rendered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Symbology {
    UpcA,
    Ean13,
}

impl Symbology {
    pub const ALL: [Symbology; 2] = [Symbology::UpcA, Symbology::Ean13];

    /// Directory and filename prefix used in the output tree.
    pub fn label(self) -> &'static str {
        match self {
            Symbology::UpcA => "UPC-12",
            Symbology::Ean13 => "EAN-13",
        }
    }

    /// Number of digits in a full code of this symbology.
    pub fn code_len(self) -> usize {
        match self {
            Symbology::UpcA => 12,
            Symbology::Ean13 => 13,
        }
    }
}

impl std::fmt::Display for Symbology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The UPC-A and EAN-13 codes derived from one 11-digit base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePair {
    pub upc12: String,
    pub ean13: String,
}

impl CodePair {
    pub fn from_base(base11: &str) -> Result<Self, SymbologyError> {
        let upc12 = upc12_from_base(base11)?;
        let ean13 = format!("0{}", upc12);
        Ok(Self { upc12, ean13 })
    }

    pub fn code(&self, symbology: Symbology) -> &str {
        match symbology {
            Symbology::UpcA => &self.upc12,
            Symbology::Ean13 => &self.ean13,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_pair_from_base() {
        let pair = CodePair::from_base("12345678901").unwrap();
        assert_eq!(pair.code(Symbology::UpcA), "123456789012");
        assert_eq!(pair.code(Symbology::Ean13), "0123456789012");
        assert_eq!(pair.ean13, ean13_from_upc12(&pair.upc12).unwrap());
    }

    #[test]
    fn test_labels() {
        assert_eq!(Symbology::UpcA.to_string(), "UPC-12");
        assert_eq!(Symbology::Ean13.label(), "EAN-13");
        assert_eq!(Symbology::Ean13.code_len(), 13);
    }
}
