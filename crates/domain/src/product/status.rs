use std::fmt;

use serde::{Deserialize, Serialize};

/// Sellability of a product, derived from its active flag and stock.
///
/// The active flag wins: an inactive product reports `Inactive` even with
/// units on hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProductStatus {
    Active,
    Inactive,
    OutOfStock,
}

impl ProductStatus {
    pub fn derive(active: bool, available: u32) -> Self {
        match (active, available) {
            (false, _) => ProductStatus::Inactive,
            (true, 0) => ProductStatus::OutOfStock,
            (true, _) => ProductStatus::Active,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "Active",
            ProductStatus::Inactive => "Inactive",
            ProductStatus::OutOfStock => "OutOfStock",
        }
    }
}

impl fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
