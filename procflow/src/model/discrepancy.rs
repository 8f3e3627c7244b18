use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscrepancyKind {
    NoPo,
    MissingReceipt,
    QuantityMismatch,
    PriceVariance,
    VendorMismatch,
}

impl fmt::Display for DiscrepancyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiscrepancyKind::NoPo => "no_po",
            DiscrepancyKind::MissingReceipt => "missing_receipt",
            DiscrepancyKind::QuantityMismatch => "quantity_mismatch",
            DiscrepancyKind::PriceVariance => "price_variance",
            DiscrepancyKind::VendorMismatch => "vendor_mismatch",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Scores a relative variance against two tolerance bands.
    ///
    /// `ratio <= low` is Low, `ratio <= medium` is Medium, anything else High.
    pub fn from_variance(ratio: Decimal, low: Decimal, medium: Decimal) -> Self {
        let ratio = ratio.abs();
        if ratio <= low {
            Severity::Low
        } else if ratio <= medium {
            Severity::Medium
        } else {
            Severity::High
        }
    }

    pub fn blocks_payment(&self) -> bool {
        *self == Severity::High
    }
}

/// One typed mismatch found by the three-way match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub id: String,
    pub kind: DiscrepancyKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub line_id: Option<String>,
    #[serde(default)]
    pub expected: Option<Decimal>,
    #[serde(default)]
    pub actual: Option<Decimal>,
}
