//! Instrument identity and option contract naming.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Option right (call or put).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionRight {
    Call,
    Put,
}

impl std::fmt::Display for OptionRight {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "C"),
            Self::Put => write!(f, "P"),
        }
    }
}

/// What kind of tradable an instrument is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstrumentKind {
    Equity,
    Future {
        expiry: NaiveDate,
    },
    Option {
        underlying: String,
        expiry: NaiveDate,
        strike: Decimal,
        right: OptionRight,
    },
}

/// A tradable instrument, fully specified once its exchange contract resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Canonical instrument name, unique across the session.
    pub name: String,
    pub kind: InstrumentKind,
    /// Exchange contract id; `None` until contract details are fetched.
    pub contract_id: Option<i64>,
    /// Fallback tick used when the execution provider has no exchange rule.
    pub min_tick: Decimal,
    /// Contract multiplier (1 for equities, 100 for standard equity options).
    pub multiplier: Decimal,
}

impl Instrument {
    pub fn equity(symbol: &str) -> Self {
        Self {
            name: symbol.to_uppercase(),
            kind: InstrumentKind::Equity,
            contract_id: None,
            min_tick: Decimal::new(1, 2),
            multiplier: Decimal::ONE,
        }
    }

    /// Standard equity option with the canonical `UL-YYYYMMDD-R-STRIKE` name.
    pub fn option(underlying: &str, expiry: NaiveDate, strike: Decimal, right: OptionRight) -> Self {
        Self {
            name: option_name(underlying, expiry, strike, right),
            kind: InstrumentKind::Option {
                underlying: underlying.to_uppercase(),
                expiry,
                strike,
                right,
            },
            contract_id: None,
            min_tick: Decimal::new(1, 2),
            multiplier: Decimal::from(100),
        }
    }

    pub fn is_option(&self) -> bool {
        matches!(self.kind, InstrumentKind::Option { .. })
    }

    /// `true` once contract details have been fetched and registered.
    pub fn is_registered(&self) -> bool {
        self.contract_id.is_some()
    }

    pub fn strike(&self) -> Option<Decimal> {
        match &self.kind {
            InstrumentKind::Option { strike, .. } => Some(*strike),
            _ => None,
        }
    }

    pub fn right(&self) -> Option<OptionRight> {
        match &self.kind {
            InstrumentKind::Option { right, .. } => Some(*right),
            _ => None,
        }
    }

    pub fn expiry(&self) -> Option<NaiveDate> {
        match &self.kind {
            InstrumentKind::Option { expiry, .. } | InstrumentKind::Future { expiry } => {
                Some(*expiry)
            }
            InstrumentKind::Equity => None,
        }
    }

    pub fn underlying(&self) -> Option<&str> {
        match &self.kind {
            InstrumentKind::Option { underlying, .. } => Some(underlying),
            _ => None,
        }
    }
}

/// Canonical option name, e.g. `XYZ-20260619-C-105`.
pub fn option_name(underlying: &str, expiry: NaiveDate, strike: Decimal, right: OptionRight) -> String {
    format!(
        "{}-{}-{}-{}",
        underlying.to_uppercase(),
        expiry.format("%Y%m%d"),
        right,
        strike.normalize()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn option_name_is_canonical() {
        let expiry = NaiveDate::from_ymd_opt(2026, 6, 19).unwrap();
        let inst = Instrument::option("xyz", expiry, dec!(105.00), OptionRight::Call);
        assert_eq!(inst.name, "XYZ-20260619-C-105");
        assert_eq!(inst.strike(), Some(dec!(105.00)));
        assert_eq!(inst.right(), Some(OptionRight::Call));
        assert_eq!(inst.underlying(), Some("XYZ"));
        assert!(inst.is_option());
        assert!(!inst.is_registered());
    }

    #[test]
    fn equity_has_no_option_fields() {
        let inst = Instrument::equity("spy");
        assert_eq!(inst.name, "SPY");
        assert!(inst.strike().is_none());
        assert!(inst.expiry().is_none());
        assert_eq!(inst.multiplier, Decimal::ONE);
    }
}
