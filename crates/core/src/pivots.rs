//! Floor-trader pivot levels computed from trailing daily bars.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::TradeError;
use crate::events::Bar;

/// Resistance/support levels around the pivot point for one underlying.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PivotSet {
    pub r2: Decimal,
    pub r1: Decimal,
    pub pv: Decimal,
    pub s1: Decimal,
    pub s2: Decimal,
}

impl PivotSet {
    /// Compute from a trailing window of daily bars: the window high, window
    /// low, and final close feed the classic formulas. `min_bars` guards
    /// against a thin history producing junk levels.
    pub fn from_bars(symbol: &str, bars: &[Bar], min_bars: usize) -> Result<Self, TradeError> {
        if bars.is_empty() || bars.len() < min_bars {
            return Err(TradeError::InsufficientHistory {
                symbol: symbol.to_string(),
                got: bars.len(),
            });
        }
        let high = bars.iter().map(|b| b.high).max().unwrap_or_default();
        let low = bars.iter().map(|b| b.low).min().unwrap_or_default();
        let close = bars[bars.len() - 1].close;

        let pv = (high + low + close) / Decimal::from(3);
        Ok(Self {
            r2: pv + (high - low),
            r1: Decimal::TWO * pv - low,
            pv,
            s1: Decimal::TWO * pv - high,
            s2: pv - (high - low),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn bar(high: Decimal, low: Decimal, close: Decimal) -> Bar {
        Bar {
            open: close,
            high,
            low,
            close,
            volume: dec!(1000),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn levels_follow_window_extremes() {
        let bars = vec![
            bar(dec!(102), dec!(98), dec!(100)),
            bar(dec!(106), dec!(101), dec!(104)),
            bar(dec!(105), dec!(99), dec!(103)),
        ];
        let p = PivotSet::from_bars("XYZ", &bars, 3).unwrap();
        // H=106, L=98, C=103 → PV = 307/3
        assert_eq!(p.pv, dec!(307) / dec!(3));
        assert!(p.r2 > p.r1 && p.r1 > p.pv && p.pv > p.s1 && p.s1 > p.s2);
    }

    #[test]
    fn short_history_is_rejected() {
        let bars = vec![bar(dec!(102), dec!(98), dec!(100))];
        let err = PivotSet::from_bars("XYZ", &bars, 200).unwrap_err();
        assert!(matches!(err, TradeError::InsufficientHistory { got: 1, .. }));
    }
}
