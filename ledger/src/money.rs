//! Cent-precision money helpers.
//!
//! The public API speaks `rust_decimal::Decimal`; storage and encryption
//! speak integer minor units. These two functions are the only bridge.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::config::{MINOR_UNITS_PER_UNIT, MONEY_SCALE};

/// Converts `amount` to minor units (cents).
///
/// Returns `None` when the amount carries more than two significant decimal
/// places or doesn't fit in an `i64`. `10.50` and `10.5000` are both fine;
/// `10.005` is not.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    if amount.normalize().scale() > MONEY_SCALE {
        return None;
    }
    amount
        .checked_mul(Decimal::from(MINOR_UNITS_PER_UNIT))?
        .to_i64()
}

/// Converts minor units back to a two-place decimal.
pub fn from_minor_units(units: i64) -> Decimal {
    Decimal::new(units, MONEY_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_whole_and_fractional_amounts() {
        assert_eq!(to_minor_units(dec("100")), Some(10_000));
        assert_eq!(to_minor_units(dec("0.01")), Some(1));
        assert_eq!(to_minor_units(dec("49000.00")), Some(4_900_000));
        assert_eq!(to_minor_units(dec("10.5000")), Some(1_050));
        assert_eq!(to_minor_units(dec("-3.25")), Some(-325));
    }

    #[test]
    fn test_sub_cent_rejected() {
        assert_eq!(to_minor_units(dec("0.001")), None);
        assert_eq!(to_minor_units(dec("10.005")), None);
    }

    #[test]
    fn test_from_minor_units_has_two_places() {
        let d = from_minor_units(4_900_000);
        assert_eq!(d, dec("49000"));
        assert_eq!(d.to_string(), "49000.00");
        assert_eq!(from_minor_units(5).to_string(), "0.05");
    }
}
