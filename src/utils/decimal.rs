//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::Decimal;

/// Round to tick size (e.g., $1 strikes).
pub fn round_to_tick(value: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size == Decimal::ZERO {
        return value;
    }
    (value / tick_size).round() * tick_size
}

/// Round down to lot size (quantity precision).
pub fn round_down_to_lot(value: Decimal, lot_size: Decimal) -> Decimal {
    if lot_size == Decimal::ZERO {
        return value;
    }
    (value / lot_size).floor() * lot_size
}

/// Safe division that returns zero if divisor is zero.
pub fn safe_div(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator == Decimal::ZERO {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

/// Clamp into `[lo, hi]`.
pub fn clamp(value: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    value.max(lo).min(hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_to_tick() {
        assert_eq!(round_to_tick(dec!(451.37), dec!(1)), dec!(451));
        assert_eq!(round_to_tick(dec!(451.62), dec!(0.5)), dec!(451.5));
    }

    #[test]
    fn test_round_down_to_lot() {
        assert_eq!(round_down_to_lot(dec!(3.99), dec!(1)), dec!(3));
        assert_eq!(round_down_to_lot(dec!(1.56789), dec!(0.0001)), dec!(1.5678));
    }

    #[test]
    fn test_safe_div_and_clamp() {
        assert_eq!(safe_div(dec!(10), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(clamp(dec!(1.4), dec!(0), dec!(1)), dec!(1));
    }
}
