use super::money::{Cents, FeeRate};
use serde::{Deserialize, Serialize};

/// The result of splitting a gross amount between the platform and the celebrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub platform_fee: Cents,
    pub celebrity_amount: Cents,
}

/// Splits `gross` into the platform fee and the celebrity's share.
///
/// The fee is `gross * rate / 100` rounded half-up to the nearest cent. The
/// celebrity amount is always derived as `gross - fee`, so the two parts sum
/// to `gross` exactly.
pub fn split(gross: Cents, rate: FeeRate) -> Split {
    let platform_fee = gross.percent(rate);
    Split {
        platform_fee,
        celebrity_amount: gross - platform_fee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn cents(v: i64) -> Cents {
        Cents::new(v).unwrap()
    }

    fn rate(p: u8) -> FeeRate {
        FeeRate::new(p).unwrap()
    }

    #[test]
    fn test_twenty_percent_of_299() {
        let s = split(cents(29900), rate(20));
        assert_eq!(s.platform_fee, cents(5980));
        assert_eq!(s.celebrity_amount, cents(23920));
    }

    #[test]
    fn test_boundaries() {
        assert_eq!(split(cents(0), rate(20)).platform_fee, Cents::ZERO);
        assert_eq!(split(cents(1), rate(20)).platform_fee, Cents::ZERO);
        assert_eq!(split(cents(1), rate(50)).platform_fee, cents(1));
        assert_eq!(split(cents(1000), rate(0)).celebrity_amount, cents(1000));
        assert_eq!(split(cents(1000), rate(100)).celebrity_amount, Cents::ZERO);
    }

    #[test]
    fn test_odd_cents_round_half_up() {
        // 10% of 15 cents = 1.5 -> 2
        assert_eq!(split(cents(15), rate(10)).platform_fee, cents(2));
        // 10% of 14 cents = 1.4 -> 1
        assert_eq!(split(cents(14), rate(10)).platform_fee, cents(1));
    }

    #[test]
    fn test_very_large_amount() {
        let gross = cents(i64::MAX);
        let s = split(gross, rate(99));
        assert_eq!(s.platform_fee + s.celebrity_amount, gross);
        assert!(s.celebrity_amount.value() >= 0);
    }

    #[test]
    fn test_parts_always_sum_to_gross() {
        let mut rng = rand::thread_rng();
        for _ in 0..10_000 {
            let gross = cents(rng.gen_range(0..=10_000_000_000));
            let r = rate(rng.gen_range(0..=100));
            let s = split(gross, r);
            assert_eq!(s.platform_fee + s.celebrity_amount, gross);
            assert!(s.platform_fee.value() >= 0);
            assert!(s.celebrity_amount.value() >= 0);
        }
    }
}
