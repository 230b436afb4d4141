//! Spread reconstruction from a flat leg list.
//!
//! Legs are partitioned by expiry, then split by option class. Within a
//! class, each short leg is paired with the first long leg that has
//! enough remaining quantity and a strike on the protective side (below
//! the short strike for puts, above it for calls). Quantity bookkeeping
//! happens on working copies, so the input is never mutated.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thetapilot_core::OptionRight;

use crate::types::{PositionLeg, SpreadKind, Structure, StructureStatus};

/// Groups broker-reported legs into logical structures.
///
/// Pure: calling this twice with the same input yields identical output.
#[must_use]
pub fn reconstruct(legs: &[PositionLeg]) -> Vec<Structure> {
    let mut buckets: BTreeMap<NaiveDate, Vec<&PositionLeg>> = BTreeMap::new();
    for leg in legs {
        buckets.entry(leg.expires_at).or_default().push(leg);
    }

    let mut structures = Vec::new();
    for bucket in buckets.values() {
        for right in [OptionRight::Put, OptionRight::Call] {
            reconstruct_class(bucket, right, &mut structures);
        }
    }

    tracing::debug!(
        legs = legs.len(),
        structures = structures.len(),
        "Reconstructed position structures"
    );
    structures
}

/// Matches shorts against longs within one (expiry, class) bucket.
fn reconstruct_class(bucket: &[&PositionLeg], right: OptionRight, out: &mut Vec<Structure>) {
    let shorts: Vec<&PositionLeg> = bucket
        .iter()
        .filter(|l| l.right == right && l.is_short())
        .copied()
        .collect();

    // Working copies: (leg, remaining unmatched quantity).
    let mut longs: Vec<(&PositionLeg, Decimal)> = bucket
        .iter()
        .filter(|l| l.right == right && !l.is_short())
        .map(|l| (*l, l.quantity))
        .collect();

    for short in shorts {
        let needed = short.abs_quantity();
        let candidate = longs.iter_mut().find(|(long, remaining)| {
            *remaining >= needed && protects(right, short.strike, long.strike)
        });

        match candidate {
            Some((long, remaining)) => {
                *remaining -= needed;
                out.push(spread(short, long, needed, right));
            }
            None => out.push(naked(short, needed)),
        }
    }

    for (long, remaining) in longs {
        if remaining > Decimal::ZERO {
            out.push(naked(long, remaining));
        }
    }
}

/// Directional ordering invariant: the long leg protects the short only
/// when its strike is below the short strike for puts, above for calls.
fn protects(right: OptionRight, short_strike: Decimal, long_strike: Decimal) -> bool {
    match right {
        OptionRight::Put => long_strike < short_strike,
        OptionRight::Call => long_strike > short_strike,
    }
}

fn spread(
    short: &PositionLeg,
    long: &PositionLeg,
    quantity: Decimal,
    right: OptionRight,
) -> Structure {
    let kind = match right {
        OptionRight::Put => SpreadKind::PutCreditSpread,
        OptionRight::Call => SpreadKind::BearCallSpread,
    };
    let scale = short.multiplier * quantity;
    let entry_value = (long.open_price - short.open_price) * scale;
    let current_value = (long.mark_price - short.mark_price) * scale;

    Structure {
        kind,
        underlying: short.underlying.clone(),
        short_strike: Some(short.strike),
        long_strike: Some(long.strike),
        symbols: vec![short.symbol.clone(), long.symbol.clone()],
        expiry: short.expires_at,
        quantity,
        entry_value,
        current_value,
        unrealized_pnl: current_value - entry_value,
        status: StructureStatus::Open,
        opened_at: short.created_at.min(long.created_at),
    }
}

fn naked(leg: &PositionLeg, quantity: Decimal) -> Structure {
    let kind = match (leg.right, leg.is_short()) {
        (OptionRight::Put, true) => SpreadKind::NakedShortPut,
        (OptionRight::Put, false) => SpreadKind::NakedLongPut,
        (OptionRight::Call, true) => SpreadKind::NakedShortCall,
        (OptionRight::Call, false) => SpreadKind::NakedLongCall,
    };

    // Short legs carry a negative entry (a credit was received).
    let sign = if leg.is_short() {
        Decimal::NEGATIVE_ONE
    } else {
        Decimal::ONE
    };
    let scale = sign * leg.multiplier * quantity;
    let entry_value = leg.open_price * scale;
    let current_value = leg.mark_price * scale;

    Structure {
        kind,
        underlying: leg.underlying.clone(),
        short_strike: leg.is_short().then_some(leg.strike),
        long_strike: (!leg.is_short()).then_some(leg.strike),
        symbols: vec![leg.symbol.clone()],
        expiry: leg.expires_at,
        quantity,
        entry_value,
        current_value,
        unrealized_pnl: current_value - entry_value,
        status: StructureStatus::Open,
        opened_at: leg.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn leg(
        strike: Decimal,
        right: OptionRight,
        quantity: Decimal,
        open: Decimal,
        mark: Decimal,
    ) -> PositionLeg {
        let expiry = NaiveDate::from_ymd_opt(2026, 9, 18).unwrap();
        PositionLeg {
            symbol: format!("TQQQ 260918 {right} {strike}"),
            underlying: "TQQQ".to_string(),
            quantity,
            strike,
            right,
            open_price: open,
            mark_price: mark,
            multiplier: dec!(100),
            expires_at: expiry,
            created_at: Utc.with_ymd_and_hms(2026, 8, 3, 14, 30, 0).unwrap(),
        }
    }

    // ==================== Matching Tests ====================

    #[test]
    fn test_put_credit_spread_matched() {
        let legs = vec![
            leg(dec!(72), OptionRight::Put, dec!(-1), dec!(1.20), dec!(0.80)),
            leg(dec!(68), OptionRight::Put, dec!(1), dec!(0.40), dec!(0.25)),
        ];

        let structures = reconstruct(&legs);
        assert_eq!(structures.len(), 1);

        let spread = &structures[0];
        assert_eq!(spread.kind, SpreadKind::PutCreditSpread);
        assert_eq!(spread.short_strike, Some(dec!(72)));
        assert_eq!(spread.long_strike, Some(dec!(68)));
        assert_eq!(spread.quantity, dec!(1));
        // Opened for a net credit of 0.80/share.
        assert_eq!(spread.entry_value, dec!(-80.00));
        assert!(spread.is_credit());
        // Credit has decayed: (1.20-0.80)*100 + (0.25-0.40)*100 = 25.
        assert_eq!(spread.unrealized_pnl, dec!(25.00));
    }

    #[test]
    fn test_unmatched_short_becomes_naked_leg_out() {
        // Two shorts at 72 and 70, one long at 65, quantity 2 each. The
        // 72 short consumes the long entirely; the 70 short legs out.
        let legs = vec![
            leg(dec!(72), OptionRight::Put, dec!(-2), dec!(1.20), dec!(0.80)),
            leg(dec!(70), OptionRight::Put, dec!(-2), dec!(0.95), dec!(0.70)),
            leg(dec!(65), OptionRight::Put, dec!(2), dec!(0.30), dec!(0.20)),
        ];

        let structures = reconstruct(&legs);
        assert_eq!(structures.len(), 2);

        let spread = structures
            .iter()
            .find(|s| s.kind == SpreadKind::PutCreditSpread)
            .expect("matched spread");
        assert_eq!(spread.short_strike, Some(dec!(72)));
        assert_eq!(spread.long_strike, Some(dec!(65)));
        assert_eq!(spread.quantity, dec!(2));

        let naked = structures
            .iter()
            .find(|s| s.kind == SpreadKind::NakedShortPut)
            .expect("naked leg-out");
        assert_eq!(naked.short_strike, Some(dec!(70)));
        assert_eq!(naked.quantity, dec!(2));
    }

    #[test]
    fn test_partial_quantity_matching_across_shorts() {
        // One long with quantity 4 covers two separate 2-lot shorts.
        let legs = vec![
            leg(dec!(72), OptionRight::Put, dec!(-2), dec!(1.20), dec!(0.80)),
            leg(dec!(70), OptionRight::Put, dec!(-2), dec!(0.95), dec!(0.70)),
            leg(dec!(65), OptionRight::Put, dec!(4), dec!(0.30), dec!(0.20)),
        ];

        let structures = reconstruct(&legs);
        assert_eq!(structures.len(), 2);
        assert!(structures
            .iter()
            .all(|s| s.kind == SpreadKind::PutCreditSpread));
    }

    #[test]
    fn test_call_side_directional_invariant() {
        // A long call below the short strike does not protect it.
        let legs = vec![
            leg(dec!(100), OptionRight::Call, dec!(-1), dec!(2.00), dec!(1.50)),
            leg(dec!(95), OptionRight::Call, dec!(1), dec!(3.50), dec!(4.00)),
        ];

        let structures = reconstruct(&legs);
        assert_eq!(structures.len(), 2);
        assert!(structures.iter().any(|s| s.kind == SpreadKind::NakedShortCall));
        assert!(structures.iter().any(|s| s.kind == SpreadKind::NakedLongCall));
    }

    #[test]
    fn test_call_credit_spread_matched() {
        let legs = vec![
            leg(dec!(100), OptionRight::Call, dec!(-1), dec!(2.00), dec!(1.50)),
            leg(dec!(105), OptionRight::Call, dec!(1), dec!(0.90), dec!(0.60)),
        ];

        let structures = reconstruct(&legs);
        assert_eq!(structures.len(), 1);
        assert_eq!(structures[0].kind, SpreadKind::BearCallSpread);
    }

    #[test]
    fn test_expiry_buckets_do_not_cross_match() {
        let mut far_long = leg(dec!(68), OptionRight::Put, dec!(1), dec!(0.40), dec!(0.25));
        far_long.expires_at = NaiveDate::from_ymd_opt(2026, 12, 18).unwrap();

        let legs = vec![
            leg(dec!(72), OptionRight::Put, dec!(-1), dec!(1.20), dec!(0.80)),
            far_long,
        ];

        let structures = reconstruct(&legs);
        assert_eq!(structures.len(), 2);
        assert!(structures.iter().any(|s| s.kind == SpreadKind::NakedShortPut));
        assert!(structures.iter().any(|s| s.kind == SpreadKind::NakedLongPut));
    }

    // ==================== PnL Tests ====================

    #[test]
    fn test_naked_short_pnl_sign() {
        // Sold at 1.00, now marked 0.60: collected credit decayed, +40.
        let legs = vec![leg(dec!(72), OptionRight::Put, dec!(-1), dec!(1.00), dec!(0.60))];
        let structures = reconstruct(&legs);
        assert_eq!(structures[0].entry_value, dec!(-100.00));
        assert_eq!(structures[0].unrealized_pnl, dec!(40.00));
    }

    #[test]
    fn test_naked_long_pnl_sign() {
        // Bought at 0.50, now marked 0.80: +30.
        let legs = vec![leg(dec!(72), OptionRight::Put, dec!(1), dec!(0.50), dec!(0.80))];
        let structures = reconstruct(&legs);
        assert_eq!(structures[0].entry_value, dec!(50.00));
        assert_eq!(structures[0].unrealized_pnl, dec!(30.00));
    }

    #[test]
    fn test_spread_pnl_matches_leg_formula() {
        // (shortEntry - shortMark)*mult*qty + (longMark - longEntry)*mult*qty
        let legs = vec![
            leg(dec!(72), OptionRight::Put, dec!(-3), dec!(1.20), dec!(0.80)),
            leg(dec!(68), OptionRight::Put, dec!(3), dec!(0.40), dec!(0.25)),
        ];
        let structures = reconstruct(&legs);
        let expected = (dec!(1.20) - dec!(0.80)) * dec!(100) * dec!(3)
            + (dec!(0.25) - dec!(0.40)) * dec!(100) * dec!(3);
        assert_eq!(structures[0].unrealized_pnl, expected);
    }

    // ==================== Purity Tests ====================

    #[test]
    fn test_reconstruction_is_idempotent() {
        let legs = vec![
            leg(dec!(72), OptionRight::Put, dec!(-2), dec!(1.20), dec!(0.80)),
            leg(dec!(70), OptionRight::Put, dec!(-2), dec!(0.95), dec!(0.70)),
            leg(dec!(65), OptionRight::Put, dec!(4), dec!(0.30), dec!(0.20)),
            leg(dec!(100), OptionRight::Call, dec!(-1), dec!(2.00), dec!(1.50)),
        ];

        let before = legs.clone();
        let first = reconstruct(&legs);
        let second = reconstruct(&legs);

        assert_eq!(first, second);
        assert_eq!(legs, before, "input legs must not be mutated");
    }
}
