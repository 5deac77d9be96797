//! Pricing calculator: pure price breakdown from a model + selections
//!
//! All money flows through integer cents, so every intermediate result is
//! already rounded to the cent; the only fractional step is the tax
//! multiplication, which rounds half-up. Safe to call on every keystroke.

use crate::config::TaxPolicy;
use crate::types::{DeliveryState, Model, OptionItem, PricingBreakdown};

/// Round-half-up application of a basis-point rate to a non-negative
/// amount of cents
fn apply_rate_bps(cents: i64, rate_bps: i64) -> i64 {
    debug_assert!(cents >= 0 && rate_bps >= 0);
    (cents * rate_bps + 5_000) / 10_000
}

/// Compute a full price breakdown.
///
/// - `model == None` yields an all-zero breakdown flagged `model_missing`;
///   the caller surfaces "not found" instead of substituting a model.
/// - Catalog price data is used at its literal value (including negative
///   deltas); data quality is not this function's concern. The subtotal is
///   floored at zero per the pricing invariant.
/// - An unknown or unavailable delivery fee counts as zero in the
///   arithmetic but leaves `total_finalized == false`; the UI renders the
///   delivery line from `delivery`, never from the zero.
pub fn compute_pricing(
    model: Option<&Model>,
    selections: &[&OptionItem],
    package_key: Option<&str>,
    delivery: DeliveryState,
    policy: &TaxPolicy,
) -> PricingBreakdown {
    let Some(model) = model else {
        return PricingBreakdown {
            model_missing: true,
            delivery,
            ..PricingBreakdown::zero()
        };
    };

    let base_cents = model.base_price_cents;
    let options_cents: i64 = selections.iter().map(|o| o.price_delta_cents).sum();
    let package_cents = package_key
        .and_then(|key| model.package(key))
        .map(|p| p.price_delta_cents)
        .unwrap_or(0);

    let subtotal_cents = (base_cents + options_cents + package_cents).max(0);

    let delivery_cents = delivery.fee_for_totals();
    let taxable_cents = if policy.delivery_taxable {
        subtotal_cents + delivery_cents
    } else {
        subtotal_cents
    };
    let taxes_cents = apply_rate_bps(taxable_cents, policy.tax_rate_bps);
    let total_cents = subtotal_cents + delivery_cents + taxes_cents;

    PricingBreakdown {
        base_cents,
        options_cents,
        package_cents,
        subtotal_cents,
        delivery,
        taxes_cents,
        total_cents,
        model_missing: false,
        total_finalized: matches!(delivery, DeliveryState::Quoted { .. }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use proptest::prelude::*;

    fn policy() -> TaxPolicy {
        TaxPolicy {
            tax_rate_bps: 625,
            delivery_taxable: true,
        }
    }

    fn demo_selection<'a>(catalog: &'a Catalog, ids: &[&str]) -> Vec<&'a OptionItem> {
        ids.iter().map(|id| catalog.option(id).unwrap()).collect()
    }

    #[test]
    fn test_reference_scenario() {
        // base $60,000 + option $500 + package $3,500 + delivery $1,200
        // at 6.25%: subtotal $64,000; taxable $65,200; taxes $4,075.00;
        // total $69,275.00
        let catalog = Catalog::demo();
        let model = catalog.model("meadowlark-20");
        let selections = demo_selection(&catalog, &["opt-porch"]);

        let breakdown = compute_pricing(
            model,
            &selections,
            Some("comfort"),
            DeliveryState::Quoted {
                fee_cents: 120_000,
                eta_days: 45,
            },
            &policy(),
        );

        assert_eq!(breakdown.subtotal_cents, 6_400_000);
        assert_eq!(breakdown.taxes_cents, 407_500);
        assert_eq!(breakdown.total_cents, 6_927_500);
        assert!(breakdown.total_finalized);
        assert!(!breakdown.model_missing);
    }

    #[test]
    fn test_missing_model_is_zero_and_flagged() {
        let breakdown = compute_pricing(
            None,
            &[],
            Some("comfort"),
            DeliveryState::NotRequested,
            &policy(),
        );
        assert!(breakdown.model_missing);
        assert_eq!(breakdown.subtotal_cents, 0);
        assert_eq!(breakdown.total_cents, 0);
        assert!(!breakdown.total_finalized);
    }

    #[test]
    fn test_unavailable_delivery_does_not_finalize_total() {
        let catalog = Catalog::demo();
        let model = catalog.model("meadowlark-20");

        let breakdown = compute_pricing(
            model,
            &[],
            None,
            DeliveryState::Unavailable,
            &policy(),
        );
        // Arithmetic uses zero, but the total is explicitly not finalized
        // and the delivery state is preserved for rendering
        assert_eq!(breakdown.delivery, DeliveryState::Unavailable);
        assert!(!breakdown.total_finalized);
        assert_eq!(breakdown.total_cents, 6_000_000 + 375_000);
    }

    #[test]
    fn test_negative_option_credit_at_literal_value() {
        let catalog = Catalog::demo();
        let model = catalog.model("meadowlark-20");
        let selections = demo_selection(&catalog, &["opt-no-loft"]);

        let breakdown = compute_pricing(
            model,
            &selections,
            None,
            DeliveryState::NotRequested,
            &policy(),
        );
        assert_eq!(breakdown.options_cents, -40_000);
        assert_eq!(breakdown.subtotal_cents, 5_960_000);
    }

    #[test]
    fn test_subtotal_floors_at_zero() {
        let model = Model {
            id: "m".into(),
            name: "M".into(),
            base_price_cents: 10_000,
            beds: 1,
            baths: 1,
            square_feet: 100,
            features: vec![],
            packages: vec![],
            option_ids: vec![],
        };
        let credit = OptionItem {
            id: "c".into(),
            name: "Credit".into(),
            price_delta_cents: -50_000,
            description: String::new(),
            category: String::new(),
            is_package: false,
        };

        let breakdown = compute_pricing(
            Some(&model),
            &[&credit],
            None,
            DeliveryState::NotRequested,
            &policy(),
        );
        assert_eq!(breakdown.subtotal_cents, 0);
        assert_eq!(breakdown.total_cents, 0);
        // The literal inputs remain visible in the breakdown
        assert_eq!(breakdown.options_cents, -50_000);
    }

    #[test]
    fn test_unknown_package_key_prices_as_zero() {
        let catalog = Catalog::demo();
        let model = catalog.model("meadowlark-20");

        let breakdown = compute_pricing(
            model,
            &[],
            Some("not-a-package"),
            DeliveryState::NotRequested,
            &policy(),
        );
        assert_eq!(breakdown.package_cents, 0);
        assert_eq!(breakdown.subtotal_cents, 6_000_000);
    }

    #[test]
    fn test_delivery_not_taxable_policy() {
        let catalog = Catalog::demo();
        let model = catalog.model("meadowlark-20");
        let policy = TaxPolicy {
            tax_rate_bps: 625,
            delivery_taxable: false,
        };

        let breakdown = compute_pricing(
            model,
            &[],
            None,
            DeliveryState::Quoted {
                fee_cents: 120_000,
                eta_days: 45,
            },
            &policy,
        );
        // Taxes on the subtotal only; fee still lands in the total
        assert_eq!(breakdown.taxes_cents, 375_000);
        assert_eq!(breakdown.total_cents, 6_000_000 + 120_000 + 375_000);
    }

    #[test]
    fn test_tax_rounds_half_up() {
        // $1.00 at 6.25% = 6.25 cents -> 6; $0.88 at 6.25% = 5.5 -> 6
        assert_eq!(apply_rate_bps(100, 625), 6);
        assert_eq!(apply_rate_bps(88, 625), 6);
        assert_eq!(apply_rate_bps(0, 625), 0);
    }

    #[test]
    fn test_idempotence_byte_identical() {
        let catalog = Catalog::demo();
        let model = catalog.model("juniper-28");
        let selections = demo_selection(&catalog, &["opt-porch", "opt-solar"]);
        let delivery = DeliveryState::Quoted {
            fee_cents: 98_700,
            eta_days: 30,
        };

        let a = compute_pricing(model, &selections, Some("offgrid"), delivery, &policy());
        let b = compute_pricing(model, &selections, Some("offgrid"), delivery, &policy());
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    proptest! {
        #[test]
        fn prop_total_identity(
            base in 0i64..50_000_000,
            deltas in proptest::collection::vec(-200_000i64..500_000, 0..8),
            fee in 0i64..1_000_000,
            rate_bps in 0i64..2_000,
        ) {
            let model = Model {
                id: "m".into(),
                name: "M".into(),
                base_price_cents: base,
                beds: 1,
                baths: 1,
                square_feet: 100,
                features: vec![],
                packages: vec![],
                option_ids: vec![],
            };
            let options: Vec<OptionItem> = deltas
                .iter()
                .enumerate()
                .map(|(i, d)| OptionItem {
                    id: format!("o{i}"),
                    name: format!("O{i}"),
                    price_delta_cents: *d,
                    description: String::new(),
                    category: String::new(),
                    is_package: false,
                })
                .collect();
            let refs: Vec<&OptionItem> = options.iter().collect();
            let policy = TaxPolicy { tax_rate_bps: rate_bps, delivery_taxable: true };
            let delivery = DeliveryState::Quoted { fee_cents: fee, eta_days: 30 };

            let b = compute_pricing(Some(&model), &refs, None, delivery, &policy);

            prop_assert!(b.subtotal_cents >= 0);
            prop_assert_eq!(
                b.subtotal_cents,
                (b.base_cents + b.options_cents + b.package_cents).max(0)
            );
            prop_assert_eq!(
                b.taxes_cents,
                apply_rate_bps(b.subtotal_cents + fee, rate_bps)
            );
            prop_assert_eq!(b.total_cents, b.subtotal_cents + fee + b.taxes_cents);
        }
    }
}
