//! Pure price and availability derivations for products.
//!
//! Nothing here touches the database; [`crate::services::cascade`] loads the
//! inputs, calls these functions and persists whatever changed.

use rust_decimal::Decimal;

use crate::entities::ProductStatus;

/// Money values are stored with two decimal places.
pub const MONEY_SCALE: u32 = 2;

/// One composition of a product together with the state of its component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionLine {
    pub quantity_per_product: i32,
    pub unit_price: Decimal,
    pub stock_on_hand: i32,
    pub component_available: bool,
}

impl CompositionLine {
    pub fn cost(&self) -> Decimal {
        line_cost(self.quantity_per_product, self.unit_price)
    }
}

/// How a product's status is settled when it is recalculated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPolicy {
    /// Compositions changed: derive the status from stock.
    Derive,
    /// Only the product itself changed: keep the stored status.
    Keep,
}

/// Derived price and status of a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProductPricing {
    pub base_price: Decimal,
    pub computed_price: Decimal,
    pub status: ProductStatus,
}

/// True when `value` needs no rounding to fit the money scale.
pub fn fits_money_scale(value: Decimal) -> bool {
    value.round_dp(MONEY_SCALE) == value
}

pub fn line_cost(quantity_per_product: i32, unit_price: Decimal) -> Decimal {
    Decimal::from(quantity_per_product) * unit_price
}

/// Sum of all line costs.
pub fn base_price(lines: &[CompositionLine]) -> Decimal {
    lines.iter().map(CompositionLine::cost).sum()
}

/// `base × (100 − discount) / 100`, rounded to the money scale.
pub fn discounted_price(base_price: Decimal, discount_percent: i32) -> Decimal {
    let discount = discount_percent.clamp(0, 100);
    (base_price * Decimal::from(100 - discount) / Decimal::from(100)).round_dp(MONEY_SCALE)
}

/// Number of whole products the current stock can produce.
///
/// Lines with a zero quantity do not constrain the result; with no
/// constraining line the product cannot be produced at all.
pub fn available_units(lines: &[CompositionLine]) -> i32 {
    lines
        .iter()
        .filter(|line| line.quantity_per_product > 0)
        .map(|line| line.stock_on_hand.max(0) / line.quantity_per_product)
        .min()
        .unwrap_or(0)
}

/// True when every composed component is available. Vacuously true without
/// compositions.
pub fn components_available(lines: &[CompositionLine]) -> bool {
    lines.iter().all(|line| line.component_available)
}

/// Status implied by stock alone.
pub fn stock_status(lines: &[CompositionLine]) -> ProductStatus {
    if available_units(lines) > 0 {
        ProductStatus::Available
    } else {
        ProductStatus::OrderOnly
    }
}

pub fn resolve_status(
    current: ProductStatus,
    lines: &[CompositionLine],
    policy: StatusPolicy,
) -> ProductStatus {
    if !components_available(lines) {
        return ProductStatus::Unavailable;
    }
    match policy {
        StatusPolicy::Derive => stock_status(lines),
        StatusPolicy::Keep => current,
    }
}

/// Full derivation for one product.
pub fn price_product(
    current: ProductStatus,
    discount_percent: i32,
    lines: &[CompositionLine],
    policy: StatusPolicy,
) -> ProductPricing {
    let base = base_price(lines);
    ProductPricing {
        base_price: base,
        computed_price: discounted_price(base, discount_percent),
        status: resolve_status(current, lines, policy),
    }
}

/// Folds pending deliveries into stock. `None` on overflow.
pub fn fold_restock(stock_on_hand: i32, incoming_restock: i32) -> Option<i32> {
    stock_on_hand.checked_add(incoming_restock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;
    use rust_decimal_macros::dec;

    fn line(qty: i32, price: Decimal, stock: i32, available: bool) -> CompositionLine {
        CompositionLine {
            quantity_per_product: qty,
            unit_price: price,
            stock_on_hand: stock,
            component_available: available,
        }
    }

    #[rstest]
    #[case(dec!(100), 20, dec!(80))]
    #[case(dec!(100), 0, dec!(100))]
    #[case(dec!(100), 100, dec!(0))]
    #[case(dec!(10), 33, dec!(6.70))]
    #[case(dec!(0.99), 50, dec!(0.50))]
    fn discount_is_applied_and_rounded(
        #[case] base: Decimal,
        #[case] discount: i32,
        #[case] expected: Decimal,
    ) {
        assert_eq!(discounted_price(base, discount), expected);
    }

    #[rstest]
    #[case(dec!(5), true)]
    #[case(dec!(12.50), true)]
    #[case(dec!(5.000), true)]
    #[case(dec!(0.333), false)]
    #[case(dec!(1.005), false)]
    fn money_scale_is_two_places(#[case] value: Decimal, #[case] fits: bool) {
        assert_eq!(fits_money_scale(value), fits);
    }

    #[test]
    fn rose_bouquet_scenario() {
        let in_stock = [line(2, dec!(5), 10, true)];
        assert_eq!(base_price(&in_stock), dec!(10));
        assert_eq!(available_units(&in_stock), 5);
        assert_eq!(
            resolve_status(ProductStatus::UnderReview, &in_stock, StatusPolicy::Derive),
            ProductStatus::Available
        );

        let sold_out = [line(2, dec!(5), 0, true)];
        assert_eq!(
            resolve_status(ProductStatus::Available, &sold_out, StatusPolicy::Derive),
            ProductStatus::OrderOnly
        );

        let withdrawn = [line(2, dec!(5), 0, false)];
        assert_eq!(
            resolve_status(ProductStatus::Available, &withdrawn, StatusPolicy::Derive),
            ProductStatus::Unavailable
        );
    }

    #[test]
    fn available_units_takes_the_scarcest_component() {
        let lines = [
            line(3, dec!(2), 10, true),
            line(1, dec!(1), 2, true),
            line(0, dec!(4), 0, true),
        ];
        assert_eq!(available_units(&lines), 2);
    }

    #[test]
    fn zero_quantity_lines_do_not_make_a_product_available() {
        let lines = [line(0, dec!(4), 100, true)];
        assert_eq!(available_units(&lines), 0);
        assert_eq!(stock_status(&lines), ProductStatus::OrderOnly);
        assert_eq!(available_units(&[]), 0);
    }

    #[test]
    fn keep_policy_only_yields_to_unavailable_override() {
        let ok = [line(1, dec!(1), 0, true)];
        assert_eq!(
            resolve_status(ProductStatus::Available, &ok, StatusPolicy::Keep),
            ProductStatus::Available
        );

        let broken = [line(1, dec!(1), 50, true), line(1, dec!(1), 50, false)];
        assert_eq!(
            resolve_status(ProductStatus::Available, &broken, StatusPolicy::Keep),
            ProductStatus::Unavailable
        );
    }

    #[test]
    fn no_compositions_means_empty_price() {
        let pricing = price_product(ProductStatus::Available, 10, &[], StatusPolicy::Derive);
        assert_eq!(pricing.base_price, Decimal::ZERO);
        assert_eq!(pricing.computed_price, Decimal::ZERO);
        assert_eq!(pricing.status, ProductStatus::OrderOnly);
    }

    #[test]
    fn fold_restock_detects_overflow() {
        assert_eq!(fold_restock(7, 3), Some(10));
        assert_eq!(fold_restock(i32::MAX, 1), None);
    }

    prop_compose! {
        fn arb_line()(
            qty in 0i32..20,
            cents in 0i64..100_000,
            stock in 0i32..1_000,
            available in any::<bool>(),
        ) -> CompositionLine {
            line(qty, Decimal::new(cents, 2), stock, available)
        }
    }

    proptest! {
        #[test]
        fn base_price_is_sum_of_line_costs(lines in prop::collection::vec(arb_line(), 0..8)) {
            let expected: Decimal = lines
                .iter()
                .map(|l| Decimal::from(l.quantity_per_product) * l.unit_price)
                .sum();
            prop_assert_eq!(base_price(&lines), expected);
        }

        #[test]
        fn computed_price_never_exceeds_base(
            lines in prop::collection::vec(arb_line(), 0..8),
            discount in 0i32..=100,
        ) {
            let pricing = price_product(ProductStatus::UnderReview, discount, &lines, StatusPolicy::Derive);
            prop_assert!(pricing.computed_price <= pricing.base_price);
            prop_assert!(pricing.computed_price >= Decimal::ZERO);
        }

        #[test]
        fn derivation_is_idempotent(
            lines in prop::collection::vec(arb_line(), 0..8),
            discount in 0i32..=100,
        ) {
            let first = price_product(ProductStatus::UnderReview, discount, &lines, StatusPolicy::Derive);
            let second = price_product(first.status, discount, &lines, StatusPolicy::Derive);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn unavailable_component_always_wins(
            lines in prop::collection::vec(arb_line(), 1..8),
            keep in any::<bool>(),
        ) {
            let mut lines = lines;
            lines[0].component_available = false;
            let policy = if keep { StatusPolicy::Keep } else { StatusPolicy::Derive };
            prop_assert_eq!(
                resolve_status(ProductStatus::Available, &lines, policy),
                ProductStatus::Unavailable
            );
        }
    }
}
