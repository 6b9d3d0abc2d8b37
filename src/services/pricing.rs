//! Amount reconciliation.
//!
//! Computes the charge amount submitted to the invoice gateway from priced
//! line items plus optional tax and discount. The computation is pure so the
//! same numbers come out of checkout, invoice creation and the tests.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Tax classification code used when a caller enables tax without one.
pub const DEFAULT_TAX_CODE: &str = "T1";

/// A priced line as the gateway sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    pub name: String,
    pub price: Decimal,
    pub quantity: u32,
}

impl InvoiceItem {
    pub fn new(name: impl Into<String>, price: Decimal, quantity: u32) -> Self {
        Self {
            name: name.into(),
            price,
            quantity,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxOptions {
    pub percent: Decimal,
    #[serde(default)]
    pub code: Option<String>,
}

impl TaxOptions {
    pub fn percent(percent: Decimal) -> Self {
        Self {
            percent,
            code: None,
        }
    }

    /// Classification code, falling back to [`DEFAULT_TAX_CODE`].
    pub fn code_or_default(&self) -> &str {
        self.code
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_TAX_CODE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountOptions {
    /// Flat amount in currency units.
    Fixed(Decimal),
    /// Percentage of the taxed amount.
    Percent(Decimal),
}

/// Tax and discount settings frozen on an order at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingOptions {
    #[serde(default)]
    pub tax: Option<TaxOptions>,
    #[serde(default)]
    pub discount: Option<DiscountOptions>,
}

/// Intermediate figures behind a computed amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AmountBreakdown {
    pub items_subtotal: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub amount: Decimal,
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Returns the rounded amount the gateway will validate against.
pub fn compute_amount(
    items: &[InvoiceItem],
    tax: Option<&TaxOptions>,
    discount: Option<&DiscountOptions>,
) -> Result<Decimal, ServiceError> {
    compute_breakdown(items, tax, discount).map(|b| b.amount)
}

pub fn compute_breakdown(
    items: &[InvoiceItem],
    tax: Option<&TaxOptions>,
    discount: Option<&DiscountOptions>,
) -> Result<AmountBreakdown, ServiceError> {
    validate_items(items)?;

    let items_subtotal: Decimal = items.iter().map(InvoiceItem::line_total).sum();
    let mut amount = items_subtotal;

    let tax_amount = match tax {
        Some(opts) => {
            if opts.percent.is_sign_negative() || opts.percent > dec!(100) {
                return Err(ServiceError::ValidationError(format!(
                    "tax percent must be between 0 and 100, got {}",
                    opts.percent
                )));
            }
            items_subtotal * opts.percent / dec!(100)
        }
        None => Decimal::ZERO,
    };
    amount += tax_amount;

    // Discount is taken from the taxed amount.
    let discount_amount = match discount {
        Some(DiscountOptions::Fixed(value)) => {
            if value.is_sign_negative() {
                return Err(ServiceError::ValidationError(
                    "fixed discount cannot be negative".to_string(),
                ));
            }
            *value
        }
        Some(DiscountOptions::Percent(pct)) => {
            if pct.is_sign_negative() || *pct > dec!(100) {
                return Err(ServiceError::ValidationError(format!(
                    "discount percent must be between 0 and 100, got {}",
                    pct
                )));
            }
            amount * *pct / dec!(100)
        }
        None => Decimal::ZERO,
    };
    if discount_amount > amount {
        return Err(ServiceError::ValidationError(format!(
            "discount {} exceeds amount {}",
            round_money(discount_amount),
            round_money(amount)
        )));
    }
    amount -= discount_amount;

    Ok(AmountBreakdown {
        items_subtotal: round_money(items_subtotal),
        tax: round_money(tax_amount),
        discount: round_money(discount_amount),
        amount: round_money(amount),
    })
}

fn validate_items(items: &[InvoiceItem]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "invoice requires at least one item".to_string(),
        ));
    }
    for (idx, item) in items.iter().enumerate() {
        if item.name.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "item {} is missing a name",
                idx
            )));
        }
        if item.price.is_sign_negative() {
            return Err(ServiceError::ValidationError(format!(
                "item '{}' has a negative price",
                item.name
            )));
        }
        if item.quantity == 0 {
            return Err(ServiceError::ValidationError(format!(
                "item '{}' must have quantity of at least 1",
                item.name
            )));
        }
    }
    Ok(())
}

/// Invoice line name used for the flat shipping fee.
pub const SHIPPING_LINE_NAME: &str = "Shipping";

/// Appends the shipping fee as its own line when it is non-zero.
pub fn with_shipping(mut items: Vec<InvoiceItem>, shipping: Decimal) -> Vec<InvoiceItem> {
    if shipping > Decimal::ZERO {
        items.push(InvoiceItem::new(SHIPPING_LINE_NAME, shipping, 1));
    }
    items
}

/// Converts a currency amount to minor units (cents/piasters).
pub fn to_minor(value: Decimal) -> i64 {
    use rust_decimal::prelude::ToPrimitive;
    (round_money(value) * dec!(100)).to_i64().unwrap_or(i64::MAX)
}

pub fn from_minor(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn hundred() -> Vec<InvoiceItem> {
        vec![InvoiceItem::new("Kettle", dec!(100.00), 1)]
    }

    #[test]
    fn tax_is_added_on_items_subtotal() {
        let tax = TaxOptions::percent(dec!(14));
        let amount = compute_amount(&hundred(), Some(&tax), None).unwrap();
        assert_eq!(amount, dec!(114.00));
    }

    #[test]
    fn fixed_discount_applies_after_tax() {
        let tax = TaxOptions::percent(dec!(14));
        let discount = DiscountOptions::Fixed(dec!(20.00));
        let amount = compute_amount(&hundred(), Some(&tax), Some(&discount)).unwrap();
        assert_eq!(amount, dec!(94.00));
    }

    #[test]
    fn percent_discount_is_taken_from_taxed_amount() {
        let tax = TaxOptions::percent(dec!(14));
        let discount = DiscountOptions::Percent(dec!(10));
        // 114.00 - 11.40
        let amount = compute_amount(&hundred(), Some(&tax), Some(&discount)).unwrap();
        assert_eq!(amount, dec!(102.60));
    }

    #[test]
    fn amount_is_rounded_half_away_from_zero() {
        let items = vec![InvoiceItem::new("Sticker", dec!(0.125), 1)];
        assert_eq!(compute_amount(&items, None, None).unwrap(), dec!(0.13));

        let items = vec![InvoiceItem::new("Cable", dec!(33.33), 3)];
        let tax = TaxOptions::percent(dec!(14));
        // 99.99 * 1.14 = 113.9886
        assert_eq!(compute_amount(&items, Some(&tax), None).unwrap(), dec!(113.99));
    }

    #[test]
    fn breakdown_reports_components() {
        let items = vec![
            InvoiceItem::new("Mug", dec!(40.00), 2),
            InvoiceItem::new("Shipping", dec!(20.00), 1),
        ];
        let tax = TaxOptions::percent(dec!(14));
        let b = compute_breakdown(&items, Some(&tax), Some(&DiscountOptions::Fixed(dec!(5))))
            .unwrap();
        assert_eq!(b.items_subtotal, dec!(100.00));
        assert_eq!(b.tax, dec!(14.00));
        assert_eq!(b.discount, dec!(5.00));
        assert_eq!(b.amount, dec!(109.00));
    }

    #[test]
    fn empty_items_are_rejected() {
        assert_matches!(
            compute_amount(&[], None, None),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn malformed_items_are_rejected() {
        let nameless = vec![InvoiceItem::new("  ", dec!(1), 1)];
        assert_matches!(
            compute_amount(&nameless, None, None),
            Err(ServiceError::ValidationError(_))
        );

        let zero_qty = vec![InvoiceItem::new("Pen", dec!(1), 0)];
        assert_matches!(
            compute_amount(&zero_qty, None, None),
            Err(ServiceError::ValidationError(_))
        );

        let negative = vec![InvoiceItem::new("Pen", dec!(-1), 1)];
        assert_matches!(
            compute_amount(&negative, None, None),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn discount_larger_than_amount_is_rejected() {
        let discount = DiscountOptions::Fixed(dec!(150));
        assert_matches!(
            compute_amount(&hundred(), None, Some(&discount)),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn default_tax_code_is_used_when_missing() {
        assert_eq!(TaxOptions::percent(dec!(14)).code_or_default(), DEFAULT_TAX_CODE);
        let explicit = TaxOptions {
            percent: dec!(14),
            code: Some("V009".into()),
        };
        assert_eq!(explicit.code_or_default(), "V009");
    }

    #[test]
    fn shipping_line_only_when_charged() {
        assert_eq!(with_shipping(hundred(), Decimal::ZERO).len(), 1);
        let lines = with_shipping(hundred(), dec!(25));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].name, SHIPPING_LINE_NAME);
        assert_eq!(compute_amount(&lines, None, None).unwrap(), dec!(125.00));
    }

    #[test]
    fn minor_unit_conversion() {
        assert_eq!(to_minor(dec!(114.00)), 11_400);
        assert_eq!(to_minor(dec!(0.125)), 13);
        assert_eq!(from_minor(9_400), dec!(94.00));
    }

    fn item_strategy() -> impl Strategy<Value = InvoiceItem> {
        ("[a-z]{1,8}", 0i64..100_000, 1u32..20).prop_map(|(name, cents, qty)| {
            InvoiceItem::new(name, Decimal::new(cents, 2), qty)
        })
    }

    proptest! {
        #[test]
        fn amount_is_order_independent(
            items in prop::collection::vec(item_strategy(), 1..12),
            pct in 0u32..=30,
        ) {
            let tax = TaxOptions::percent(Decimal::from(pct));
            let forward = compute_amount(&items, Some(&tax), None).unwrap();
            let mut reversed = items.clone();
            reversed.reverse();
            let backward = compute_amount(&reversed, Some(&tax), None).unwrap();
            prop_assert_eq!(forward, backward);
            prop_assert_eq!(forward, compute_amount(&items, Some(&tax), None).unwrap());
        }

        #[test]
        fn amount_never_has_more_than_two_decimals(
            items in prop::collection::vec(item_strategy(), 1..6),
            pct in 0u32..=100,
        ) {
            let discount = DiscountOptions::Percent(Decimal::from(pct));
            let amount = compute_amount(&items, None, Some(&discount)).unwrap();
            prop_assert!(amount.scale() <= 2);
            prop_assert!(!amount.is_sign_negative() || amount.is_zero());
        }
    }
}
