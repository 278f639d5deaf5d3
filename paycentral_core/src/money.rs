//! The "AMOUNT" Engine - exact cart arithmetic
//!
//! Every figure that can end up on a charge is computed here with
//! `rust_decimal`, never with `f64`:
//! - line subtotal = quantity × unit price (exact)
//! - line tax = line subtotal × tax rate, rounded to minor units (2 dp, midpoint away from zero)
//! - total = Σ line subtotals + Σ line taxes

use crate::mandate::MandateError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Decimal places of the currency's minor unit.
pub const MINOR_UNIT_DP: u32 = 2;

/// Billing frequency of a recurring (subscription) mandate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    /// Returns the canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One line of a cart as presented for sealing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Catalog identifier
    pub sku: String,

    /// Display name (whitespace is normalized when sealed)
    pub name: String,

    /// Units ordered, must be positive
    pub quantity: u32,

    /// Price per unit, must be positive
    pub unit_price: Decimal,

    /// Tax rate as a fraction (0.18 = 18%), must not be negative
    pub tax_rate: Decimal,
}

impl CartItem {
    /// Creates a cart line.
    pub fn new(
        sku: impl Into<String>,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Decimal,
        tax_rate: Decimal,
    ) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            quantity,
            unit_price,
            tax_rate,
        }
    }
}

/// A cart awaiting a mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub items: Vec<CartItem>,

    /// ISO 4217 code, e.g. "INR"
    pub currency: String,

    /// Set for subscription carts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Frequency>,
}

impl Cart {
    /// Creates an empty one-off cart in the given currency.
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            items: Vec::new(),
            currency: currency.into(),
            recurrence: None,
        }
    }

    /// Adds a line (builder style).
    pub fn with_item(mut self, item: CartItem) -> Self {
        self.items.push(item);
        self
    }

    /// Marks the cart as a recurring mandate.
    pub fn with_recurrence(mut self, frequency: Frequency) -> Self {
        self.recurrence = Some(frequency);
        self
    }

    /// Prices the cart exactly.
    pub fn quote(&self) -> Result<Quote, MandateError> {
        Quote::for_cart(self)
    }
}

/// A priced cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotedLine {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub line_subtotal: Decimal,
    pub line_tax: Decimal,
}

/// The exact pricing of a whole cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub lines: Vec<QuotedLine>,
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub total: Decimal,
    pub currency: String,
}

impl Quote {
    /// Validates and prices a cart.
    ///
    /// Fails with `InvalidCart` for an empty cart, a blank SKU, a zero
    /// quantity, a non-positive unit price, a negative tax rate, a malformed
    /// currency code, or arithmetic overflow.
    pub fn for_cart(cart: &Cart) -> Result<Self, MandateError> {
        if cart.items.is_empty() {
            return Err(MandateError::invalid_cart("cart has no items"));
        }
        let currency = normalize_currency(&cart.currency)?;

        let mut lines = Vec::with_capacity(cart.items.len());
        let mut subtotal = Decimal::ZERO;
        let mut tax_total = Decimal::ZERO;

        for item in &cart.items {
            let sku = item.sku.trim();
            if sku.is_empty() {
                return Err(MandateError::invalid_cart("item without sku"));
            }
            if item.quantity == 0 {
                return Err(MandateError::invalid_cart(format!("{}: quantity must be positive", sku)));
            }
            if item.unit_price <= Decimal::ZERO {
                return Err(MandateError::invalid_cart(format!(
                    "{}: unit price must be positive, got {}",
                    sku, item.unit_price
                )));
            }
            if item.tax_rate < Decimal::ZERO {
                return Err(MandateError::invalid_cart(format!(
                    "{}: tax rate must not be negative, got {}",
                    sku, item.tax_rate
                )));
            }

            let line_subtotal = item
                .unit_price
                .checked_mul(Decimal::from(item.quantity))
                .ok_or_else(|| overflow(sku))?;
            let line_tax = line_subtotal
                .checked_mul(item.tax_rate)
                .ok_or_else(|| overflow(sku))?
                .round_dp_with_strategy(MINOR_UNIT_DP, RoundingStrategy::MidpointAwayFromZero);

            subtotal = subtotal.checked_add(line_subtotal).ok_or_else(|| overflow(sku))?;
            tax_total = tax_total.checked_add(line_tax).ok_or_else(|| overflow(sku))?;

            lines.push(QuotedLine {
                sku: sku.to_string(),
                name: normalize_whitespace(&item.name),
                quantity: item.quantity,
                unit_price: item.unit_price,
                tax_rate: item.tax_rate,
                line_subtotal,
                line_tax,
            });
        }

        let total = subtotal
            .checked_add(tax_total)
            .ok_or_else(|| MandateError::invalid_cart("total overflows"))?;

        Ok(Self {
            lines,
            subtotal,
            tax_total,
            total,
            currency,
        })
    }
}

fn overflow(sku: &str) -> MandateError {
    MandateError::invalid_cart(format!("{}: amount overflows", sku))
}

/// Collapses runs of whitespace to single spaces and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn normalize_currency(code: &str) -> Result<String, MandateError> {
    let code = code.trim();
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(MandateError::invalid_cart(format!("invalid currency code: {:?}", code)));
    }
    Ok(code.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn decimal_test_cart() -> Cart {
        Cart::new("INR").with_item(CartItem::new("DECIMAL_TEST", "Decimal Test Product", 3, d("1299.99"), d("0.18")))
    }

    #[test]
    fn test_quote_exact_total() {
        let quote = decimal_test_cart().quote().unwrap();

        assert_eq!(quote.subtotal, d("3899.97"));
        // 701.9946 rounds to 701.99
        assert_eq!(quote.tax_total, d("701.99"));
        assert_eq!(quote.total, d("4601.96"));
        assert_eq!(quote.currency, "INR");
    }

    #[test]
    fn test_quote_is_stable_over_repeated_calls() {
        let cart = decimal_test_cart();
        let first = cart.quote().unwrap().total;
        for _ in 0..10_000 {
            assert_eq!(cart.quote().unwrap().total, first);
        }
    }

    #[test]
    fn test_tax_rounds_midpoint_away_from_zero() {
        // 0.25 × 0.18 = 0.045 -> 0.05
        let cart = Cart::new("INR").with_item(CartItem::new("X", "x", 1, d("0.25"), d("0.18")));
        let quote = cart.quote().unwrap();
        assert_eq!(quote.tax_total, d("0.05"));
        assert_eq!(quote.total, d("0.30"));
    }

    #[test]
    fn test_multi_line_cart() {
        let cart = Cart::new("inr")
            .with_item(CartItem::new("LAPTOP001", "Dell  XPS   15", 1, d("89999.00"), d("0.18")))
            .with_item(CartItem::new("MOUSE001", "Mouse", 2, d("549.50"), d("0.18")));
        let quote = cart.quote().unwrap();

        assert_eq!(quote.subtotal, d("91098.00"));
        assert_eq!(quote.tax_total, d("16397.64"));
        assert_eq!(quote.total, d("107495.64"));
        assert_eq!(quote.currency, "INR");
        assert_eq!(quote.lines[0].name, "Dell XPS 15");
    }

    #[test]
    fn test_rejects_non_positive_inputs() {
        let zero_qty = Cart::new("INR").with_item(CartItem::new("A", "a", 0, d("10"), d("0.18")));
        assert!(matches!(zero_qty.quote(), Err(MandateError::InvalidCart(_))));

        let zero_price = Cart::new("INR").with_item(CartItem::new("A", "a", 1, d("0"), d("0.18")));
        assert!(matches!(zero_price.quote(), Err(MandateError::InvalidCart(_))));

        let negative_price = Cart::new("INR").with_item(CartItem::new("A", "a", 1, d("-5"), d("0.18")));
        assert!(matches!(negative_price.quote(), Err(MandateError::InvalidCart(_))));

        let negative_tax = Cart::new("INR").with_item(CartItem::new("A", "a", 1, d("5"), d("-0.18")));
        assert!(matches!(negative_tax.quote(), Err(MandateError::InvalidCart(_))));
    }

    #[test]
    fn test_rejects_empty_cart_and_bad_currency() {
        assert!(matches!(Cart::new("INR").quote(), Err(MandateError::InvalidCart(_))));

        let bad_currency = Cart::new("RUPEES").with_item(CartItem::new("A", "a", 1, d("5"), d("0.18")));
        assert!(matches!(bad_currency.quote(), Err(MandateError::InvalidCart(_))));
    }

    #[test]
    fn test_zero_tax_is_allowed() {
        let cart = Cart::new("USD").with_item(CartItem::new("A", "a", 4, d("2.50"), Decimal::ZERO));
        assert_eq!(cart.quote().unwrap().total, d("10.00"));
    }
}
