//! Value objects for the order domain.

use serde::{Deserialize, Serialize};

use super::OrderError;

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Money amount represented in cents to avoid floating point issues.
///
/// A single implicit currency is assumed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    /// Creates a new Money amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self(0)
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the dollar portion (whole number).
    pub fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the cents portion (remainder after dollars).
    pub fn cents_part(&self) -> i64 {
        self.0.abs() % 100
    }

    /// Returns true if the amount is positive.
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies by a quantity, returning `None` on overflow.
    pub fn checked_multiply(&self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    /// Adds two amounts, returning `None` on overflow.
    pub fn checked_add(&self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 < 0 {
            write!(f, "-${}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "${}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

/// A line item snapshotted at checkout time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// The product identifier.
    pub product_id: ProductId,

    /// Human-readable product name.
    pub product_name: String,

    /// Quantity ordered.
    pub quantity: u32,

    /// Price per unit.
    pub unit_price: Money,
}

impl LineItem {
    /// Creates a new line item.
    pub fn new(
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns the total price for this item (quantity * unit_price), or
    /// `None` if it does not fit in an `i64` of cents.
    pub fn total_price(&self) -> Option<Money> {
        self.unit_price.checked_multiply(self.quantity)
    }
}

/// The contents of a cart at the moment checkout was requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CartSnapshot {
    items: Vec<LineItem>,
}

impl CartSnapshot {
    /// Creates a snapshot from line items.
    pub fn new(items: Vec<LineItem>) -> Self {
        Self { items }
    }

    /// Returns the line items in cart order.
    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    /// Consumes the snapshot, returning its line items.
    pub fn into_items(self) -> Vec<LineItem> {
        self.items
    }

    /// Returns true if the cart holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the sum of quantity * unit price over all items.
    pub fn total(&self) -> Result<Money, OrderError> {
        self.items.iter().try_fold(Money::zero(), |acc, item| {
            item.total_price()
                .and_then(|price| acc.checked_add(price))
                .ok_or_else(|| OrderError::AmountOverflow {
                    product_id: item.product_id.to_string(),
                })
        })
    }

    /// Checks the snapshot can be checked out.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::EmptyCart);
        }

        for item in &self.items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id.to_string(),
                    quantity: item.quantity,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id.to_string(),
                    price: item.unit_price.cents(),
                });
            }
        }

        self.total().map(|_| ())
    }
}

impl From<Vec<LineItem>> for CartSnapshot {
    fn from(items: Vec<LineItem>) -> Self {
        Self::new(items)
    }
}

/// Where the order ships to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

impl ShippingAddress {
    /// Checks every field is present.
    pub fn validate(&self) -> Result<(), OrderError> {
        let fields = [
            ("street", &self.street),
            ("city", &self.city),
            ("state", &self.state),
            ("zip_code", &self.zip_code),
            ("country", &self.country),
        ];

        match fields.iter().find(|(_, value)| value.trim().is_empty()) {
            Some(&(field, _)) => Err(OrderError::IncompleteShippingAddress { field }),
            None => Ok(()),
        }
    }
}

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    Paypal,
    BankTransfer,
}

/// Reference to a stored payment instrument.
///
/// The reference is opaque to the saga; only the payment gateway can
/// resolve it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInstrument {
    /// Gateway-side instrument reference.
    pub reference: String,

    /// Payment method of the instrument.
    pub method: PaymentMethod,

    /// Last four card digits, for display only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_four: Option<String>,
}

impl PaymentInstrument {
    /// Creates a credit card instrument.
    pub fn card(reference: impl Into<String>, last_four: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            method: PaymentMethod::CreditCard,
            last_four: Some(last_four.into()),
        }
    }

    /// Checks the instrument carries a reference.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.reference.trim().is_empty() {
            return Err(OrderError::MissingPaymentInstrument);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> ShippingAddress {
        ShippingAddress {
            street: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            zip_code: "62701".to_string(),
            country: "US".to_string(),
        }
    }

    #[test]
    fn test_money_display() {
        assert_eq!(Money::from_cents(5998).to_string(), "$59.98");
        assert_eq!(Money::from_cents(100).to_string(), "$1.00");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-$12.34");
    }

    #[test]
    fn test_money_serializes_as_cents() {
        let json = serde_json::to_string(&Money::from_cents(2999)).unwrap();
        assert_eq!(json, "2999");
    }

    #[test]
    fn test_cart_total() {
        let cart = CartSnapshot::new(vec![
            LineItem::new("SKU-001", "Widget", 2, Money::from_cents(1999)),
            LineItem::new("SKU-002", "Gadget", 1, Money::from_cents(2000)),
        ]);
        assert_eq!(cart.total().unwrap(), Money::from_cents(5998));
    }

    #[test]
    fn test_cart_total_overflow_rejected() {
        let huge = Money::from_cents(i64::MAX / 2);
        let cart = CartSnapshot::new(vec![LineItem::new("SKU-001", "Yacht", 3, huge)]);
        assert!(matches!(
            cart.validate(),
            Err(OrderError::AmountOverflow { .. })
        ));

        let cart = CartSnapshot::new(vec![
            LineItem::new("SKU-001", "Yacht", 1, huge),
            LineItem::new("SKU-002", "Yacht", 1, huge),
            LineItem::new("SKU-003", "Dinghy", 2, Money::from_cents(1)),
        ]);
        assert!(matches!(
            cart.total(),
            Err(OrderError::AmountOverflow { ref product_id }) if product_id == "SKU-003"
        ));
    }

    #[test]
    fn test_money_checked_arithmetic() {
        assert_eq!(
            Money::from_cents(2999).checked_multiply(2),
            Some(Money::from_cents(5998))
        );
        assert_eq!(Money::from_cents(i64::MAX).checked_multiply(2), None);
        assert_eq!(Money::from_cents(i64::MAX).checked_add(Money::from_cents(1)), None);
    }

    #[test]
    fn test_empty_cart_rejected() {
        let result = CartSnapshot::default().validate();
        assert!(matches!(result, Err(OrderError::EmptyCart)));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let cart = CartSnapshot::new(vec![LineItem::new(
            "SKU-001",
            "Widget",
            0,
            Money::from_cents(1000),
        )]);
        assert!(matches!(
            cart.validate(),
            Err(OrderError::InvalidQuantity { quantity: 0, .. })
        ));
    }

    #[test]
    fn test_negative_price_rejected_but_free_items_allowed() {
        let negative = CartSnapshot::new(vec![LineItem::new(
            "SKU-001",
            "Widget",
            1,
            Money::from_cents(-1),
        )]);
        assert!(matches!(
            negative.validate(),
            Err(OrderError::InvalidPrice { .. })
        ));

        let free = CartSnapshot::new(vec![LineItem::new("SKU-001", "Sticker", 1, Money::zero())]);
        assert!(free.validate().is_ok());
    }

    #[test]
    fn test_shipping_address_requires_every_field() {
        assert!(address().validate().is_ok());

        let mut missing_city = address();
        missing_city.city = "  ".to_string();
        assert!(matches!(
            missing_city.validate(),
            Err(OrderError::IncompleteShippingAddress { field: "city" })
        ));
    }

    #[test]
    fn test_instrument_requires_reference() {
        assert!(PaymentInstrument::card("tok_visa", "4242").validate().is_ok());
        assert!(matches!(
            PaymentInstrument::card("", "4242").validate(),
            Err(OrderError::MissingPaymentInstrument)
        ));
    }

    #[test]
    fn test_payment_method_wire_format() {
        let json = serde_json::to_string(&PaymentMethod::BankTransfer).unwrap();
        assert_eq!(json, "\"bank_transfer\"");
    }
}
