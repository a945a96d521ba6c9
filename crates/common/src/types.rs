use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for identifiers derived from an order id.
///
/// Changing this value changes every derived invoice and payment attempt id,
/// which breaks deduplication of records written before the change.
const DERIVATION_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2c3a_8b4e_4f5a_9c7d_1e2f_3a4b_5c6d);

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates an id from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an order, allocated once at checkout.
    ///
    /// Also the partition key of every event that concerns the order.
    OrderId
);

uuid_id!(
    /// Identifier of the user who owns an order.
    UserId
);

uuid_id!(
    /// Unique identifier for a published event.
    EventId
);

uuid_id!(
    /// Invoice identifier, derived from the order it bills.
    InvoiceId
);

uuid_id!(
    /// Payment attempt identifier, derived from (order id, attempt sequence).
    PaymentAttemptId
);

impl OrderId {
    /// Allocates a new random order id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrderId {
    fn default() -> Self {
        Self::new()
    }
}

impl UserId {
    /// Creates a new random user id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl EventId {
    /// Creates a new random event id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derives a stable event id from a name.
    ///
    /// Re-emitting the same logical event (a republish after a crash, a
    /// redelivered trigger) produces the same id, so downstream consumers can
    /// recognise the copy.
    pub fn derived(name: &str) -> Self {
        Self(Uuid::new_v5(&DERIVATION_NAMESPACE, name.as_bytes()))
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl InvoiceId {
    /// Returns the invoice id for an order. Always the same for the same order.
    pub fn for_order(order_id: OrderId) -> Self {
        let name = format!("invoice:{order_id}");
        Self(Uuid::new_v5(&DERIVATION_NAMESPACE, name.as_bytes()))
    }
}

impl PaymentAttemptId {
    /// Returns the id of the `sequence`-th payment attempt for an order.
    pub fn for_attempt(order_id: OrderId, sequence: u32) -> Self {
        let name = format!("payment-attempt:{order_id}:{sequence}");
        Self(Uuid::new_v5(&DERIVATION_NAMESPACE, name.as_bytes()))
    }
}
