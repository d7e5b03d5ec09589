use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates an identifier from any string value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Returns true if the identifier is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identity of a shopper. Carts are keyed by it.
    UserId
);

string_id!(
    /// Identity of a catalog product.
    ProductId
);

string_id!(
    /// Identity of a payment. Also the partition key of its events.
    PaymentId
);

string_id!(
    /// Identity of an order owned by the (external) order service.
    OrderId
);

impl ProductId {
    /// Generates a fresh `prod_`-prefixed product ID.
    pub fn generate() -> Self {
        Self(format!("prod_{}", Uuid::new_v4().simple()))
    }
}

impl PaymentId {
    /// Generates a fresh `pay_`-prefixed payment ID.
    pub fn generate() -> Self {
        Self(format!("pay_{}", Uuid::new_v4().simple()))
    }
}
