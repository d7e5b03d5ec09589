//! Payment processing.
//!
//! A payment is stored as pending, settled after a simulated gateway delay,
//! then announced on the bus as `PaymentCompleted`. Announcing is best effort:
//! the payment stands even when the bus is unreachable.

pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod service;
pub mod store;

pub use error::{PaymentError, Result};
pub use memory::InMemoryPaymentStore;
pub use model::{CardDetails, CardMetadata, Payment, PaymentRequest, PaymentStatus, Refund, RefundId};
pub use postgres::PostgresPaymentStore;
pub use service::{DEFAULT_PROCESSING_DELAY, PaymentService};
pub use store::PaymentStore;
