//! Payment domain: entities, lifecycle rules and money handling.

pub mod money;
pub mod payment;
pub mod receipt;

pub use payment::{
    CouponSnapshot, DiscountType, EventMetadata, NewPayment, PaymentMetadata, PaymentRecord,
    PaymentStatus, PaymentTransition, PaymentType, ReconciliationResult, ReconciliationStatus,
    SubscriptionMetadata,
};
