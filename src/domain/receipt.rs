//! Receipt identifiers sent to the gateway alongside an order.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::payment::PaymentType;

/// Gateway limit on the receipt field.
pub const RECEIPT_MAX_LEN: usize = 40;
const REFERENCE_PREFIX_LEN: usize = 8;
const RANDOM_SUFFIX_LEN: usize = 6;

/// Builds `<type>_<ref>_<millis base36>_<random>`.
///
/// The reference prefix and timestamp keep receipts traceable; the random
/// suffix keeps concurrent orders for the same reference apart.
pub fn build_receipt(payment_type: PaymentType, reference_id: &str, now: DateTime<Utc>) -> String {
    let prefix = match payment_type {
        PaymentType::Event => "evt",
        PaymentType::Subscription => "sub",
    };

    let mut reference: String = reference_id
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .take(REFERENCE_PREFIX_LEN)
        .collect();
    if reference.is_empty() {
        reference.push('x');
    }

    let millis = u64::try_from(now.timestamp_millis()).unwrap_or_default();
    let random: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(RANDOM_SUFFIX_LEN)
        .collect();

    let receipt = format!("{}_{}_{}_{}", prefix, reference, to_base36(millis), random);
    receipt.chars().take(RECEIPT_MAX_LEN).collect()
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }

    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
