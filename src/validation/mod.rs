use bigdecimal::BigDecimal;
use std::fmt;

pub const REFERENCE_ID_MAX_LEN: usize = 64;
pub const GATEWAY_ID_MAX_LEN: usize = 64;
pub const SIGNATURE_MAX_LEN: usize = 128;
pub const COUPON_CODE_MAX_LEN: usize = 32;
pub const REASON_MAX_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// Identifiers coming from clients or the gateway: non-empty, bounded, no whitespace.
pub fn validate_identifier(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    validate_required(field, value)?;
    validate_max_len(field, value, max_len)?;

    if value.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(ValidationError::new(
            field,
            "must not contain whitespace or control characters",
        ));
    }

    Ok(())
}

/// Ids the gateway issues (`order_..`, `pay_..`). They end up in request
/// paths, so only ASCII alphanumerics and `_` are accepted.
pub fn is_gateway_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= GATEWAY_ID_MAX_LEN
        && value.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

pub fn validate_gateway_id(field: &'static str, value: &str) -> ValidationResult {
    validate_required(field, value)?;
    validate_max_len(field, value, GATEWAY_ID_MAX_LEN)?;

    if !is_gateway_id(value) {
        return Err(ValidationError::new(
            field,
            "may only contain letters, digits and underscores",
        ));
    }

    Ok(())
}

pub fn validate_non_negative_amount(field: &'static str, amount: &BigDecimal) -> ValidationResult {
    if amount < &BigDecimal::from(0) {
        return Err(ValidationError::new(field, "must not be negative"));
    }

    Ok(())
}
