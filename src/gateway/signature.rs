//! HMAC-SHA256 signatures exchanged with the gateway.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature is not valid hex")]
    InvalidFormat,
    #[error("signing secret is unusable")]
    InvalidSecret,
    #[error("signature does not match")]
    Mismatch,
}

fn mac_for(secret: &str, message: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(message);
    Ok(mac)
}

fn checkout_message(gateway_order_id: &str, gateway_payment_id: &str) -> String {
    format!("{}|{}", gateway_order_id, gateway_payment_id)
}

/// Hex signature the gateway attaches to a completed checkout.
pub fn sign_payment(
    secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
) -> Result<String, SignatureError> {
    let mac = mac_for(
        secret,
        checkout_message(gateway_order_id, gateway_payment_id).as_bytes(),
    )?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a checkout signature over `"{order}|{payment}"` in constant time.
pub fn verify_payment_signature(
    secret: &str,
    gateway_order_id: &str,
    gateway_payment_id: &str,
    signature: &str,
) -> Result<(), SignatureError> {
    verify(
        secret,
        checkout_message(gateway_order_id, gateway_payment_id).as_bytes(),
        signature,
    )
}

/// Verifies the webhook header signature over the raw request body.
pub fn verify_webhook_signature(
    secret: &str,
    body: &[u8],
    signature: &str,
) -> Result<(), SignatureError> {
    verify(secret, body, signature)
}

pub fn sign_webhook(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mac = mac_for(secret, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn verify(secret: &str, message: &[u8], signature: &str) -> Result<(), SignatureError> {
    let expected = hex::decode(signature.trim()).map_err(|_| SignatureError::InvalidFormat)?;
    let mac = mac_for(secret, message)?;

    // verify_slice compares in constant time
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}
