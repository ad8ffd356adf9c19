mod common;

use common::*;
use std::sync::atomic::Ordering;
use ticketing_payments::domain::payment::VERIFICATION_ATTEMPTS_EXHAUSTED;
use ticketing_payments::domain::{PaymentStatus, ReconciliationStatus};
use ticketing_payments::error::AppError;
use ticketing_payments::gateway::GatewayPaymentStatus;
use ticketing_payments::use_cases::ReverifyInput;

fn input(payment_id: uuid::Uuid, gateway_payment_id: &str) -> ReverifyInput {
    ReverifyInput {
        payment_id,
        gateway_payment_id: gateway_payment_id.to_string(),
    }
}

#[tokio::test]
async fn test_captured_at_gateway_settles_as_paid() {
    let harness = TestHarness::new();
    let record = harness.create_event_order(USER_ID, "250.00").await;
    harness
        .gateway
        .set_payment("pay_late", &record.gateway_order_id, GatewayPaymentStatus::Captured);

    let output = harness
        .state
        .reverify_payment
        .execute(input(record.id, "pay_late"))
        .await
        .unwrap();

    assert_eq!(output.status, PaymentStatus::Paid);
    assert_eq!(output.verification_attempts, 1);
    assert_eq!(output.gateway_status.as_deref(), Some("captured"));
    assert_eq!(
        output.reconciliation_status,
        Some(ReconciliationStatus::Completed)
    );

    let stored = harness.payments.get(record.id);
    assert_eq!(stored.gateway_payment_id.as_deref(), Some("pay_late"));
    assert_eq!(
        stored.signature,
        Some(checkout_signature(&record.gateway_order_id, "pay_late"))
    );
    assert_eq!(harness.market.booking_status(BOOKING_ID), "completed");
}

#[tokio::test]
async fn test_gateway_failure_is_recorded_with_its_code() {
    let harness = TestHarness::new();
    let record = harness.create_event_order(USER_ID, "250.00").await;
    harness
        .gateway
        .set_payment("pay_declined", &record.gateway_order_id, GatewayPaymentStatus::Failed);

    let output = harness
        .state
        .reverify_payment
        .execute(input(record.id, "pay_declined"))
        .await
        .unwrap();

    assert_eq!(output.status, PaymentStatus::Failed);
    let stored = harness.payments.get(record.id);
    assert_eq!(stored.error_code.as_deref(), Some("BAD_REQUEST_ERROR"));
    assert_eq!(stored.error_description.as_deref(), Some("card declined"));
}

#[tokio::test]
async fn test_fourth_attempt_exhausts_verification() {
    let harness = TestHarness::new();
    let record = harness.create_event_order(USER_ID, "250.00").await;
    harness.gateway.set_payment(
        "pay_pending",
        &record.gateway_order_id,
        GatewayPaymentStatus::Authorized,
    );

    for attempt in 1..=3 {
        let output = harness
            .state
            .reverify_payment
            .execute(input(record.id, "pay_pending"))
            .await
            .unwrap();
        assert_eq!(output.status, PaymentStatus::Created);
        assert_eq!(output.verification_attempts, attempt);
        assert_eq!(output.gateway_status.as_deref(), Some("authorized"));
    }

    let err = harness
        .state
        .reverify_payment
        .execute(input(record.id, "pay_pending"))
        .await
        .unwrap_err();
    match err {
        AppError::VerificationExhausted {
            payment_id,
            attempts,
        } => {
            assert_eq!(payment_id, record.id);
            assert_eq!(attempts, 4);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }

    let stored = harness.payments.get(record.id);
    assert_eq!(stored.status, PaymentStatus::Failed);
    assert_eq!(
        stored.error_code.as_deref(),
        Some(VERIFICATION_ATTEMPTS_EXHAUSTED)
    );
    // The exhausting attempt does not ask the gateway
    assert_eq!(harness.gateway.payment_fetches.load(Ordering::SeqCst), 3);

    // Terminal: later attempts report exhaustion without touching anything
    let err = harness
        .state
        .reverify_payment
        .execute(input(record.id, "pay_pending"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::VerificationExhausted { .. }));
    assert_eq!(harness.payments.get(record.id).verification_attempts, 4);
}

#[tokio::test]
async fn test_exhaustion_is_distinct_from_signature_mismatch() {
    let exhausted = AppError::VerificationExhausted {
        payment_id: uuid::Uuid::new_v4(),
        attempts: 4,
    };
    let mismatch = AppError::SignatureMismatch { payment_id: None };

    assert_eq!(exhausted.code(), "VERIFICATION_ATTEMPTS_EXHAUSTED");
    assert_eq!(mismatch.code(), "SIGNATURE_MISMATCH");
}

#[tokio::test]
async fn test_payment_for_another_order_is_rejected() {
    let harness = TestHarness::new();
    let record = harness.create_event_order(USER_ID, "250.00").await;
    harness
        .gateway
        .set_payment("pay_other", "order_someone_else", GatewayPaymentStatus::Captured);

    let err = harness
        .state
        .reverify_payment
        .execute(input(record.id, "pay_other"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Validation(_)));
    assert_eq!(harness.payments.get(record.id).status, PaymentStatus::Created);
}

#[tokio::test]
async fn test_paid_record_is_reported_without_counting_an_attempt() {
    let harness = TestHarness::new();
    let record = harness.create_event_order(USER_ID, "250.00").await;
    harness
        .gateway
        .set_payment("pay_late", &record.gateway_order_id, GatewayPaymentStatus::Captured);
    harness
        .state
        .reverify_payment
        .execute(input(record.id, "pay_late"))
        .await
        .unwrap();

    let output = harness
        .state
        .reverify_payment
        .execute(input(record.id, "pay_late"))
        .await
        .unwrap();

    assert_eq!(output.status, PaymentStatus::Paid);
    assert_eq!(output.verification_attempts, 1);
    assert_eq!(harness.gateway.payment_fetches.load(Ordering::SeqCst), 1);
    assert_eq!(harness.market.booking_updates.load(Ordering::SeqCst), 1);
}
