mod common;

use bigdecimal::BigDecimal;
use common::{success_callback, Harness, MockGateway};
use skuul_fees::database::models::{PaymentStatus, Role};
use skuul_fees::database::repository::PaymentStore;
use skuul_fees::error::ErrorCode;
use skuul_fees::payments::types::B2cCommand;
use skuul_fees::services::fee_payments::{
    Caller, InitiateRequest, PaymentLookup, RefundRequest,
};
use skuul_fees::services::reconciler::CallbackKind;
use std::sync::atomic::Ordering;
use uuid::Uuid;

fn request(h: &Harness, amount: i64) -> InitiateRequest {
    InitiateRequest {
        invoice_id: h.invoice_id,
        amount: BigDecimal::from(amount),
        phone: "0712345678".to_string(),
        description: None,
    }
}

#[tokio::test]
async fn initiate_records_pending_payment_with_provider_ids() {
    let h = Harness::new(MockGateway::accepting()).await;
    let parent = Caller::new(h.parent_id, vec![Role::Parent]);

    let initiated = h.service.initiate(&parent, request(&h, 500)).await.unwrap();
    assert_eq!(initiated.checkout_request_id, "ws_CO_1");

    let stored = h.payments.find_by_id(initiated.payment_id).await.unwrap().unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert_eq!(stored.phone_number, "254712345678");
    assert_eq!(stored.checkout_request_id.as_deref(), Some("ws_CO_1"));
    assert_eq!(stored.balance_snapshot, BigDecimal::from(3000));
    assert_eq!(stored.notes.as_deref(), Some("School Fees Payment"));
}

#[tokio::test]
async fn rejected_push_marks_payment_failed() {
    let h = Harness::new(MockGateway::rejecting("Invalid Access Token")).await;
    let parent = Caller::new(h.parent_id, vec![Role::Parent]);

    let err = h.service.initiate(&parent, request(&h, 500)).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::PaymentGatewayError);
    assert_eq!(h.gateway.initiate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.balance().await, BigDecimal::from(3000));
}

#[tokio::test]
async fn other_parents_cannot_pay_the_invoice() {
    let h = Harness::new(MockGateway::accepting()).await;
    let stranger = Caller::new(Uuid::new_v4(), vec![Role::Parent]);

    let err = h.service.initiate(&stranger, request(&h, 500)).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::Forbidden);
    assert_eq!(h.gateway.initiate_calls.load(Ordering::SeqCst), 0);

    let bursar = Caller::new(Uuid::new_v4(), vec![Role::Bursar]);
    assert!(h.service.initiate(&bursar, request(&h, 500)).await.is_ok());
}

#[tokio::test]
async fn amount_above_balance_is_refused() {
    let h = Harness::with_balance(MockGateway::accepting(), 400).await;
    let parent = Caller::new(h.parent_id, vec![Role::Parent]);

    let err = h.service.initiate(&parent, request(&h, 500)).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::AmountExceedsBalance);
    assert_eq!(err.status_code(), 422);
}

#[tokio::test]
async fn invalid_input_never_reaches_the_gateway() {
    let h = Harness::new(MockGateway::accepting()).await;
    let parent = Caller::new(h.parent_id, vec![Role::Parent]);

    let err = h.service.initiate(&parent, request(&h, 0)).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::ValidationError);

    let mut bad_phone = request(&h, 500);
    bad_phone.phone = "12345".to_string();
    assert!(h.service.initiate(&parent, bad_phone).await.is_err());

    let mut missing_invoice = request(&h, 500);
    missing_invoice.invoice_id = Uuid::new_v4();
    let err = h.service.initiate(&parent, missing_invoice).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InvoiceNotFound);

    assert_eq!(h.gateway.initiate_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn paid_invoice_cannot_be_paid_again() {
    let h = Harness::with_balance(MockGateway::accepting(), 500).await;
    let parent = Caller::new(h.parent_id, vec![Role::Parent]);
    let initiated = h.service.initiate(&parent, request(&h, 500)).await.unwrap();

    h.reconciler
        .handle_callback(
            &success_callback(&initiated.checkout_request_id, None, "PAID01", 500),
            &CallbackKind::Stk,
        )
        .await;
    assert_eq!(h.balance().await, BigDecimal::from(0));

    let err = h.service.initiate(&parent, request(&h, 1)).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::InvoiceAlreadyPaid);
}

#[tokio::test]
async fn status_lookup_queries_pending_payments() {
    let h = Harness::new(MockGateway::answering("1032", "Request cancelled by user")).await;
    let parent = Caller::new(h.parent_id, vec![Role::Parent]);
    let initiated = h.service.initiate(&parent, request(&h, 500)).await.unwrap();

    let view = h
        .service
        .get_status(
            &parent,
            PaymentLookup::CheckoutRequestId(initiated.checkout_request_id.clone()),
        )
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Cancelled);
    assert_eq!(h.gateway.queries(), 1);

    // Terminal payments are answered from storage.
    let view = h
        .service
        .get_status(&parent, PaymentLookup::Id(initiated.payment_id))
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Cancelled);
    assert_eq!(h.gateway.queries(), 1);
}

#[tokio::test]
async fn status_lookup_survives_query_errors() {
    let h = Harness::new(MockGateway::accepting()).await;
    let parent = Caller::new(h.parent_id, vec![Role::Parent]);
    let initiated = h.service.initiate(&parent, request(&h, 500)).await.unwrap();

    let view = h
        .service
        .get_status(&parent, PaymentLookup::Id(initiated.payment_id))
        .await
        .unwrap();
    assert_eq!(view.status, PaymentStatus::Pending);

    let stranger = Caller::new(Uuid::new_v4(), vec![Role::Parent]);
    let err = h
        .service
        .get_status(&stranger, PaymentLookup::Id(initiated.payment_id))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::Forbidden);
}

#[tokio::test]
async fn receipt_is_served_and_regenerated_when_missing() {
    let h = Harness::new(MockGateway::accepting()).await;
    let parent = Caller::new(h.parent_id, vec![Role::Parent]);
    let initiated = h.service.initiate(&parent, request(&h, 500)).await.unwrap();

    let err = h
        .service
        .get_receipt(&parent, initiated.payment_id)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::ReceiptNotAvailable);

    h.reconciler
        .handle_callback(
            &success_callback(&initiated.checkout_request_id, None, "RCP123", 500),
            &CallbackKind::Stk,
        )
        .await;

    let receipt = h.service.get_receipt(&parent, initiated.payment_id).await.unwrap();
    assert_eq!(receipt.file_name, "receipt-RCP123.html");
    let html = String::from_utf8(receipt.content).unwrap();
    assert!(html.contains("RCP123"));
    assert!(html.contains("500.00"));

    std::fs::remove_dir_all(&h.receipt_dir).unwrap();
    let receipt = h.service.get_receipt(&parent, initiated.payment_id).await.unwrap();
    assert!(String::from_utf8(receipt.content).unwrap().contains("RCP123"));
    assert_eq!(h.email.count(), 1);
}

#[tokio::test]
async fn refunds_are_limited_to_admins_and_bursars() {
    let h = Harness::new(MockGateway::accepting()).await;
    let refund = RefundRequest {
        phone: "0712345678".to_string(),
        amount: BigDecimal::from(200),
        remarks: "Overpayment refund".to_string(),
        command: B2cCommand::BusinessPayment,
    };

    let accountant = Caller::new(Uuid::new_v4(), vec![Role::Accountant]);
    let err = h.service.refund(&accountant, refund.clone()).await.unwrap_err();
    assert_eq!(err.error_code(), ErrorCode::Forbidden);
    assert_eq!(h.gateway.refund_calls.load(Ordering::SeqCst), 0);

    let bursar = Caller::new(Uuid::new_v4(), vec![Role::Bursar]);
    let accepted = h.service.refund(&bursar, refund).await.unwrap();
    assert!(accepted.conversation_id.starts_with("AG_"));
    assert_eq!(h.gateway.refund_calls.load(Ordering::SeqCst), 1);
}
