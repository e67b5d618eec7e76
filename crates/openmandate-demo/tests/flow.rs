//! End-to-end purchase flow tests over the fully wired three-party setup.

use openmandate_demo::{PurchaseFlow, PurchaseRequest};
use openmandate_types::{Amount, SessionState, Sku};

#[tokio::test]
async fn test_demo_purchase_closes_with_nine_records() {
    let flow = PurchaseFlow::new().await;
    let report = flow.run(PurchaseRequest::demo()).await;

    assert_eq!(report.final_state, SessionState::Closed);
    assert!(report.failure.is_none());
    assert_eq!(report.audit_records.len(), 9);
    assert!(report.audit_records.iter().all(|r| r.outcome.is_accepted()));
    assert!(report.chain_verified);

    let receipt = report.captured.expect("capture receipt");
    assert_eq!(receipt.amount, Amount::from_cents(78_900));

    let order = report.fulfillment.expect("fulfillment order");
    assert!(order.tracking_number.starts_with("TRACK"));
    assert_eq!(order.tracking_number.len(), "TRACK".len() + 8);
}

#[tokio::test]
async fn test_cart_above_ceiling_aborts_the_purchase() {
    let flow = PurchaseFlow::new().await;
    let request = PurchaseRequest {
        // laptop_001 costs 1599.99, over the 1000.00 ceiling
        sku: Sku::new("laptop_001"),
        ..PurchaseRequest::demo()
    };
    let report = flow.run(request).await;

    assert_eq!(report.final_state, SessionState::Failed);
    assert!(report.captured.is_none());
    assert!(report.fulfillment.is_none());
    let last = report.audit_records.last().expect("audit record");
    assert!(!last.outcome.is_accepted());
    assert!(report.chain_verified);
}

#[tokio::test]
async fn test_wrong_otp_fails_the_session() {
    let flow = PurchaseFlow::new().await;
    let request = PurchaseRequest {
        otp_code: "999".to_string(),
        ..PurchaseRequest::demo()
    };
    let report = flow.run(request).await;

    assert_eq!(report.final_state, SessionState::Failed);
    assert!(report.failure.as_deref().is_some_and(|f| f.contains("OTP")));
    assert!(report.captured.is_none());
}

#[tokio::test]
async fn test_sessions_run_independently() {
    let flow = PurchaseFlow::new().await;
    let ok = flow.run(PurchaseRequest::demo()).await;
    let failed = flow
        .run(PurchaseRequest {
            otp_code: "999".to_string(),
            ..PurchaseRequest::demo()
        })
        .await;

    assert_eq!(ok.final_state, SessionState::Closed);
    assert_eq!(failed.final_state, SessionState::Failed);
    assert_ne!(ok.session_id, failed.session_id);
    assert_eq!(ok.audit_records.len(), 9);
}
