//! End-to-end tests for the protocol engine: the full purchase flow, replay
//! handling, out-of-order events and every guard that can fail a session.

use chrono::{Duration, Utc};
use openmandate_crypto::{InMemoryKeyStore, SignatureService};
use openmandate_payments::Authorization;
use openmandate_protocol::{ProtocolEngine, ProtocolEvent, Transition};
use openmandate_store::{AuditTrail, InMemoryAuditTrail, InMemoryMandateStore, MandateStore};
use openmandate_types::{
    AgentId, Amount, CaptureId, CaptureReceipt, ChallengeId, Currency, FulfillmentTerms,
    IntentConstraints, LineItem, Mandate, MandateId, MerchantId, MerchantPolicy, MessageId,
    Participants,
    PaymentToken, ReceiptId, Session, SessionState, Sku, TransactionId, UserId,
};
use std::sync::Arc;

struct Harness {
    engine: ProtocolEngine,
    mandates: Arc<InMemoryMandateStore>,
    audit: Arc<InMemoryAuditTrail>,
    signatures: SignatureService,
    participants: Participants,
}

impl Harness {
    fn new() -> Self {
        let keystore = Arc::new(InMemoryKeyStore::new());
        let participants = Participants::new(
            AgentId::new("shopper_agent"),
            AgentId::new("merchant_agent"),
            AgentId::new("credentials_provider"),
        );
        keystore.generate(participants.shopper.clone());
        keystore.generate(participants.merchant.clone());
        keystore.generate(participants.provider.clone());
        let signatures = SignatureService::new(keystore);
        let audit = Arc::new(InMemoryAuditTrail::new());
        let mandates = Arc::new(InMemoryMandateStore::new());
        let engine = ProtocolEngine::new(mandates.clone(), audit.clone(), signatures.clone());
        Self {
            engine,
            mandates,
            audit,
            signatures,
            participants,
        }
    }

    async fn open(&self) -> Session {
        self.engine.open_session(self.participants.clone()).await
    }

    async fn send(&self, session: &Session, event: ProtocolEvent) -> Transition {
        self.engine
            .apply(&session.session_id, Some(MessageId::new()), event)
            .await
            .unwrap()
    }

    fn intent(&self, ceiling: Amount) -> Mandate {
        Mandate::intent(
            UserId::new("u1"),
            "a laptop for school",
            IntentConstraints::ceiling(ceiling),
            Utc::now() + Duration::days(1),
        )
        .unwrap()
    }

    fn signed_cart(&self, intent_ref: MandateId) -> Mandate {
        let cart = Mandate::cart(
            intent_ref,
            MerchantId::new("tech_store"),
            vec![LineItem {
                sku: Sku::new("laptop_003"),
                description: "Entry-level student laptop".to_string(),
                category: "electronics".to_string(),
                quantity: 1,
                unit_price: Amount::from_cents(78_900),
            }],
            FulfillmentTerms::default(),
            Utc::now() + Duration::days(1),
        )
        .unwrap();
        let sig = self
            .signatures
            .sign_mandate(&cart, &self.participants.merchant)
            .unwrap();
        cart.with_signature(sig).unwrap()
    }

    fn token(&self) -> PaymentToken {
        PaymentToken {
            token: "cred_token_abc123".to_string(),
            payment_method_id: "amex_8888".to_string(),
            issued_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(1),
        }
    }

    fn authorization(&self, session: &Session, amount: Amount, otp_verified: bool) -> Authorization {
        Authorization {
            session_id: session.session_id.clone(),
            challenge_id: ChallengeId::new(),
            amount,
            currency: Currency::USD,
            auth_code: "AUTH1A2B3C4D".to_string(),
            risk_score: 0.1,
            otp_verified,
            authorized_at: Utc::now(),
        }
    }

    fn receipt(&self, amount: Amount) -> CaptureReceipt {
        let captured_at = Utc::now();
        CaptureReceipt {
            capture_id: CaptureId::new(),
            transaction_id: TransactionId::new(),
            receipt_id: ReceiptId::new(),
            amount,
            currency: Currency::USD,
            captured_at,
            settlement_date: (captured_at + Duration::days(2)).date_naive(),
        }
    }

    /// Drive a fresh session to DEVICE_SIGNED and return it with the signed
    /// payment mandate and its amount
    async fn device_signed_session(&self) -> (Session, Mandate, Amount) {
        let session = self.open().await;
        let amount = Amount::from_cents(78_900);

        let intent = self.intent(Amount::from_cents(100_000));
        let intent_id = intent.mandate_id.clone();
        self.send(&session, ProtocolEvent::IntentReceived { mandate: intent })
            .await;

        let cart = self.signed_cart(intent_id);
        let cart_id = cart.mandate_id.clone();
        self.send(&session, ProtocolEvent::CartReceived { mandate: cart })
            .await;
        self.send(
            &session,
            ProtocolEvent::CartAccepted {
                cart_ref: cart_id.clone(),
                accepted_by: self.participants.shopper.clone(),
            },
        )
        .await;

        let token = self.token();
        self.send(
            &session,
            ProtocolEvent::TokenIssued {
                requested_by: self.participants.shopper.clone(),
                token: token.clone(),
            },
        )
        .await;

        let payment = Mandate::payment(
            cart_id,
            token,
            amount,
            Currency::USD,
            Utc::now() + Duration::days(1),
        )
        .unwrap();
        self.send(
            &session,
            ProtocolEvent::PaymentCreated {
                mandate: payment.clone(),
            },
        )
        .await;

        let device_sig = self
            .signatures
            .sign_mandate(&payment, &self.participants.shopper)
            .unwrap();
        let signed = payment.with_signature(device_sig).unwrap();
        self.send(
            &session,
            ProtocolEvent::DeviceSigned {
                mandate: signed.clone(),
            },
        )
        .await;

        (session, signed, amount)
    }

    /// Drive a fresh session to AUTHORIZED and return it with the payment
    /// amount that was authorized
    async fn authorized_session(&self) -> (Session, Amount) {
        let (session, signed, amount) = self.device_signed_session().await;

        let counter_sig = self
            .signatures
            .sign_mandate(&signed, &self.participants.provider)
            .unwrap();
        let countersigned = signed.with_countersignature(counter_sig).unwrap();
        self.send(
            &session,
            ProtocolEvent::ProviderAuthorized {
                mandate: countersigned,
                authorization: self.authorization(&session, amount, true),
            },
        )
        .await;

        (session, amount)
    }
}

#[tokio::test]
async fn test_full_purchase_flow_closes_with_nine_records() {
    let h = Harness::new();
    let (session, amount) = h.authorized_session().await;

    h.send(
        &session,
        ProtocolEvent::CaptureExecuted {
            receipt: h.receipt(amount),
        },
    )
    .await;
    let transition = h.send(&session, ProtocolEvent::SettlementAcknowledged).await;
    assert_eq!(transition.new_state(), Some(SessionState::Closed));

    let status = h.engine.status(&session.session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Closed);
    assert_eq!(status.mandate_chain.len(), 3);
    assert!(status.failure.is_none());

    // Intent, cart and payment were chained in creation order, none twice.
    let chained = h.mandates.for_session(&session.session_id).await;
    assert_eq!(
        chained.iter().map(|m| m.mandate_id.clone()).collect::<Vec<_>>(),
        status.mandate_chain
    );
    for pair in chained.windows(2) {
        assert!(pair[0].created_at < pair[1].created_at);
        assert_ne!(pair[0].mandate_id, pair[1].mandate_id);
    }
    assert_ne!(chained[0].mandate_id, chained[2].mandate_id);

    let records = h.audit.query(&session.session_id).await;
    assert_eq!(records.len(), 9);
    assert!(records.iter().all(|r| r.outcome.is_accepted()));
    assert!(h.audit.verify_chain(&session.session_id).await);
}

#[tokio::test]
async fn test_out_of_order_event_is_a_protocol_violation() {
    let h = Harness::new();
    let session = h.open().await;

    let err = h
        .engine
        .apply(
            &session.session_id,
            Some(MessageId::new()),
            ProtocolEvent::CaptureExecuted {
                receipt: h.receipt(Amount::from_cents(78_900)),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "PROTOCOL_VIOLATION");

    // The session and the trail are untouched
    let status = h.engine.status(&session.session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Opened);
    assert!(h.audit.query(&session.session_id).await.is_empty());
}

#[tokio::test]
async fn test_replayed_mandate_is_ignored() {
    let h = Harness::new();
    let session = h.open().await;
    let intent = h.intent(Amount::from_cents(100_000));

    h.send(
        &session,
        ProtocolEvent::IntentReceived {
            mandate: intent.clone(),
        },
    )
    .await;
    let replay = h
        .send(&session, ProtocolEvent::IntentReceived { mandate: intent })
        .await;

    assert!(matches!(replay, Transition::Duplicate));
    assert_eq!(h.audit.query(&session.session_id).await.len(), 1);
    let status = h.engine.status(&session.session_id).await.unwrap();
    assert_eq!(status.state, SessionState::IntentCreated);
}

#[tokio::test]
async fn test_replayed_message_is_ignored() {
    let h = Harness::new();
    let session = h.open().await;
    let intent = h.intent(Amount::from_cents(100_000));
    h.send(&session, ProtocolEvent::IntentReceived { mandate: intent })
        .await;

    let message_id = MessageId::new();
    let cart = h.signed_cart(MandateId::new());
    // First delivery fails the guard and consumes the message id
    let _ = h
        .engine
        .apply(
            &session.session_id,
            Some(message_id.clone()),
            ProtocolEvent::CartReceived {
                mandate: cart.clone(),
            },
        )
        .await;
    let replay = h
        .engine
        .apply(
            &session.session_id,
            Some(message_id),
            ProtocolEvent::CartReceived { mandate: cart },
        )
        .await
        .unwrap();
    assert!(matches!(replay, Transition::Duplicate));
}

#[tokio::test]
async fn test_tampered_cart_signature_fails_the_session() {
    let h = Harness::new();
    let session = h.open().await;
    let intent = h.intent(Amount::from_cents(100_000));
    let intent_id = intent.mandate_id.clone();
    h.send(&session, ProtocolEvent::IntentReceived { mandate: intent })
        .await;

    let mut cart = h.signed_cart(intent_id);
    if let openmandate_types::MandatePayload::Cart(payload) = &mut cart.payload {
        payload.line_items[0].unit_price = Amount::from_cents(1);
    }
    let err = h
        .engine
        .apply(
            &session.session_id,
            Some(MessageId::new()),
            ProtocolEvent::CartReceived { mandate: cart },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SIGNATURE_MISMATCH");

    let status = h.engine.status(&session.session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Failed);
    let records = h.audit.query(&session.session_id).await;
    assert_eq!(records.len(), 2);
    assert!(!records[1].outcome.is_accepted());
}

#[tokio::test]
async fn test_cart_above_ceiling_fails_on_acceptance() {
    let h = Harness::new();
    let session = h.open().await;
    let intent = h.intent(Amount::from_cents(50_000));
    let intent_id = intent.mandate_id.clone();
    h.send(&session, ProtocolEvent::IntentReceived { mandate: intent })
        .await;

    // The cart totals 789.00 against a 500.00 ceiling; the proposal itself
    // is legal, the shopper's acceptance is what the guard rejects
    let cart = h.signed_cart(intent_id);
    let cart_id = cart.mandate_id.clone();
    h.send(&session, ProtocolEvent::CartReceived { mandate: cart })
        .await;

    let err = h
        .engine
        .apply(
            &session.session_id,
            Some(MessageId::new()),
            ProtocolEvent::CartAccepted {
                cart_ref: cart_id,
                accepted_by: h.participants.shopper.clone(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CONSTRAINT_VIOLATION");

    let status = h.engine.status(&session.session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Failed);
    assert!(status.failure.unwrap().contains("ceiling"));
}

#[tokio::test]
async fn test_cart_outside_intent_category_fails_on_acceptance() {
    let h = Harness::new();
    let session = h.open().await;
    let intent = Mandate::intent(
        UserId::new("u1"),
        "a paperback novel",
        IntentConstraints {
            price_ceiling: Amount::from_cents(100_000),
            category: Some("books".to_string()),
            merchants: MerchantPolicy::Any,
        },
        Utc::now() + Duration::days(1),
    )
    .unwrap();
    let intent_id = intent.mandate_id.clone();
    h.send(&session, ProtocolEvent::IntentReceived { mandate: intent })
        .await;

    // The proposed cart carries an electronics item against a books-only
    // intent; the ceiling is fine, the category guard is what rejects it
    let cart = h.signed_cart(intent_id);
    let cart_id = cart.mandate_id.clone();
    h.send(&session, ProtocolEvent::CartReceived { mandate: cart })
        .await;

    let err = h
        .engine
        .apply(
            &session.session_id,
            Some(MessageId::new()),
            ProtocolEvent::CartAccepted {
                cart_ref: cart_id,
                accepted_by: h.participants.shopper.clone(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CONSTRAINT_VIOLATION");

    let status = h.engine.status(&session.session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Failed);
    assert!(status.failure.unwrap().contains("category"));
}

#[tokio::test]
async fn test_expired_intent_fails_the_session() {
    let h = Harness::new();
    let session = h.open().await;
    let intent = Mandate::intent(
        UserId::new("u1"),
        "a laptop for school",
        IntentConstraints::ceiling(Amount::from_cents(100_000)),
        Utc::now() + Duration::milliseconds(5),
    )
    .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(25)).await;

    let err = h
        .engine
        .apply(
            &session.session_id,
            Some(MessageId::new()),
            ProtocolEvent::IntentReceived { mandate: intent },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "EXPIRED");

    // Nothing further is accepted on a failed session
    let err = h
        .engine
        .apply(
            &session.session_id,
            Some(MessageId::new()),
            ProtocolEvent::IntentReceived {
                mandate: h.intent(Amount::from_cents(100_000)),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "PROTOCOL_VIOLATION");
}

#[tokio::test]
async fn test_rejected_otp_fails_authorization() {
    let h = Harness::new();
    let session = h.open().await;
    let amount = Amount::from_cents(78_900);

    let intent = h.intent(Amount::from_cents(100_000));
    let intent_id = intent.mandate_id.clone();
    h.send(&session, ProtocolEvent::IntentReceived { mandate: intent })
        .await;
    let cart = h.signed_cart(intent_id);
    let cart_id = cart.mandate_id.clone();
    h.send(&session, ProtocolEvent::CartReceived { mandate: cart })
        .await;
    h.send(
        &session,
        ProtocolEvent::CartAccepted {
            cart_ref: cart_id.clone(),
            accepted_by: h.participants.shopper.clone(),
        },
    )
    .await;
    let token = h.token();
    h.send(
        &session,
        ProtocolEvent::TokenIssued {
            requested_by: h.participants.shopper.clone(),
            token: token.clone(),
        },
    )
    .await;
    let payment = Mandate::payment(
        cart_id,
        token,
        amount,
        Currency::USD,
        Utc::now() + Duration::days(1),
    )
    .unwrap();
    h.send(
        &session,
        ProtocolEvent::PaymentCreated {
            mandate: payment.clone(),
        },
    )
    .await;
    let sig = h
        .signatures
        .sign_mandate(&payment, &h.participants.shopper)
        .unwrap();
    let signed = payment.with_signature(sig).unwrap();
    h.send(
        &session,
        ProtocolEvent::DeviceSigned {
            mandate: signed.clone(),
        },
    )
    .await;

    let counter = h
        .signatures
        .sign_mandate(&signed, &h.participants.provider)
        .unwrap();
    let countersigned = signed.with_countersignature(counter).unwrap();
    let err = h
        .engine
        .apply(
            &session.session_id,
            Some(MessageId::new()),
            ProtocolEvent::ProviderAuthorized {
                mandate: countersigned,
                authorization: h.authorization(&session, amount, false),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "OTP_REJECTED");

    let status = h.engine.status(&session.session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Failed);
}

#[tokio::test]
async fn test_risk_at_threshold_fails_authorization() {
    let h = Harness::new();
    let (session, signed, amount) = h.device_signed_session().await;

    let counter = h
        .signatures
        .sign_mandate(&signed, &h.participants.provider)
        .unwrap();
    let countersigned = signed.with_countersignature(counter).unwrap();
    let authorization = Authorization {
        risk_score: 0.7,
        ..h.authorization(&session, amount, true)
    };
    let err = h
        .engine
        .apply(
            &session.session_id,
            Some(MessageId::new()),
            ProtocolEvent::ProviderAuthorized {
                mandate: countersigned,
                authorization,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "RISK_EXCEEDED");

    let status = h.engine.status(&session.session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Failed);
}

#[tokio::test]
async fn test_capture_must_match_authorized_amount() {
    let h = Harness::new();
    let (session, amount) = h.authorized_session().await;

    let err = h
        .engine
        .apply(
            &session.session_id,
            Some(MessageId::new()),
            ProtocolEvent::CaptureExecuted {
                receipt: h.receipt(Amount::from_cents(amount.cents() + 1)),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CAPTURE_MISMATCH");

    let status = h.engine.status(&session.session_id).await.unwrap();
    assert_eq!(status.state, SessionState::Failed);
}

#[tokio::test]
async fn test_abort_fails_any_live_session() {
    let h = Harness::new();
    let session = h.open().await;
    h.send(
        &session,
        ProtocolEvent::IntentReceived {
            mandate: h.intent(Amount::from_cents(100_000)),
        },
    )
    .await;

    let err = h
        .engine
        .apply(
            &session.session_id,
            Some(MessageId::new()),
            ProtocolEvent::Abort {
                reason: "shopper changed their mind".to_string(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ABORTED");

    let records = h.audit.query(&session.session_id).await;
    assert_eq!(records.len(), 2);
    assert!(!records[1].outcome.is_accepted());
    assert!(h.audit.verify_chain(&session.session_id).await);
}

#[tokio::test]
async fn test_unknown_session_is_reported() {
    let h = Harness::new();
    let err = h
        .engine
        .apply(
            &openmandate_types::SessionId::new(),
            None,
            ProtocolEvent::SettlementAcknowledged,
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SESSION_NOT_FOUND");
}
