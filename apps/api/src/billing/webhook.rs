//! Payment webhook: signature verification and event to grant mapping.
//!
//! Only `checkout.session.completed` moves credits. The checkout session id is the
//! idempotency key, so provider redeliveries are no-ops.

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};

use crate::billing::packs::find_pack;
use crate::credits::ledger::{CreditLedger, GrantParams, LedgerError};
use crate::credits::Credits;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Missing signature header")]
    MissingSignature,

    #[error("Malformed signature header")]
    MalformedSignature,

    #[error("Signature does not match payload")]
    SignatureMismatch,

    #[error("Signature timestamp outside tolerance ({skew}s)")]
    StaleTimestamp { skew: u64 },

    #[error("Invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

// ────────────────────────────────────────────────────────────────────────────
// Signature verification
// ────────────────────────────────────────────────────────────────────────────

/// Verifies `t=<unix>,v1=<hex>` signatures: HMAC-SHA256 over `"{t}.{payload}"`.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: u64,
}

impl WebhookVerifier {
    pub fn new(secret: String, tolerance_secs: u64) -> Self {
        Self {
            secret,
            tolerance_secs,
        }
    }

    pub fn verify(&self, header: &str, payload: &[u8], now: i64) -> Result<(), WebhookError> {
        let mut timestamp: Option<i64> = None;
        let mut signatures: Vec<Vec<u8>> = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse()
                            .map_err(|_| WebhookError::MalformedSignature)?,
                    )
                }
                // Unparseable v1 entries are skipped; another one may still match.
                "v1" => {
                    if let Ok(sig) = hex::decode(value) {
                        signatures.push(sig);
                    }
                }
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(WebhookError::MalformedSignature)?;
        if signatures.is_empty() {
            return Err(WebhookError::MalformedSignature);
        }

        let skew = now.abs_diff(timestamp);
        if skew > self.tolerance_secs {
            return Err(WebhookError::StaleTimestamp { skew });
        }

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| WebhookError::SignatureMismatch)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);

        if signatures
            .iter()
            .any(|sig| mac.clone().verify_slice(sig).is_ok())
        {
            Ok(())
        } else {
            Err(WebhookError::SignatureMismatch)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Event model
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
    /// Minor currency units.
    amount_total: Option<i64>,
    currency: Option<String>,
    payment_status: Option<String>,
}

/// What a delivered event did. Every variant is acknowledged to the provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Granted {
        account_id: String,
        credits: Credits,
        balance: Credits,
    },
    Duplicate {
        session_id: String,
    },
    Ignored {
        reason: String,
    },
}

fn ignored(reason: impl Into<String>) -> WebhookOutcome {
    WebhookOutcome::Ignored {
        reason: reason.into(),
    }
}

/// Applies a verified event. Only ledger failures are errors; anything the ledger
/// cannot act on is acknowledged as ignored so the provider does not retry it.
pub async fn process_event(
    ledger: &dyn CreditLedger,
    event: WebhookEvent,
) -> Result<WebhookOutcome, LedgerError> {
    if event.event_type != CHECKOUT_COMPLETED {
        return Ok(ignored(format!("unhandled event type {}", event.event_type)));
    }

    let session: CheckoutSession = match serde_json::from_value(event.data.object) {
        Ok(session) => session,
        Err(e) => {
            warn!("Unreadable checkout session in webhook: {e}");
            return Ok(ignored("unreadable checkout session"));
        }
    };

    if let Some(status) = session.payment_status.as_deref() {
        if status != "paid" {
            info!("Checkout session {} not paid yet ({status})", session.id);
            return Ok(ignored(format!("payment status {status}")));
        }
    }

    let email = session
        .metadata
        .get("email")
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    let (Some(account_id), Some(pack_id)) = (email, session.metadata.get("pack_id")) else {
        warn!("Checkout session {} is missing email or pack_id metadata", session.id);
        return Ok(ignored("missing metadata"));
    };

    let Some(pack) = find_pack(pack_id) else {
        warn!("Checkout session {} names unknown pack '{pack_id}'", session.id);
        return Ok(ignored(format!("unknown pack {pack_id}")));
    };

    let currency = session.currency.as_deref().map(str::to_lowercase);
    let outcome = ledger
        .grant(GrantParams {
            account_id: &account_id,
            credits: pack.credits(),
            idempotency_key: &session.id,
            plan: Some(pack.id),
            amount_minor: session.amount_total,
            currency: currency.as_deref(),
        })
        .await?;

    if !outcome.applied {
        return Ok(WebhookOutcome::Duplicate {
            session_id: session.id,
        });
    }

    info!(
        "Payment {} ({} {}) granted {} credits to {}",
        session.id,
        session.amount_total.unwrap_or_default(),
        currency.as_deref().unwrap_or("?"),
        pack.credits,
        account_id
    );
    Ok(WebhookOutcome::Granted {
        account_id,
        credits: pack.credits(),
        balance: outcome.balance,
    })
}

/// Builds a signature header the way the provider does.
#[cfg(test)]
pub(crate) fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credits::MemoryLedger;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_760_000_000;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SECRET.to_string(), 300)
    }

    fn checkout_event(session_id: &str, email: &str, pack_id: &str) -> WebhookEvent {
        serde_json::from_value(serde_json::json!({
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": session_id,
                    "amount_total": 499,
                    "currency": "eur",
                    "payment_status": "paid",
                    "metadata": { "email": email, "pack_id": pack_id }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_signature_is_accepted() {
        let payload = br#"{"type":"ping"}"#;
        let header = sign(SECRET, NOW, payload);
        assert!(verifier().verify(&header, payload, NOW + 10).is_ok());
    }

    #[test]
    fn test_any_matching_v1_is_accepted() {
        let payload = b"{}";
        let good = sign(SECRET, NOW, payload);
        let header = format!("{},v1=deadbeef,v0=ignored", good.replace(",v1=", ",v1=00,v1="));
        assert!(verifier().verify(&header, payload, NOW).is_ok());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let header = sign(SECRET, NOW, br#"{"amount":1}"#);
        assert!(matches!(
            verifier().verify(&header, br#"{"amount":9}"#, NOW),
            Err(WebhookError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let payload = b"{}";
        let header = sign("whsec_other", NOW, payload);
        assert!(verifier().verify(&header, payload, NOW).is_err());
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let payload = b"{}";
        let header = sign(SECRET, NOW - 301, payload);
        assert!(matches!(
            verifier().verify(&header, payload, NOW),
            Err(WebhookError::StaleTimestamp { skew: 301 })
        ));
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        assert!(matches!(
            verifier().verify("garbage", b"{}", NOW),
            Err(WebhookError::MalformedSignature)
        ));
        assert!(matches!(
            verifier().verify("t=abc,v1=00", b"{}", NOW),
            Err(WebhookError::MalformedSignature)
        ));
        assert!(matches!(
            verifier().verify(&format!("t={NOW}"), b"{}", NOW),
            Err(WebhookError::MalformedSignature)
        ));
    }

    #[tokio::test]
    async fn test_completed_checkout_grants_pack_credits() {
        let ledger = MemoryLedger::new();

        let outcome = process_event(&ledger, checkout_event("cs_1", "Ada@Example.com", "popular"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WebhookOutcome::Granted {
                account_id: "ada@example.com".to_string(),
                credits: Credits::from_whole(250),
                balance: Credits::from_whole(250),
            }
        );
    }

    #[tokio::test]
    async fn test_completed_checkout_records_amount_and_currency() {
        let ledger = MemoryLedger::new();
        let mut event = checkout_event("cs_1", "ada@example.com", "basic");
        event.data.object["currency"] = serde_json::json!("EUR");

        process_event(&ledger, event).await.unwrap();

        let payments = ledger.payments("ada@example.com", 10).await.unwrap();
        assert_eq!(payments.len(), 1);
        let payment = &payments[0];
        assert_eq!(payment.session_id, "cs_1");
        assert_eq!(payment.plan.as_deref(), Some("basic"));
        assert_eq!(payment.credits, Credits::from_whole(80));
        assert_eq!(payment.amount_minor, Some(499));
        assert_eq!(payment.currency.as_deref(), Some("eur"));
    }

    #[tokio::test]
    async fn test_redelivered_checkout_is_duplicate() {
        let ledger = MemoryLedger::new();
        process_event(&ledger, checkout_event("cs_1", "ada@example.com", "basic"))
            .await
            .unwrap();

        let outcome = process_event(&ledger, checkout_event("cs_1", "ada@example.com", "basic"))
            .await
            .unwrap();

        assert!(matches!(outcome, WebhookOutcome::Duplicate { .. }));
        assert_eq!(
            ledger.get_balance("ada@example.com").await.unwrap(),
            Credits::from_whole(80)
        );
    }

    #[tokio::test]
    async fn test_other_event_types_are_ignored() {
        let ledger = MemoryLedger::new();
        let event: WebhookEvent = serde_json::from_value(serde_json::json!({
            "type": "payment_intent.created",
            "data": { "object": {} }
        }))
        .unwrap();

        let outcome = process_event(&ledger, event).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn test_unknown_pack_and_missing_metadata_are_ignored() {
        let ledger = MemoryLedger::new();

        let unknown = process_event(&ledger, checkout_event("cs_1", "ada@example.com", "gold"))
            .await
            .unwrap();
        let missing = process_event(&ledger, checkout_event("cs_2", "  ", "basic"))
            .await
            .unwrap();

        assert!(matches!(unknown, WebhookOutcome::Ignored { .. }));
        assert!(matches!(missing, WebhookOutcome::Ignored { .. }));
        assert_eq!(ledger.get_balance("ada@example.com").await.unwrap(), Credits::ZERO);
    }

    #[tokio::test]
    async fn test_unpaid_session_is_ignored() {
        let ledger = MemoryLedger::new();
        let event: WebhookEvent = serde_json::from_value(serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "id": "cs_1",
                "payment_status": "unpaid",
                "metadata": { "email": "ada@example.com", "pack_id": "pro" }
            }}
        }))
        .unwrap();

        let outcome = process_event(&ledger, event).await.unwrap();

        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        assert_eq!(ledger.get_balance("ada@example.com").await.unwrap(), Credits::ZERO);
    }
}
