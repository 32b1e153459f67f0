//! Apple historical import
//!
//! Apple has no listing API, so the import walks the tenant's known
//! original transaction ids and asks the App Store Server API for each
//! subscription's current lifecycle. Results are re-wrapped as synthetic
//! server notifications (the transaction JWS is carried through verbatim)
//! and fed to the trusted pipeline entry.

use crate::engine::BackfillContext;
use crate::error::{BackfillError, BackfillResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64_URL;
use base64::Engine as _;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use revback_ingestion::InboundWebhook;
use revback_shared::{BackfillStatus, BillingSource, IdType};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);

pub struct AppleBackfill {
    api_base: String,
}

impl AppleBackfill {
    pub fn new() -> Self {
        Self {
            api_base: "https://api.storekit.itunes.apple.com".to_string(),
        }
    }

    pub fn with_api_base(mut self, base: String) -> Self {
        self.api_base = base;
        self
    }

    pub async fn run(&self, ctx: &BackfillContext) -> BackfillResult<u64> {
        let token = mint_api_token(&ctx.credentials)?;

        let identities = ctx
            .repos
            .users
            .identities_by_type(
                ctx.org_id,
                BillingSource::Apple.as_str(),
                IdType::OriginalTransactionId.as_str(),
            )
            .await?;

        ctx.progress
            .update(ctx.connection.source, ctx.org_id, |p| {
                p.status = BackfillStatus::ImportingSubscriptions;
                p.total_estimated = Some(identities.len() as u64);
            })
            .await?;

        let mut processed: u64 = 0;
        for identity in &identities {
            ctx.limiter.consume(1, RATE_LIMIT_WAIT).await?;

            let url = format!(
                "{}/inApps/v1/subscriptions/{}",
                self.api_base, identity.external_id
            );
            let response = ctx
                .breaker
                .execute(async {
                    ctx.http
                        .get(&url)
                        .bearer_auth(&token)
                        .timeout(CALL_TIMEOUT)
                        .send()
                        .await
                })
                .await??;

            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(BackfillError::provider_api(
                    "apple",
                    status.as_u16(),
                    response.text().await.unwrap_or_default(),
                ));
            }
            if !status.is_success() {
                ctx.record_error(format!(
                    "transaction {}: HTTP {}",
                    identity.external_id,
                    status.as_u16()
                ))
                .await;
                continue;
            }

            let body: Value = response.json().await?;
            for envelope in synthesize_notifications(&identity.external_id, &body) {
                let webhook = InboundWebhook::new(envelope.to_string());
                match ctx
                    .pipeline
                    .process_trusted(ctx.org_id, BillingSource::Apple, &webhook)
                    .await
                {
                    Ok(_) => {}
                    Err(e) => {
                        ctx.record_error(format!("transaction {}: {e}", identity.external_id))
                            .await;
                    }
                }
            }
            processed += 1;
            ctx.bump_processed().await;
        }

        debug!(processed, "apple backfill complete");
        Ok(processed)
    }
}

impl Default for AppleBackfill {
    fn default() -> Self {
        Self::new()
    }
}

/// App Store Server API bearer token (ES256, 20 minute lifetime)
fn mint_api_token(credentials: &Value) -> BackfillResult<String> {
    let key_id = credentials["key_id"]
        .as_str()
        .ok_or_else(|| BackfillError::Credentials("apple key_id missing".into()))?;
    let issuer_id = credentials["issuer_id"]
        .as_str()
        .ok_or_else(|| BackfillError::Credentials("apple issuer_id missing".into()))?;
    let bundle_id = credentials["bundle_id"]
        .as_str()
        .ok_or_else(|| BackfillError::Credentials("apple bundle_id missing".into()))?;
    let private_key = credentials["private_key"]
        .as_str()
        .ok_or_else(|| BackfillError::Credentials("apple private_key missing".into()))?;

    let now = Utc::now().timestamp();
    let claims = json!({
        "iss": issuer_id,
        "iat": now,
        "exp": now + 1200,
        "aud": "appstoreconnect-v1",
        "bid": bundle_id,
    });
    let mut header = Header::new(Algorithm::ES256);
    header.kid = Some(key_id.to_string());

    let key = EncodingKey::from_ec_pem(private_key.as_bytes())
        .map_err(|e| BackfillError::Credentials(format!("apple private key: {e}")))?;
    jsonwebtoken::encode(&header, &claims, &key)
        .map_err(|e| BackfillError::Credentials(format!("could not sign token: {e}")))
}

/// App Store subscription status → notification (type, subtype)
fn notification_for_status(status: i64) -> Option<(&'static str, Option<&'static str>)> {
    match status {
        1 => Some(("SUBSCRIBED", Some("INITIAL_BUY"))),
        2 => Some(("EXPIRED", None)),
        3 => Some(("DID_FAIL_TO_RENEW", None)),
        4 => Some(("DID_FAIL_TO_RENEW", Some("GRACE_PERIOD"))),
        5 => Some(("REVOKE", None)),
        _ => None,
    }
}

/// Wrap each last-transaction into a synthetic notification envelope. The
/// notification UUID is stable per original transaction, so repeats dedupe.
fn synthesize_notifications(original_transaction_id: &str, body: &Value) -> Vec<Value> {
    let mut envelopes = Vec::new();
    let empty = Vec::new();
    for group in body["data"].as_array().unwrap_or(&empty) {
        for last in group["lastTransactions"].as_array().unwrap_or(&empty) {
            let Some(status) = last["status"].as_i64() else { continue };
            let Some((notification_type, subtype)) = notification_for_status(status) else {
                continue;
            };
            let signed_transaction = last["signedTransactionInfo"].as_str().unwrap_or_default();

            let mut payload = json!({
                "notificationType": notification_type,
                "notificationUUID": format!("backfill-{original_transaction_id}-{status}"),
                "signedDate": Utc::now().timestamp_millis(),
                "data": {
                    "environment": "Production",
                    "signedTransactionInfo": signed_transaction,
                }
            });
            if let Some(subtype) = subtype {
                payload["subtype"] = json!(subtype);
            }

            let header = BASE64_URL.encode(br#"{"alg":"ES256","x5c":[]}"#);
            let body_segment = BASE64_URL.encode(serde_json::to_vec(&payload).unwrap_or_default());
            envelopes.push(json!({
                "signedPayload": format!("{header}.{body_segment}.YmFja2ZpbGw")
            }));
        }
    }
    envelopes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_the_lifecycle() {
        assert_eq!(notification_for_status(1), Some(("SUBSCRIBED", Some("INITIAL_BUY"))));
        assert_eq!(notification_for_status(2), Some(("EXPIRED", None)));
        assert_eq!(notification_for_status(4), Some(("DID_FAIL_TO_RENEW", Some("GRACE_PERIOD"))));
        assert_eq!(notification_for_status(5), Some(("REVOKE", None)));
        assert_eq!(notification_for_status(99), None);
    }

    #[test]
    fn synthetic_envelope_is_jws_shaped_and_stable() {
        let body = json!({
            "data": [{
                "lastTransactions": [{
                    "status": 1,
                    "signedTransactionInfo": "a.b.c"
                }]
            }]
        });
        let first = synthesize_notifications("1000000001", &body);
        assert_eq!(first.len(), 1);
        let token = first[0]["signedPayload"].as_str().unwrap();
        assert_eq!(token.split('.').count(), 3);

        let again = synthesize_notifications("1000000001", &body);
        // the notification UUID (and thus the idempotency key) is stable
        let decode = |v: &Value| {
            let payload = v["signedPayload"].as_str().unwrap().split('.').nth(1).unwrap();
            serde_json::from_slice::<Value>(&BASE64_URL.decode(payload).unwrap()).unwrap()
        };
        assert_eq!(
            decode(&first[0])["notificationUUID"],
            decode(&again[0])["notificationUUID"]
        );
    }

    #[test]
    fn missing_credentials_are_reported() {
        let err = mint_api_token(&json!({"key_id": "K1"})).unwrap_err();
        assert!(matches!(err, BackfillError::Credentials(_)));
    }
}
