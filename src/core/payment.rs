//! Payment webhook processing.
//!
//! A delivery moves through `received → signature verified → idempotency checked →
//! materialized → marked processed`. The marker check, record creation and marker
//! insert share one transaction, and the marker's primary key is the payment intent id,
//! so retried or concurrent deliveries of the same payment never create a second set of
//! gifts or a second challenge. A duplicate answers with the stored outcome.

use crate::{
    config::PaymentsConfig,
    core::{
        claim_code::{CodePolicy, CodeSource, RandomCodeSource, generate_code_pair, generate_unique_code},
        goal::validate_shape,
        notify::{NewNotification, Notifier, Recipient, notify_best_effort},
    },
    entities::{
        Experience, ProcessedPayment,
        experience_gift::{self, GiftStatus},
        processed_payment::{self, IdList},
        valentine_challenge::{self, ChallengeMode, ChallengeStatus},
    },
    errors::{Error, Result},
};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseConnection, EntityTrait, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-ernit-signature";

/// The only event kind that creates records.
pub const SUCCEEDED_EVENT: &str = "payment_intent.succeeded";

fn payload_mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| Error::Config {
        message: format!("invalid webhook secret: {e}"),
    })?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Computes the `v1` signature of a payload: hex HMAC-SHA256 over `"<t>.<payload>"`.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let mac = payload_mac(secret, timestamp, payload)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a `t=<unix>,v1=<hex>` signature header against the raw payload.
///
/// Any `v1` entry may match, which allows secret rotation. Timestamps further than
/// `tolerance_seconds` from `now` are rejected to limit replay.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: DateTime<Utc>,
    tolerance_seconds: i64,
) -> Result<()> {
    let invalid = |message: &str| Error::InvalidSignature {
        message: message.to_string(),
    };

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| invalid("missing or malformed timestamp"))?;
    if signatures.is_empty() {
        return Err(invalid("missing v1 signature"));
    }
    if (now.timestamp() - timestamp).abs() > tolerance_seconds {
        return Err(invalid("timestamp outside tolerance"));
    }

    for signature in signatures {
        let Ok(expected) = hex::decode(signature) else {
            continue;
        };
        if payload_mac(secret, timestamp, payload)?
            .verify_slice(&expected)
            .is_ok()
        {
            return Ok(());
        }
    }

    Err(invalid("no signature matches the payload"))
}

/// A webhook event as delivered by the payment provider.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    /// Event id
    pub id: String,
    /// Event kind, e.g. `payment_intent.succeeded`
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload
    pub data: PaymentEventData,
}

/// Wrapper around the event's object.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEventData {
    /// The payment intent the event is about
    pub object: PaymentIntent,
}

/// The paid intent and the purchase metadata attached at checkout.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    /// Payment intent id, the idempotency key
    pub id: String,
    /// Amount in the smallest currency unit
    #[serde(default)]
    pub amount: i64,
    /// Checkout metadata, all values are strings
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// One cart line of a standard purchase.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    /// Experience bought
    pub experience_id: String,
    /// Units bought; each unit becomes one gift
    pub quantity: u32,
}

/// Purchase described by the intent's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purchase {
    /// Gifts, one per purchased unit
    Standard {
        /// Cart lines
        cart: Vec<CartItem>,
        /// Buyer
        giver_id: String,
        /// Buyer's display name
        giver_name: Option<String>,
        /// Message shown to recipients
        personal_message: Option<String>,
    },
    /// One paired challenge
    Valentine {
        /// Where the two codes are sent
        purchaser_email: String,
        /// Buyer's display name
        purchaser_name: Option<String>,
        /// Shared experience
        experience_id: String,
        /// Whether the partner sees the experience
        mode: ChallengeMode,
        /// Weeks each partner must complete
        target_count: i32,
        /// Sessions per week
        sessions_per_week: i32,
    },
}

fn required<'a>(metadata: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    metadata
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::validation(format!("metadata field '{key}' is required")))
}

fn optional(metadata: &HashMap<String, String>, key: &str) -> Option<String> {
    metadata
        .get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn number(metadata: &HashMap<String, String>, key: &str) -> Result<i32> {
    required(metadata, key)?
        .parse()
        .map_err(|_| Error::validation(format!("metadata field '{key}' must be a number")))
}

impl Purchase {
    /// Parses and validates checkout metadata.
    pub fn from_metadata(metadata: &HashMap<String, String>) -> Result<Self> {
        match required(metadata, "purchase_type")? {
            "standard" => {
                let cart: Vec<CartItem> = serde_json::from_str(required(metadata, "cart")?)
                    .map_err(|e| Error::validation(format!("cart is malformed: {e}")))?;
                if cart.is_empty() {
                    return Err(Error::validation("cart is empty"));
                }
                if let Some(item) = cart.iter().find(|item| item.quantity == 0) {
                    return Err(Error::validation(format!(
                        "cart line for '{}' has zero quantity",
                        item.experience_id
                    )));
                }
                Ok(Self::Standard {
                    cart,
                    giver_id: required(metadata, "giver_id")?.to_string(),
                    giver_name: optional(metadata, "giver_name"),
                    personal_message: optional(metadata, "personal_message"),
                })
            }
            "valentine" => {
                let purchaser_email = required(metadata, "purchaser_email")?.to_string();
                if !purchaser_email.contains('@') {
                    return Err(Error::validation("purchaser_email is not an email address"));
                }
                let mode = required(metadata, "mode")?
                    .parse::<ChallengeMode>()
                    .map_err(Error::validation)?;
                let target_count = number(metadata, "target_count")?;
                let sessions_per_week = number(metadata, "sessions_per_week")?;
                validate_shape(target_count, sessions_per_week)?;

                Ok(Self::Valentine {
                    purchaser_email,
                    purchaser_name: optional(metadata, "purchaser_name"),
                    experience_id: required(metadata, "experience_id")?.to_string(),
                    mode,
                    target_count,
                    sessions_per_week,
                })
            }
            other => Err(Error::validation(format!("unknown purchase_type '{other}'"))),
        }
    }

    const fn purchase_type(&self) -> &'static str {
        match self {
            Self::Standard { .. } => "standard",
            Self::Valentine { .. } => "valentine",
        }
    }
}

/// Records created for a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Gifts of a standard purchase
    Gifts {
        /// Payment intent id
        payment_intent_id: String,
        /// Created gift ids
        gift_ids: Vec<i64>,
    },
    /// Challenge of a Valentine purchase
    Challenge {
        /// Payment intent id
        payment_intent_id: String,
        /// Created challenge id
        challenge_id: i64,
    },
}

impl PaymentOutcome {
    fn from_marker(marker: processed_payment::Model) -> Self {
        match marker.challenge_id {
            Some(challenge_id) => Self::Challenge {
                payment_intent_id: marker.payment_intent_id,
                challenge_id,
            },
            None => Self::Gifts {
                payment_intent_id: marker.payment_intent_id,
                gift_ids: marker.gift_ids.0,
            },
        }
    }
}

/// Result of materializing a payment.
#[derive(Debug, Clone)]
pub struct Materialized {
    /// The records of the payment
    pub outcome: PaymentOutcome,
    /// `false` when the payment had already been processed
    pub newly_created: bool,
    /// The challenge created by this call, for the purchaser notification
    pub challenge: Option<valentine_challenge::Model>,
}

/// How a webhook delivery was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The payment's records exist (created now or earlier)
    Processed {
        /// The records
        outcome: PaymentOutcome,
    },
    /// The event kind does not create records
    Ignored {
        /// Event kind received
        event_type: String,
    },
}

async fn ensure_experience<C>(db: &C, experience_id: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    if Experience::find_by_id(experience_id.to_string())
        .one(db)
        .await?
        .is_none()
    {
        return Err(Error::validation(format!(
            "unknown experience '{experience_id}'"
        )));
    }
    Ok(())
}

async fn create_records<C>(
    db: &C,
    payment_intent_id: &str,
    purchase: Purchase,
    source: &mut dyn CodeSource,
    config: &PaymentsConfig,
    now: DateTime<Utc>,
) -> Result<(Vec<i64>, Option<valentine_challenge::Model>)>
where
    C: ConnectionTrait,
{
    let policy = CodePolicy::from(config);

    match purchase {
        Purchase::Standard {
            cart,
            giver_id,
            giver_name,
            personal_message,
        } => {
            for item in &cart {
                ensure_experience(db, &item.experience_id).await?;
            }

            let expires_at = now + Duration::days(config.gift_expiry_days);
            let mut gift_ids = Vec::new();
            for item in cart {
                for _ in 0..item.quantity {
                    let claim_code = generate_unique_code(db, source, policy, &[]).await?;
                    let gift = experience_gift::ActiveModel {
                        claim_code: Set(claim_code),
                        experience_id: Set(item.experience_id.clone()),
                        giver_id: Set(giver_id.clone()),
                        giver_name: Set(giver_name.clone()),
                        personal_message: Set(personal_message.clone()),
                        status: Set(GiftStatus::Pending),
                        payment_intent_id: Set(payment_intent_id.to_string()),
                        claimed_by: Set(None),
                        claimed_at: Set(None),
                        expires_at: Set(expires_at),
                        created_at: Set(now),
                        ..Default::default()
                    }
                    .insert(db)
                    .await?;
                    gift_ids.push(gift.id);
                }
            }
            Ok((gift_ids, None))
        }
        Purchase::Valentine {
            purchaser_email,
            purchaser_name,
            experience_id,
            mode,
            target_count,
            sessions_per_week,
        } => {
            ensure_experience(db, &experience_id).await?;
            let (purchaser_code, partner_code) = generate_code_pair(db, source, policy).await?;

            let challenge = valentine_challenge::ActiveModel {
                purchaser_code: Set(purchaser_code),
                partner_code: Set(partner_code),
                purchaser_code_redeemed: Set(false),
                partner_code_redeemed: Set(false),
                purchaser_user_id: Set(None),
                partner_user_id: Set(None),
                purchaser_goal_id: Set(None),
                partner_goal_id: Set(None),
                purchaser_email: Set(purchaser_email),
                purchaser_name: Set(purchaser_name),
                experience_id: Set(experience_id),
                mode: Set(mode),
                target_count: Set(target_count),
                sessions_per_week: Set(sessions_per_week),
                status: Set(ChallengeStatus::PendingRedemption),
                payment_intent_id: Set(payment_intent_id.to_string()),
                created_at: Set(now),
                ..Default::default()
            }
            .insert(db)
            .await?;
            Ok((Vec::new(), Some(challenge)))
        }
    }
}

/// Creates the records of a payment exactly once.
///
/// A payment with a marker returns the stored outcome without writing. A delivery that
/// loses the race to insert the marker rolls back and returns the winner's outcome.
#[instrument(skip(db, purchase, source, config))]
pub async fn materialize_payment(
    db: &DatabaseConnection,
    payment_intent_id: &str,
    purchase: Purchase,
    source: &mut dyn CodeSource,
    config: &PaymentsConfig,
    now: DateTime<Utc>,
) -> Result<Materialized> {
    let txn = db.begin().await?;

    if let Some(marker) = ProcessedPayment::find_by_id(payment_intent_id.to_string())
        .one(&txn)
        .await?
    {
        info!("Payment already processed, returning stored outcome");
        return Ok(Materialized {
            outcome: PaymentOutcome::from_marker(marker),
            newly_created: false,
            challenge: None,
        });
    }

    let purchase_type = purchase.purchase_type();
    let (gift_ids, challenge) =
        create_records(&txn, payment_intent_id, purchase, source, config, now).await?;

    let marker = processed_payment::ActiveModel {
        payment_intent_id: Set(payment_intent_id.to_string()),
        purchase_type: Set(purchase_type.to_string()),
        gift_ids: Set(IdList(gift_ids)),
        challenge_id: Set(challenge.as_ref().map(|c| c.id)),
        processed_at: Set(now),
    };
    let marked = match marker.insert(&txn).await {
        Ok(marker) => txn.commit().await.map(|()| marker),
        Err(e) => {
            drop(txn);
            Err(e)
        }
    };

    match marked {
        Ok(marker) => {
            info!(purchase_type, "Payment materialized");
            Ok(Materialized {
                outcome: PaymentOutcome::from_marker(marker),
                newly_created: true,
                challenge,
            })
        }
        Err(e) => {
            let Some(marker) = ProcessedPayment::find_by_id(payment_intent_id.to_string())
                .one(db)
                .await?
            else {
                return Err(e.into());
            };
            warn!("Lost the race to a concurrent delivery, returning its outcome");
            Ok(Materialized {
                outcome: PaymentOutcome::from_marker(marker),
                newly_created: false,
                challenge: None,
            })
        }
    }
}

fn challenge_codes_notification(challenge: &valentine_challenge::Model) -> NewNotification {
    let mode_note = match challenge.mode {
        ChallengeMode::Revealed => "Your partner will see the experience you picked.",
        ChallengeMode::Secret => "The experience stays a secret until you both finish.",
    };
    NewNotification {
        recipient: Recipient::Email(challenge.purchaser_email.clone()),
        kind: "valentine_codes".to_string(),
        title: "Your Valentine's Challenge codes".to_string(),
        body: format!(
            "Your code: {}\nYour partner's code: {}\n{} weeks, {} sessions per week. {mode_note}",
            challenge.purchaser_code,
            challenge.partner_code,
            challenge.target_count,
            challenge.sessions_per_week,
        ),
        goal_id: None,
    }
}

/// Entry point for webhook deliveries.
#[derive(Clone)]
pub struct PaymentProcessor {
    db: DatabaseConnection,
    notifier: Arc<dyn Notifier>,
    secret: String,
    config: PaymentsConfig,
}

impl PaymentProcessor {
    /// Creates a processor verifying signatures with `secret`.
    pub fn new(
        db: DatabaseConnection,
        notifier: Arc<dyn Notifier>,
        secret: impl Into<String>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            db,
            notifier,
            secret: secret.into(),
            config,
        }
    }

    /// Verifies and processes a raw delivery.
    ///
    /// Signature and payload errors abort before anything is written.
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        let header = signature.ok_or_else(|| Error::InvalidSignature {
            message: format!("missing {SIGNATURE_HEADER} header"),
        })?;
        verify_signature(
            payload,
            header,
            &self.secret,
            now,
            self.config.signature_tolerance_seconds,
        )?;

        let event: PaymentEvent = serde_json::from_slice(payload)?;
        let mut source = RandomCodeSource;
        self.process_event(event, &mut source, now).await
    }

    /// Processes an already verified event.
    #[instrument(skip(self, event, source), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process_event(
        &self,
        event: PaymentEvent,
        source: &mut dyn CodeSource,
        now: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        if event.event_type != SUCCEEDED_EVENT {
            info!("Ignoring payment event");
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let intent = event.data.object;
        let purchase = Purchase::from_metadata(&intent.metadata)?;
        let materialized =
            materialize_payment(&self.db, &intent.id, purchase, source, &self.config, now).await?;

        if let Some(challenge) = materialized.challenge.as_ref().filter(|_| materialized.newly_created) {
            notify_best_effort(self.notifier.as_ref(), challenge_codes_notification(challenge)).await;
        }

        Ok(WebhookOutcome::Processed {
            outcome: materialized.outcome,
        })
    }
}
