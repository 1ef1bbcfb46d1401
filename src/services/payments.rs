use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::models::Transaction;
use crate::domain::{PaymentAmounts, TransactionStatus};
use crate::error::{AppError, AppResult};
use crate::external::{ExternalError, PaymentGateway, Source, SourceStatus};
use crate::extractors::CurrentUser;
use crate::state::DbPool;

use super::{users, write_tx};

pub const CURRENCY: &str = "PHP";

/// A settlement claim older than this belongs to a delivery that never finished.
pub const SETTLEMENT_LEASE_SECS: i64 = 120;

#[derive(Debug, Clone, Deserialize)]
pub struct NewSource {
    pub user_id: String,
    pub base_amount: Decimal,
}

/// A validated payment request, ready to be sent to the gateway.
#[derive(Debug, Clone)]
pub struct PreparedSource {
    pub user_subject: String,
    pub amounts: PaymentAmounts,
    pub amount_minor: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceCreated {
    pub source_id: String,
    pub checkout_url: Option<String>,
    #[serde(flatten)]
    pub amounts: PaymentAmounts,
    pub amount_minor: i64,
}

/// Callers pay for themselves; admins may pay on behalf of anyone.
fn authorize_payer(caller: &CurrentUser, payer: &str) -> AppResult<()> {
    if !caller.is_admin() && caller.subject != payer {
        return Err(AppError::forbidden("You can only create payments for yourself"));
    }
    Ok(())
}

pub fn authorize_reader(caller: &CurrentUser, owner: Option<&str>) -> AppResult<()> {
    if caller.is_admin() || owner == Some(caller.subject.as_str()) {
        return Ok(());
    }
    Err(AppError::forbidden("You can only view your own payments"))
}

pub fn prepare_source(conn: &Connection, caller: &CurrentUser, input: &NewSource) -> AppResult<PreparedSource> {
    let payer = input.user_id.trim();
    authorize_payer(caller, payer)?;
    users::get_user(conn, payer)?;

    let amounts = PaymentAmounts::from_base(input.base_amount)
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let amount_minor = amounts
        .total_minor()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(PreparedSource {
        user_subject: payer.to_string(),
        amounts,
        amount_minor,
    })
}

/// Persists a freshly created gateway source as a pending transaction.
pub fn record_source(conn: &Connection, prepared: &PreparedSource, source: &Source) -> AppResult<SourceCreated> {
    if source.status != SourceStatus::Pending {
        return Err(ExternalError::UnexpectedResponse(format!(
            "new source {} is {:?}, expected pending",
            source.id, source.status
        ))
        .into());
    }
    if source.amount_minor != prepared.amount_minor {
        tracing::warn!(
            "Source {} amount {} differs from requested {}",
            source.id,
            source.amount_minor,
            prepared.amount_minor
        );
    }

    let base = prepared
        .amounts
        .base_minor()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let interest = prepared
        .amounts
        .interest_minor()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    let now = Utc::now();
    conn.execute(
        "INSERT INTO transactions (user_subject, base_amount_minor, interest_amount_minor,
            total_amount_minor, currency, source_id, checkout_url, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        params![
            prepared.user_subject,
            base,
            interest,
            prepared.amount_minor,
            CURRENCY,
            source.id,
            source.checkout_url,
            TransactionStatus::Pending,
            now
        ],
    )?;

    tracing::info!(
        "Payment source {} created for {} ({} minor units)",
        source.id,
        prepared.user_subject,
        prepared.amount_minor
    );
    Ok(SourceCreated {
        source_id: source.id.clone(),
        checkout_url: source.checkout_url.clone(),
        amounts: prepared.amounts,
        amount_minor: prepared.amount_minor,
    })
}

pub fn find_by_source(conn: &Connection, source_id: &str) -> AppResult<Option<Transaction>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM transactions WHERE source_id = ?1", Transaction::COLUMNS),
            params![source_id],
            Transaction::from_row,
        )
        .optional()?)
}

pub fn get_by_source(conn: &Connection, source_id: &str) -> AppResult<Transaction> {
    find_by_source(conn, source_id)?.ok_or_else(|| AppError::not_found("Transaction not found"))
}

pub fn list_for_user(conn: &Connection, subject: &str) -> AppResult<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions WHERE user_subject = ?1 ORDER BY created_at DESC, id DESC",
        Transaction::COLUMNS
    ))?;
    let rows = stmt
        .query_map(params![subject], Transaction::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Moves a pending transaction to paid. Returns false if it was no longer pending.
pub fn mark_paid(conn: &Connection, source_id: &str, payment_id: &str) -> AppResult<bool> {
    let changed = conn.execute(
        "UPDATE transactions SET status = ?1, payment_id = ?2, updated_at = ?3, settling_at = NULL
         WHERE source_id = ?4 AND status = ?5",
        params![
            TransactionStatus::Paid,
            payment_id,
            Utc::now(),
            source_id,
            TransactionStatus::Pending
        ],
    )?;
    Ok(changed == 1)
}

pub fn mark_failed(conn: &Connection, source_id: &str) -> AppResult<bool> {
    let changed = conn.execute(
        "UPDATE transactions SET status = ?1, updated_at = ?2, settling_at = NULL
         WHERE source_id = ?3 AND status = ?4",
        params![
            TransactionStatus::Failed,
            Utc::now(),
            source_id,
            TransactionStatus::Pending
        ],
    )?;
    Ok(changed == 1)
}

// -- Webhook --

pub const SOURCE_CHARGEABLE: &str = "source.chargeable";

/// Gateway event envelope: `{"data": {"attributes": {"type", "data": {"id"}}}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
struct EventData {
    attributes: EventAttributes,
}

#[derive(Debug, Clone, Deserialize)]
struct EventAttributes {
    #[serde(rename = "type")]
    kind: String,
    data: Option<EventResource>,
}

#[derive(Debug, Clone, Deserialize)]
struct EventResource {
    id: String,
}

impl WebhookEvent {
    pub fn kind(&self) -> &str {
        &self.data.attributes.kind
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.data.attributes.data.as_ref().map(|r| r.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event type we do not act on.
    Ignored,
    /// The transaction was already settled by an earlier delivery.
    AlreadyPaid,
    /// Another delivery of the same event holds the settlement lease.
    InProgress,
    Paid { payment_id: String },
}

enum Claim {
    Claimed(Transaction),
    AlreadyPaid,
    InProgress,
}

/// Reads the transaction and, in the same write transaction, takes the settlement
/// lease on it. Only the delivery holding the lease talks to the gateway.
fn claim_settlement(conn: &mut Connection, source_id: &str, now: DateTime<Utc>) -> AppResult<Claim> {
    let tx = write_tx(conn)?;
    let transaction = get_by_source(&tx, source_id)?;
    match transaction.status {
        TransactionStatus::Paid => return Ok(Claim::AlreadyPaid),
        TransactionStatus::Failed => {
            return Err(AppError::bad_request("Transaction has already failed"))
        }
        TransactionStatus::Pending => {}
    }
    let stale_before = now - Duration::seconds(SETTLEMENT_LEASE_SECS);
    let claimed = tx.execute(
        "UPDATE transactions SET settling_at = ?1
         WHERE source_id = ?2 AND status = ?3 AND (settling_at IS NULL OR settling_at < ?4)",
        params![now, source_id, TransactionStatus::Pending, stale_before],
    )?;
    tx.commit()?;
    Ok(if claimed == 1 {
        Claim::Claimed(transaction)
    } else {
        Claim::InProgress
    })
}

fn release_settlement(conn: &Connection, source_id: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE transactions SET settling_at = NULL WHERE source_id = ?1 AND status = ?2",
        params![source_id, TransactionStatus::Pending],
    )?;
    Ok(())
}

/// Settles the transaction behind a chargeable source.
///
/// The lease taken up front keeps concurrent deliveries of the same event away from
/// the gateway; a failed attempt gives the lease back so the gateway's retry can settle.
pub async fn handle_event(
    pool: &DbPool,
    gateway: &dyn PaymentGateway,
    event: &WebhookEvent,
) -> AppResult<WebhookOutcome> {
    if event.kind() != SOURCE_CHARGEABLE {
        tracing::debug!("Ignoring webhook event {}", event.kind());
        return Ok(WebhookOutcome::Ignored);
    }
    let source_id = event
        .resource_id()
        .ok_or_else(|| AppError::bad_request("Event is missing the source"))?;

    let transaction = match claim_settlement(&mut *pool.get()?, source_id, Utc::now())? {
        Claim::Claimed(transaction) => transaction,
        Claim::AlreadyPaid => {
            tracing::info!("Source {} already settled, ignoring replay", source_id);
            return Ok(WebhookOutcome::AlreadyPaid);
        }
        Claim::InProgress => {
            tracing::info!("Source {} is being settled by another delivery", source_id);
            return Ok(WebhookOutcome::InProgress);
        }
    };

    let settled = settle(pool, gateway, source_id, &transaction).await;
    if settled.is_err() {
        if let Err(e) = pool
            .get()
            .map_err(AppError::from)
            .and_then(|conn| release_settlement(&conn, source_id))
        {
            tracing::error!("Could not release settlement of {}: {}", source_id, e);
        }
    }
    settled
}

async fn settle(
    pool: &DbPool,
    gateway: &dyn PaymentGateway,
    source_id: &str,
    transaction: &Transaction,
) -> AppResult<WebhookOutcome> {
    let source = gateway.retrieve_source(source_id).await?;
    let payment = match source.status {
        SourceStatus::Paid => gateway
            .find_payment_by_source(source_id)
            .await?
            .ok_or_else(|| {
                AppError::from(ExternalError::UnexpectedResponse(format!(
                    "source {source_id} is paid but has no payment"
                )))
            })?,
        SourceStatus::Chargeable => {
            let description = format!("RentXpert payment {}", transaction.id);
            gateway
                .create_payment(source_id, transaction.amount_minor, &description)
                .await?
        }
        SourceStatus::Cancelled | SourceStatus::Expired => {
            mark_failed(&*pool.get()?, source_id)?;
            tracing::warn!("Source {} ended as {:?}", source_id, source.status);
            return Err(AppError::bad_request("Source was not completed"));
        }
        SourceStatus::Pending | SourceStatus::Other => {
            return Err(AppError::bad_request("Source is not chargeable"));
        }
    };

    if mark_paid(&*pool.get()?, source_id, &payment.id)? {
        tracing::info!("Transaction {} paid with {}", transaction.id, payment.id);
        Ok(WebhookOutcome::Paid {
            payment_id: payment.id,
        })
    } else {
        tracing::info!("Source {} settled concurrently", source_id);
        Ok(WebhookOutcome::AlreadyPaid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserType;
    use crate::external::{Payment, Redirects};
    use crate::services::testing;
    use async_trait::async_trait;
    use std::str::FromStr;
    use std::sync::Mutex;

    /// Gateway that reports a fixed source status and counts payments. Source lookups
    /// can be slowed down or made to fail a number of times.
    struct StubGateway {
        status: SourceStatus,
        lookup_delay: Option<std::time::Duration>,
        lookup_failures: Mutex<u32>,
        payments_created: Mutex<u32>,
    }

    impl StubGateway {
        fn new(status: SourceStatus) -> Self {
            Self {
                status,
                lookup_delay: None,
                lookup_failures: Mutex::new(0),
                payments_created: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_source(&self, amount_minor: i64, _: &Redirects) -> Result<Source, ExternalError> {
            Ok(Source {
                id: "src_1".into(),
                status: SourceStatus::Pending,
                amount_minor,
                checkout_url: Some("https://pay/checkout".into()),
            })
        }

        async fn retrieve_source(&self, source_id: &str) -> Result<Source, ExternalError> {
            if let Some(delay) = self.lookup_delay {
                tokio::time::sleep(delay).await;
            }
            {
                let mut failures = self.lookup_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(ExternalError::Unavailable("payment gateway".into()));
                }
            }
            Ok(Source {
                id: source_id.into(),
                status: self.status,
                amount_minor: 100_200,
                checkout_url: None,
            })
        }

        async fn create_payment(&self, _: &str, _: i64, _: &str) -> Result<Payment, ExternalError> {
            *self.payments_created.lock().unwrap() += 1;
            Ok(Payment {
                id: "pay_new".into(),
                status: "paid".into(),
            })
        }

        async fn find_payment_by_source(&self, _: &str) -> Result<Option<Payment>, ExternalError> {
            Ok(Some(Payment {
                id: "pay_existing".into(),
                status: "paid".into(),
            }))
        }
    }

    fn caller(subject: &str, role: UserType) -> CurrentUser {
        CurrentUser {
            subject: subject.into(),
            email: format!("{subject}@example.com"),
            role,
        }
    }

    fn thousand(user: &str) -> NewSource {
        NewSource {
            user_id: user.into(),
            base_amount: Decimal::from_str("1000.00").unwrap(),
        }
    }

    fn event(kind: &str, source_id: &str) -> WebhookEvent {
        serde_json::from_value(serde_json::json!({
            "data": {"id": "evt_1", "attributes": {"type": kind, "data": {"id": source_id}}}
        }))
        .unwrap()
    }

    async fn pending_source(pool: &DbPool, gateway: &StubGateway) {
        let conn = pool.get().unwrap();
        testing::tenant(&conn, "u1");
        let prepared = prepare_source(&conn, &caller("u1", UserType::Tenant), &thousand("u1")).unwrap();
        let redirects = Redirects {
            success: "s".into(),
            failed: "f".into(),
        };
        let source = gateway.create_source(prepared.amount_minor, &redirects).await.unwrap();
        record_source(&conn, &prepared, &source).unwrap();
    }

    #[tokio::test]
    async fn records_pending_source_with_interest() {
        let pool = testing::pool();
        pending_source(&pool, &StubGateway::new(SourceStatus::Chargeable)).await;

        let conn = pool.get().unwrap();
        let tx = get_by_source(&conn, "src_1").unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.interest_amount, Decimal::from_str("2.00").unwrap());
        assert_eq!(tx.total_amount, Decimal::from_str("1002.00").unwrap());
        assert_eq!(tx.amount_minor, 100_200);
        assert!(tx.payment_id.is_none());
        assert_eq!(list_for_user(&conn, "u1").unwrap().len(), 1);
    }

    #[test]
    fn payer_must_be_caller_unless_admin() {
        let pool = testing::pool();
        let conn = pool.get().unwrap();
        testing::tenant(&conn, "u1");

        assert!(matches!(
            prepare_source(&conn, &caller("u2", UserType::Tenant), &thousand("u1")),
            Err(AppError::Forbidden(_))
        ));
        assert!(prepare_source(&conn, &caller("admin:1", UserType::Admin), &thousand("u1")).is_ok());
        assert!(matches!(
            prepare_source(&conn, &caller("admin:1", UserType::Admin), &thousand("ghost")),
            Err(AppError::NotFound(_))
        ));

        let mut zero = thousand("u1");
        zero.base_amount = Decimal::ZERO;
        assert!(matches!(
            prepare_source(&conn, &caller("u1", UserType::Tenant), &zero),
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn chargeable_source_creates_one_payment() {
        let pool = testing::pool();
        let gateway = StubGateway::new(SourceStatus::Chargeable);
        pending_source(&pool, &gateway).await;

        let outcome = handle_event(&pool, &gateway, &event(SOURCE_CHARGEABLE, "src_1")).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Paid {
                payment_id: "pay_new".into()
            }
        );
        let replay = handle_event(&pool, &gateway, &event(SOURCE_CHARGEABLE, "src_1")).await.unwrap();
        assert_eq!(replay, WebhookOutcome::AlreadyPaid);
        assert_eq!(*gateway.payments_created.lock().unwrap(), 1);

        let tx = get_by_source(&pool.get().unwrap(), "src_1").unwrap();
        assert_eq!(tx.status, TransactionStatus::Paid);
        assert_eq!(tx.payment_id.as_deref(), Some("pay_new"));
    }

    #[tokio::test]
    async fn concurrent_deliveries_charge_once() {
        let pool = testing::pool();
        let mut gateway = StubGateway::new(SourceStatus::Chargeable);
        gateway.lookup_delay = Some(std::time::Duration::from_millis(50));
        pending_source(&pool, &gateway).await;

        let chargeable = event(SOURCE_CHARGEABLE, "src_1");
        let (first, second) = tokio::join!(
            handle_event(&pool, &gateway, &chargeable),
            handle_event(&pool, &gateway, &chargeable)
        );
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|o| matches!(o, WebhookOutcome::Paid { .. }));
        assert_eq!(outcomes[0], WebhookOutcome::InProgress);
        assert_eq!(
            outcomes[1],
            WebhookOutcome::Paid {
                payment_id: "pay_new".into()
            }
        );
        assert_eq!(*gateway.payments_created.lock().unwrap(), 1);

        let replay = handle_event(&pool, &gateway, &chargeable).await.unwrap();
        assert_eq!(replay, WebhookOutcome::AlreadyPaid);
    }

    #[tokio::test]
    async fn gateway_failure_releases_the_claim() {
        let pool = testing::pool();
        let gateway = StubGateway::new(SourceStatus::Chargeable);
        *gateway.lookup_failures.lock().unwrap() = 1;
        pending_source(&pool, &gateway).await;

        let chargeable = event(SOURCE_CHARGEABLE, "src_1");
        assert!(matches!(
            handle_event(&pool, &gateway, &chargeable).await,
            Err(AppError::External(_))
        ));
        // The retry is not locked out by the failed attempt
        let retry = handle_event(&pool, &gateway, &chargeable).await.unwrap();
        assert!(matches!(retry, WebhookOutcome::Paid { .. }));
        assert_eq!(*gateway.payments_created.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn abandoned_claim_expires() {
        let pool = testing::pool();
        let gateway = StubGateway::new(SourceStatus::Chargeable);
        pending_source(&pool, &gateway).await;

        let long_ago = Utc::now() - Duration::seconds(SETTLEMENT_LEASE_SECS + 1);
        let mut conn = pool.get().unwrap();
        assert!(matches!(
            claim_settlement(&mut conn, "src_1", long_ago).unwrap(),
            Claim::Claimed(_)
        ));
        assert!(matches!(
            claim_settlement(&mut conn, "src_1", Utc::now()).unwrap(),
            Claim::Claimed(_)
        ));
        assert!(matches!(
            claim_settlement(&mut conn, "src_1", Utc::now()).unwrap(),
            Claim::InProgress
        ));
    }

    #[tokio::test]
    async fn paid_source_reuses_existing_payment() {
        let pool = testing::pool();
        let gateway = StubGateway::new(SourceStatus::Paid);
        pending_source(&pool, &gateway).await;

        let outcome = handle_event(&pool, &gateway, &event(SOURCE_CHARGEABLE, "src_1")).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Paid {
                payment_id: "pay_existing".into()
            }
        );
        assert_eq!(*gateway.payments_created.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn other_states_are_rejected_and_other_events_ignored() {
        let pool = testing::pool();
        let gateway = StubGateway::new(SourceStatus::Expired);
        pending_source(&pool, &gateway).await;

        assert_eq!(
            handle_event(&pool, &gateway, &event("payment.paid", "pay_1")).await.unwrap(),
            WebhookOutcome::Ignored
        );
        assert!(matches!(
            handle_event(&pool, &gateway, &event(SOURCE_CHARGEABLE, "src_1")).await,
            Err(AppError::BadRequest(_))
        ));
        let tx = get_by_source(&pool.get().unwrap(), "src_1").unwrap();
        assert_eq!(tx.status, TransactionStatus::Failed);

        assert!(matches!(
            handle_event(&pool, &gateway, &event(SOURCE_CHARGEABLE, "src_unknown")).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn readers_see_only_their_own() {
        assert!(authorize_reader(&caller("u1", UserType::Tenant), Some("u1")).is_ok());
        assert!(authorize_reader(&caller("admin:1", UserType::Admin), Some("u1")).is_ok());
        assert!(matches!(
            authorize_reader(&caller("u2", UserType::Tenant), Some("u1")),
            Err(AppError::Forbidden(_))
        ));
    }
}
