// Periodic background tasks. Each pass owns its own short database work and
// coordinates with other passes only through row flags (`notified`, `expires_at`).
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::{AccountStatus, ApartmentStatus};
use crate::error::AppResult;
use crate::external::PushNotifier;
use crate::services::{inquiries, write_tx};
use crate::state::{AppState, DbPool};

#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ReminderReport {
    pub notified: usize,
    /// Tenants without a registered device; marked so they are not retried forever.
    pub without_device: usize,
    pub failed: usize,
}

/// Sends one reminder per due inquiry. `notified` is only set after a successful send,
/// so failed deliveries are retried on the next pass.
pub async fn run_reminders(
    pool: &DbPool,
    push: &dyn PushNotifier,
    now: DateTime<Utc>,
) -> AppResult<ReminderReport> {
    let due = inquiries::due_reminders(&*pool.get()?, now)?;
    let mut report = ReminderReport::default();

    for reminder in due {
        let Some(token) = reminder.push_token.as_deref() else {
            tracing::info!(
                "Tenant {} has no device for inquiry {} reminder",
                reminder.tenant_subject,
                reminder.inquiry_id
            );
            if inquiries::mark_notified(&*pool.get()?, reminder.inquiry_id)? {
                report.without_device += 1;
            }
            continue;
        };

        match push.send(token, reminder.title(), &reminder.body()).await {
            Ok(()) => {
                if inquiries::mark_notified(&*pool.get()?, reminder.inquiry_id)? {
                    report.notified += 1;
                }
            }
            Err(e) => {
                tracing::warn!("Reminder for inquiry {} failed: {}", reminder.inquiry_id, e);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExpirationReport {
    pub users: usize,
    pub apartments: usize,
    pub inquiries: usize,
}

/// Physically removes soft-deleted rows past `expires_at` (dependents go through
/// ON DELETE CASCADE) and expires reminded inquiries, in one transaction.
pub fn run_expiration(conn: &mut Connection, now: DateTime<Utc>) -> AppResult<ExpirationReport> {
    let tx = write_tx(conn)?;
    let apartments = tx.execute(
        "DELETE FROM apartments WHERE status = ?1 AND expires_at < ?2",
        params![ApartmentStatus::Deleted, now],
    )?;
    let users = tx.execute(
        "DELETE FROM users WHERE account_status = ?1 AND expires_at < ?2",
        params![AccountStatus::Deleted, now],
    )?;
    let inquiries = inquiries::expire_stale(&tx, now)?;
    tx.commit()?;
    Ok(ExpirationReport {
        users,
        apartments,
        inquiries,
    })
}

/// Starts both sweepers. They stop when `shutdown` flips to true.
pub fn spawn(state: &AppState, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    let config = &state.config.sweepers;
    if !config.enabled {
        tracing::info!("Background sweepers disabled");
        return Vec::new();
    }

    let reminders = {
        let state = state.clone();
        let shutdown = shutdown.clone();
        let period = Duration::from_secs(config.reminder_interval_secs.max(1));
        tokio::spawn(every(period, shutdown, "inquiry reminder", move || {
            let state = state.clone();
            async move {
                match run_reminders(&state.db, state.push.as_ref(), Utc::now()).await {
                    Ok(report) if report != ReminderReport::default() => {
                        tracing::info!("Inquiry reminders: {:?}", report)
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Inquiry reminder sweep failed: {}", e),
                }
            }
        }))
    };

    let expiration = {
        let pool = state.db.clone();
        let period = Duration::from_secs(config.expiration_interval_secs.max(1));
        tokio::spawn(every(period, shutdown, "expiration", move || {
            let pool = pool.clone();
            async move {
                let result = tokio::task::spawn_blocking(move || {
                    let mut conn = pool.get()?;
                    run_expiration(&mut conn, Utc::now())
                })
                .await;
                match result {
                    Ok(Ok(report)) if report != ExpirationReport::default() => {
                        tracing::info!("Expiration sweep: {:?}", report)
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!("Expiration sweep failed: {}", e),
                    Err(e) => tracing::error!("Expiration sweep panicked: {}", e),
                }
            }
        }))
    };

    vec![reminders, expiration]
}

async fn every<F, Fut>(period: Duration, mut shutdown: watch::Receiver<bool>, name: &'static str, mut pass: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!("Started {} sweeper (every {:?})", name, period);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                tracing::info!("{} sweeper shutting down", name);
                break;
            }
            _ = interval.tick() => pass().await,
        }
    }
}
