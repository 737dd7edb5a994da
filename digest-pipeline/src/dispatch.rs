use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::Tz;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            email_digest::{DigestStatus, EmailDigest},
            email_preferences::{EmailPreferences, NoActivityPolicy},
            email_suppression::EmailSuppression,
            insight::Insight,
            profile::Profile,
        },
    },
    utils::{config::AppConfig, llm::OpenAIClientType},
};
use serde::Serialize;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{info, warn};

use crate::{
    brevo::{is_retryable_send_error, BrevoClient},
    builder::build_payload,
};

const SEND_MAX_RETRIES: usize = 3;

/// Per-user outcome in the cron summary.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DigestDecision {
    pub user_id: String,
    pub decision: bool,
    pub sent: bool,
    pub skipped_reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CronSummary {
    pub evaluated: usize,
    pub sent: usize,
    pub decisions: Vec<DigestDecision>,
}

/// Whether a user's digest fires at this instant. `force` bypasses the
/// enabled flag and schedule but never the activity policy's suppression
/// of empty digests.
pub fn should_send(
    preferences: &EmailPreferences,
    now_utc: DateTime<Utc>,
    has_insights: bool,
    force: bool,
) -> bool {
    let activity_ok = has_insights || preferences.no_activity_policy != NoActivityPolicy::Skip;
    if force {
        return activity_ok;
    }

    if !preferences.weekly_digest_enabled {
        return false;
    }

    let Ok(tz) = preferences.timezone.parse::<Tz>() else {
        warn!(timezone = %preferences.timezone, "unknown timezone, digest skipped");
        return false;
    };
    let local_now = now_utc.with_timezone(&tz);

    // Weekday numbering is Monday = 0, matching the stored preference
    let local_day = u8::try_from(local_now.weekday().num_days_from_monday()).unwrap_or(u8::MAX);
    let local_hour = u8::try_from(local_now.hour()).unwrap_or(u8::MAX);

    local_day == preferences.preferred_day
        && local_hour == preferences.preferred_hour
        && activity_ok
}

/// The Monday 00:00 UTC preceding `now`, formatted as the audit key.
pub fn week_start(now: DateTime<Utc>) -> String {
    let days_back = i64::from(now.weekday().num_days_from_monday());
    let monday = now.date_naive() - ChronoDuration::days(days_back);
    monday.format("%Y-%m-%d").to_string()
}

/// UTC instant of that Monday midnight, the digest window start.
pub fn week_start_instant(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_back = i64::from(now.weekday().num_days_from_monday());
    let monday = now.date_naive() - ChronoDuration::days(days_back);
    #[allow(clippy::expect_used)]
    monday
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
}

pub struct DigestDispatcher {
    db: Arc<SurrealDbClient>,
    openai_client: Arc<OpenAIClientType>,
    config: AppConfig,
    brevo: Option<BrevoClient>,
}

impl DigestDispatcher {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<OpenAIClientType>,
        config: AppConfig,
    ) -> Result<Self, AppError> {
        let brevo = match &config.brevo_api_key {
            Some(key) => Some(BrevoClient::new(key.clone())?),
            None => None,
        };

        Ok(Self {
            db,
            openai_client,
            config,
            brevo,
        })
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn without_provider(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<OpenAIClientType>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            openai_client,
            config,
            brevo: None,
        }
    }

    /// Hourly fan-out over digest-enabled users. One user's failure never
    /// blocks the rest.
    pub async fn run_cron(&self, now: DateTime<Utc>, force: bool) -> CronSummary {
        let users = match EmailPreferences::list_digest_enabled(&self.db).await {
            Ok(users) => users,
            Err(err) => {
                warn!(error = %err, "failed to list digest users");
                return CronSummary {
                    evaluated: 0,
                    sent: 0,
                    decisions: Vec::new(),
                };
            }
        };

        let mut decisions = Vec::with_capacity(users.len());
        let mut sent = 0_usize;

        for preferences in &users {
            let outcome = self
                .dispatch_for_user(preferences, now, force, false, None)
                .await;
            let outcome = outcome.unwrap_or_else(|err| {
                warn!(user_id = %preferences.user_id, error = %err, "digest dispatch failed");
                DigestDecision {
                    user_id: preferences.user_id.clone(),
                    decision: true,
                    sent: false,
                    skipped_reason: Some(format!("error: {err}")),
                }
            });
            if outcome.sent {
                sent += 1;
            }
            decisions.push(outcome);
        }

        info!(evaluated = decisions.len(), sent, "digest cron pass complete");

        CronSummary {
            evaluated: decisions.len(),
            sent,
            decisions,
        }
    }

    /// Owner-triggered test send.
    pub async fn test_send(
        &self,
        user_id: &str,
        dry_run: bool,
        force: bool,
        email_override: Option<String>,
    ) -> Result<DigestDecision, AppError> {
        let preferences = EmailPreferences::get_or_default(user_id, &self.db).await?;
        self.dispatch_for_user(&preferences, Utc::now(), force, dry_run, email_override)
            .await
    }

    async fn dispatch_for_user(
        &self,
        preferences: &EmailPreferences,
        now: DateTime<Utc>,
        force: bool,
        dry_run: bool,
        email_override: Option<String>,
    ) -> Result<DigestDecision, AppError> {
        let user_id = preferences.user_id.clone();

        let profile: Profile = self
            .db
            .get_item(&user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Profile not found".to_string()))?;
        let recipient = email_override.unwrap_or_else(|| profile.email.clone());

        // Suppression wins over everything, force included
        if EmailSuppression::is_suppressed(&recipient, &self.db).await? {
            return Ok(DigestDecision {
                user_id,
                decision: false,
                sent: false,
                skipped_reason: Some("suppressed".to_string()),
            });
        }

        let window_start = week_start_instant(now);
        let insights = Insight::list_in_window(&user_id, window_start, now, &self.db).await?;
        let has_insights = !insights.is_empty();

        if !should_send(preferences, now, has_insights, force) {
            return Ok(DigestDecision {
                user_id,
                decision: false,
                sent: false,
                skipped_reason: Some("schedule".to_string()),
            });
        }

        let week = week_start(now);

        if dry_run {
            return Ok(DigestDecision {
                user_id,
                decision: true,
                sent: false,
                skipped_reason: Some("dry_run".to_string()),
            });
        }

        // CAS audit row: the (user, week) pair sends at most once
        let digest = match EmailDigest::try_begin(&user_id, &week, &self.db).await? {
            Some(digest) => digest,
            None => {
                let existing = EmailDigest::get_for_week(&user_id, &week, &self.db).await?;
                match existing {
                    Some(row) if row.status == DigestStatus::Sent => {
                        return Ok(DigestDecision {
                            user_id,
                            decision: true,
                            sent: false,
                            skipped_reason: Some("already_sent".to_string()),
                        });
                    }
                    Some(row) => row, // previous attempt failed; retry on the same row
                    None => {
                        return Err(AppError::InternalError(
                            "digest row vanished between insert and read".to_string(),
                        ))
                    }
                }
            }
        };

        let payload = build_payload(
            &self.db,
            &self.openai_client,
            &self.config.chat_model,
            &profile,
            &preferences.timezone,
            window_start,
            now,
            &week,
        )
        .await?;
        let payload_json = serde_json::to_value(&payload)
            .map_err(|e| AppError::InternalError(format!("digest payload serialization: {e}")))?;

        let Some(brevo) = &self.brevo else {
            digest
                .mark_failed("email provider not configured", 0, &self.db)
                .await?;
            return Ok(DigestDecision {
                user_id,
                decision: true,
                sent: false,
                skipped_reason: Some("provider_unconfigured".to_string()),
            });
        };

        let retry_strategy = ExponentialBackoff::from_millis(500)
            .map(jitter)
            .take(SEND_MAX_RETRIES);
        let template_id = self.config.brevo_digest_template_id;
        let nickname = payload.user.nickname.clone();

        let send_result = RetryIf::spawn(
            retry_strategy,
            || brevo.send_template(template_id, &recipient, &nickname, &payload_json),
            |err: &common::error::AppError| {
                let retryable = is_retryable_send_error(err);
                if retryable {
                    warn!(user_id = %preferences.user_id, error = %err, "digest send retrying");
                }
                retryable
            },
        )
        .await;

        match send_result {
            Ok(message_id) => {
                digest.mark_sent(&message_id, payload_json, &self.db).await?;
                info!(user_id = %preferences.user_id, week = %week, "digest sent");
                Ok(DigestDecision {
                    user_id,
                    decision: true,
                    sent: true,
                    skipped_reason: None,
                })
            }
            Err(err) => {
                digest
                    .mark_failed(
                        &err.to_string(),
                        u32::try_from(SEND_MAX_RETRIES).unwrap_or(u32::MAX),
                        &self.db,
                    )
                    .await?;
                Err(err)
            }
        }
    }
}
