//! Fraud risk evaluation.
//!
//! A deterministic, explainable rule-scoring gate. Each rule is an independent
//! object contributing a score and a flag; the evaluator sums contributions
//! and maps the total to a risk level. The evaluator is read-only: it never
//! touches the ledger, and callers invoke it **before** attempting a charge
//! or a usage debit.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AlertId, UserId};

/// Score at or above which the transaction must not proceed.
pub const BLOCK_THRESHOLD: u32 = 70;

/// Score at or above which the transaction proceeds but is flagged for review.
pub const REVIEW_THRESHOLD: u32 = 40;

/// Upper bound (exclusive) of the low risk band.
pub const LOW_RISK_BOUND: u32 = 20;

/// Upper bound (exclusive) of the medium risk band.
pub const MEDIUM_RISK_BOUND: u32 = 50;

/// Failed attempts in 24h beyond which the repeated-failures rule fires.
pub const FAILED_ATTEMPTS_LIMIT: u32 = 3;

/// Successful payments in 24h beyond which the high-frequency rule fires.
pub const PAYMENT_FREQUENCY_LIMIT: u32 = 5;

/// Multiplier over the historical average that marks an amount anomalous.
pub const AMOUNT_ANOMALY_MULTIPLIER: i64 = 5;

/// Account age below which the new-account rule considers the account new.
pub const NEW_ACCOUNT_MAX_AGE_HOURS: i64 = 24;

/// Default amount threshold for the new-account high-value rule.
pub const NEW_ACCOUNT_AMOUNT_THRESHOLD: i64 = 5_000;

/// Everything a rule may inspect about the attempted transaction.
///
/// The history fields (`failed_attempts_24h`, `successful_payments_24h`,
/// `average_payment_amount`) are snapshots the caller assembles from stored
/// payment attempts; rules never query storage themselves.
#[derive(Debug, Clone)]
pub struct RiskContext {
    /// The user attempting the transaction.
    pub user_id: UserId,

    /// The transaction amount.
    pub amount: i64,

    /// Payment method descriptor, when known.
    pub payment_method: Option<String>,

    /// Billing country code, when known.
    pub billing_country: Option<String>,

    /// Request IP address.
    pub ip: Option<String>,

    /// Request user agent.
    pub user_agent: Option<String>,

    /// Age of the account in hours.
    pub account_age_hours: i64,

    /// Failed payment attempts for this user in the last 24h.
    pub failed_attempts_24h: u32,

    /// Successful payments for this user in the last 24h.
    pub successful_payments_24h: u32,

    /// Historical average payment amount, if the user has history.
    pub average_payment_amount: Option<i64>,
}

/// One rule's contribution to the overall score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskSignal {
    /// Explainable flag name, persisted on alerts.
    pub flag: String,

    /// Score contribution.
    pub score: u32,
}

impl RiskSignal {
    fn new(flag: &str, score: u32) -> Self {
        Self {
            flag: flag.to_string(),
            score,
        }
    }
}

/// An independent, explainable scoring rule.
pub trait RiskRule: Send + Sync {
    /// Stable rule name, for logs and tests.
    fn name(&self) -> &'static str;

    /// Evaluate the rule; `None` means the rule does not fire.
    fn evaluate(&self, ctx: &RiskContext) -> Option<RiskSignal>;
}

/// More than [`FAILED_ATTEMPTS_LIMIT`] failed attempts in 24h. +30.
pub struct RepeatedFailures;

impl RiskRule for RepeatedFailures {
    fn name(&self) -> &'static str {
        "repeated_failures"
    }

    fn evaluate(&self, ctx: &RiskContext) -> Option<RiskSignal> {
        (ctx.failed_attempts_24h > FAILED_ATTEMPTS_LIMIT)
            .then(|| RiskSignal::new("repeated_failures", 30))
    }
}

/// More than [`PAYMENT_FREQUENCY_LIMIT`] successful payments in 24h. +20.
pub struct HighFrequency;

impl RiskRule for HighFrequency {
    fn name(&self) -> &'static str {
        "high_frequency"
    }

    fn evaluate(&self, ctx: &RiskContext) -> Option<RiskSignal> {
        (ctx.successful_payments_24h > PAYMENT_FREQUENCY_LIMIT)
            .then(|| RiskSignal::new("high_frequency", 20))
    }
}

/// Amount more than [`AMOUNT_ANOMALY_MULTIPLIER`]× the historical average. +25.
pub struct AmountAnomaly;

impl RiskRule for AmountAnomaly {
    fn name(&self) -> &'static str {
        "amount_anomaly"
    }

    fn evaluate(&self, ctx: &RiskContext) -> Option<RiskSignal> {
        let average = ctx.average_payment_amount.filter(|avg| *avg > 0)?;
        (ctx.amount > average * AMOUNT_ANOMALY_MULTIPLIER)
            .then(|| RiskSignal::new("amount_anomaly", 25))
    }
}

/// Billing country on the high-risk list. +15.
pub struct HighRiskCountry {
    countries: HashSet<String>,
}

impl HighRiskCountry {
    /// Build the rule from a country-code list.
    #[must_use]
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(countries: I) -> Self {
        Self {
            countries: countries.into_iter().map(Into::into).collect(),
        }
    }
}

impl RiskRule for HighRiskCountry {
    fn name(&self) -> &'static str {
        "high_risk_country"
    }

    fn evaluate(&self, ctx: &RiskContext) -> Option<RiskSignal> {
        let country = ctx.billing_country.as_deref()?;
        self.countries
            .contains(country)
            .then(|| RiskSignal::new("high_risk_country", 15))
    }
}

/// IP on the block/heuristic list. +20.
pub struct SuspiciousIp {
    blocked: HashSet<String>,
}

impl SuspiciousIp {
    /// Build the rule from an IP blocklist.
    #[must_use]
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(blocked: I) -> Self {
        Self {
            blocked: blocked.into_iter().map(Into::into).collect(),
        }
    }
}

impl RiskRule for SuspiciousIp {
    fn name(&self) -> &'static str {
        "suspicious_ip"
    }

    fn evaluate(&self, ctx: &RiskContext) -> Option<RiskSignal> {
        let ip = ctx.ip.as_deref()?;
        self.blocked
            .contains(ip)
            .then(|| RiskSignal::new("suspicious_ip", 20))
    }
}

/// User agent matching a bot/automation pattern. +10.
pub struct SuspiciousAgent {
    patterns: Vec<String>,
}

impl SuspiciousAgent {
    /// Build the rule from lowercase substring patterns.
    #[must_use]
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(patterns: I) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

impl RiskRule for SuspiciousAgent {
    fn name(&self) -> &'static str {
        "suspicious_agent"
    }

    fn evaluate(&self, ctx: &RiskContext) -> Option<RiskSignal> {
        let agent = ctx.user_agent.as_deref()?.to_lowercase();
        self.patterns
            .iter()
            .any(|p| agent.contains(p.as_str()))
            .then(|| RiskSignal::new("suspicious_agent", 10))
    }
}

/// Account younger than a day attempting a high-value transaction. +35.
pub struct NewAccountHighValue {
    amount_threshold: i64,
}

impl NewAccountHighValue {
    /// Build the rule with an amount threshold.
    #[must_use]
    pub const fn new(amount_threshold: i64) -> Self {
        Self { amount_threshold }
    }
}

impl RiskRule for NewAccountHighValue {
    fn name(&self) -> &'static str {
        "new_account_high_value"
    }

    fn evaluate(&self, ctx: &RiskContext) -> Option<RiskSignal> {
        (ctx.account_age_hours < NEW_ACCOUNT_MAX_AGE_HOURS && ctx.amount > self.amount_threshold)
            .then(|| RiskSignal::new("new_account_high_value", 35))
    }
}

/// Risk band for a total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Score below 20.
    Low,

    /// Score in 20..50.
    Medium,

    /// Score 50 and above.
    High,
}

impl RiskLevel {
    /// Map a total score to its band.
    #[must_use]
    pub const fn from_score(score: u32) -> Self {
        if score < LOW_RISK_BOUND {
            Self::Low
        } else if score < MEDIUM_RISK_BOUND {
            Self::Medium
        } else {
            Self::High
        }
    }
}

/// The evaluator's verdict for one attempted transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    /// Sum of all rule contributions.
    pub risk_score: u32,

    /// Band the score falls in.
    pub risk_level: RiskLevel,

    /// Flags of every rule that fired.
    pub flags: Vec<String>,

    /// The transaction must not proceed.
    pub should_block: bool,

    /// The transaction proceeds but a [`FraudAlert`] is persisted.
    pub requires_review: bool,
}

/// The rule-scoring gate.
pub struct RiskEvaluator {
    rules: Vec<Box<dyn RiskRule>>,
}

impl RiskEvaluator {
    /// Build an evaluator from an explicit rule list.
    #[must_use]
    pub fn new(rules: Vec<Box<dyn RiskRule>>) -> Self {
        Self { rules }
    }

    /// The default rule set with the stock weights and lists.
    #[must_use]
    pub fn with_default_rules() -> Self {
        Self::new(vec![
            Box::new(RepeatedFailures),
            Box::new(HighFrequency),
            Box::new(AmountAnomaly),
            Box::new(HighRiskCountry::new(["KP", "IR", "SY", "CU"])),
            Box::new(SuspiciousIp::new(Vec::<String>::new())),
            Box::new(SuspiciousAgent::new([
                "bot", "curl", "python-requests", "headless", "scrapy",
            ])),
            Box::new(NewAccountHighValue::new(NEW_ACCOUNT_AMOUNT_THRESHOLD)),
        ])
    }

    /// Run every rule and sum the contributions.
    #[must_use]
    pub fn analyze(&self, ctx: &RiskContext) -> RiskReport {
        let mut score = 0u32;
        let mut flags = Vec::new();

        for rule in &self.rules {
            if let Some(signal) = rule.evaluate(ctx) {
                score += signal.score;
                flags.push(signal.flag);
            }
        }

        RiskReport {
            risk_score: score,
            risk_level: RiskLevel::from_score(score),
            flags,
            should_block: score >= BLOCK_THRESHOLD,
            requires_review: score >= REVIEW_THRESHOLD && score < BLOCK_THRESHOLD,
        }
    }
}

impl Default for RiskEvaluator {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

/// Review status of a persisted alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    /// Waiting for human review.
    Pending,

    /// Reviewed and cleared.
    Approved,

    /// Reviewed and confirmed fraudulent.
    Rejected,
}

/// A persisted review request, created when a score reaches the review band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudAlert {
    /// Alert id.
    pub id: AlertId,

    /// The flagged user.
    pub user_id: UserId,

    /// Score at evaluation time.
    pub risk_score: u32,

    /// Flags of the rules that fired.
    pub flags: Vec<String>,

    /// Review status.
    pub status: AlertStatus,

    /// When the alert was created.
    pub created_at: DateTime<Utc>,
}

impl FraudAlert {
    /// Build a pending alert from an evaluation report.
    #[must_use]
    pub fn from_report(user_id: UserId, report: &RiskReport) -> Self {
        Self {
            id: AlertId::generate(),
            user_id,
            risk_score: report.risk_score,
            flags: report.flags.clone(),
            status: AlertStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// One recorded payment attempt, the raw material for history-based rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    /// The paying user.
    pub user_id: UserId,

    /// Attempted amount.
    pub amount: i64,

    /// Whether the attempt succeeded.
    pub succeeded: bool,

    /// When the attempt happened.
    pub at: DateTime<Utc>,
}

/// Aggregated attempt history for one user, as consumed by [`RiskContext`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentStats {
    /// Failed attempts in the last 24h.
    pub failed_24h: u32,

    /// Successful payments in the last 24h.
    pub succeeded_24h: u32,

    /// Average successful payment amount over all history.
    pub average_amount: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_context() -> RiskContext {
        RiskContext {
            user_id: UserId::generate(),
            amount: 1_000,
            payment_method: Some("card".into()),
            billing_country: Some("DE".into()),
            ip: Some("203.0.113.10".into()),
            user_agent: Some("Mozilla/5.0".into()),
            account_age_hours: 24 * 90,
            failed_attempts_24h: 0,
            successful_payments_24h: 0,
            average_payment_amount: Some(900),
        }
    }

    #[test]
    fn quiet_history_scores_low() {
        let report = RiskEvaluator::with_default_rules().analyze(&quiet_context());
        assert_eq!(report.risk_score, 0);
        assert_eq!(report.risk_level, RiskLevel::Low);
        assert!(!report.should_block);
        assert!(!report.requires_review);
        assert!(report.flags.is_empty());
    }

    #[test]
    fn repeated_failures_fires_above_limit() {
        let mut ctx = quiet_context();
        ctx.failed_attempts_24h = FAILED_ATTEMPTS_LIMIT;
        assert!(RepeatedFailures.evaluate(&ctx).is_none());
        ctx.failed_attempts_24h = FAILED_ATTEMPTS_LIMIT + 1;
        assert_eq!(RepeatedFailures.evaluate(&ctx).unwrap().score, 30);
    }

    #[test]
    fn amount_anomaly_needs_history() {
        let mut ctx = quiet_context();
        ctx.average_payment_amount = None;
        ctx.amount = 1_000_000;
        assert!(AmountAnomaly.evaluate(&ctx).is_none());

        ctx.average_payment_amount = Some(100);
        assert_eq!(AmountAnomaly.evaluate(&ctx).unwrap().score, 25);
        ctx.amount = 500;
        assert!(AmountAnomaly.evaluate(&ctx).is_none());
    }

    #[test]
    fn suspicious_agent_matches_substring() {
        let rule = SuspiciousAgent::new(["bot", "curl"]);
        let mut ctx = quiet_context();
        ctx.user_agent = Some("curl/8.4.0".into());
        assert!(rule.evaluate(&ctx).is_some());
        ctx.user_agent = Some("Mozilla/5.0 (X11; Linux)".into());
        assert!(rule.evaluate(&ctx).is_none());
        ctx.user_agent = None;
        assert!(rule.evaluate(&ctx).is_none());
    }

    #[test]
    fn new_account_high_value() {
        let rule = NewAccountHighValue::new(NEW_ACCOUNT_AMOUNT_THRESHOLD);
        let mut ctx = quiet_context();
        ctx.account_age_hours = 3;
        ctx.amount = NEW_ACCOUNT_AMOUNT_THRESHOLD + 1;
        assert_eq!(rule.evaluate(&ctx).unwrap().score, 35);
        ctx.account_age_hours = 48;
        assert!(rule.evaluate(&ctx).is_none());
    }

    #[test]
    fn review_band_flags_but_does_not_block() {
        // failures (+30) + frequency (+20) = 50: review band.
        let mut ctx = quiet_context();
        ctx.failed_attempts_24h = 10;
        ctx.successful_payments_24h = 10;
        let report = RiskEvaluator::with_default_rules().analyze(&ctx);
        assert_eq!(report.risk_score, 50);
        assert_eq!(report.risk_level, RiskLevel::High);
        assert!(report.requires_review);
        assert!(!report.should_block);
    }

    #[test]
    fn stacked_rules_block() {
        // failures (+30) + frequency (+20) + anomaly (+25) = 75: blocked.
        let mut ctx = quiet_context();
        ctx.failed_attempts_24h = 10;
        ctx.successful_payments_24h = 10;
        ctx.amount = 50_000;
        ctx.average_payment_amount = Some(100);
        let report = RiskEvaluator::with_default_rules().analyze(&ctx);
        assert_eq!(report.risk_score, 75);
        assert!(report.should_block);
        assert!(!report.requires_review);
        assert_eq!(
            report.flags,
            vec!["repeated_failures", "high_frequency", "amount_anomaly"]
        );
    }

    #[test]
    fn risk_level_bands() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(19), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(20), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(49), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50), RiskLevel::High);
    }

    #[test]
    fn alert_from_report_is_pending() {
        let mut ctx = quiet_context();
        ctx.failed_attempts_24h = 10;
        ctx.successful_payments_24h = 10;
        let report = RiskEvaluator::with_default_rules().analyze(&ctx);
        let alert = FraudAlert::from_report(ctx.user_id, &report);
        assert_eq!(alert.status, AlertStatus::Pending);
        assert_eq!(alert.risk_score, 50);
        assert_eq!(alert.flags, report.flags);
    }
}
