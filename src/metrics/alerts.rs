//! Alert rules, sustained-breach detection, and alert history.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Threshold comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    GreaterThan,
    LessThan,
}

impl AlertCondition {
    fn breached(&self, value: f64, threshold: f64) -> bool {
        match self {
            AlertCondition::GreaterThan => value > threshold,
            AlertCondition::LessThan => value < threshold,
        }
    }
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// A threshold rule over one metric
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule id
    pub id: String,

    /// Metric name the rule watches
    pub metric_name: String,

    /// Comparison direction
    pub condition: AlertCondition,

    /// Threshold value
    pub threshold: f64,

    /// Breach must hold this long before the rule fires
    pub duration: Duration,

    /// Severity attached to fired alerts
    pub severity: AlertSeverity,

    /// Minimum gap between consecutive firings
    pub cooldown: Duration,

    /// Disabled rules are skipped
    pub enabled: bool,
}

impl AlertRule {
    /// Create an enabled rule with a fresh id
    pub fn new(
        metric_name: impl Into<String>,
        condition: AlertCondition,
        threshold: f64,
        severity: AlertSeverity,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            metric_name: metric_name.into(),
            condition,
            threshold,
            duration: Duration::ZERO,
            severity,
            cooldown: Duration::from_secs(300),
            enabled: true,
        }
    }

    /// Require the breach to hold this long
    pub fn sustained_for(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the cooldown between firings
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// A fired alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Alert id
    pub id: String,

    /// Rule that fired
    pub rule_id: String,

    /// Metric that breached
    pub metric_name: String,

    /// Value that fired the alert
    pub value: f64,

    /// Rule threshold at firing time
    pub threshold: f64,

    /// Severity
    pub severity: AlertSeverity,

    /// Rendered message
    pub message: String,

    /// When the alert fired
    pub fired_at: DateTime<Utc>,

    /// When the alert resolved; `None` while active
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Evaluates rules against incoming values and keeps the history
#[derive(Default)]
pub struct AlertEngine {
    rules: RwLock<Vec<AlertRule>>,
    breach_since: RwLock<HashMap<String, DateTime<Utc>>>,
    last_fired: RwLock<HashMap<String, DateTime<Utc>>>,
    history: RwLock<Vec<Alert>>,
}

impl AlertEngine {
    /// Create an engine with no rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule
    pub fn add_rule(&self, rule: AlertRule) {
        self.rules.write().push(rule);
    }

    /// Remove a rule by id; returns whether it existed
    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        rules.len() != before
    }

    /// Registered rules
    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    /// Evaluate one observation; returns alerts fired by it.
    ///
    /// A breach must hold for the rule's `duration`, and a rule stays
    /// quiet for its `cooldown` after firing. A non-breach resolves any
    /// active alerts for the rule.
    pub fn evaluate(&self, metric_name: &str, value: f64, now: DateTime<Utc>) -> Vec<Alert> {
        let rules: Vec<AlertRule> = self
            .rules
            .read()
            .iter()
            .filter(|r| r.enabled && r.metric_name == metric_name)
            .cloned()
            .collect();

        let mut fired = Vec::new();
        for rule in rules {
            if rule.condition.breached(value, rule.threshold) {
                let since = *self
                    .breach_since
                    .write()
                    .entry(rule.id.clone())
                    .or_insert(now);

                let sustained = ChronoDuration::from_std(rule.duration)
                    .map(|d| now - since >= d)
                    .unwrap_or(true);
                if !sustained {
                    continue;
                }

                let cooled = {
                    let last_fired = self.last_fired.read();
                    match last_fired.get(&rule.id) {
                        Some(last) => ChronoDuration::from_std(rule.cooldown)
                            .map(|c| now - *last >= c)
                            .unwrap_or(true),
                        None => true,
                    }
                };
                if !cooled {
                    continue;
                }

                let alert = Alert {
                    id: Uuid::new_v4().to_string(),
                    rule_id: rule.id.clone(),
                    metric_name: rule.metric_name.clone(),
                    value,
                    threshold: rule.threshold,
                    severity: rule.severity,
                    message: format!(
                        "{} {} threshold {} (value {value})",
                        rule.metric_name,
                        match rule.condition {
                            AlertCondition::GreaterThan => "above",
                            AlertCondition::LessThan => "below",
                        },
                        rule.threshold
                    ),
                    fired_at: now,
                    resolved_at: None,
                };
                log::warn!("alert fired: {}", alert.message);
                self.last_fired.write().insert(rule.id.clone(), now);
                self.history.write().push(alert.clone());
                fired.push(alert);
            } else {
                self.breach_since.write().remove(&rule.id);
                self.resolve_rule(&rule.id, now);
            }
        }
        fired
    }

    /// Alerts not yet resolved
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.history
            .read()
            .iter()
            .filter(|a| a.resolved_at.is_none())
            .cloned()
            .collect()
    }

    /// Full alert history
    pub fn history(&self) -> Vec<Alert> {
        self.history.read().clone()
    }

    fn resolve_rule(&self, rule_id: &str, now: DateTime<Utc>) {
        let mut history = self.history.write();
        for alert in history.iter_mut() {
            if alert.rule_id == rule_id && alert.resolved_at.is_none() {
                alert.resolved_at = Some(now);
            }
        }
    }
}
