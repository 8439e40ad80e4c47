//! Alert rule evaluator — turns status transitions into alerts.
//!
//! ## Rule
//! An alert fires when the new status is in the critical set and the old one
//! is not. Staying critical, or moving between critical statuses, is silent.
//!
//! ```text
//! StatusChangeEvent
//!   → crossed into critical?      no  → None
//!   → first-sight suppressed?     yes → None
//!   → first enabled matching rule none → None
//!   → AlertEvent { severity, title = rule name, ... }
//! ```

use std::collections::HashSet;

use glob::Pattern;
use jobwatch_core::config::{AlertRuleConfig, MonitorConfig};
use jobwatch_core::error::{JobWatchError, Result};
use jobwatch_core::types::{AlertEvent, AlertSeverity, JobStatus, StatusChangeEvent};

/// Name of the rule used when none are configured.
pub const DEFAULT_RULE_NAME: &str = "Job Failure";

/// A compiled alert rule.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub name: String,
    /// Job name glob; `None` matches every job.
    pub job_name_pattern: Option<Pattern>,
    /// Canonical statuses this rule covers; empty = any critical status.
    pub statuses: HashSet<String>,
    pub severity: AlertSeverity,
    pub enabled: bool,
}

impl AlertRule {
    /// Catch-all rule: every job, every critical status.
    pub fn catch_all(name: &str, severity: AlertSeverity) -> Self {
        Self {
            name: name.to_string(),
            job_name_pattern: None,
            statuses: HashSet::new(),
            severity,
            enabled: true,
        }
    }

    fn matches(&self, job_name: &str, status: &JobStatus) -> bool {
        self.enabled
            && self
                .job_name_pattern
                .as_ref()
                .is_none_or(|p| p.matches(job_name))
            && (self.statuses.is_empty() || self.statuses.contains(&status.canonical()))
    }
}

impl TryFrom<&AlertRuleConfig> for AlertRule {
    type Error = JobWatchError;

    fn try_from(cfg: &AlertRuleConfig) -> Result<Self> {
        let pattern = Pattern::new(&cfg.job_name_pattern).map_err(|e| {
            JobWatchError::Config(format!(
                "Alert rule '{}': invalid job_name_pattern '{}': {e}",
                cfg.name, cfg.job_name_pattern
            ))
        })?;
        Ok(Self {
            name: cfg.name.clone(),
            job_name_pattern: Some(pattern),
            statuses: cfg.statuses.iter().map(|s| JobStatus::new(s.as_str()).canonical()).collect(),
            severity: cfg.severity,
            enabled: cfg.enabled,
        })
    }
}

/// Edge-triggered alert evaluator.
#[derive(Debug, Clone)]
pub struct AlertEvaluator {
    critical: HashSet<String>,
    rules: Vec<AlertRule>,
    alert_on_first_sight: bool,
}

impl AlertEvaluator {
    /// Evaluator over a critical-status set with the default HIGH rule.
    pub fn new<I, S>(critical_statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            critical: critical_statuses
                .into_iter()
                .map(|s| JobStatus::new(s.as_ref()).canonical())
                .collect(),
            rules: vec![AlertRule::catch_all(DEFAULT_RULE_NAME, AlertSeverity::High)],
            alert_on_first_sight: true,
        }
    }

    /// Fails if a rule's job name pattern does not compile.
    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let rules = config
            .alert_rules
            .iter()
            .map(AlertRule::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(&config.critical_statuses)
            .with_first_sight(config.alert_on_first_sight)
            .with_rules(rules))
    }

    /// Replace the rule list. An empty list restores the default rule.
    pub fn with_rules(mut self, rules: Vec<AlertRule>) -> Self {
        self.rules = if rules.is_empty() {
            vec![AlertRule::catch_all(DEFAULT_RULE_NAME, AlertSeverity::High)]
        } else {
            rules
        };
        self
    }

    /// Whether a job first seen in a critical status (`NEW → ABEND`) alerts.
    pub fn with_first_sight(mut self, enabled: bool) -> Self {
        self.alert_on_first_sight = enabled;
        self
    }

    pub fn is_critical(&self, status: &JobStatus) -> bool {
        self.critical.contains(&status.canonical())
    }

    pub fn rules(&self) -> &[AlertRule] {
        &self.rules
    }

    /// Zero or one alert for a transition.
    pub fn evaluate(&self, event: &StatusChangeEvent) -> Option<AlertEvent> {
        if !self.is_critical(&event.new_status) || self.is_critical(&event.old_status) {
            return None;
        }
        if event.old_status.is_new() && !self.alert_on_first_sight {
            tracing::debug!(
                "Suppressing first-sight alert for '{}' ({})",
                event.job_name,
                event.new_status
            );
            return None;
        }

        let rule = self
            .rules
            .iter()
            .find(|r| r.matches(&event.job_name, &event.new_status))?;

        Some(AlertEvent {
            severity: rule.severity,
            title: rule.name.clone(),
            job_name: event.job_name.clone(),
            status: event.new_status.clone(),
            workstation: event.workstation.clone(),
            timestamp: event.timestamp,
            message: format!(
                "Job '{}' on workstation '{}' failed with status: {}.",
                event.job_name, event.workstation, event.new_status
            ),
            rule: rule.name.clone(),
        })
    }
}
