//! Health reporting for the storage backends and the fan-out.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Health of one component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,

    /// Operational with problems (e.g., a growing delivery queue)
    Degraded,

    /// Not operational
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Component name
    pub component: String,

    /// Current status
    pub status: HealthStatus,

    /// Details, for degraded and unhealthy components
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Extra key/value facts (counts, sizes)
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn unhealthy(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}

/// Aggregated health report; the overall status is the worst component status.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,

    /// When the report was generated
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    /// Create a report from checks.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>, timestamp: DateTime<Utc>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Healthy, HealthStatus::worst);

        Self {
            status,
            checks,
            timestamp,
        }
    }

    /// Add a check, updating the overall status.
    #[must_use]
    pub fn with_check(mut self, check: HealthCheck) -> Self {
        self.status = self.status.worst(check.status);
        self.checks.push(check);
        self
    }

    /// Check if overall system is healthy
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_status_wins() {
        let report = HealthReport::new(
            vec![
                HealthCheck::healthy("event_log"),
                HealthCheck::degraded("delivery", "queue filling up"),
            ],
            Utc::now(),
        );
        assert_eq!(report.status, HealthStatus::Degraded);

        let report = report.with_check(HealthCheck::unhealthy("submission_store", "down"));
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(!report.is_healthy());
    }

    #[test]
    fn empty_report_is_healthy() {
        assert!(HealthReport::new(Vec::new(), Utc::now()).is_healthy());
    }
}
