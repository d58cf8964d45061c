//! Job status machine. Transitions are validated against a declarative
//! table; the only backward edges are failed→pending (manual retry) and
//! completed→pending (manual restart).

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Terminal statuses do not hold the scope lock.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const VALID_TRANSITIONS: &[(JobStatus, &[JobStatus])] = &[
    (JobStatus::Pending, &[JobStatus::Running, JobStatus::Failed]),
    (JobStatus::Running, &[JobStatus::Completed, JobStatus::Failed]),
    (JobStatus::Completed, &[JobStatus::Pending]),
    (JobStatus::Failed, &[JobStatus::Pending]),
];

/// Checks whether a transition is allowed; the error names both ends.
pub fn can_transition(from: JobStatus, to: JobStatus) -> Result<(), String> {
    let allowed = VALID_TRANSITIONS
        .iter()
        .find(|(status, _)| *status == from)
        .map(|(_, targets)| targets.contains(&to))
        .unwrap_or(false);
    if allowed {
        Ok(())
    } else {
        Err(format!("Cannot transition from {} to {}", from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(can_transition(JobStatus::Pending, JobStatus::Running).is_ok());
        assert!(can_transition(JobStatus::Running, JobStatus::Completed).is_ok());
        assert!(can_transition(JobStatus::Running, JobStatus::Failed).is_ok());
        assert!(can_transition(JobStatus::Pending, JobStatus::Failed).is_ok());
    }

    #[test]
    fn test_manual_retry_and_restart() {
        assert!(can_transition(JobStatus::Failed, JobStatus::Pending).is_ok());
        assert!(can_transition(JobStatus::Completed, JobStatus::Pending).is_ok());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        assert!(can_transition(JobStatus::Running, JobStatus::Pending).is_err());
        assert!(can_transition(JobStatus::Pending, JobStatus::Completed).is_err());
        assert!(can_transition(JobStatus::Completed, JobStatus::Running).is_err());
        assert!(can_transition(JobStatus::Failed, JobStatus::Completed).is_err());
    }

    #[test]
    fn test_parse_round_trip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }
}
