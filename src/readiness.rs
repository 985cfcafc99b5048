use std::time::Duration;

use tracing::debug;

use crate::config::Wait;
use crate::provider::{self, CloudProvider, StatusSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub delay: Duration,
    pub max_attempts: u32,
}

impl From<&Wait> for WaitPolicy {
    fn from(wait: &Wait) -> Self {
        Self {
            delay: Duration::from_secs(u64::from(wait.delay_seconds)),
            max_attempts: wait.max_attempts,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum WaitError {
    #[error("instance not ready after {attempts} status checks")]
    Timeout { attempts: u32 },

    #[error(transparent)]
    Provider(#[from] provider::Error),
}

/// Polls the instance status until it reports `ok`. Status errors end the wait.
pub async fn wait_until_ready(
    provider: &dyn CloudProvider,
    instance_id: &str,
    policy: &WaitPolicy,
) -> Result<(), WaitError> {
    for attempt in 1..=policy.max_attempts {
        match provider.instance_status(instance_id).await? {
            Some(StatusSummary::Ok) => return Ok(()),
            status => debug!(instance_id, attempt, ?status, "instance not ready yet"),
        }

        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    return Err(WaitError::Timeout {
        attempts: policy.max_attempts,
    });
}
