//! Proof-of-work job submission and polling

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use super::external::{JobState, MinedFields, MiningService, Sleeper};

/// Bounds on how long a build waits for a mining job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MiningPolicy {
    /// Maximum number of status polls
    pub max_attempts: u32,
    /// Delay between polls in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for MiningPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 60,
            poll_interval_ms: 1_000,
        }
    }
}

impl MiningPolicy {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Submit `tx_hex` and wait until the job is done.
///
/// Polls at most `policy.max_attempts` times, sleeping between polls but not
/// after the last one.
pub async fn mine(
    service: &dyn MiningService,
    sleeper: &dyn Sleeper,
    policy: &MiningPolicy,
    tx_hex: &str,
) -> Result<MinedFields> {
    let job_id = service.submit_job(tx_hex).await?;
    debug!(job_id = %job_id, "mining job submitted");

    for attempt in 1..=policy.max_attempts {
        let status = service.job_status(&job_id).await?;
        match status.status {
            JobState::Done => {
                debug!(job_id = %job_id, attempt, "mining job done");
                return status
                    .tx
                    .ok_or_else(|| Error::external("mining", format!("job {} is done but carries no fields", job_id)));
            }
            JobState::Failed | JobState::Timeout | JobState::Cancelled => {
                warn!(job_id = %job_id, state = ?status.status, "mining job ended without a result");
                return Err(Error::external(
                    "mining",
                    format!("job {} ended in state {:?}", job_id, status.status),
                ));
            }
            JobState::Pending | JobState::Mining => {}
        }
        if attempt < policy.max_attempts {
            sleeper.sleep(policy.poll_interval()).await;
        }
    }

    Err(Error::MiningTimeout {
        job_id,
        attempts: policy.max_attempts,
    })
}
