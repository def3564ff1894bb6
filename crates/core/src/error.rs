use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::types::CampaignType;

pub type ReclaimResult<T> = Result<T, ReclaimError>;

#[derive(Error, Debug)]
pub enum ReclaimError {
    /// Handshake pairing was not completed within the configured timeout.
    /// Fatal until an operator restarts the connection.
    #[error("authentication timed out after {0}s waiting for pairing")]
    AuthTimeout(u64),

    /// Reconnection attempts were exhausted. Fatal until manual restart.
    #[error("connection lost after {attempts} reconnect attempts")]
    ConnectionLost { attempts: u32 },

    /// A send was attempted while the session is not in the Connected state.
    /// Jobs hitting this stay Pending and retry once reconnected.
    #[error("channel not connected")]
    NotConnected,

    /// Transient transport failure; retried per job with bounded attempts.
    #[error("channel transport error: {0}")]
    Channel(String),

    /// An Active instance of this campaign type already exists for the
    /// recipient. Expected during eligibility scans, not exceptional.
    #[error("recipient {recipient} already has an active {campaign_type} instance")]
    DuplicateInstance {
        recipient: String,
        campaign_type: CampaignType,
    },

    /// The same campaign type ran for this recipient too recently.
    #[error("{campaign_type} is in cooldown for {recipient} until {until}")]
    CooldownActive {
        recipient: String,
        campaign_type: CampaignType,
        until: DateTime<Utc>,
    },

    /// A job fired for a stage whose instance was since cancelled or
    /// completed. Resolved by cancelling the job, never by retrying.
    #[error("stage {stage} of instance {instance} is stale")]
    StaleStage { instance: Uuid, stage: u32 },

    #[error("template {0} not found")]
    TemplateNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
