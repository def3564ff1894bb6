use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReclaimResult;

/// A named multi-stage outreach goal with a fixed stage template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    Reactivation,
    Nurturing,
    Billing,
}

impl CampaignType {
    pub const ALL: [CampaignType; 3] = [
        CampaignType::Reactivation,
        CampaignType::Nurturing,
        CampaignType::Billing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignType::Reactivation => "reactivation",
            CampaignType::Nurturing => "nurturing",
            CampaignType::Billing => "billing",
        }
    }
}

impl std::fmt::Display for CampaignType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messaging eligibility of a recipient. Suppressed recipients never
/// receive automated messages again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    #[default]
    Eligible,
    Suppressed,
}

/// External identity owned by the business-record collaborator. The engine
/// reads it and only writes campaign-relevant status transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
    /// Channel address, e.g. an E.164 phone number.
    pub address: String,
    pub display_name: String,
    pub status: RecipientStatus,
}

impl Recipient {
    pub fn first_name(&self) -> &str {
        self.display_name
            .split_whitespace()
            .next()
            .unwrap_or(&self.display_name)
    }
}

/// A reply received on the channel. Ephemeral; not persisted beyond
/// classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub from: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement returned by the channel for an accepted send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub message_id: String,
    pub accepted_at: DateTime<Utc>,
}

/// The single send primitive. Implemented by the channel connection;
/// keeps the delivery worker transport-agnostic.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> ReclaimResult<Receipt>;
}
