use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use reclaim_core::types::CampaignType;

/// One stage of a campaign: which template goes out, and how long after
/// the instance starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTemplate {
    pub template_id: String,
    pub offset_hours: i64,
}

impl StageTemplate {
    fn days(template_id: &str, days: i64) -> Self {
        Self {
            template_id: template_id.to_string(),
            offset_hours: days * 24,
        }
    }
}

/// The fixed stage sequence for one campaign type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignDefinition {
    pub campaign_type: CampaignType,
    pub stages: Vec<StageTemplate>,
}

impl CampaignDefinition {
    /// Win-back sequence for lapsed members: nudges at 15, 30 and 60 days.
    pub fn reactivation() -> Self {
        Self {
            campaign_type: CampaignType::Reactivation,
            stages: vec![
                StageTemplate::days("reactivation_15d", 15),
                StageTemplate::days("reactivation_30d", 30),
                StageTemplate::days("reactivation_60d", 60),
            ],
        }
    }

    /// Prospect follow-up after a first visit: days 1, 2, 5, 10 and 15.
    pub fn nurturing() -> Self {
        Self {
            campaign_type: CampaignType::Nurturing,
            stages: vec![
                StageTemplate::days("nurturing_1d", 1),
                StageTemplate::days("nurturing_2d", 2),
                StageTemplate::days("nurturing_5d", 5),
                StageTemplate::days("nurturing_10d", 10),
                StageTemplate::days("nurturing_15d", 15),
            ],
        }
    }

    /// Overdue-payment reminders: days 1, 3, 7 and 15 past due.
    pub fn billing() -> Self {
        Self {
            campaign_type: CampaignType::Billing,
            stages: vec![
                StageTemplate::days("billing_1d", 1),
                StageTemplate::days("billing_3d", 3),
                StageTemplate::days("billing_7d", 7),
                StageTemplate::days("billing_15d", 15),
            ],
        }
    }

    pub fn builtin() -> Vec<Self> {
        vec![Self::reactivation(), Self::nurturing(), Self::billing()]
    }
}

/// Why an instance stopped before completing its stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The recipient asked to stop; they are suppressed going forward.
    OptedOut,
    /// The recipient converted while the campaign was running.
    GoalAchieved,
    /// An operator or caller cancelled explicitly.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Active,
    Completed,
    Cancelled(CancelReason),
}

/// One run of a campaign type for one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignInstance {
    pub id: Uuid,
    pub recipient_id: String,
    pub campaign_type: CampaignType,
    /// Index of the next stage expected to go out.
    pub current_stage: u32,
    pub status: InstanceStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignInstance {
    pub fn is_active(&self) -> bool {
        self.status == InstanceStatus::Active
    }
}
