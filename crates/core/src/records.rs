//! Business-record collaborator seam. Recipient profiles, visit history,
//! and payment ledgers live outside the engine; campaign entry criteria are
//! evaluated there and exposed through `list_eligible`.

use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::info;

use crate::types::{CampaignType, Recipient, RecipientStatus};

pub trait BusinessRecords: Send + Sync {
    fn get(&self, recipient_id: &str) -> Option<Recipient>;

    /// Reverse lookup by channel address, for routing inbound replies.
    fn find_by_address(&self, address: &str) -> Option<Recipient>;

    /// Recipients currently qualifying for entry into the given campaign
    /// type (e.g. past an inactivity threshold). Must exclude suppressed
    /// recipients.
    fn list_eligible(&self, campaign_type: CampaignType) -> Vec<Recipient>;

    /// Opt-out: the recipient is never messaged by automation again.
    fn suppress(&self, recipient_id: &str);

    /// The campaign goal was reached (payment made, member re-engaged).
    fn mark_goal_achieved(&self, recipient_id: &str);

    /// External signal that the goal is already satisfied, e.g. an invoice
    /// paid between scheduling and delivery.
    fn is_goal_achieved(&self, recipient_id: &str) -> bool;
}

/// In-memory store for tests and the demo binary.
#[derive(Default)]
pub struct InMemoryRecords {
    inner: Mutex<RecordsState>,
}

#[derive(Default)]
struct RecordsState {
    recipients: HashMap<String, Recipient>,
    eligible: HashMap<CampaignType, Vec<String>>,
    goals: HashMap<String, bool>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, recipient: Recipient, eligible_for: &[CampaignType]) {
        let mut state = self.inner.lock();
        for ct in eligible_for {
            state
                .eligible
                .entry(*ct)
                .or_default()
                .push(recipient.id.clone());
        }
        state.recipients.insert(recipient.id.clone(), recipient);
    }
}

impl BusinessRecords for InMemoryRecords {
    fn get(&self, recipient_id: &str) -> Option<Recipient> {
        self.inner.lock().recipients.get(recipient_id).cloned()
    }

    fn find_by_address(&self, address: &str) -> Option<Recipient> {
        self.inner
            .lock()
            .recipients
            .values()
            .find(|r| r.address == address)
            .cloned()
    }

    fn list_eligible(&self, campaign_type: CampaignType) -> Vec<Recipient> {
        let state = self.inner.lock();
        state
            .eligible
            .get(&campaign_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.recipients.get(id))
                    .filter(|r| r.status == RecipientStatus::Eligible)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn suppress(&self, recipient_id: &str) {
        let mut state = self.inner.lock();
        if let Some(r) = state.recipients.get_mut(recipient_id) {
            r.status = RecipientStatus::Suppressed;
            info!(recipient = recipient_id, "recipient suppressed");
        }
    }

    fn mark_goal_achieved(&self, recipient_id: &str) {
        self.inner
            .lock()
            .goals
            .insert(recipient_id.to_string(), true);
    }

    fn is_goal_achieved(&self, recipient_id: &str) -> bool {
        self.inner
            .lock()
            .goals
            .get(recipient_id)
            .copied()
            .unwrap_or(false)
    }
}
