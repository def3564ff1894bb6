//! Campaign instance lifecycle: entry guards (duplicate, cooldown),
//! up-front stage scheduling, delivery-driven stage advancement, and
//! cancellation fan-out into the delivery queue.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use reclaim_core::alerts::AlertSink;
use reclaim_core::config::CampaignConfig;
use reclaim_core::records::BusinessRecords;
use reclaim_core::templates::TemplateCatalog;
use reclaim_core::types::{CampaignType, RecipientStatus};
use reclaim_core::{ReclaimError, ReclaimResult};

use reclaim_delivery::clock::Clock;
use reclaim_delivery::job::{EnqueueJob, Job};
use reclaim_delivery::queue::{DeliveryHooks, DeliveryQueue, StageCheck};
use reclaim_delivery::quota::QuotaTracker;

use crate::send_window::align_to_window;
use crate::types::{CampaignDefinition, CampaignInstance, CancelReason, InstanceStatus};

pub struct CampaignEngine {
    definitions: HashMap<CampaignType, CampaignDefinition>,
    instances: DashMap<Uuid, CampaignInstance>,
    /// At most one Active instance per (recipient, campaign type).
    active_index: DashMap<(String, CampaignType), Uuid>,
    /// Start time of the most recent instance per key, for the cooldown.
    history: DashMap<(String, CampaignType), DateTime<Utc>>,
    queue: Arc<DeliveryQueue>,
    records: Arc<dyn BusinessRecords>,
    catalog: Arc<dyn TemplateCatalog>,
    quota: Arc<QuotaTracker>,
    clock: Arc<dyn Clock>,
    config: CampaignConfig,
    alerts: Arc<dyn AlertSink>,
}

impl CampaignEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CampaignConfig,
        queue: Arc<DeliveryQueue>,
        records: Arc<dyn BusinessRecords>,
        catalog: Arc<dyn TemplateCatalog>,
        quota: Arc<QuotaTracker>,
        clock: Arc<dyn Clock>,
        alerts: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        let definitions = CampaignDefinition::builtin()
            .into_iter()
            .map(|d| (d.campaign_type, d))
            .collect();
        Arc::new(Self {
            definitions,
            instances: DashMap::new(),
            active_index: DashMap::new(),
            history: DashMap::new(),
            queue,
            records,
            catalog,
            quota,
            clock,
            config,
            alerts,
        })
    }

    /// Starts an instance and schedules every stage up front, each due
    /// time aligned to the allowed send-window slots.
    pub fn start_instance(
        &self,
        recipient_id: &str,
        campaign_type: CampaignType,
    ) -> ReclaimResult<Uuid> {
        let definition = self.definitions.get(&campaign_type).ok_or_else(|| {
            ReclaimError::Internal(anyhow::anyhow!("no definition for {campaign_type}"))
        })?;
        let recipient = self.records.get(recipient_id).ok_or_else(|| {
            ReclaimError::Internal(anyhow::anyhow!("unknown recipient {recipient_id}"))
        })?;
        if recipient.status == RecipientStatus::Suppressed {
            return Err(ReclaimError::Internal(anyhow::anyhow!(
                "recipient {recipient_id} is suppressed"
            )));
        }

        let key = (recipient_id.to_string(), campaign_type);
        let now = self.clock.now();
        if let Some(last_started) = self.history.get(&key).map(|e| *e.value()) {
            let until = last_started + Duration::days(self.config.cooldown_days as i64);
            if now < until {
                return Err(ReclaimError::CooldownActive {
                    recipient: recipient_id.to_string(),
                    campaign_type,
                    until,
                });
            }
        }

        let instance = CampaignInstance {
            id: Uuid::new_v4(),
            recipient_id: recipient_id.to_string(),
            campaign_type,
            current_stage: 0,
            status: InstanceStatus::Active,
            started_at: now,
            updated_at: now,
        };
        let instance_id = instance.id;

        // Claim the one-active-instance slot atomically: of two concurrent
        // starters for the same key, exactly one wins.
        match self.active_index.entry(key.clone()) {
            Entry::Occupied(_) => {
                return Err(ReclaimError::DuplicateInstance {
                    recipient: recipient_id.to_string(),
                    campaign_type,
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(instance_id);
            }
        }
        self.instances.insert(instance_id, instance);
        self.history.insert(key, now);

        for (index, stage) in definition.stages.iter().enumerate() {
            let due = align_to_window(
                now + Duration::hours(stage.offset_hours),
                &self.config.allowed_hours,
            );
            self.queue.enqueue(EnqueueJob {
                recipient_id: recipient_id.to_string(),
                instance_id,
                stage: index as u32,
                template_id: stage.template_id.clone(),
                not_before: due,
                max_attempts: self.config.default_max_attempts,
            });
        }

        info!(
            instance = %instance_id,
            recipient = recipient_id,
            campaign = %campaign_type,
            stages = definition.stages.len(),
            "campaign instance started"
        );
        metrics::counter!("campaign.started", "type" => campaign_type.as_str()).increment(1);
        Ok(instance_id)
    }

    pub fn instance(&self, instance_id: Uuid) -> Option<CampaignInstance> {
        self.instances.get(&instance_id).map(|i| i.clone())
    }

    pub fn active_instance_for(
        &self,
        recipient_id: &str,
        campaign_type: CampaignType,
    ) -> Option<CampaignInstance> {
        let key = (recipient_id.to_string(), campaign_type);
        let id = *self.active_index.get(&key)?.value();
        self.instance(id)
    }

    pub fn active_count(&self) -> usize {
        self.active_index.len()
    }

    /// Cancels the instance and every job still scheduled for it.
    pub fn cancel_instance(&self, instance_id: Uuid, reason: CancelReason) -> bool {
        let key = {
            let Some(mut entry) = self.instances.get_mut(&instance_id) else {
                return false;
            };
            if !entry.is_active() {
                return false;
            }
            entry.status = InstanceStatus::Cancelled(reason);
            entry.updated_at = self.clock.now();
            (entry.recipient_id.clone(), entry.campaign_type)
        };
        self.active_index.remove(&key);
        let cancelled_jobs = self.queue.cancel_by_key(|j| j.instance_id == instance_id);

        info!(
            instance = %instance_id,
            reason = ?reason,
            cancelled_jobs,
            "campaign instance cancelled"
        );
        metrics::counter!("campaign.cancelled", "type" => key.1.as_str()).increment(1);
        true
    }

    /// Cancels every Active instance of the recipient, across campaign
    /// types. Used on opt-out and on conversion.
    pub fn cancel_all_for(&self, recipient_id: &str, reason: CancelReason) -> usize {
        let ids: Vec<Uuid> = self
            .active_index
            .iter()
            .filter(|e| e.key().0 == recipient_id)
            .map(|e| *e.value())
            .collect();
        let mut cancelled = 0;
        for id in ids {
            if self.cancel_instance(id, reason) {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Walks eligibility per campaign type and starts instances for every
    /// qualifying recipient. Skipped entirely while the quota window is
    /// nearly exhausted; the next scan picks the backlog up.
    pub fn run_eligibility_scan(&self) -> usize {
        if self.quota.is_exhausted() {
            warn!("send quota nearly exhausted, skipping eligibility scan");
            return 0;
        }

        let mut started = 0;
        for campaign_type in self.definitions.keys().copied() {
            for recipient in self.records.list_eligible(campaign_type) {
                match self.start_instance(&recipient.id, campaign_type) {
                    Ok(_) => started += 1,
                    Err(ReclaimError::DuplicateInstance { .. })
                    | Err(ReclaimError::CooldownActive { .. }) => {
                        debug!(
                            recipient = %recipient.id,
                            campaign = %campaign_type,
                            "scan skipped recipient"
                        );
                    }
                    Err(e) => {
                        warn!(
                            recipient = %recipient.id,
                            campaign = %campaign_type,
                            error = %e,
                            "scan failed to start instance"
                        );
                    }
                }
            }
        }
        info!(started, "eligibility scan finished");
        metrics::counter!("campaign.scan_started_instances").increment(started as u64);
        started
    }

    /// Stage bookkeeping shared by delivery and permanent failure: the
    /// sequence moves on either way, and the final stage closes the
    /// instance.
    fn advance_stage(&self, instance_id: Uuid, stage: u32) {
        let Some(definition_len) = self
            .instances
            .get(&instance_id)
            .and_then(|i| self.definitions.get(&i.campaign_type))
            .map(|d| d.stages.len() as u32)
        else {
            return;
        };

        let key = {
            let Some(mut entry) = self.instances.get_mut(&instance_id) else {
                return;
            };
            if !entry.is_active() || stage != entry.current_stage {
                // Late or duplicate callback; the advance already happened.
                return;
            }
            entry.current_stage += 1;
            entry.updated_at = self.clock.now();
            if entry.current_stage >= definition_len {
                entry.status = InstanceStatus::Completed;
                Some((entry.recipient_id.clone(), entry.campaign_type))
            } else {
                None
            }
        };

        if let Some(key) = key {
            self.active_index.remove(&key);
            info!(instance = %instance_id, campaign = %key.1, "campaign instance completed");
            metrics::counter!("campaign.completed", "type" => key.1.as_str()).increment(1);
        }
    }
}

impl DeliveryHooks for CampaignEngine {
    fn before_send(&self, job: &Job) -> ReclaimResult<StageCheck> {
        let Some(instance) = self.instance(job.instance_id) else {
            return Ok(StageCheck::Stale);
        };
        if !instance.is_active() {
            return Ok(StageCheck::Stale);
        }
        // A stage due while its predecessor is still deferred (quota,
        // disconnect) waits its turn; stages go out in order.
        if job.stage > instance.current_stage {
            return Ok(StageCheck::Deferred);
        }
        // A job for a stage the instance already moved past was superseded
        // by a duplicate send or failure bookkeeping.
        if job.stage < instance.current_stage {
            return Err(ReclaimError::StaleStage {
                instance: job.instance_id,
                stage: job.stage,
            });
        }

        let Some(recipient) = self.records.get(&job.recipient_id) else {
            return Ok(StageCheck::Stale);
        };
        if recipient.status == RecipientStatus::Suppressed {
            self.cancel_instance(job.instance_id, CancelReason::OptedOut);
            return Ok(StageCheck::Stale);
        }
        // Converted between scheduling and delivery, e.g. an invoice paid.
        if self.records.is_goal_achieved(&job.recipient_id) {
            self.cancel_instance(job.instance_id, CancelReason::GoalAchieved);
            return Ok(StageCheck::Stale);
        }

        let body = self
            .catalog
            .render(&job.template_id, &recipient, &HashMap::new())?;
        Ok(StageCheck::Proceed {
            to: recipient.address,
            body,
        })
    }

    fn stage_delivered(&self, instance_id: Uuid, stage: u32) {
        self.advance_stage(instance_id, stage);
    }

    fn stage_failed(&self, job: &Job) {
        warn!(
            instance = %job.instance_id,
            stage = job.stage,
            "stage permanently failed, advancing past it"
        );
        self.advance_stage(job.instance_id, job.stage);
    }
}
