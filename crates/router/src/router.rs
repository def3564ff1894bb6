use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use reclaim_core::alerts::{make_alert, AlertSeverity, AlertSink};
use reclaim_core::records::BusinessRecords;
use reclaim_core::types::InboundEvent;

use reclaim_campaign::{CampaignEngine, CancelReason};

use crate::classify::{Intent, KeywordClassifier};

/// Consumes inbound replies and applies the classified intent to campaign
/// state. Replies from unknown addresses are logged and dropped.
pub struct ResponseRouter {
    classifier: KeywordClassifier,
    engine: Arc<CampaignEngine>,
    records: Arc<dyn BusinessRecords>,
    alerts: Arc<dyn AlertSink>,
}

impl ResponseRouter {
    pub fn new(
        classifier: KeywordClassifier,
        engine: Arc<CampaignEngine>,
        records: Arc<dyn BusinessRecords>,
        alerts: Arc<dyn AlertSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            classifier,
            engine,
            records,
            alerts,
        })
    }

    /// Classifies one reply and applies its side effects. Returns the
    /// intent for callers that want to observe routing decisions.
    pub fn handle(&self, event: &InboundEvent) -> Intent {
        let intent = self.classifier.classify(&event.text);
        metrics::counter!("router.classified", "intent" => format!("{intent:?}")).increment(1);

        let Some(recipient) = self.records.find_by_address(&event.from) else {
            debug!(from = %event.from, "reply from unknown address ignored");
            return intent;
        };

        match intent {
            Intent::OptOut => {
                info!(recipient = %recipient.id, "opt-out received");
                self.records.suppress(&recipient.id);
                let cancelled = self.engine.cancel_all_for(&recipient.id, CancelReason::OptedOut);
                debug!(recipient = %recipient.id, cancelled, "opt-out cancelled instances");
            }
            Intent::ConversionIntent => {
                info!(recipient = %recipient.id, "conversion intent received");
                self.records.mark_goal_achieved(&recipient.id);
                self.engine
                    .cancel_all_for(&recipient.id, CancelReason::GoalAchieved);
                self.alerts.raise(make_alert(
                    AlertSeverity::Info,
                    "router",
                    format!(
                        "{} replied with buying intent: \"{}\"",
                        recipient.display_name, event.text
                    ),
                ));
            }
            Intent::Question => {
                self.alerts.raise(make_alert(
                    AlertSeverity::Info,
                    "router",
                    format!(
                        "{} asked a question: \"{}\"",
                        recipient.display_name, event.text
                    ),
                ));
            }
            Intent::None => {
                debug!(recipient = %recipient.id, text = %event.text, "reply not recognized");
            }
        }
        intent
    }

    /// Drains the inbound channel until the sender side closes.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundEvent>) {
        info!("response router started");
        while let Some(event) = inbound.recv().await {
            self.handle(&event);
        }
        warn!("inbound channel closed, response router stopping");
    }
}
