//! End-to-end campaign flow: channel connection, delivery queue, campaign
//! engine, and response router wired together over a scripted transport,
//! driven by a manual clock.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use reclaim_campaign::{CampaignEngine, CancelReason, InstanceStatus};
use reclaim_channel::{
    ChannelConnection, ChannelTransport, HandshakeStart, SessionCredentials, TransportEvent,
};
use reclaim_core::alerts::noop_sink;
use reclaim_core::config::AppConfig;
use reclaim_core::records::{BusinessRecords, InMemoryRecords};
use reclaim_core::templates::StaticCatalog;
use reclaim_core::types::{
    CampaignType, InboundEvent, Receipt, Recipient, RecipientStatus,
};
use reclaim_core::ReclaimResult;
use reclaim_delivery::{Clock, DeliveryQueue, JobStatus, ManualClock, QuotaTracker};
use reclaim_router::{KeywordClassifier, ResponseRouter};

/// Transport that records outgoing messages and lets the test inject
/// inbound replies.
struct ScriptedChannel {
    sent: Mutex<Vec<(String, String)>>,
    events: tokio::sync::Mutex<mpsc::Receiver<TransportEvent>>,
}

impl ScriptedChannel {
    fn new() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
        let (tx, rx) = mpsc::channel(32);
        let transport = Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            events: tokio::sync::Mutex::new(rx),
        });
        (transport, tx)
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl ChannelTransport for ScriptedChannel {
    async fn begin_handshake(
        &self,
        _stored: Option<&SessionCredentials>,
    ) -> ReclaimResult<HandshakeStart> {
        Ok(HandshakeStart::Restored(SessionCredentials {
            device_id: "e2e-device".to_string(),
            auth_blob: "e2e".to_string(),
        }))
    }

    async fn await_pairing(&self) -> ReclaimResult<SessionCredentials> {
        std::future::pending().await
    }

    async fn send_text(&self, to: &str, body: &str) -> ReclaimResult<Receipt> {
        self.sent.lock().push((to.to_string(), body.to_string()));
        Ok(Receipt {
            message_id: Uuid::new_v4().to_string(),
            accepted_at: Utc::now(),
        })
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }
}

struct Stack {
    transport: Arc<ScriptedChannel>,
    inject: mpsc::Sender<TransportEvent>,
    engine: Arc<CampaignEngine>,
    queue: Arc<DeliveryQueue>,
    records: Arc<InMemoryRecords>,
    clock: ManualClock,
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 10, 30, 0)
        .single()
        .expect("valid timestamp")
}

async fn stack() -> Stack {
    let mut config = AppConfig::default();
    config.channel.session_path = std::env::temp_dir()
        .join(format!("reclaim-e2e-{}", Uuid::new_v4()))
        .to_str()
        .expect("utf-8 temp path")
        .to_string();

    let clock = ManualClock::starting_at(start_time());
    let alerts = noop_sink();

    let (transport, inject) = ScriptedChannel::new();
    let (connection, inbound) =
        ChannelConnection::new(transport.clone(), config.channel.clone(), alerts.clone());
    connection.connect().await.expect("connect");
    tokio::spawn(connection.clone().run());

    let quota = Arc::new(QuotaTracker::new(
        &config.quota,
        Arc::new(clock.clone()),
        alerts.clone(),
    ));
    let queue = DeliveryQueue::new(
        config.delivery.clone(),
        Arc::new(clock.clone()),
        alerts.clone(),
    );
    let records = Arc::new(InMemoryRecords::new());
    let engine = CampaignEngine::new(
        config.campaign.clone(),
        queue.clone(),
        records.clone(),
        Arc::new(StaticCatalog::builtin()),
        quota.clone(),
        Arc::new(clock.clone()),
        alerts,
    );
    let _workers = queue.start(engine.clone(), connection, quota);

    let router = ResponseRouter::new(
        KeywordClassifier::default(),
        engine.clone(),
        records.clone(),
        noop_sink(),
    );
    tokio::spawn(router.run(inbound));

    Stack {
        transport,
        inject,
        engine,
        queue,
        records,
        clock,
    }
}

fn seed(stack: &Stack, id: &str, name: &str) {
    stack.records.insert(
        Recipient {
            id: id.to_string(),
            address: format!("5511{id}"),
            display_name: name.to_string(),
            status: RecipientStatus::Eligible,
        },
        &[],
    );
}

async fn advance(stack: &Stack, by: ChronoDuration) {
    stack.clock.advance(by);
    tokio::time::advance(Duration::from_secs(by.num_seconds() as u64)).await;
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..2000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn reply(stack: &Stack, from: &str, text: &str) {
    stack
        .inject
        .send(TransportEvent::Inbound(InboundEvent {
            from: from.to_string(),
            text: text.to_string(),
            timestamp: stack.clock.now(),
        }))
        .await
        .expect("inject inbound");
}

#[tokio::test(start_paused = true)]
async fn test_reactivation_conversion_cancels_remaining_stages() {
    let stack = stack().await;
    seed(&stack, "m1", "Maria Silva");

    let instance = stack
        .engine
        .start_instance("m1", CampaignType::Reactivation)
        .expect("start instance");
    assert_eq!(stack.queue.jobs_for_instance(instance).len(), 3);

    // Day 15: the first nudge goes out in the 14:00 slot.
    advance(&stack, ChronoDuration::days(15) + ChronoDuration::hours(4)).await;
    wait_until(|| stack.transport.sent_count() == 1).await;

    let (to, body) = stack.transport.sent.lock()[0].clone();
    assert_eq!(to, "5511m1");
    assert!(body.contains("Maria"));
    assert_eq!(
        stack.engine.instance(instance).expect("instance").current_stage,
        1
    );

    // Day 20: the member replies with buying intent.
    advance(&stack, ChronoDuration::days(5)).await;
    reply(&stack, "5511m1", "Quero saber o valor do plano").await;
    wait_until(|| stack.records.is_goal_achieved("m1")).await;

    wait_until(|| {
        stack.engine.instance(instance).expect("instance").status
            == InstanceStatus::Cancelled(CancelReason::GoalAchieved)
    })
    .await;

    // The day-30 and day-60 stages never fire.
    advance(&stack, ChronoDuration::days(45)).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(stack.transport.sent_count(), 1);

    let jobs = stack.queue.jobs_for_instance(instance);
    assert_eq!(
        jobs.iter().filter(|j| j.status == JobStatus::Done).count(),
        1
    );
    assert_eq!(
        jobs.iter()
            .filter(|j| j.status == JobStatus::Cancelled)
            .count(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn test_opt_out_mid_campaign_suppresses_recipient() {
    let stack = stack().await;
    seed(&stack, "v1", "Ana Souza");

    let instance = stack
        .engine
        .start_instance("v1", CampaignType::Nurturing)
        .expect("start instance");

    // Days 1 and 2 deliver in their send-window slots.
    advance(&stack, ChronoDuration::days(1) + ChronoDuration::hours(4)).await;
    wait_until(|| stack.transport.sent_count() == 1).await;
    advance(&stack, ChronoDuration::days(1)).await;
    wait_until(|| stack.transport.sent_count() == 2).await;

    reply(&stack, "5511v1", "parar, por favor").await;
    wait_until(|| {
        stack.records.get("v1").expect("recipient").status == RecipientStatus::Suppressed
    })
    .await;
    assert_eq!(
        stack.engine.instance(instance).expect("instance").status,
        InstanceStatus::Cancelled(CancelReason::OptedOut)
    );

    // Days 5, 10 and 15 stay silent.
    advance(&stack, ChronoDuration::days(15)).await;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(stack.transport.sent_count(), 2);

    // Suppression outlives the campaign: nothing can restart it.
    assert!(stack
        .engine
        .start_instance("v1", CampaignType::Nurturing)
        .is_err());
}
