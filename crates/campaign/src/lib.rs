//! Campaign engine — multi-stage outreach sequences per recipient, with
//! duplicate/cooldown guards, send-window alignment, and goal-driven
//! cancellation.

pub mod engine;
pub mod send_window;
pub mod types;

pub use engine::CampaignEngine;
pub use send_window::align_to_window;
pub use types::{
    CampaignDefinition, CampaignInstance, CancelReason, InstanceStatus, StageTemplate,
};
