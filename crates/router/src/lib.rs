//! Response router — classifies inbound replies by keyword and turns them
//! into campaign actions: opt-out suppression, conversion handoff, or a
//! human-attention alert.

pub mod classify;
pub mod router;

pub use classify::{Intent, KeywordClassifier, KeywordSets};
pub use router::ResponseRouter;
