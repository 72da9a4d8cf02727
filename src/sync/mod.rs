//! Lazy synchronization engine
//!
//! Reconciles the human-edited panel with the structured task: difference
//! detection, conflict classification and resolution, change application,
//! and audit. The panel owns content, the task owns status; sync never
//! writes a status back from the panel.

pub mod cache;
pub mod diff;
pub mod engine;
pub mod models;
pub mod resolve;

pub use cache::SyncCache;
pub use diff::diff_panel;
pub use engine::apply_diff;
pub use models::{PanelDiff, SyncOutcome};
pub use resolve::Strategy;
