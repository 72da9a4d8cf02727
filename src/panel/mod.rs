//! Panel subsystem
//!
//! The Markdown panel mirrors a task for human editing. This module holds
//! the tolerant parser (Markdown → structure), the canonical renderer
//! (structure → Markdown with stable anchors), the anchor/ordinal resolver,
//! and the section fingerprints behind the panel ETag.

pub mod anchors;
pub mod fingerprint;
pub mod glyphs;
pub mod models;
pub mod parser;
pub mod renderer;

pub use models::ParsedPanel;
pub use parser::parse_panel;
pub use renderer::{render_task, RenderOptions, RenderedPanel};
