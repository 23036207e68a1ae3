//! Projection implementations (read model builders).
//!
//! Projections consume committed events and build query-optimized read models.
//! All projections are:
//! - **Rebuildable**: can be reconstructed from the event log
//! - **Idempotent**: safe for at-least-once delivery (per-key cursor)

pub mod inventory_view;
pub mod view_projector;

pub use inventory_view::{INVENTORY_FRONTEND_VIEW, InventoryFrontendView};
pub use view_projector::{ProjectionError, ViewProjector};
