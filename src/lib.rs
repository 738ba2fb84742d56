//! Ward Trace - room occupancy histories from wearable proximity badges
//!
//! Ward Trace turns the raw contact records of a badge deployment into
//! per-second room occupancy through a deterministic pipeline: ingestion →
//! contact intervals → second-by-second ledger → debounced room states →
//! occupancy history.
//!
//! ## Modules
//!
//! - **Intervals**: clean, symmetrize and merge raw contact records per shift
//! - **Occupancy**: infer which room each badge is in from nearby anchors
//! - **Pipeline**: run shifts in parallel and persist their artifacts

pub mod combine;
pub mod config;
pub mod error;
pub mod ingest;
pub mod intervals;
pub mod ledger;
pub mod occupancy;
pub mod persist;
pub mod pipeline;
pub mod registry;
pub mod roster;
pub mod shifts;
pub mod stamp;
pub mod types;

pub use combine::{OccupancyHistory, OccupancyRecord, RoomHistoryCombiner, RoomState};
pub use config::TraceConfig;
pub use error::TraceError;
pub use ingest::RawFeed;
pub use intervals::IntervalBuilder;
pub use ledger::{HistoryExpander, Ledger};
pub use occupancy::{BadgeState, OccupancyStateMachine, StateHistory, TransitionStats};
pub use persist::ArtifactLayout;
pub use pipeline::{contact_intervals, ReportStatus, ShiftProcessor, ShiftReport};
pub use registry::{AnchorRegistry, AnchorRole, RoomId};
pub use roster::ShiftRoster;
pub use shifts::{ShiftTable, ShiftWindow};
pub use stamp::TimestampStyle;
pub use types::{ContactInterval, EntityId, EntityKind, RawObservation};

/// Ward Trace version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
