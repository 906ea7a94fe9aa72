//! Session simulator
//!
//! Drives an [`EditorSession`](crate::session::EditorSession) against the
//! in-memory backend with a seeded random mix of typing, image inserts,
//! removals, undos and manual saves, with autosave running underneath.
//! Afterwards it checks:
//! - no persisted revision contains an inline image
//! - no two pipelines ever wrote concurrently
//! - no payload was uploaded again once a document write had followed it
//! - after a final save, storage holds exactly the assets the document uses

mod metered;
mod simulator;

pub use metered::MeteredBackend;
pub use simulator::{
    inline_png, run_simulator, SimulatedAction, SimulatorConfig, SimulatorReport, SimulatorStats,
    Violation,
};
