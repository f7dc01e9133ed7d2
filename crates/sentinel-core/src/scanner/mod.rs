pub mod walk;

pub use walk::{build_snapshots, WalkOutcome};
