/*
    core_selection - Selection state and its reconciliation engine

    - state: the in-memory selection (per-item flags + flat sub-item aggregate)
    - reconcile: pure transitions for local intents, push events and the seed
    - engine: the single-writer actor and the handle used to reach it
*/

pub mod engine;
pub mod errors;
pub mod reconcile;
pub mod state;

pub use engine::{SyncEngine, SyncHandle, SyncReport};
pub use errors::{MalformedEventError, SyncError, SyncResult};
pub use reconcile::{
    apply_local, apply_remote, apply_seed, reconcile_pass, sub_item_selection_checks_owner,
    validate_local, Input, InputOutcome, LocalIntent, SeedOutcome,
};
pub use state::{SelectionSnapshot, SelectionState};
