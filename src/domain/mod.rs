// Market identifiers and normalization
pub mod market;

// Strategy intents
pub mod signal;

// Exchange contract types
pub mod exchange;

// Market tradability snapshots
pub mod condition;

// Execution records
pub mod trade;

// Pending-order state machine
pub mod pending;

// Positions and close reasons
pub mod position;

// Close-recovery tasks
pub mod recovery;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Executor error taxonomy
pub mod errors;
