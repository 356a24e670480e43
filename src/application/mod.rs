// Order-side decision gate
pub mod gate;

// Instrument metadata cache
pub mod instruments;

// The signal monitor loop, evaluator and alert throttle
pub mod monitor;

// Decision-trace writer
pub mod trace;

// Order placement, protection and reconciliation
pub mod trading;

// System orchestrator
pub mod system;
