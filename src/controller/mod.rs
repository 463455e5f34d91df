//! Safety side of the pipeline: fault rules, the contactor latch, and the
//! engine that drives one tick through the whole chain.

pub mod contactor;
pub mod engine;
pub mod fault_monitor;

pub use contactor::{ContactorController, ContactorEvent, ContactorState};
pub use engine::{EngineError, PackEngine, StateInjection, TickOutcome};
pub use fault_monitor::{FaultEvaluation, FaultMonitor, FaultViolation};
