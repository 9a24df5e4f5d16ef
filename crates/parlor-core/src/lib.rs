//! Core domain logic for parlor slot monitoring.
//!
//! This crate contains the fundamental types and logic for:
//! - Events: decoding and validating poll rows and push notifications
//! - Layout: mapping entities to physical slots
//! - Engine: reconciling measurements into the authoritative slot table
//! - Simulation: a seeded synthetic measurement source

pub mod clock;
pub mod engine;
pub mod event;
pub mod layout;
pub mod notify;
pub mod simulation;
pub mod slot;
pub mod stats;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{Engine, EngineSnapshot, SourceStatus};
pub use event::{MalformedEvent, MeasurementEvent, PulseConversion, RawOpenRun, RunSnapshot};
pub use layout::{Layout, Side, SideSplit, assign};
pub use notify::{Observer, TickReport, Transition};
pub use simulation::{Bounds, SimulationConfig, Simulator, TickBounds};
pub use slot::{Slot, SlotStatus};
pub use stats::SessionStats;
pub use types::{ConfigError, EntityId, Occupant, RunId, SlotId, ValidationError};
