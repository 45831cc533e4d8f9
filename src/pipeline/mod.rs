//! Module pipeline de capture temps réel
//!
//! Gère le flux périphériques hôte → staging → transcodage → ring buffers
//! → notification du guest.

mod clock;
mod realtime;

pub use clock::{EmulatorClock, EmulatorState, HostClock, ManualClock};
pub use realtime::{
    period_start, CapturePipeline, PipelineStatus, Tick, IDLE_WAIT, PERIOD_SAMPLES,
    REFERENCE_RATE,
};
