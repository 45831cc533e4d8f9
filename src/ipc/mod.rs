//! Module IPC avec le guest
//!
//! Définit les commandes du guest et les événements qui lui sont envoyés.

mod commands;
mod events;

pub use commands::{BackendFactory, MicState};
pub use events::{BroadcastEventQueues, EventQueue, EventQueueLookup, MicCommand, MicEvent};
