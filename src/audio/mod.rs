//! Module de capture audio
//!
//! Interface vers les périphériques de capture de l'hôte et buffering
//! des flux produits pour le guest.

mod backend;
mod microphone;
mod ring_buffer;

#[cfg(test)]
pub use backend::MockCaptureBackend;
pub use backend::{CaptureBackend, CaptureError, CaptureHandle, ChannelFormat};
pub use microphone::CpalBackend;
pub use ring_buffer::RingBuffer;
