//! Module micro
//!
//! Micros virtuels exposés au guest, leurs familles et le registre de session.

mod device;
mod handler;
mod registry;
mod types;

pub use device::{MicDevice, DEFAULT_INBUF_SIZE, DEFAULT_SAMPLE_RATE};
pub use handler::{copy_raw, mix_dual, swap_subframes, ByteOrder, MicrophoneHandler};
pub use registry::{MicRegistry, MAX_DEVICES};
pub use types::{
    DeviceAttr, DeviceAttributes, InputFormat, MicError, MicType, SignalState,
    SignalStateValue, SignalType, SignalTypes,
};
