pub mod buffer;
pub mod codec;
pub mod layout;
pub mod ring_capture;
pub mod trigger;
