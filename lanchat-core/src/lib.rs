//! LAN broadcast chat protocol reference implementation.
//! Pure codec and dedup state; no I/O. The platform crate owns the sockets.

pub mod dedup;
pub mod message;
pub mod wire;

pub use dedup::SeenIds;
pub use message::Message;
pub use wire::{
    decode_frame, encode_frame, FrameDecodeError, FrameEncodeError, HEADER_SIZE, MAX_FRAME_LEN,
    MAX_SENDER_LEN, PROTOCOL_VERSION,
};
