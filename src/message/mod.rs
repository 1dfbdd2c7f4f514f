//! Works Mobile payload model and normalization

pub mod normalizer;
pub mod types;

pub use normalizer::{decode_payload, normalize, parse, NormalizeError};
pub use types::{
    ChannelType, EnvelopeKind, MessageType, StickerInfo, StickerType, WorksMessage,
};
