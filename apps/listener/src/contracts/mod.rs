pub mod codec;
pub mod event;

pub use codec::{decode, encode, CodecError};
pub use event::{Event, RawPayload};
