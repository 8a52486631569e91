// Wire protocol shared by toolbridge tool hosts and clients

pub mod codec;
pub mod protocol;
pub mod schema;

pub use codec::{decode, decode_value, encode, is_blank, serialize, DecodeError, EncodeError};
pub use protocol::*;
