//! Wire codec: lossless value encoding plus protocol message framing.
//!
//! - [`value`]: application [`Value`]s to and from JSON-safe wire values
//! - [`message`]: the [`WireMessage`] envelope, as JSON text or UTF-8 bytes
//! - [`schema`]: optional structural validation of decoded values
//!
//! Everything here is stateless.

pub mod message;
pub mod schema;
pub mod value;

pub use message::{
    decode_binary, decode_message, encode_binary, encode_message, Modification, ModificationKind,
    RequestKind, WireMessage,
};
pub use schema::{validate_with_schema, FieldSchema, Schema};
pub use value::{decode_value, encode_value, EncodeOptions, RecordId, SharedValue, Value};
