//! Remote contract interface model.
//!
//! Parameter types, typed values, interface files, the canonical encoding and
//! the content digest derived from it.

mod encode;
mod interface;
mod types;
mod value;

pub use encode::{content_digest, encode, encode_digest, Digest, EncodeError};
pub use interface::{FunctionDescriptor, Interface, Mutability, Param};
pub use types::{AbiType, Component, TypeParseError};
pub use value::{signed_to_string, AbiValue};
