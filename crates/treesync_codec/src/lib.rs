//! # treesync_codec
//!
//! The data model shared by every TreeSync crate: the JSON-like [`Value`]
//! tree, slash-separated [`Path`]s addressing locations in it, and a CBOR
//! codec for the durable records the persistence layer stores.
//!
//! ## Example
//!
//! ```
//! use treesync_codec::{from_cbor, to_cbor, Path, Value};
//!
//! let value = Value::map_from([("name", Value::from("ada")), ("score", Value::from(42))]);
//! let bytes = to_cbor(&value).unwrap();
//! let back: Value = from_cbor(&bytes).unwrap();
//! assert_eq!(back, value);
//!
//! let path = Path::parse("users/ada");
//! assert_eq!(path.front(), Some("users"));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

mod decoder;
mod encoder;
mod error;
mod path;
mod value;

pub use decoder::{from_cbor, Decode};
pub use encoder::{to_cbor, Encode};
pub use error::{CodecError, CodecResult};
pub use path::Path;
pub use value::{Value, PRIORITY_KEY, VALUE_KEY};
