//! Types shared by every stage of the parse pipeline.
//!
//! - **Request** ([`request`]): [`ParseRequest`], the header view plus body
//! - **Bodies** ([`body`]): [`PayloadBody`] and the [`Tap`] observer
//! - **Results** ([`payload`]): [`Parsed`], [`Payload`], [`Value`], [`SavedFile`]
//! - **Errors** ([`error`]): [`PayloadError`] and its [`ErrorKind`]

mod request;
pub use request::ParseRequest;

mod payload;
pub use payload::Parsed;
pub use payload::Payload;
pub use payload::SavedFile;
pub use payload::Value;

mod error;
pub use error::ErrorKind;
pub use error::PayloadError;

pub mod body;
pub use body::PayloadBody;
pub use body::Tap;
pub use body::TapSink;
