//! An asynchronous request payload parser
//!
//! This crate turns the body of an HTTP request into the representation a
//! handler asks for: the raw bytes, a decoded value, a live stream, a file on
//! disk, or the collected fields and parts of a `multipart/form-data` body.
//! It works on any [`http_body::Body`] yielding [`bytes::Bytes`] and only looks
//! at the `content-length`, `content-type` and `content-encoding` headers.
//!
//! # Features
//!
//! - Declared length and byte limits checked before and while reading
//! - Media type resolution with override, default and allow-list
//! - `gzip`, `deflate`, `br` and `zstd` content-encoding decompression
//! - JSON, form, text and binary decoding
//! - Streaming multipart aggregation with concurrent file uploads
//! - Temporary files removed on every failure, timeout or client abort
//! - A tap observing the payload bytes as they flow through
//!
//! # Example
//!
//! ```no_run
//! use http::Request;
//! use http_body_util::Full;
//! use bytes::Bytes;
//! use micro_payload::{ParseMode, ParseOptions, ParseRequest, Output, parse};
//!
//! # async fn example() -> Result<(), micro_payload::PayloadError> {
//! let request = Request::builder()
//!     .header("content-type", "application/json")
//!     .body(Full::new(Bytes::from_static(br#"{"name": "micro"}"#)))
//!     .unwrap();
//!
//! let options = ParseOptions::builder(ParseMode::On, Output::Data).max_bytes(1024 * 1024).build();
//! let parsed = parse(ParseRequest::from(request), None, &options).await?;
//!
//! let value = parsed.payload.as_data().and_then(|value| value.as_json());
//! assert_eq!(value.unwrap()["name"], "micro");
//! # Ok(())
//! # }
//! ```

mod gate;
mod latch;
mod parse;
mod utils;

pub mod codec;
pub mod config;
pub mod file;
pub mod multipart;
pub mod options;
pub mod protocol;

pub use config::PayloadConfig;
pub use options::MultipartOptions;
pub use options::Output;
pub use options::ParseMode;
pub use options::ParseOptions;
pub use options::PartOutput;
pub use parse::parse;
pub use protocol::ErrorKind;
pub use protocol::ParseRequest;
pub use protocol::Parsed;
pub use protocol::Payload;
pub use protocol::PayloadError;
pub use protocol::Tap;
pub use protocol::Value;
