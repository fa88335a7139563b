use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use mime::Mime;

use crate::multipart::Aggregate;
use crate::protocol::body::PayloadBody;

/// The outcome of a successful parse.
#[derive(Debug)]
pub struct Parsed {
    pub media_type: Mime,
    pub payload: Payload,
}

/// Exactly one representation of the request body.
pub enum Payload {
    /// The undecoded body, when parsing is switched off.
    Raw(Bytes),
    /// The live body, decompressed when requested.
    Stream(PayloadBody),
    /// The body written to a temporary file.
    File(SavedFile),
    /// The body decoded according to its media type.
    Data(Value),
    /// The fields and parts of a `multipart/form-data` body.
    Multipart(Aggregate),
}

impl Payload {
    pub fn as_raw(&self) -> Option<&Bytes> {
        match self {
            Payload::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            Payload::Data(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&SavedFile> {
        match self {
            Payload::File(file) => Some(file),
            _ => None,
        }
    }

    pub fn as_multipart(&self) -> Option<&Aggregate> {
        match self {
            Payload::Multipart(aggregate) => Some(aggregate),
            _ => None,
        }
    }

    pub fn into_stream(self) -> Option<PayloadBody> {
        match self {
            Payload::Stream(body) => Some(body),
            _ => None,
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Raw(bytes) => f.debug_tuple("Raw").field(bytes).finish(),
            Payload::Stream(_) => f.write_str("Stream(..)"),
            Payload::File(file) => f.debug_tuple("File").field(file).finish(),
            Payload::Data(value) => f.debug_tuple("Data").field(value).finish(),
            Payload::Multipart(aggregate) => f.debug_tuple("Multipart").field(aggregate).finish(),
        }
    }
}

/// A body decoded by its media type.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// An empty binary or JSON body.
    Null,
    Binary(Bytes),
    Text(String),
    Json(serde_json::Value),
    /// The output of the configured form decoder.
    Form(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The structured value of a JSON or form body.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(value) | Value::Form(value) => Some(value),
            _ => None,
        }
    }
}

/// A body materialized on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub path: PathBuf,
    pub bytes: u64,
}
