//! Buffering and media type based decoding of a body.

use std::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http_body::Body;
use http_body_util::BodyExt;
use mime::Mime;
use serde_json::{Map, Value as JsonValue};
use tracing::trace;

use crate::options::ParseOptions;
use crate::protocol::{PayloadError, Value};

/// Decodes `application/x-www-form-urlencoded` text into a structured value.
#[derive(Clone)]
pub struct FormDecoder {
    decode: Arc<dyn Fn(&str) -> Result<JsonValue, String> + Send + Sync>,
}

impl FormDecoder {
    pub fn new<F>(decode: F) -> Self
    where
        F: Fn(&str) -> Result<JsonValue, String> + Send + Sync + 'static,
    {
        Self { decode: Arc::new(decode) }
    }

    /// `a=1&a=2&b=3` becomes `{"a": ["1", "2"], "b": "3"}`.
    pub fn flat() -> Self {
        Self::new(|text| {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_str(text).map_err(|e| e.to_string())?;

            let mut object = Map::new();
            for (key, value) in pairs {
                match object.get_mut(&key) {
                    None => {
                        object.insert(key, JsonValue::String(value));
                    }
                    Some(JsonValue::Array(values)) => values.push(JsonValue::String(value)),
                    Some(existing) => {
                        let first = existing.take();
                        *existing = JsonValue::Array(vec![first, JsonValue::String(value)]);
                    }
                }
            }
            Ok(JsonValue::Object(object))
        })
    }

    /// Bracket aware decoding, `a[b]=1&a[c]=2&d=3` becomes `{"a": {"b": "1", "c": "2"}, "d": "3"}`.
    pub fn nested() -> Self {
        // serde_qs only deserializes maps at the top level
        Self::new(|text| {
            serde_qs::from_str::<Map<String, JsonValue>>(text).map(JsonValue::Object).map_err(|e| e.to_string())
        })
    }

    pub fn decode(&self, text: &str) -> Result<JsonValue, PayloadError> {
        (self.decode)(text).map_err(PayloadError::invalid_form)
    }
}

impl Default for FormDecoder {
    fn default() -> Self {
        Self::flat()
    }
}

impl fmt::Debug for FormDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormDecoder").finish_non_exhaustive()
    }
}

/// The decoding family of a media type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContentKind {
    Binary,
    Text,
    Json,
    Form,
    Multipart,
    Unsupported,
}

type DecodeFn = fn(Bytes, &Mime, &ParseOptions) -> Result<Value, PayloadError>;

impl ContentKind {
    pub fn classify(media_type: &Mime) -> Self {
        let (type_, subtype) = (media_type.type_(), media_type.subtype());

        if type_ == mime::APPLICATION && subtype == mime::OCTET_STREAM {
            ContentKind::Binary
        } else if type_ == mime::TEXT {
            ContentKind::Text
        } else if type_ == mime::APPLICATION && (subtype == mime::JSON || media_type.suffix() == Some(mime::JSON)) {
            ContentKind::Json
        } else if type_ == mime::APPLICATION && subtype == mime::WWW_FORM_URLENCODED {
            ContentKind::Form
        } else if type_ == mime::MULTIPART && subtype == mime::FORM_DATA {
            ContentKind::Multipart
        } else {
            ContentKind::Unsupported
        }
    }

    fn decoder(self) -> DecodeFn {
        match self {
            ContentKind::Binary => decode_binary,
            ContentKind::Text => decode_text,
            ContentKind::Json => decode_json,
            ContentKind::Form => decode_form,
            ContentKind::Multipart | ContentKind::Unsupported => reject,
        }
    }
}

fn decode_binary(bytes: Bytes, _media_type: &Mime, _options: &ParseOptions) -> Result<Value, PayloadError> {
    if bytes.is_empty() { Ok(Value::Null) } else { Ok(Value::Binary(bytes)) }
}

fn decode_text(bytes: Bytes, _media_type: &Mime, _options: &ParseOptions) -> Result<Value, PayloadError> {
    Ok(Value::Text(String::from_utf8_lossy(&bytes).into_owned()))
}

fn decode_json(bytes: Bytes, _media_type: &Mime, _options: &ParseOptions) -> Result<Value, PayloadError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }

    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Value::Json(value)),
        Err(e) => Err(PayloadError::invalid_json(e, bytes)),
    }
}

fn decode_form(bytes: Bytes, _media_type: &Mime, options: &ParseOptions) -> Result<Value, PayloadError> {
    if bytes.is_empty() {
        return Ok(Value::Form(JsonValue::Object(Map::new())));
    }

    let text = String::from_utf8_lossy(&bytes);
    options.form_decoder().decode(&text).map(Value::Form)
}

fn reject(_bytes: Bytes, media_type: &Mime, _options: &ParseOptions) -> Result<Value, PayloadError> {
    Err(PayloadError::unsupported_media_type(media_type.essence_str()))
}

/// Decodes a buffered body according to `media_type`.
pub fn decode_value(bytes: Bytes, media_type: &Mime, options: &ParseOptions) -> Result<Value, PayloadError> {
    let kind = ContentKind::classify(media_type);
    trace!(?kind, len = bytes.len(), "decoding buffered payload");
    (kind.decoder())(bytes, media_type, options)
}

/// Buffers `body` in memory, failing once more than `max_bytes` arrived.
pub async fn read_to_limit<B>(body: B, max_bytes: Option<u64>) -> Result<Bytes, PayloadError>
where
    B: Body<Data = Bytes, Error = PayloadError>,
{
    let mut body = std::pin::pin!(body);
    let mut buf = BytesMut::new();

    while let Some(frame) = body.frame().await {
        let Ok(data) = frame?.into_data() else {
            continue;
        };

        if let Some(max_bytes) = max_bytes {
            if (buf.len() + data.len()) as u64 > max_bytes {
                return Err(PayloadError::too_large(max_bytes));
            }
        }
        buf.extend_from_slice(&data);
    }

    Ok(buf.freeze())
}
