//! Declarative parse settings.
//!
//! [`PayloadConfig`] is the deserializable subset of [`ParseOptions`], meant to
//! be loaded from a route table or a configuration file:
//!
//! ```json
//! {
//!     "parse": "on",
//!     "output": "data",
//!     "max_bytes": 1048576,
//!     "timeout_ms": 10000,
//!     "allow": ["application/json", "multipart/form-data"],
//!     "multipart": { "output": "annotated" },
//!     "decoders": { "br": "brotli" },
//!     "compression": { "gzip": { "multi_member": true } }
//! }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use mime::Mime;
use serde::Deserialize;

use crate::codec::{Builtin, DecoderOptions, Decoders, FormDecoder};
use crate::options::{MultipartOptions, Output, ParseMode, ParseOptions, PartOutput};
use crate::protocol::PayloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormStyle {
    #[default]
    Flat,
    Nested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MultipartConfig {
    pub enabled: bool,
    pub output: Option<PartOutput>,
}

impl Default for MultipartConfig {
    fn default() -> Self {
        Self { enabled: true, output: None }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PayloadConfig {
    pub parse: ParseMode,
    pub output: Output,
    pub max_bytes: Option<u64>,
    pub max_parts: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub allow: Vec<String>,
    pub default_content_type: Option<String>,
    #[serde(rename = "override")]
    pub override_content_type: Option<String>,
    pub uploads: Option<PathBuf>,
    pub multipart: MultipartConfig,
    pub form: FormStyle,
    /// Built-in decoders registered on top of the default ones, keyed by encoding.
    pub decoders: HashMap<String, Builtin>,
    pub compression: HashMap<String, DecoderOptions>,
}

fn media_type(value: &str) -> Result<Mime, PayloadError> {
    value.parse().map_err(|e| PayloadError::invalid_media_type(format!("{value}: {e}")))
}

impl TryFrom<PayloadConfig> for ParseOptions {
    type Error = PayloadError;

    fn try_from(config: PayloadConfig) -> Result<Self, Self::Error> {
        let mut builder = ParseOptions::builder(config.parse, config.output);

        if let Some(max_bytes) = config.max_bytes {
            builder = builder.max_bytes(max_bytes);
        }
        if let Some(max_parts) = config.max_parts {
            builder = builder.max_parts(max_parts);
        }
        if let Some(timeout_ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        if !config.allow.is_empty() {
            let allow = config.allow.iter().map(|value| media_type(value)).collect::<Result<Vec<_>, _>>()?;
            builder = builder.allow(allow);
        }
        if let Some(default_content_type) = config.default_content_type {
            builder = builder.default_content_type(media_type(&default_content_type)?);
        }
        if let Some(override_content_type) = config.override_content_type {
            builder = builder.override_content_type(media_type(&override_content_type)?);
        }
        if let Some(uploads) = config.uploads {
            builder = builder.uploads(uploads);
        }

        let decoders = config
            .decoders
            .iter()
            .fold(Decoders::default(), |decoders, (encoding, builtin)| decoders.with_builtin(encoding, *builtin));
        builder = builder.decoders(decoders);

        for (encoding, options) in config.compression {
            builder = builder.compression(encoding, options);
        }

        let form_decoder = match config.form {
            FormStyle::Flat => FormDecoder::flat(),
            FormStyle::Nested => FormDecoder::nested(),
        };

        let multipart = MultipartOptions { enabled: config.multipart.enabled, output: config.multipart.output };

        Ok(builder.form_decoder(form_decoder).multipart(multipart).build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorKind;

    #[test]
    fn empty_config_is_the_default() {
        let config: PayloadConfig = serde_json::from_str("{}").unwrap();
        let options = ParseOptions::try_from(config).unwrap();

        assert_eq!(options.parse(), ParseMode::On);
        assert_eq!(options.output(), Output::Data);
        assert_eq!(options.max_bytes(), None);
        assert!(options.multipart().enabled);
    }

    #[test]
    fn full_config() {
        let config: PayloadConfig = serde_json::from_str(
            r#"{
                "parse": "decompress_only",
                "output": "file",
                "max_bytes": 1024,
                "max_parts": 10,
                "timeout_ms": 250,
                "allow": ["application/json", "text/plain"],
                "default_content_type": "application/json",
                "override": "text/plain",
                "uploads": "/var/uploads",
                "multipart": { "enabled": true, "output": "annotated" },
                "form": "nested",
                "decoders": { "br": "brotli", "zstd": "zstd" },
                "compression": { "GZIP": { "multi_member": true } }
            }"#,
        )
        .unwrap();

        let options = ParseOptions::try_from(config).unwrap();
        assert_eq!(options.parse(), ParseMode::DecompressOnly);
        assert_eq!(options.output(), Output::File);
        assert_eq!(options.max_bytes(), Some(1024));
        assert_eq!(options.max_parts(), Some(10));
        assert_eq!(options.timeout(), Some(Duration::from_millis(250)));
        assert_eq!(options.allow(), &[mime::APPLICATION_JSON, mime::TEXT_PLAIN]);
        assert_eq!(options.default_content_type(), Some(&mime::APPLICATION_JSON));
        assert_eq!(options.override_content_type(), Some(&mime::TEXT_PLAIN));
        assert_eq!(options.uploads(), Some(std::path::Path::new("/var/uploads")));
        assert_eq!(options.part_output(), PartOutput::Annotated);
        assert!(options.decoders().get("br").is_some());
        assert!(options.decoders().get("gzip").is_some());
        assert!(options.compression("gzip").is_some_and(|o| o.multi_member));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<PayloadConfig>(r#"{"max_byte": 1}"#).is_err());
        assert!(serde_json::from_str::<PayloadConfig>(r#"{"multipart": {"output": "raw"}}"#).is_err());
    }

    #[test]
    fn malformed_media_type() {
        let config = PayloadConfig { allow: vec!["not a mime".into()], ..PayloadConfig::default() };
        let error = ParseOptions::try_from(config).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::InvalidMediaType);
    }
}
