//! Parse configuration.
//!
//! [`ParseOptions`] is assembled through [`ParseOptions::builder`]; only the
//! parse mode and the output mode are mandatory, everything else falls back
//! to unbounded limits, the default decoder registry, the flat form decoder
//! and the `multer` backed multipart scanner.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mime::Mime;
use serde::Deserialize;

use crate::codec::{DecoderOptions, Decoders, FormDecoder};
use crate::multipart::{MulterScanner, MultipartScanner};

/// Whether the body content is interpreted.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// Decompress, then decode by media type.
    #[default]
    On,
    /// Hand the body over untouched.
    Off,
    /// Decompress, but skip content based decoding.
    DecompressOnly,
}

/// How the body is delivered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Output {
    #[default]
    Data,
    Stream,
    File,
}

/// How a single multipart part is delivered.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartOutput {
    Data,
    Stream,
    File,
    /// Decoded data wrapped with the part filename and headers.
    Annotated,
}

impl From<Output> for PartOutput {
    fn from(output: Output) -> Self {
        match output {
            Output::Data => PartOutput::Data,
            Output::Stream => PartOutput::Stream,
            Output::File => PartOutput::File,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MultipartOptions {
    pub enabled: bool,
    /// Overrides the top level output for parts, `None` inherits it.
    pub output: Option<PartOutput>,
}

impl MultipartOptions {
    pub fn disabled() -> Self {
        Self { enabled: false, output: None }
    }

    pub fn with_output(output: PartOutput) -> Self {
        Self { enabled: true, output: Some(output) }
    }
}

impl Default for MultipartOptions {
    fn default() -> Self {
        Self { enabled: true, output: None }
    }
}

#[derive(Clone)]
pub struct ParseOptions {
    parse: ParseMode,
    output: Output,
    max_bytes: Option<u64>,
    max_parts: Option<usize>,
    timeout: Option<Duration>,
    allow: Vec<Mime>,
    default_content_type: Option<Mime>,
    override_content_type: Option<Mime>,
    uploads: Option<PathBuf>,
    decoders: Decoders,
    compression: HashMap<String, DecoderOptions>,
    form_decoder: FormDecoder,
    multipart: MultipartOptions,
    scanner: Arc<dyn MultipartScanner>,
}

impl ParseOptions {
    pub fn builder(parse: ParseMode, output: Output) -> ParseOptionsBuilder {
        ParseOptionsBuilder::new(parse, output)
    }

    pub fn parse(&self) -> ParseMode {
        self.parse
    }

    pub fn output(&self) -> Output {
        self.output
    }

    pub fn max_bytes(&self) -> Option<u64> {
        self.max_bytes
    }

    pub fn max_parts(&self) -> Option<usize> {
        self.max_parts
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn allow(&self) -> &[Mime] {
        &self.allow
    }

    pub fn default_content_type(&self) -> Option<&Mime> {
        self.default_content_type.as_ref()
    }

    pub fn override_content_type(&self) -> Option<&Mime> {
        self.override_content_type.as_ref()
    }

    /// The directory receiving `file` output, the system temp dir when unset.
    pub fn uploads(&self) -> Option<&Path> {
        self.uploads.as_deref()
    }

    pub fn decoders(&self) -> &Decoders {
        &self.decoders
    }

    pub fn compression(&self, encoding: &str) -> Option<&DecoderOptions> {
        self.compression.get(encoding)
    }

    pub fn form_decoder(&self) -> &FormDecoder {
        &self.form_decoder
    }

    pub fn multipart(&self) -> MultipartOptions {
        self.multipart
    }

    /// The output applied to each multipart part.
    pub fn part_output(&self) -> PartOutput {
        self.multipart.output.unwrap_or_else(|| self.output.into())
    }

    pub fn scanner(&self) -> &dyn MultipartScanner {
        self.scanner.as_ref()
    }
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptionsBuilder::new(ParseMode::default(), Output::default()).build()
    }
}

impl fmt::Debug for ParseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParseOptions")
            .field("parse", &self.parse)
            .field("output", &self.output)
            .field("max_bytes", &self.max_bytes)
            .field("max_parts", &self.max_parts)
            .field("timeout", &self.timeout)
            .field("allow", &self.allow)
            .field("default_content_type", &self.default_content_type)
            .field("override_content_type", &self.override_content_type)
            .field("uploads", &self.uploads)
            .field("decoders", &self.decoders)
            .field("compression", &self.compression)
            .field("multipart", &self.multipart)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct ParseOptionsBuilder {
    options: ParseOptions,
}

impl ParseOptionsBuilder {
    fn new(parse: ParseMode, output: Output) -> Self {
        Self {
            options: ParseOptions {
                parse,
                output,
                max_bytes: None,
                max_parts: None,
                timeout: None,
                allow: Vec::new(),
                default_content_type: None,
                override_content_type: None,
                uploads: None,
                decoders: Decoders::default(),
                compression: HashMap::new(),
                form_decoder: FormDecoder::default(),
                multipart: MultipartOptions::default(),
                scanner: Arc::new(MulterScanner),
            },
        }
    }

    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.options.max_bytes = Some(max_bytes);
        self
    }

    pub fn max_parts(mut self, max_parts: usize) -> Self {
        self.options.max_parts = Some(max_parts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Restricts the accepted media types, a single `Mime` or any collection of them.
    pub fn allow<I: IntoIterator<Item = Mime>>(mut self, allow: I) -> Self {
        self.options.allow = allow.into_iter().collect();
        self
    }

    pub fn default_content_type(mut self, mime: Mime) -> Self {
        self.options.default_content_type = Some(mime);
        self
    }

    /// Forces the media type, whatever the request declares.
    pub fn override_content_type(mut self, mime: Mime) -> Self {
        self.options.override_content_type = Some(mime);
        self
    }

    pub fn uploads<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.options.uploads = Some(dir.into());
        self
    }

    pub fn decoders(mut self, decoders: Decoders) -> Self {
        self.options.decoders = decoders;
        self
    }

    pub fn compression<S: Into<String>>(mut self, encoding: S, options: DecoderOptions) -> Self {
        self.options.compression.insert(encoding.into().to_ascii_lowercase(), options);
        self
    }

    pub fn form_decoder(mut self, form_decoder: FormDecoder) -> Self {
        self.options.form_decoder = form_decoder;
        self
    }

    pub fn multipart(mut self, multipart: MultipartOptions) -> Self {
        self.options.multipart = multipart;
        self
    }

    pub fn scanner(mut self, scanner: impl MultipartScanner + 'static) -> Self {
        self.options.scanner = Arc::new(scanner);
        self
    }

    pub fn build(self) -> ParseOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded() {
        let options = ParseOptions::default();

        assert_eq!(options.parse(), ParseMode::On);
        assert_eq!(options.output(), Output::Data);
        assert_eq!(options.max_bytes(), None);
        assert_eq!(options.timeout(), None);
        assert!(options.allow().is_empty());
        assert!(options.multipart().enabled);
        assert!(options.decoders().get("gzip").is_some());
    }

    #[test]
    fn part_output_inherits_top_level_output() {
        let options = ParseOptions::builder(ParseMode::On, Output::File).build();
        assert_eq!(options.part_output(), PartOutput::File);

        let options = ParseOptions::builder(ParseMode::On, Output::File)
            .multipart(MultipartOptions::with_output(PartOutput::Annotated))
            .build();
        assert_eq!(options.part_output(), PartOutput::Annotated);
    }

    #[test]
    fn allow_accepts_one_or_many() {
        let options = ParseOptions::builder(ParseMode::On, Output::Data).allow(Some(mime::APPLICATION_JSON)).build();
        assert_eq!(options.allow(), &[mime::APPLICATION_JSON]);

        let options =
            ParseOptions::builder(ParseMode::On, Output::Data).allow([mime::TEXT_PLAIN, mime::APPLICATION_JSON]).build();
        assert_eq!(options.allow().len(), 2);
    }

    #[test]
    fn compression_keys_are_case_insensitive() {
        let options = ParseOptions::builder(ParseMode::On, Output::Data)
            .compression("GZIP", DecoderOptions { multi_member: true, ..DecoderOptions::default() })
            .build();
        assert!(options.compression("gzip").is_some_and(|o| o.multi_member));
    }
}
