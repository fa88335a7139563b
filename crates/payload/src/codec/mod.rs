//! Payload transformations: content-encoding decompression and media type
//! based decoding.

mod decoder;
pub use decoder::Builtin;
pub use decoder::DecoderFactory;
pub use decoder::DecoderOptions;
pub use decoder::Decoders;
pub use decoder::Decompress;
pub use decoder::OutputLimitExceeded;
pub(crate) use decoder::decode;

mod value;
pub use value::ContentKind;
pub use value::FormDecoder;
pub use value::decode_value;
pub use value::read_to_limit;
