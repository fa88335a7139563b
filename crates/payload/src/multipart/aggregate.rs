use std::fmt;

use http::HeaderMap;
use indexmap::IndexMap;
use indexmap::map::IntoIter;

use crate::protocol::{PayloadBody, SavedFile, Value};

/// One field or part of a multipart payload, shaped by the part output.
pub enum PartValue {
    /// A part without a filename.
    Field(String),
    Data(Value),
    Annotated { filename: Option<String>, headers: HeaderMap, payload: Value },
    Stream { filename: Option<String>, headers: HeaderMap, body: PayloadBody },
    File { filename: Option<String>, headers: HeaderMap, file: SavedFile },
}

impl PartValue {
    pub fn as_field(&self) -> Option<&str> {
        match self {
            PartValue::Field(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&Value> {
        match self {
            PartValue::Data(value) | PartValue::Annotated { payload: value, .. } => Some(value),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&SavedFile> {
        match self {
            PartValue::File { file, .. } => Some(file),
            _ => None,
        }
    }

    pub fn filename(&self) -> Option<&str> {
        match self {
            PartValue::Annotated { filename, .. } | PartValue::Stream { filename, .. } | PartValue::File { filename, .. } => {
                filename.as_deref()
            }
            PartValue::Field(_) | PartValue::Data(_) => None,
        }
    }
}

impl fmt::Debug for PartValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartValue::Field(value) => f.debug_tuple("Field").field(value).finish(),
            PartValue::Data(value) => f.debug_tuple("Data").field(value).finish(),
            PartValue::Annotated { filename, headers, payload } => f
                .debug_struct("Annotated")
                .field("filename", filename)
                .field("headers", headers)
                .field("payload", payload)
                .finish(),
            PartValue::Stream { filename, headers, .. } => {
                f.debug_struct("Stream").field("filename", filename).field("headers", headers).finish_non_exhaustive()
            }
            PartValue::File { filename, headers, file } => {
                f.debug_struct("File").field("filename", filename).field("headers", headers).field("file", file).finish()
            }
        }
    }
}

/// The values collected under one name.
#[derive(Debug)]
pub enum Entry {
    Single(PartValue),
    /// The name occurred more than once, values in arrival order.
    Multiple(Vec<PartValue>),
}

impl Entry {
    pub fn values(&self) -> &[PartValue] {
        match self {
            Entry::Single(value) => std::slice::from_ref(value),
            Entry::Multiple(values) => values,
        }
    }

    pub fn first(&self) -> Option<&PartValue> {
        self.values().first()
    }

    fn push(&mut self, value: PartValue) {
        *self = match std::mem::replace(self, Entry::Multiple(Vec::new())) {
            Entry::Single(first) => Entry::Multiple(vec![first, value]),
            Entry::Multiple(mut values) => {
                values.push(value);
                Entry::Multiple(values)
            }
        };
    }
}

/// The fields and parts of a multipart payload, keyed by name.
///
/// Names keep the order of their first occurrence.
#[derive(Debug, Default)]
pub struct Aggregate {
    entries: IndexMap<String, Entry>,
}

impl Aggregate {
    pub(crate) fn insert(&mut self, name: String, value: PartValue) {
        match self.entries.entry(name) {
            indexmap::map::Entry::Occupied(mut occupied) => occupied.get_mut().push(value),
            indexmap::map::Entry::Vacant(vacant) => {
                vacant.insert(Entry::Single(value));
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Entry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every saved file, whatever name it was stored under.
    pub fn files(&self) -> impl Iterator<Item = &SavedFile> {
        self.entries.values().flat_map(Entry::values).filter_map(PartValue::as_file)
    }
}

impl IntoIterator for Aggregate {
    type Item = (String, Entry);
    type IntoIter = IntoIter<String, Entry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
