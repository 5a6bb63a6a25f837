//! Samples and the per-dataset field schema
//!
//! A sample is an ordered mapping from field names to typed values. All
//! samples of one dataset share the same field set; the order is fixed
//! when the dataset is created and recorded in the index.

use crate::codec::{CodecRegistry, Value};
use crate::error::{Error, Result};

/// One field of the dataset schema: a name plus the codec id used to
/// serialize it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub codec: String,
}

impl Field {
    /// Create a field definition
    pub fn new<N: Into<String>, C: Into<String>>(name: N, codec: C) -> Self {
        Self {
            name: name.into(),
            codec: codec.into(),
        }
    }
}

/// Ordered field schema shared by every sample of a dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema from explicit field definitions.
    ///
    /// # Errors
    ///
    /// Fails on empty schemas, duplicate field names, or codec ids not
    /// present in `registry`.
    pub fn new(fields: Vec<Field>, registry: &CodecRegistry) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::schema_mismatch("schema has no fields"));
        }
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() {
                return Err(Error::schema_mismatch("empty field name"));
            }
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(Error::schema_mismatch(format!(
                    "duplicate field name: {}",
                    field.name
                )));
            }
            if !registry.contains(&field.codec) {
                return Err(Error::UnknownCodec(field.codec.clone()));
            }
        }
        Ok(Self { fields })
    }

    /// Infer a schema from a sample, using each value's default codec
    pub fn infer(sample: &Sample, registry: &CodecRegistry) -> Result<Self> {
        let fields = sample
            .iter()
            .map(|(name, value)| Field::new(name.clone(), value.default_codec().as_str()))
            .collect();
        Self::new(fields, registry)
    }

    /// Field definitions in declared order
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the schema has no fields (never constructible)
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of a field by name
    pub fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// True when the schema is a single `tokens` field, which enables the
    /// flat token-block view of a chunk
    pub fn is_single_tokens(&self) -> bool {
        self.fields.len() == 1 && self.fields[0].codec == "tokens"
    }

    /// Check that a sample's field names match this schema in order
    pub fn check_sample(&self, sample: &Sample) -> Result<()> {
        if sample.len() != self.fields.len() {
            return Err(Error::schema_mismatch(format!(
                "sample has {} fields, schema has {}",
                sample.len(),
                self.fields.len()
            )));
        }
        for (field, (name, _)) in self.fields.iter().zip(sample.iter()) {
            if field.name != *name {
                return Err(Error::schema_mismatch(format!(
                    "field order mismatch: expected '{}', got '{}'",
                    field.name, name
                )));
            }
        }
        Ok(())
    }
}

/// One logical training record: ordered `(name, value)` pairs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sample {
    entries: Vec<(String, Value)>,
}

impl Sample {
    /// Empty sample
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, builder style
    pub fn with<N: Into<String>>(mut self, name: N, value: Value) -> Self {
        self.entries.push((name.into(), value));
        self
    }

    /// Append a field
    pub fn insert<N: Into<String>>(&mut self, name: N, value: Value) {
        self.entries.push((name.into(), value));
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Field value by position
    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.entries.get(index).map(|(_, v)| v)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the sample has no fields
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(name, value)` pairs in declared order
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.entries.iter()
    }
}

/// Serialize a sample into `out` as the concatenation of its fields in
/// schema order. Variable-width fields carry a u32 little-endian length
/// prefix; fixed-width codecs are stored bare.
pub fn encode_sample(
    schema: &Schema,
    registry: &CodecRegistry,
    sample: &Sample,
    out: &mut Vec<u8>,
) -> Result<()> {
    schema.check_sample(sample)?;
    let mut scratch = Vec::new();
    for (field, (_, value)) in schema.fields().iter().zip(sample.iter()) {
        let codec = registry.resolve(&field.codec)?;
        if codec.fixed_width().is_some() {
            codec.encode(value, out)?;
        } else {
            scratch.clear();
            codec.encode(value, &mut scratch)?;
            if scratch.len() > u32::MAX as usize {
                return Err(Error::encode(
                    &field.codec,
                    format!("field '{}' exceeds 4 GiB", field.name),
                ));
            }
            out.extend_from_slice(&(scratch.len() as u32).to_le_bytes());
            out.extend_from_slice(&scratch);
        }
    }
    Ok(())
}

/// Decode a sample blob produced by [`encode_sample`]
pub fn decode_sample(schema: &Schema, registry: &CodecRegistry, blob: &[u8]) -> Result<Sample> {
    let mut sample = Sample::new();
    let mut cursor = 0usize;
    for field in schema.fields() {
        let codec = registry.resolve(&field.codec)?;
        let content = match codec.fixed_width() {
            Some(width) => {
                if blob.len() < cursor + width {
                    return Err(Error::decode(
                        &field.codec,
                        format!("blob truncated at field '{}'", field.name),
                    ));
                }
                let slice = &blob[cursor..cursor + width];
                cursor += width;
                slice
            }
            None => {
                if blob.len() < cursor + 4 {
                    return Err(Error::decode(
                        &field.codec,
                        format!("missing length prefix for field '{}'", field.name),
                    ));
                }
                let len = u32::from_le_bytes(blob[cursor..cursor + 4].try_into().unwrap()) as usize;
                cursor += 4;
                if blob.len() < cursor + len {
                    return Err(Error::decode(
                        &field.codec,
                        format!("blob truncated inside field '{}'", field.name),
                    ));
                }
                let slice = &blob[cursor..cursor + len];
                cursor += len;
                slice
            }
        };
        sample.insert(field.name.clone(), codec.decode(content)?);
    }
    if cursor != blob.len() {
        return Err(Error::schema_mismatch(format!(
            "{} trailing bytes after last field",
            blob.len() - cursor
        )));
    }
    Ok(sample)
}
