//! Field codecs: bidirectional byte encoders keyed by a short ASCII id
//!
//! Every dataset field carries a codec id in the index so readers are
//! self-sufficient. Built-in ids are reserved and stable across versions.
//! The registry is an explicit value threaded through writer and reader
//! constructors; there is no process-global codec state.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};

use crate::error::{Error, Result};

/// Built-in codec identifiers.
///
/// The string ids are part of the on-disk format: they appear in the
/// dataset index and must never change meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// 8-byte little-endian signed integer
    Int,
    /// 8-byte little-endian IEEE-754 double
    Float,
    /// UTF-8 string
    Str,
    /// Raw bytes
    Bytes,
    /// Image, PNG-encoded (lossless)
    Pil,
    /// Image, JPEG-encoded (lossy, quality 85)
    Jpg,
    /// Packed tensor: dtype byte + shape prefix + raw little-endian payload
    Tensor,
    /// Token array (u16 or u32 elements)
    Tokens,
    /// Opaque envelope retained for foreign serializers; never interpreted
    Pickle,
}

impl CodecId {
    /// All reserved built-in ids
    pub const ALL: [CodecId; 9] = [
        CodecId::Int,
        CodecId::Float,
        CodecId::Str,
        CodecId::Bytes,
        CodecId::Pil,
        CodecId::Jpg,
        CodecId::Tensor,
        CodecId::Tokens,
        CodecId::Pickle,
    ];

    /// Stable string id recorded in the index
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecId::Int => "int",
            CodecId::Float => "float",
            CodecId::Str => "str",
            CodecId::Bytes => "bytes",
            CodecId::Pil => "pil",
            CodecId::Jpg => "jpg",
            CodecId::Tensor => "tensor",
            CodecId::Tokens => "tokens",
            CodecId::Pickle => "pickle",
        }
    }

    /// True if `id` is one of the reserved built-in ids
    pub fn is_reserved(id: &str) -> bool {
        CodecId::from_str(id).is_ok()
    }
}

impl fmt::Display for CodecId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodecId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "int" => Ok(CodecId::Int),
            "float" => Ok(CodecId::Float),
            "str" => Ok(CodecId::Str),
            "bytes" => Ok(CodecId::Bytes),
            "pil" => Ok(CodecId::Pil),
            "jpg" => Ok(CodecId::Jpg),
            "tensor" => Ok(CodecId::Tensor),
            "tokens" => Ok(CodecId::Tokens),
            "pickle" => Ok(CodecId::Pickle),
            _ => Err(Error::UnknownCodec(s.to_string())),
        }
    }
}

/// Element type of a packed tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    U8,
    I32,
    I64,
    F32,
    F64,
    /// Half-precision floats carried as raw 2-byte words
    F16,
}

impl Dtype {
    /// Wire id (single byte in the tensor encoding)
    pub fn as_u8(&self) -> u8 {
        match self {
            Dtype::U8 => 1,
            Dtype::I32 => 2,
            Dtype::I64 => 3,
            Dtype::F32 => 4,
            Dtype::F64 => 5,
            Dtype::F16 => 6,
        }
    }

    /// Parse a wire id
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Dtype::U8),
            2 => Some(Dtype::I32),
            3 => Some(Dtype::I64),
            4 => Some(Dtype::F32),
            5 => Some(Dtype::F64),
            6 => Some(Dtype::F16),
            _ => None,
        }
    }

    /// Element size in bytes
    pub fn size(&self) -> usize {
        match self {
            Dtype::U8 => 1,
            Dtype::F16 => 2,
            Dtype::I32 | Dtype::F32 => 4,
            Dtype::I64 | Dtype::F64 => 8,
        }
    }
}

/// A densely packed n-dimensional array.
///
/// `data` holds the little-endian element payload; its length must equal
/// the shape product times the element size.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub dtype: Dtype,
    pub shape: Vec<u32>,
    pub data: Vec<u8>,
}

impl Tensor {
    /// Create a tensor, validating that data length matches the shape
    pub fn new(dtype: Dtype, shape: Vec<u32>, data: Vec<u8>) -> Result<Self> {
        let elems: u64 = shape.iter().map(|&d| d as u64).product();
        let expected = elems * dtype.size() as u64;
        if data.len() as u64 != expected {
            return Err(Error::encode(
                "tensor",
                format!(
                    "data length {} does not match shape {:?} ({} bytes expected)",
                    data.len(),
                    shape,
                    expected
                ),
            ));
        }
        Ok(Self { dtype, shape, data })
    }

    /// Build an f32 tensor from a slice
    pub fn from_f32(shape: Vec<u32>, values: &[f32]) -> Result<Self> {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self::new(Dtype::F32, shape, data)
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    /// True when the tensor holds no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A token sequence of either 16- or 32-bit tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tokens {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Tokens {
    /// Number of tokens
    pub fn len(&self) -> usize {
        match self {
            Tokens::U16(v) => v.len(),
            Tokens::U32(v) => v.len(),
        }
    }

    /// True when the sequence is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Token width in bytes (2 or 4)
    pub fn width(&self) -> u8 {
        match self {
            Tokens::U16(_) => 2,
            Tokens::U32(_) => 4,
        }
    }

    /// Token at position `i`, widened to u32
    pub fn get(&self, i: usize) -> Option<u32> {
        match self {
            Tokens::U16(v) => v.get(i).map(|&t| t as u32),
            Tokens::U32(v) => v.get(i).copied(),
        }
    }
}

/// Pixel layout of an [`ImageData`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorKind {
    /// 8-bit grayscale
    L8,
    /// 8-bit RGB
    Rgb8,
    /// 8-bit RGBA
    Rgba8,
}

impl ColorKind {
    fn channels(&self) -> u32 {
        match self {
            ColorKind::L8 => 1,
            ColorKind::Rgb8 => 3,
            ColorKind::Rgba8 => 4,
        }
    }

    fn extended(&self) -> ExtendedColorType {
        match self {
            ColorKind::L8 => ExtendedColorType::L8,
            ColorKind::Rgb8 => ExtendedColorType::Rgb8,
            ColorKind::Rgba8 => ExtendedColorType::Rgba8,
        }
    }
}

/// A decoded raster image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub color: ColorKind,
    /// Row-major interleaved pixel bytes
    pub pixels: Vec<u8>,
}

impl ImageData {
    /// Create an image, validating the pixel buffer length
    pub fn new(width: u32, height: u32, color: ColorKind, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as u64 * height as u64 * color.channels() as u64;
        if pixels.len() as u64 != expected {
            return Err(Error::encode(
                "pil",
                format!(
                    "pixel buffer length {} does not match {}x{} {:?}",
                    pixels.len(),
                    width,
                    height,
                    color
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            color,
            pixels,
        })
    }

    fn from_dynamic(img: DynamicImage) -> Self {
        match img {
            DynamicImage::ImageLuma8(b) => {
                let (width, height) = b.dimensions();
                Self {
                    width,
                    height,
                    color: ColorKind::L8,
                    pixels: b.into_raw(),
                }
            }
            DynamicImage::ImageRgba8(b) => {
                let (width, height) = b.dimensions();
                Self {
                    width,
                    height,
                    color: ColorKind::Rgba8,
                    pixels: b.into_raw(),
                }
            }
            other => {
                let b = other.to_rgb8();
                let (width, height) = b.dimensions();
                Self {
                    width,
                    height,
                    color: ColorKind::Rgb8,
                    pixels: b.into_raw(),
                }
            }
        }
    }
}

/// A typed field value.
///
/// Samples are tree-shaped by construction: no variant can hold a
/// reference back into another sample, so cyclic values are rejected at
/// the type level rather than at registration time.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Image(ImageData),
    Tensor(Tensor),
    Tokens(Tokens),
    /// Opaque envelope for foreign serializers (`pickle` codec)
    Opaque(Vec<u8>),
}

impl Value {
    /// Default codec for this value variant
    pub fn default_codec(&self) -> CodecId {
        match self {
            Value::Int(_) => CodecId::Int,
            Value::Float(_) => CodecId::Float,
            Value::Str(_) => CodecId::Str,
            Value::Bytes(_) => CodecId::Bytes,
            Value::Image(_) => CodecId::Pil,
            Value::Tensor(_) => CodecId::Tensor,
            Value::Tokens(_) => CodecId::Tokens,
            Value::Opaque(_) => CodecId::Pickle,
        }
    }

    /// Integer payload, if this is an `Int`
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float payload, if this is a `Float`
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// String payload, if this is a `Str`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Byte payload, if this is `Bytes`
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Token payload, if this is `Tokens`
    pub fn as_tokens(&self) -> Option<&Tokens> {
        match self {
            Value::Tokens(v) => Some(v),
            _ => None,
        }
    }
}

/// A bidirectional field codec.
///
/// `encode` must be pure and deterministic; `decode` must be its inverse
/// (up to lossy image codecs, which document their own fidelity).
pub trait FieldCodec: Send + Sync {
    /// Encode a value into `out`
    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()>;

    /// Decode a field blob back into a value
    fn decode(&self, bytes: &[u8]) -> Result<Value>;

    /// `Some(n)` when every encoding is exactly `n` bytes; such codecs
    /// are stored without a length prefix
    fn fixed_width(&self) -> Option<usize> {
        None
    }
}

struct IntCodec;

impl FieldCodec for IntCodec {
    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Int(v) => {
                out.extend_from_slice(&v.to_le_bytes());
                Ok(())
            }
            other => Err(Error::encode("int", format!("expected Int, got {:?}", other))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| Error::decode("int", format!("expected 8 bytes, got {}", bytes.len())))?;
        Ok(Value::Int(i64::from_le_bytes(arr)))
    }

    fn fixed_width(&self) -> Option<usize> {
        Some(8)
    }
}

struct FloatCodec;

impl FieldCodec for FloatCodec {
    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Float(v) => {
                out.extend_from_slice(&v.to_le_bytes());
                Ok(())
            }
            other => Err(Error::encode(
                "float",
                format!("expected Float, got {:?}", other),
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| {
            Error::decode("float", format!("expected 8 bytes, got {}", bytes.len()))
        })?;
        Ok(Value::Float(f64::from_le_bytes(arr)))
    }

    fn fixed_width(&self) -> Option<usize> {
        Some(8)
    }
}

struct StrCodec;

impl FieldCodec for StrCodec {
    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Str(v) => {
                out.extend_from_slice(v.as_bytes());
                Ok(())
            }
            other => Err(Error::encode("str", format!("expected Str, got {:?}", other))),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| Error::decode("str", format!("invalid UTF-8: {}", e)))?;
        Ok(Value::Str(s.to_string()))
    }
}

struct BytesCodec;

impl FieldCodec for BytesCodec {
    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Bytes(v) => {
                out.extend_from_slice(v);
                Ok(())
            }
            other => Err(Error::encode(
                "bytes",
                format!("expected Bytes, got {:?}", other),
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(Value::Bytes(bytes.to_vec()))
    }
}

/// Opaque envelope codec. The payload is carried verbatim and never
/// interpreted; cross-runtime consumers are responsible for its contents.
struct PickleCodec;

impl FieldCodec for PickleCodec {
    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        match value {
            Value::Opaque(v) => {
                out.extend_from_slice(v);
                Ok(())
            }
            other => Err(Error::encode(
                "pickle",
                format!("expected Opaque, got {:?}", other),
            )),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        Ok(Value::Opaque(bytes.to_vec()))
    }
}

struct PilCodec {
    jpeg: bool,
}

impl PilCodec {
    fn codec_name(&self) -> &'static str {
        if self.jpeg {
            "jpg"
        } else {
            "pil"
        }
    }
}

impl FieldCodec for PilCodec {
    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        let img = match value {
            Value::Image(img) => img,
            other => {
                return Err(Error::encode(
                    self.codec_name(),
                    format!("expected Image, got {:?}", other),
                ))
            }
        };

        if self.jpeg {
            if img.color == ColorKind::Rgba8 {
                return Err(Error::encode("jpg", "JPEG does not support alpha channels"));
            }
            let mut enc = JpegEncoder::new_with_quality(&mut *out, 85);
            enc.encode(&img.pixels, img.width, img.height, img.color.extended())
                .map_err(|e| Error::encode("jpg", e.to_string()))?;
        } else {
            PngEncoder::new(&mut *out)
                .write_image(&img.pixels, img.width, img.height, img.color.extended())
                .map_err(|e| Error::encode("pil", e.to_string()))?;
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| Error::decode(self.codec_name(), e.to_string()))?;
        Ok(Value::Image(ImageData::from_dynamic(img)))
    }
}

struct TensorCodec;

impl FieldCodec for TensorCodec {
    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        let t = match value {
            Value::Tensor(t) => t,
            other => {
                return Err(Error::encode(
                    "tensor",
                    format!("expected Tensor, got {:?}", other),
                ))
            }
        };
        if t.shape.len() > u8::MAX as usize {
            return Err(Error::encode("tensor", "more than 255 dimensions"));
        }
        out.push(t.dtype.as_u8());
        out.push(t.shape.len() as u8);
        for dim in &t.shape {
            out.extend_from_slice(&dim.to_le_bytes());
        }
        out.extend_from_slice(&t.data);
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.len() < 2 {
            return Err(Error::decode("tensor", "blob shorter than dtype + ndim"));
        }
        let dtype = Dtype::from_u8(bytes[0])
            .ok_or_else(|| Error::decode("tensor", format!("unknown dtype id {}", bytes[0])))?;
        let ndim = bytes[1] as usize;
        let shape_end = 2 + ndim * 4;
        if bytes.len() < shape_end {
            return Err(Error::decode("tensor", "blob shorter than shape prefix"));
        }
        let mut shape = Vec::with_capacity(ndim);
        for i in 0..ndim {
            let off = 2 + i * 4;
            shape.push(u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));
        }
        let data = bytes[shape_end..].to_vec();
        let tensor =
            Tensor::new(dtype, shape, data).map_err(|e| Error::decode("tensor", e.to_string()))?;
        Ok(Value::Tensor(tensor))
    }
}

struct TokensCodec;

impl FieldCodec for TokensCodec {
    fn encode(&self, value: &Value, out: &mut Vec<u8>) -> Result<()> {
        let tokens = match value {
            Value::Tokens(t) => t,
            other => {
                return Err(Error::encode(
                    "tokens",
                    format!("expected Tokens, got {:?}", other),
                ))
            }
        };
        out.push(tokens.width());
        out.extend_from_slice(&(tokens.len() as u32).to_le_bytes());
        match tokens {
            Tokens::U16(v) => {
                for t in v {
                    out.extend_from_slice(&t.to_le_bytes());
                }
            }
            Tokens::U32(v) => {
                for t in v {
                    out.extend_from_slice(&t.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        if bytes.len() < 5 {
            return Err(Error::decode("tokens", "blob shorter than width + count"));
        }
        let width = bytes[0];
        let count = u32::from_le_bytes(bytes[1..5].try_into().unwrap()) as usize;
        let payload = &bytes[5..];
        let tokens = match width {
            2 => {
                if payload.len() != count * 2 {
                    return Err(Error::decode("tokens", "payload length mismatch"));
                }
                Tokens::U16(
                    payload
                        .chunks_exact(2)
                        .map(|c| u16::from_le_bytes(c.try_into().unwrap()))
                        .collect(),
                )
            }
            4 => {
                if payload.len() != count * 4 {
                    return Err(Error::decode("tokens", "payload length mismatch"));
                }
                Tokens::U32(
                    payload
                        .chunks_exact(4)
                        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
                        .collect(),
                )
            }
            other => {
                return Err(Error::decode(
                    "tokens",
                    format!("unsupported token width {}", other),
                ))
            }
        };
        Ok(Value::Tokens(tokens))
    }
}

/// Registry resolving codec ids to codec implementations.
///
/// Cloning is cheap; codecs are shared behind `Arc`.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: HashMap<String, Arc<dyn FieldCodec>>,
}

impl CodecRegistry {
    /// Registry containing every built-in codec
    pub fn builtin() -> Self {
        let mut codecs: HashMap<String, Arc<dyn FieldCodec>> = HashMap::new();
        codecs.insert("int".to_string(), Arc::new(IntCodec));
        codecs.insert("float".to_string(), Arc::new(FloatCodec));
        codecs.insert("str".to_string(), Arc::new(StrCodec));
        codecs.insert("bytes".to_string(), Arc::new(BytesCodec));
        codecs.insert("pil".to_string(), Arc::new(PilCodec { jpeg: false }));
        codecs.insert("jpg".to_string(), Arc::new(PilCodec { jpeg: true }));
        codecs.insert("tensor".to_string(), Arc::new(TensorCodec));
        codecs.insert("tokens".to_string(), Arc::new(TokensCodec));
        codecs.insert("pickle".to_string(), Arc::new(PickleCodec));
        Self { codecs }
    }

    /// Register a custom codec under `id`.
    ///
    /// # Errors
    ///
    /// Fails if `id` is a reserved built-in id or already registered.
    pub fn register<S: Into<String>>(&mut self, id: S, codec: Arc<dyn FieldCodec>) -> Result<()> {
        let id = id.into();
        if CodecId::is_reserved(&id) {
            return Err(Error::CodecNotRegistrable {
                id,
                reason: "reserved built-in id".to_string(),
            });
        }
        if self.codecs.contains_key(&id) {
            return Err(Error::CodecNotRegistrable {
                id,
                reason: "already registered".to_string(),
            });
        }
        self.codecs.insert(id, codec);
        Ok(())
    }

    /// Resolve a codec by id
    pub fn resolve(&self, id: &str) -> Result<&Arc<dyn FieldCodec>> {
        self.codecs
            .get(id)
            .ok_or_else(|| Error::UnknownCodec(id.to_string()))
    }

    /// True if `id` resolves
    pub fn contains(&self, id: &str) -> bool {
        self.codecs.contains_key(id)
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("CodecRegistry").field("ids", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(id: &str, value: Value) -> Value {
        let registry = CodecRegistry::builtin();
        let codec = registry.resolve(id).unwrap();
        let mut buf = Vec::new();
        codec.encode(&value, &mut buf).unwrap();
        codec.decode(&buf).unwrap()
    }

    #[test]
    fn test_int_roundtrip() {
        assert_eq!(roundtrip("int", Value::Int(-42)), Value::Int(-42));
        assert_eq!(
            roundtrip("int", Value::Int(i64::MAX)),
            Value::Int(i64::MAX)
        );
    }

    #[test]
    fn test_float_roundtrip() {
        assert_eq!(
            roundtrip("float", Value::Float(3.25)),
            Value::Float(3.25)
        );
    }

    #[test]
    fn test_str_roundtrip() {
        let v = Value::Str("héllo wörld".to_string());
        assert_eq!(roundtrip("str", v.clone()), v);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let v = Value::Bytes(vec![0, 1, 2, 255]);
        assert_eq!(roundtrip("bytes", v.clone()), v);
    }

    #[test]
    fn test_pickle_roundtrip_is_opaque() {
        let v = Value::Opaque(vec![0x80, 0x04, 0x95]);
        assert_eq!(roundtrip("pickle", v.clone()), v);
    }

    #[test]
    fn test_tensor_roundtrip() {
        let t = Tensor::from_f32(vec![2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let v = Value::Tensor(t);
        assert_eq!(roundtrip("tensor", v.clone()), v);
    }

    #[test]
    fn test_tensor_shape_mismatch_rejected() {
        assert!(Tensor::new(Dtype::F32, vec![2, 2], vec![0u8; 15]).is_err());
    }

    #[test]
    fn test_tokens_roundtrip_u16() {
        let v = Value::Tokens(Tokens::U16(vec![0, 1, 65535]));
        assert_eq!(roundtrip("tokens", v.clone()), v);
    }

    #[test]
    fn test_tokens_roundtrip_u32() {
        let v = Value::Tokens(Tokens::U32(vec![0, 70000, u32::MAX]));
        assert_eq!(roundtrip("tokens", v.clone()), v);
    }

    #[test]
    fn test_png_roundtrip_lossless() {
        let img = ImageData::new(2, 2, ColorKind::Rgb8, vec![
            255, 0, 0, 0, 255, 0, 0, 0, 255, 10, 20, 30,
        ])
        .unwrap();
        let v = Value::Image(img);
        assert_eq!(roundtrip("pil", v.clone()), v);
    }

    #[test]
    fn test_jpeg_encode_decode_dimensions() {
        let img = ImageData::new(4, 4, ColorKind::Rgb8, vec![128u8; 48]).unwrap();
        match roundtrip("jpg", Value::Image(img)) {
            Value::Image(decoded) => {
                assert_eq!(decoded.width, 4);
                assert_eq!(decoded.height, 4);
            }
            other => panic!("expected Image, got {:?}", other),
        }
    }

    #[test]
    fn test_jpeg_rejects_alpha() {
        let registry = CodecRegistry::builtin();
        let codec = registry.resolve("jpg").unwrap();
        let img = ImageData::new(1, 1, ColorKind::Rgba8, vec![1, 2, 3, 4]).unwrap();
        let mut buf = Vec::new();
        assert!(codec.encode(&Value::Image(img), &mut buf).is_err());
    }

    #[test]
    fn test_encode_is_deterministic() {
        let registry = CodecRegistry::builtin();
        let codec = registry.resolve("tensor").unwrap();
        let t = Value::Tensor(Tensor::from_f32(vec![4], &[1.0, 2.0, 3.0, 4.0]).unwrap());
        let mut a = Vec::new();
        let mut b = Vec::new();
        codec.encode(&t, &mut a).unwrap();
        codec.encode(&t, &mut b).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_reserved_ids_not_registrable() {
        let mut registry = CodecRegistry::builtin();
        let result = registry.register("int", Arc::new(BytesCodec));
        assert!(matches!(result, Err(Error::CodecNotRegistrable { .. })));
    }

    #[test]
    fn test_custom_codec_registration() {
        let mut registry = CodecRegistry::builtin();
        registry
            .register("mycodec", Arc::new(BytesCodec))
            .unwrap();
        assert!(registry.contains("mycodec"));
        assert!(registry.register("mycodec", Arc::new(BytesCodec)).is_err());
    }

    #[test]
    fn test_codec_id_strings_stable() {
        for id in CodecId::ALL {
            assert_eq!(CodecId::from_str(id.as_str()).unwrap(), id);
        }
        assert!(CodecId::from_str("nope").is_err());
    }

    #[test]
    fn test_wrong_variant_rejected() {
        let registry = CodecRegistry::builtin();
        let codec = registry.resolve("int").unwrap();
        let mut buf = Vec::new();
        assert!(codec.encode(&Value::Str("x".to_string()), &mut buf).is_err());
    }
}
