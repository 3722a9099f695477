use crate::common::sh_bands_for_coeffs;
use crate::error::{Result, SplatError};
use foldhash::{HashMap, HashMapExt};
use std::borrow::Cow;

pub const VERTEX_ELEMENT: &str = "vertex";

/// Fixed-width numeric column types understood by the PLY family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl DataType {
    pub fn from_ply_name(name: &str) -> Option<Self> {
        let ty = match name {
            "char" | "int8" => DataType::Int8,
            "uchar" | "uint8" => DataType::UInt8,
            "short" | "int16" => DataType::Int16,
            "ushort" | "uint16" => DataType::UInt16,
            "int" | "int32" => DataType::Int32,
            "uint" | "uint32" => DataType::UInt32,
            "float" | "float32" => DataType::Float32,
            "double" | "float64" => DataType::Float64,
            _ => return None,
        };
        Some(ty)
    }

    pub const fn ply_name(self) -> &'static str {
        match self {
            DataType::Int8 => "char",
            DataType::UInt8 => "uchar",
            DataType::Int16 => "short",
            DataType::UInt16 => "ushort",
            DataType::Int32 => "int",
            DataType::UInt32 => "uint",
            DataType::Float32 => "float",
            DataType::Float64 => "double",
        }
    }

    pub const fn byte_size(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }
}

/// An owned, contiguous column buffer of one of the eight numeric kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

/// Expands `$body` once per storage variant with `$v` bound to the inner `Vec`.
macro_rules! with_storage {
    ($storage:expr, $v:ident => $body:expr) => {
        match $storage {
            Storage::Int8($v) => $body,
            Storage::UInt8($v) => $body,
            Storage::Int16($v) => $body,
            Storage::UInt16($v) => $body,
            Storage::Int32($v) => $body,
            Storage::UInt32($v) => $body,
            Storage::Float32($v) => $body,
            Storage::Float64($v) => $body,
        }
    };
}

impl Storage {
    pub fn zeroed(data_type: DataType, len: usize) -> Self {
        match data_type {
            DataType::Int8 => Storage::Int8(vec![0; len]),
            DataType::UInt8 => Storage::UInt8(vec![0; len]),
            DataType::Int16 => Storage::Int16(vec![0; len]),
            DataType::UInt16 => Storage::UInt16(vec![0; len]),
            DataType::Int32 => Storage::Int32(vec![0; len]),
            DataType::UInt32 => Storage::UInt32(vec![0; len]),
            DataType::Float32 => Storage::Float32(vec![0.0; len]),
            DataType::Float64 => Storage::Float64(vec![0.0; len]),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Storage::Int8(_) => DataType::Int8,
            Storage::UInt8(_) => DataType::UInt8,
            Storage::Int16(_) => DataType::Int16,
            Storage::UInt16(_) => DataType::UInt16,
            Storage::Int32(_) => DataType::Int32,
            Storage::UInt32(_) => DataType::UInt32,
            Storage::Float32(_) => DataType::Float32,
            Storage::Float64(_) => DataType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        with_storage!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len() * self.data_type().byte_size()
    }

    /// Reads element `i` widened to `f64`. Panics if `i` is out of bounds.
    #[inline]
    pub fn get(&self, i: usize) -> f64 {
        with_storage!(self, v => v[i] as f64)
    }

    /// Writes element `i`, converting with `as` semantics (saturating for integers).
    #[inline]
    pub fn set(&mut self, i: usize, value: f64) {
        match self {
            Storage::Int8(v) => v[i] = value as i8,
            Storage::UInt8(v) => v[i] = value as u8,
            Storage::Int16(v) => v[i] = value as i16,
            Storage::UInt16(v) => v[i] = value as u16,
            Storage::Int32(v) => v[i] = value as i32,
            Storage::UInt32(v) => v[i] = value as u32,
            Storage::Float32(v) => v[i] = value as f32,
            Storage::Float64(v) => v[i] = value,
        }
    }

    /// Decodes one little-endian value from the front of `bytes` into slot `i`.
    #[inline]
    pub(crate) fn read_le(&mut self, i: usize, bytes: &[u8]) {
        match self {
            Storage::Int8(v) => v[i] = bytes[0] as i8,
            Storage::UInt8(v) => v[i] = bytes[0],
            Storage::Int16(v) => v[i] = i16::from_le_bytes([bytes[0], bytes[1]]),
            Storage::UInt16(v) => v[i] = u16::from_le_bytes([bytes[0], bytes[1]]),
            Storage::Int32(v) => {
                v[i] = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            Storage::UInt32(v) => {
                v[i] = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            Storage::Float32(v) => {
                v[i] = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            Storage::Float64(v) => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                v[i] = f64::from_le_bytes(raw);
            }
        }
    }

    /// Appends value `i` to `out` as little-endian bytes.
    #[inline]
    pub(crate) fn write_le(&self, i: usize, out: &mut Vec<u8>) {
        with_storage!(self, v => out.extend_from_slice(&v[i].to_le_bytes()))
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Storage::Float32(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Vec<f32>> for Storage {
    fn from(v: Vec<f32>) -> Self {
        Storage::Float32(v)
    }
}

/// One named column of an [`Element`].
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub data_type: DataType,
    pub storage: Option<Storage>,
}

impl Property {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            storage: None,
        }
    }

    pub fn with_storage(name: impl Into<String>, storage: Storage) -> Self {
        Self {
            name: name.into(),
            data_type: storage.data_type(),
            storage: Some(storage),
        }
    }

    pub fn byte_size(&self) -> usize {
        self.data_type.byte_size()
    }
}

/// A named group of records sharing one schema.
///
/// Every populated column holds exactly `count` values; the record count is fixed at
/// construction.
///
/// ```compile_fail
/// let mut vertex = splat_lib::Element::new("vertex", 2);
/// vertex.count = 3;
/// ```
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    count: usize,
    properties: Vec<Property>,
    index: HashMap<String, usize>,
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.count == other.count && self.properties == other.properties
    }
}

impl Element {
    pub fn new(name: impl Into<String>, count: usize) -> Self {
        Self {
            name: name.into(),
            count,
            properties: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records in this element.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Appends a property, enforcing name uniqueness and the storage length invariant.
    pub fn push_property(&mut self, property: Property) -> Result<()> {
        if self.index.contains_key(&property.name) {
            return Err(SplatError::DuplicateProperty(property.name));
        }
        if let Some(storage) = &property.storage {
            if storage.len() != self.count {
                return Err(SplatError::LengthMismatch {
                    expected: self.count,
                    actual: storage.len(),
                });
            }
        }
        self.index.insert(property.name.clone(), self.properties.len());
        self.properties.push(property);
        Ok(())
    }

    /// Properties in declaration order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub(crate) fn properties_mut(&mut self) -> &mut [Property] {
        &mut self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    /// Bytes occupied by one record of this element in a binary PLY body.
    pub fn record_size(&self) -> usize {
        self.properties.iter().map(Property::byte_size).sum()
    }
}

/// Columnar store of one decoded splat dataset.
#[derive(Debug, Clone, Default)]
pub struct SplatData {
    elements: Vec<Element>,
    comments: Vec<String>,
    num_splats: usize,
}

impl SplatData {
    pub fn new(elements: Vec<Element>) -> Self {
        Self::with_comments(elements, Vec::new())
    }

    pub fn with_comments(elements: Vec<Element>, comments: Vec<String>) -> Self {
        let num_splats = elements
            .iter()
            .find(|e| e.name == VERTEX_ELEMENT)
            .map_or(0, |e| e.count);
        Self {
            elements,
            comments,
            num_splats,
        }
    }

    pub fn num_splats(&self) -> usize {
        self.num_splats
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub(crate) fn elements_mut(&mut self) -> &mut [Element] {
        &mut self.elements
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    pub fn get_element(&self, name: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub fn get_element_mut(&mut self, name: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.name == name)
    }

    pub fn get_prop(&self, name: &str, element: &str) -> Option<&Storage> {
        self.get_element(element)?.property(name)?.storage.as_ref()
    }

    /// Float32 column of the `vertex` element.
    pub fn get_prop_f32(&self, name: &str) -> Option<&[f32]> {
        self.get_prop(name, VERTEX_ELEMENT)?.as_f32()
    }

    /// Vertex column of any numeric type as `f32`.
    ///
    /// Float32 columns are borrowed; every other type is widened or narrowed once.
    pub fn column_f32(&self, name: &str) -> Option<Cow<'_, [f32]>> {
        let storage = self.get_prop(name, VERTEX_ELEMENT)?;
        let column = match storage.as_f32() {
            Some(values) => Cow::Borrowed(values),
            None => Cow::Owned((0..storage.len()).map(|i| storage.get(i) as f32).collect()),
        };
        Some(column)
    }

    /// Like [`column_f32`](Self::column_f32) but reports which column is absent.
    pub(crate) fn require_column(&self, name: &str) -> Result<Cow<'_, [f32]>> {
        self.column_f32(name)
            .ok_or_else(|| SplatError::MissingProperty {
                element: VERTEX_ELEMENT.to_string(),
                property: name.to_string(),
            })
    }

    /// Appends a float32 column to the `vertex` element.
    pub fn add_prop(&mut self, name: &str, values: Vec<f32>) -> Result<()> {
        let vertex = self
            .get_element_mut(VERTEX_ELEMENT)
            .ok_or_else(|| SplatError::MissingProperty {
                element: VERTEX_ELEMENT.to_string(),
                property: name.to_string(),
            })?;
        vertex.push_property(Property::with_storage(name, values.into()))
    }

    /// Spherical harmonic bands carried by consecutive `f_rest_*` vertex columns.
    pub fn sh_bands(&self) -> u8 {
        let Some(vertex) = self.get_element(VERTEX_ELEMENT) else {
            return 0;
        };
        let coeffs = (0..45)
            .take_while(|i| vertex.property(&format!("f_rest_{}", i)).is_some())
            .count();
        sh_bands_for_coeffs(coeffs)
    }

    /// Bytes held by every populated column.
    pub fn storage_bytes(&self) -> usize {
        self.elements
            .iter()
            .flat_map(|e| e.properties())
            .filter_map(|p| p.storage.as_ref())
            .map(Storage::byte_len)
            .sum()
    }

    pub fn is_compressed(&self) -> bool {
        crate::ply::is_compressed_ply(&self.elements)
    }

    pub fn is_float(&self) -> bool {
        crate::ply::is_float_ply(&self.elements)
    }
}
