//! Binary little-endian PLY decoding, schema classification and encoding.

use crate::error::{Result, SplatError};
use crate::structures::{DataType, Element, Property, SplatData, Storage, VERTEX_ELEMENT};
use memchr::memmem;
use std::io::Write;

pub const MAGIC: &[u8] = b"ply\n";
const HEADER_TERMINATOR: &[u8] = b"\nend_header\n";
const SUPPORTED_FORMAT: &str = "binary_little_endian";

/// Vertex columns written by [`write_splat_ply`], in file order.
pub const SPLAT_PLY_PROPERTIES: [&str; 14] = [
    "x", "y", "z", "f_dc_0", "f_dc_1", "f_dc_2", "opacity", "rot_0", "rot_1", "rot_2", "rot_3",
    "scale_0", "scale_1", "scale_2",
];

const CHUNK_PROPERTIES: [&str; 18] = [
    "min_x",
    "min_y",
    "min_z",
    "max_x",
    "max_y",
    "max_z",
    "min_scale_x",
    "min_scale_y",
    "min_scale_z",
    "max_scale_x",
    "max_scale_y",
    "max_scale_z",
    "min_r",
    "min_g",
    "min_b",
    "max_r",
    "max_g",
    "max_b",
];

const PACKED_VERTEX_PROPERTIES: [&str; 4] = [
    "packed_position",
    "packed_rotation",
    "packed_scale",
    "packed_color",
];

/// Advisory knobs for [`decode`]. Neither affects the decoded values of kept columns.
#[derive(Default)]
pub struct DecodeOptions<'a> {
    /// `(element, property) -> keep`. Rejected columns are skipped and left unpopulated.
    pub filter: Option<&'a dyn Fn(&str, &str) -> bool>,
    /// Receives the decode fraction, once at start (0.1) and once on completion (1.0).
    pub progress: Option<&'a mut dyn FnMut(f32)>,
}

#[derive(Debug, Clone)]
pub struct PlyData {
    pub elements: Vec<Element>,
    pub format: String,
    pub comments: Vec<String>,
}

impl PlyData {
    pub fn is_compressed(&self) -> bool {
        is_compressed_ply(&self.elements)
    }

    pub fn is_float(&self) -> bool {
        is_float_ply(&self.elements)
    }

    pub fn into_splat_data(self) -> SplatData {
        SplatData::with_comments(self.elements, self.comments)
    }
}

#[inline]
fn next_line<'b>(buffer: &'b [u8], offset: &mut usize) -> Option<&'b [u8]> {
    if *offset >= buffer.len() {
        return None;
    }
    let start = *offset;

    match memchr::memchr(b'\n', &buffer[*offset..]) {
        Some(pos) => {
            *offset = start + pos + 1;
            Some(&buffer[start..start + pos])
        }
        None => {
            *offset = buffer.len();
            Some(&buffer[start..])
        }
    }
}

struct Header {
    format: String,
    comments: Vec<String>,
    elements: Vec<Element>,
}

fn parse_header(header: &[u8]) -> Result<Header> {
    let mut parsed = Header {
        format: String::new(),
        comments: Vec::new(),
        elements: Vec::new(),
    };

    let mut offset = 0;
    while let Some(raw) = next_line(header, &mut offset) {
        let line = std::str::from_utf8(raw)
            .map_err(|_| SplatError::Format("PLY header is not valid ASCII".to_string()))?;
        let mut tokens = line.split_whitespace();
        let Some(keyword) = tokens.next() else {
            continue;
        };

        match keyword {
            "comment" => {
                let text = line.trim_start()["comment".len()..].trim();
                parsed.comments.push(text.to_string());
            }
            "format" => {
                parsed.format = tokens.next().unwrap_or_default().to_string();
            }
            "element" => {
                let name = tokens
                    .next()
                    .ok_or_else(|| SplatError::Header(keyword.to_string()))?;
                let count_token = tokens
                    .next()
                    .ok_or_else(|| SplatError::Header(line.to_string()))?;
                let count: usize = count_token
                    .parse()
                    .map_err(|_| SplatError::Header(count_token.to_string()))?;
                parsed.elements.push(Element::new(name, count));
            }
            "property" => {
                let type_token = tokens
                    .next()
                    .ok_or_else(|| SplatError::Header(keyword.to_string()))?;
                let data_type = DataType::from_ply_name(type_token)
                    .ok_or_else(|| SplatError::Header(type_token.to_string()))?;
                let name = tokens
                    .next()
                    .ok_or_else(|| SplatError::Header(line.to_string()))?;
                let element = parsed
                    .elements
                    .last_mut()
                    .ok_or_else(|| SplatError::Header(keyword.to_string()))?;
                element
                    .push_property(Property::new(name, data_type))
                    .map_err(|_| SplatError::Header(name.to_string()))?;
            }
            other => return Err(SplatError::Header(other.to_string())),
        }
    }

    Ok(parsed)
}

/// Decodes a binary little-endian PLY buffer into typed columns.
///
/// No partially decoded data is ever returned: any malformed header or short body fails the
/// whole call.
pub fn decode(data: &[u8], mut options: DecodeOptions<'_>) -> Result<PlyData> {
    if !data.starts_with(MAGIC) {
        return Err(SplatError::Format(
            "Not a .ply file (missing 'ply' magic)".to_string(),
        ));
    }

    // The newline closing the magic may double as the terminator's leading newline.
    let header_end = memmem::find(&data[MAGIC.len() - 1..], HEADER_TERMINATOR)
        .map(|pos| pos + MAGIC.len() - 1)
        .ok_or_else(|| SplatError::Format("No 'end_header' found before EOF".to_string()))?;

    let header = parse_header(data.get(MAGIC.len()..header_end).unwrap_or_default())?;
    if header.format != SUPPORTED_FORMAT {
        return Err(SplatError::UnsupportedFormat(header.format));
    }

    let body = &data[header_end + HEADER_TERMINATOR.len()..];
    let expected_bytes = header
        .elements
        .iter()
        .try_fold(0usize, |acc, e| {
            e.count()
                .checked_mul(e.record_size())
                .and_then(|n| acc.checked_add(n))
        })
        .ok_or_else(|| SplatError::Format("Overflow in byte calculation".to_string()))?;
    if body.len() < expected_bytes {
        return Err(SplatError::Format(format!(
            "Binary data is too short, need {} bytes, have {}",
            expected_bytes,
            body.len()
        )));
    }

    let mut elements = header.elements;
    for element in elements.iter_mut() {
        let count = element.count();
        let element_name = element.name().to_string();
        for property in element.properties_mut() {
            let keep = options
                .filter
                .map_or(true, |f| f(&element_name, &property.name));
            if keep {
                property.storage = Some(Storage::zeroed(property.data_type, count));
            }
        }
    }

    if let Some(progress) = options.progress.as_deref_mut() {
        progress(0.1);
    }

    let mut offset = 0;
    for element in elements.iter_mut() {
        let record_size = element.record_size();
        if record_size == 0 || element.count() == 0 {
            continue;
        }
        let element_bytes = &body[offset..offset + element.count() * record_size];
        offset += element_bytes.len();

        let mut columns: Vec<(usize, &mut Storage)> = Vec::new();
        let mut at = 0;
        for property in element.properties_mut() {
            let size = property.byte_size();
            if let Some(storage) = property.storage.as_mut() {
                columns.push((at, storage));
            }
            at += size;
        }

        for (row, record) in element_bytes.chunks_exact(record_size).enumerate() {
            for (at, storage) in columns.iter_mut() {
                storage.read_le(row, &record[*at..]);
            }
        }
    }

    if let Some(progress) = options.progress.as_deref_mut() {
        progress(1.0);
    }

    Ok(PlyData {
        elements,
        format: header.format,
        comments: header.comments,
    })
}

fn matches_schema<'n>(
    element: &Element,
    name: &str,
    data_type: DataType,
    properties: impl ExactSizeIterator<Item = &'n str>,
) -> bool {
    element.name() == name
        && element.properties().len() == properties.len()
        && element
            .properties()
            .iter()
            .zip(properties)
            .all(|(p, expected)| p.name == expected && p.data_type == data_type)
}

fn is_packed_sh(element: &Element) -> bool {
    let coeffs = element.properties().len();
    matches!(coeffs, 9 | 24 | 45)
        && element.name() == "sh"
        && element
            .properties()
            .iter()
            .enumerate()
            .all(|(i, p)| p.data_type == DataType::UInt8 && p.name == format!("f_rest_{}", i))
}

/// Whether the schema is one of the chunked, quantised splat layouts.
pub fn is_compressed_ply(elements: &[Element]) -> bool {
    let base = |chunk: &Element, vertex: &Element| {
        matches_schema(chunk, "chunk", DataType::Float32, CHUNK_PROPERTIES.into_iter())
            && matches_schema(
                vertex,
                VERTEX_ELEMENT,
                DataType::UInt32,
                PACKED_VERTEX_PROPERTIES.into_iter(),
            )
    };

    match elements {
        [chunk, vertex] => base(chunk, vertex),
        [chunk, vertex, sh] => base(chunk, vertex) && is_packed_sh(sh),
        _ => false,
    }
}

/// Whether the file holds a single `vertex` element made only of float32 columns.
pub fn is_float_ply(elements: &[Element]) -> bool {
    match elements {
        [vertex] => {
            vertex.name() == VERTEX_ELEMENT
                && vertex
                    .properties()
                    .iter()
                    .all(|p| p.data_type == DataType::Float32)
        }
        _ => false,
    }
}

fn write_header(output: &mut Vec<u8>, comments: &[String]) {
    output.extend_from_slice(b"ply\nformat binary_little_endian 1.0\n");
    for comment in comments {
        output.extend_from_slice(b"comment ");
        output.extend_from_slice(comment.as_bytes());
        output.push(b'\n');
    }
}

/// Writes every element in its native types; the inverse of [`decode`].
///
/// Unpopulated columns are written as zeros.
pub fn encode_ply(output: &mut Vec<u8>, elements: &[Element], comments: &[String]) -> Result<()> {
    output.clear();
    write_header(output, comments);
    for element in elements {
        writeln!(output, "element {} {}", element.name(), element.count())
            .map_err(SplatError::IoError)?;
        for property in element.properties() {
            writeln!(
                output,
                "property {} {}",
                property.data_type.ply_name(),
                property.name
            )
            .map_err(SplatError::IoError)?;
        }
    }
    output.extend_from_slice(b"end_header\n");

    let body_size: usize = elements.iter().map(|e| e.count() * e.record_size()).sum();
    output.reserve(body_size);

    for element in elements {
        for row in 0..element.count() {
            for property in element.properties() {
                match &property.storage {
                    Some(storage) => storage.write_le(row, output),
                    None => output.resize(output.len() + property.byte_size(), 0),
                }
            }
        }
    }
    Ok(())
}

cfg_if::cfg_if! {
if #[cfg(target_endian = "little")] {
    #[inline]
    fn extend_f32_le(output: &mut Vec<u8>, values: &[f32]) {
        output.extend_from_slice(bytemuck::cast_slice(values));
    }
} else {
    #[inline]
    fn extend_f32_le(output: &mut Vec<u8>, values: &[f32]) {
        for v in values {
            output.extend_from_slice(&v.to_le_bytes());
        }
    }
}
}

/// Writes the `vertex` element as the fixed 14-column float32 splat layout.
pub fn write_splat_ply(output: &mut Vec<u8>, data: &SplatData) -> Result<()> {
    let columns = SPLAT_PLY_PROPERTIES
        .iter()
        .map(|&name| {
            data.get_prop(name, VERTEX_ELEMENT)
                .ok_or_else(|| SplatError::MissingProperty {
                    element: VERTEX_ELEMENT.to_string(),
                    property: name.to_string(),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let num_splats = data.num_splats();
    output.clear();
    write_header(output, data.comments());
    writeln!(output, "element vertex {}", num_splats).map_err(SplatError::IoError)?;
    for name in SPLAT_PLY_PROPERTIES {
        writeln!(output, "property float {}", name).map_err(SplatError::IoError)?;
    }
    output.extend_from_slice(b"end_header\n");

    output.reserve(num_splats * SPLAT_PLY_PROPERTIES.len() * 4);
    let mut row = [0.0f32; SPLAT_PLY_PROPERTIES.len()];
    for i in 0..num_splats {
        for (value, column) in row.iter_mut().zip(&columns) {
            *value = match column.as_f32() {
                Some(values) => values[i],
                None => column.get(i) as f32,
            };
        }
        extend_f32_le(output, &row);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ply_bytes(header: &str, floats: &[f32]) -> Vec<u8> {
        let mut raw = header.as_bytes().to_vec();
        for f in floats {
            raw.extend_from_slice(&f.to_le_bytes());
        }
        raw
    }

    fn xyz_ply() -> Vec<u8> {
        ply_bytes(
            "ply\nformat binary_little_endian 1.0\nelement vertex 2\n\
             property float x\nproperty float y\nproperty float z\nend_header\n",
            &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        )
    }

    #[test]
    fn test_decode_two_vertices() {
        let ply = decode(&xyz_ply(), DecodeOptions::default()).unwrap();
        assert_eq!(ply.format, "binary_little_endian");
        assert!(ply.is_float());
        assert!(!ply.is_compressed());

        let data = ply.into_splat_data();
        assert_eq!(data.num_splats(), 2);
        assert_eq!(data.get_prop_f32("x"), Some(&[0.0, 1.0][..]));
        assert_eq!(data.get_prop_f32("z"), Some(&[0.0, 1.0][..]));
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let err = decode(b"plx\nformat binary_little_endian 1.0\nend_header\n", DecodeOptions::default())
            .unwrap_err();
        assert!(matches!(err, SplatError::Format(_)));
    }

    #[test]
    fn test_decode_requires_end_header() {
        let err = decode(
            b"ply\nformat binary_little_endian 1.0\nelement vertex 0\n",
            DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SplatError::Format(_)));
    }

    #[test]
    fn test_decode_reports_offending_tokens() {
        let err = decode(
            b"ply\nformat binary_little_endian 1.0\nobj_info scanner\nend_header\n",
            DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SplatError::Header(ref t) if t == "obj_info"));

        let err = decode(
            b"ply\nformat binary_little_endian 1.0\nelement vertex 1\nproperty half x\nend_header\n",
            DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SplatError::Header(ref t) if t == "half"));

        let err = decode(
            b"ply\nformat binary_little_endian 1.0\nelement vertex 1\n\
              property list uchar int vertex_indices\nend_header\n",
            DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SplatError::Header(ref t) if t == "list"));

        let err = decode(
            b"ply\nformat binary_little_endian 1.0\nelement vertex lots\nend_header\n",
            DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SplatError::Header(ref t) if t == "lots"));
    }

    #[test]
    fn test_decode_rejects_other_formats() {
        let err = decode(
            b"ply\nformat ascii 1.0\nelement vertex 0\nend_header\n",
            DecodeOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SplatError::UnsupportedFormat(ref f) if f == "ascii"));

        let err = decode(b"ply\nend_header\n", DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, SplatError::UnsupportedFormat(ref f) if f.is_empty()));
    }

    #[test]
    fn test_decode_rejects_short_body() {
        let mut raw = xyz_ply();
        raw.truncate(raw.len() - 1);
        let err = decode(&raw, DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, SplatError::Format(_)));
    }

    #[test]
    fn test_decode_mixed_types_and_elements() {
        let mut raw = b"ply\nformat binary_little_endian 1.0\ncomment made by hand\n\
            element vertex 2\nproperty uchar r\nproperty short s\nproperty double d\n\
            element extra 1\nproperty uint u\nend_header\n"
            .to_vec();
        for (r, s, d) in [(7u8, -3i16, 2.5f64), (255, 1000, -1.0)] {
            raw.push(r);
            raw.extend_from_slice(&s.to_le_bytes());
            raw.extend_from_slice(&d.to_le_bytes());
        }
        raw.extend_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

        let ply = decode(&raw, DecodeOptions::default()).unwrap();
        assert_eq!(ply.comments, vec!["made by hand".to_string()]);
        assert!(!ply.is_float());

        let data = ply.into_splat_data();
        assert_eq!(data.get_prop("r", "vertex"), Some(&Storage::UInt8(vec![7, 255])));
        assert_eq!(data.get_prop("s", "vertex"), Some(&Storage::Int16(vec![-3, 1000])));
        assert_eq!(data.get_prop("d", "vertex"), Some(&Storage::Float64(vec![2.5, -1.0])));
        assert_eq!(data.get_prop("u", "extra"), Some(&Storage::UInt32(vec![0xDEAD_BEEF])));
    }

    #[test]
    fn test_decode_filter_and_progress() {
        let skip_y = |_: &str, name: &str| name != "y";
        let mut reported = Vec::new();
        let mut progress = |p: f32| reported.push(p);
        let ply = decode(
            &xyz_ply(),
            DecodeOptions {
                filter: Some(&skip_y),
                progress: Some(&mut progress),
            },
        )
        .unwrap();
        assert_eq!(reported, vec![0.1, 1.0]);

        let data = ply.into_splat_data();
        let vertex = data.get_element("vertex").unwrap();
        assert_eq!(vertex.properties().len(), 3);
        assert!(vertex.property("y").unwrap().storage.is_none());
        assert_eq!(data.get_prop_f32("z"), Some(&[0.0, 1.0][..]));
    }

    fn compressed_header(sh_coeffs: Option<usize>) -> String {
        let mut header = String::from("ply\nformat binary_little_endian 1.0\nelement chunk 0\n");
        for name in CHUNK_PROPERTIES {
            header.push_str(&format!("property float {}\n", name));
        }
        header.push_str("element vertex 0\n");
        for name in PACKED_VERTEX_PROPERTIES {
            header.push_str(&format!("property uint {}\n", name));
        }
        if let Some(n) = sh_coeffs {
            header.push_str("element sh 0\n");
            for i in 0..n {
                header.push_str(&format!("property uchar f_rest_{}\n", i));
            }
        }
        header.push_str("end_header\n");
        header
    }

    #[test]
    fn test_is_compressed_ply() {
        let detect = |header: String| decode(header.as_bytes(), DecodeOptions::default()).unwrap();
        assert!(detect(compressed_header(None)).is_compressed());
        assert!(detect(compressed_header(Some(9))).is_compressed());
        assert!(detect(compressed_header(Some(45))).is_compressed());
        assert!(!detect(compressed_header(Some(10))).is_compressed());
        assert!(!detect(compressed_header(None)).is_float());
    }

    fn splat_ply_data(n: usize) -> SplatData {
        let mut vertex = Element::new("vertex", n);
        for (p, name) in SPLAT_PLY_PROPERTIES.iter().enumerate() {
            let values = (0..n).map(|i| (p * 100 + i) as f32 * 0.37 - 5.0).collect();
            vertex
                .push_property(Property::with_storage(*name, Storage::Float32(values)))
                .unwrap();
        }
        SplatData::new(vec![vertex])
    }

    #[test]
    fn test_write_splat_ply_round_trip() {
        let data = splat_ply_data(5);
        let mut out = Vec::new();
        write_splat_ply(&mut out, &data).unwrap();

        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("ply\nformat binary_little_endian 1.0\nelement vertex 5\n"));

        let decoded = decode(&out, DecodeOptions::default()).unwrap();
        assert!(decoded.is_float());
        let names: Vec<_> = decoded.elements[0]
            .properties()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, SPLAT_PLY_PROPERTIES);

        let decoded = decoded.into_splat_data();
        assert_eq!(decoded.num_splats(), 5);
        for name in SPLAT_PLY_PROPERTIES {
            let a = data.get_prop_f32(name).unwrap();
            let b = decoded.get_prop_f32(name).unwrap();
            assert!(a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits()));
        }
    }

    #[test]
    fn test_write_splat_ply_requires_columns() {
        let data = decode(&xyz_ply(), DecodeOptions::default())
            .unwrap()
            .into_splat_data();
        let err = write_splat_ply(&mut Vec::new(), &data).unwrap_err();
        assert!(matches!(err, SplatError::MissingProperty { ref property, .. } if property == "f_dc_0"));
    }

    #[test]
    fn test_encode_ply_round_trip() {
        let mut vertex = Element::new("vertex", 2);
        vertex
            .push_property(Property::with_storage("a", Storage::Int8(vec![-1, 2])))
            .unwrap();
        vertex
            .push_property(Property::with_storage("b", Storage::UInt16(vec![9, 65535])))
            .unwrap();
        vertex.push_property(Property::new("c", DataType::Float32)).unwrap();
        let comments = vec!["generated".to_string()];

        let mut out = Vec::new();
        encode_ply(&mut out, &[vertex], &comments).unwrap();
        let decoded = decode(&out, DecodeOptions::default()).unwrap();
        assert_eq!(decoded.comments, comments);

        let data = decoded.into_splat_data();
        assert_eq!(data.get_prop("a", "vertex"), Some(&Storage::Int8(vec![-1, 2])));
        assert_eq!(data.get_prop("b", "vertex"), Some(&Storage::UInt16(vec![9, 65535])));
        assert_eq!(data.get_prop_f32("c"), Some(&[0.0, 0.0][..]));
    }
}
