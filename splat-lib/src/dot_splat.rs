//! Headerless `.splat` files: packed 32-byte records, no schema.

use crate::common::{color_to_sh, inv_sigmoid, quat_norm, unquantize_rot};
use crate::error::{Result, SplatError};
use crate::structures::{Element, Property, Storage, VERTEX_ELEMENT};
use zerocopy::byteorder::little_endian::F32;
use zerocopy::{FromBytes, Immutable, KnownLayout, Unaligned};

pub const RECORD_SIZE: usize = 32;

/// Columns produced for every `.splat` record, in element order.
pub const SPLAT_PROPERTIES: [&str; 14] = [
    "x", "y", "z", "scale_0", "scale_1", "scale_2", "f_dc_0", "f_dc_1", "f_dc_2", "opacity",
    "rot_0", "rot_1", "rot_2", "rot_3",
];

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable, Unaligned)]
struct SplatRecord {
    position: [F32; 3],
    scale: [F32; 3],
    color: [u8; 4],
    rotation: [u8; 4],
}

const _: () = assert!(std::mem::size_of::<SplatRecord>() == RECORD_SIZE);

/// Decodes `.splat` bytes into a single `vertex` element.
///
/// Trailing bytes that do not fill a whole record are ignored.
pub fn decode(data: &[u8]) -> Result<Vec<Element>> {
    let count = data.len() / RECORD_SIZE;
    let records = <[SplatRecord]>::ref_from_bytes(&data[..count * RECORD_SIZE])
        .map_err(|_| SplatError::Format("Invalid .splat record layout".to_string()))?;

    let mut columns: [Vec<f32>; SPLAT_PROPERTIES.len()] =
        std::array::from_fn(|_| Vec::with_capacity(count));
    let [x, y, z, scale_0, scale_1, scale_2, f_dc_0, f_dc_1, f_dc_2, opacity, rot_0, rot_1, rot_2, rot_3] =
        &mut columns;

    for record in records {
        // Positions are flipped into the y-up convention used by PLY scenes.
        x.push(-record.position[0].get());
        y.push(-record.position[1].get());
        z.push(record.position[2].get());

        scale_0.push(record.scale[0].get().ln());
        scale_1.push(record.scale[1].get().ln());
        scale_2.push(record.scale[2].get().ln());

        f_dc_0.push(color_to_sh(record.color[0] as f32 / 255.0));
        f_dc_1.push(color_to_sh(record.color[1] as f32 / 255.0));
        f_dc_2.push(color_to_sh(record.color[2] as f32 / 255.0));
        opacity.push(inv_sigmoid(record.color[3] as f32 / 255.0));

        let q = (
            unquantize_rot(record.rotation[0]),
            unquantize_rot(record.rotation[1]),
            unquantize_rot(record.rotation[2]),
            unquantize_rot(record.rotation[3]),
        );
        let norm = quat_norm(q);
        if norm > 0.0 {
            rot_0.push(q.0 / -norm);
            rot_1.push(q.1 / norm);
            rot_2.push(q.2 / norm);
            rot_3.push(q.3 / -norm);
        } else {
            rot_0.push(1.0);
            rot_1.push(0.0);
            rot_2.push(0.0);
            rot_3.push(0.0);
        }
    }

    let mut vertex = Element::new(VERTEX_ELEMENT, count);
    for (name, values) in SPLAT_PROPERTIES.into_iter().zip(columns) {
        vertex.push_property(Property::with_storage(name, Storage::Float32(values)))?;
    }
    Ok(vec![vertex])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::sigmoid;
    use crate::structures::SplatData;

    fn record(position: [f32; 3], scale: [f32; 3], color: [u8; 4], rotation: [u8; 4]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(RECORD_SIZE);
        for f in position.iter().chain(&scale) {
            raw.extend_from_slice(&f.to_le_bytes());
        }
        raw.extend_from_slice(&color);
        raw.extend_from_slice(&rotation);
        raw
    }

    fn decode_data(raw: &[u8]) -> SplatData {
        SplatData::new(decode(raw).unwrap())
    }

    #[test]
    fn test_opacity_extremes() {
        let mut raw = record([1.0, 2.0, 3.0], [1.0; 3], [0, 0, 0, 255], [128, 128, 128, 255]);
        raw.extend(record([0.0; 3], [1.0; 3], [0, 0, 0, 0], [128, 128, 128, 255]));
        assert_eq!(raw.len(), 64);

        let data = decode_data(&raw);
        assert_eq!(data.num_splats(), 2);
        assert_eq!(data.get_prop_f32("opacity"), Some(&[20.0, -20.0][..]));
    }

    #[test]
    fn test_record_transforms() {
        let raw = record(
            [1.0, -2.0, 3.0],
            [1.0, std::f32::consts::E, 0.0],
            [255, 128, 0, 128],
            [0, 128, 128, 128],
        );
        let data = decode_data(&raw);

        assert_eq!(data.get_prop_f32("x"), Some(&[-1.0][..]));
        assert_eq!(data.get_prop_f32("y"), Some(&[2.0][..]));
        assert_eq!(data.get_prop_f32("z"), Some(&[3.0][..]));

        assert_eq!(data.get_prop_f32("scale_0").unwrap()[0], 0.0);
        assert!((data.get_prop_f32("scale_1").unwrap()[0] - 1.0).abs() < 1e-6);
        assert_eq!(data.get_prop_f32("scale_2").unwrap()[0], f32::NEG_INFINITY);

        let dc = data.get_prop_f32("f_dc_0").unwrap()[0];
        assert!((dc - 0.5 / crate::common::SH_C0).abs() < 1e-5);
        let dc = data.get_prop_f32("f_dc_2").unwrap()[0];
        assert!((dc + 0.5 / crate::common::SH_C0).abs() < 1e-5);

        // (0 - 128) / 128 = -1 on the first component only, flipped by the sign convention.
        assert_eq!(data.get_prop_f32("rot_0"), Some(&[1.0][..]));
        assert_eq!(data.get_prop_f32("rot_1"), Some(&[0.0][..]));
        assert_eq!(data.get_prop_f32("rot_3"), Some(&[-0.0][..]));
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut raw = record([0.0; 3], [1.0; 3], [0; 4], [200; 4]);
        raw.extend_from_slice(&[7u8; 31]);
        assert_eq!(decode_data(&raw).num_splats(), 1);
        assert_eq!(decode_data(&raw[..31]).num_splats(), 0);
    }

    #[test]
    fn test_alpha_survives_logit_round_trip() {
        for a in 0..=255u8 {
            let data = decode_data(&record([0.0; 3], [1.0; 3], [0, 0, 0, a], [128, 128, 128, 255]));
            let opacity = data.get_prop_f32("opacity").unwrap()[0];
            let alpha = sigmoid(opacity) * 255.0;
            assert!(
                (alpha - a as f32).abs() <= 1.0,
                "alpha byte {} decoded to {}",
                a,
                alpha
            );
        }
    }

    #[test]
    fn test_quaternions_are_unit_length() {
        for bytes in [[0, 0, 0, 0], [255, 0, 17, 90], [129, 128, 128, 128], [10, 250, 3, 77]] {
            let data = decode_data(&record([0.0; 3], [1.0; 3], [0; 4], bytes));
            let norm = ["rot_0", "rot_1", "rot_2", "rot_3"]
                .iter()
                .map(|name| data.get_prop_f32(name).unwrap()[0].powi(2))
                .sum::<f32>()
                .sqrt();
            assert!((norm - 1.0).abs() < 1e-5, "{:?} has norm {}", bytes, norm);
        }
    }

    #[test]
    fn test_zero_quaternion_decodes_to_identity() {
        let data = decode_data(&record([0.0; 3], [1.0; 3], [0; 4], [128; 4]));
        let rot: Vec<f32> = ["rot_0", "rot_1", "rot_2", "rot_3"]
            .iter()
            .map(|name| data.get_prop_f32(name).unwrap()[0])
            .collect();
        assert_eq!(rot, vec![1.0, 0.0, 0.0, 0.0]);
    }
}
