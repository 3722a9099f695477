//! Z-order spatial sorting of every splat column.

use crate::common::{morton_encode_3d, MORTON_GRID};
use crate::error::{Result, SplatError};
use crate::structures::{DataType, SplatData, Storage};
use foldhash::{HashMap, HashMapExt};
use std::time::Instant;

#[inline]
fn axis_range(values: &[f32]) -> (f32, f32) {
    values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

#[inline]
fn axis_scale((min, max): (f32, f32)) -> f32 {
    if max > min {
        MORTON_GRID / (max - min)
    } else {
        0.0
    }
}

#[inline]
fn quantize(v: f32, min: f32, scale: f32) -> u32 {
    (((v - min) * scale).floor() as u32).min(MORTON_GRID as u32 - 1)
}

/// 30-bit Morton code of each position on a 1024³ grid spanning the point bounds.
///
/// A degenerate axis (zero extent) contributes 0 to every code.
pub fn morton_codes(x: &[f32], y: &[f32], z: &[f32]) -> Vec<u32> {
    let (rx, ry, rz) = (axis_range(x), axis_range(y), axis_range(z));
    let (sx, sy, sz) = (axis_scale(rx), axis_scale(ry), axis_scale(rz));

    x.iter()
        .zip(y)
        .zip(z)
        .map(|((&x, &y), &z)| {
            morton_encode_3d(
                quantize(x, rx.0, sx),
                quantize(y, ry.0, sy),
                quantize(z, rz.0, sz),
            )
        })
        .collect()
}

/// Permutations carry `u32` indices, which caps the record count.
fn ensure_indexable(len: usize) -> Result<()> {
    if u32::try_from(len).is_err() {
        return Err(SplatError::Format(format!(
            "{} splats exceed the u32 index range of a permutation",
            len
        )));
    }
    Ok(())
}

/// Permutation (new position -> old index) visiting codes in ascending order.
///
/// Records sharing a code keep their original relative order.
pub fn morton_order(codes: &[u32]) -> Result<Vec<u32>> {
    ensure_indexable(codes.len())?;
    let mut groups: HashMap<u32, Vec<u32>> = HashMap::with_capacity(codes.len());
    for (i, &code) in codes.iter().enumerate() {
        groups.entry(code).or_default().push(i as u32);
    }

    let mut keys: Vec<u32> = groups.keys().copied().collect();
    keys.sort_unstable();

    let mut order = Vec::with_capacity(codes.len());
    for key in keys {
        if let Some(indices) = groups.remove(&key) {
            order.extend(indices);
        }
    }
    Ok(order)
}

/// Retired column buffers, bucketed by byte length, reused by later columns of the same pass.
#[derive(Default)]
struct BufferCache {
    free: HashMap<usize, Vec<Storage>>,
}

impl BufferCache {
    fn take(&mut self, data_type: DataType, len: usize) -> Storage {
        let bucket = self.free.get_mut(&(len * data_type.byte_size()));
        let reused = bucket.and_then(|b| {
            let pos = b.iter().position(|s| s.data_type() == data_type)?;
            Some(b.swap_remove(pos))
        });
        reused.unwrap_or_else(|| Storage::zeroed(data_type, len))
    }

    fn give(&mut self, storage: Storage) {
        self.free.entry(storage.byte_len()).or_default().push(storage);
    }
}

#[inline]
fn gather<T: Copy>(src: &[T], dst: &mut [T], order: &[u32]) {
    for (d, &o) in dst.iter_mut().zip(order) {
        *d = src[o as usize];
    }
}

fn permute_into(src: &Storage, dst: &mut Storage, order: &[u32]) {
    match (src, dst) {
        (Storage::Int8(s), Storage::Int8(d)) => gather(s, d, order),
        (Storage::UInt8(s), Storage::UInt8(d)) => gather(s, d, order),
        (Storage::Int16(s), Storage::Int16(d)) => gather(s, d, order),
        (Storage::UInt16(s), Storage::UInt16(d)) => gather(s, d, order),
        (Storage::Int32(s), Storage::Int32(d)) => gather(s, d, order),
        (Storage::UInt32(s), Storage::UInt32(d)) => gather(s, d, order),
        (Storage::Float32(s), Storage::Float32(d)) => gather(s, d, order),
        (Storage::Float64(s), Storage::Float64(d)) => gather(s, d, order),
        (src, dst) => {
            for (j, &o) in order.iter().enumerate() {
                dst.set(j, src.get(o as usize));
            }
        }
    }
}

fn validate_permutation(order: &[u32], len: usize) -> Result<()> {
    if order.len() != len {
        return Err(SplatError::LengthMismatch {
            expected: len,
            actual: order.len(),
        });
    }
    let mut seen = vec![false; len];
    for &o in order {
        let o = o as usize;
        match seen.get_mut(o) {
            None => return Err(SplatError::Index { index: o, len }),
            Some(true) => {
                return Err(SplatError::Format(format!(
                    "Permutation repeats index {}",
                    o
                )))
            }
            Some(slot) => *slot = true,
        }
    }
    Ok(())
}

impl SplatData {
    /// Morton permutation of the vertex positions; `x`, `y`, `z` may be any numeric type.
    pub fn calc_morton_order(&self) -> Result<Vec<u32>> {
        let x = self.require_column("x")?;
        let y = self.require_column("y")?;
        let z = self.require_column("z")?;
        morton_order(&morton_codes(&x, &y, &z))
    }

    /// Moves record `order[j]` to position `j` in every populated column of every element
    /// holding one record per splat.
    pub fn reorder(&mut self, order: &[u32]) -> Result<()> {
        let num_splats = self.num_splats();
        ensure_indexable(num_splats)?;
        validate_permutation(order, num_splats)?;

        let mut cache = BufferCache::default();
        for element in self.elements_mut() {
            if element.count() != num_splats {
                continue;
            }
            for property in element.properties_mut() {
                let Some(old) = property.storage.take() else {
                    continue;
                };
                let mut new = cache.take(old.data_type(), old.len());
                permute_into(&old, &mut new, order);
                property.storage = Some(new);
                cache.give(old);
            }
        }
        Ok(())
    }

    /// Sorts all splats into Morton order for memory locality.
    pub fn reorder_morton(&mut self) -> Result<()> {
        let start = Instant::now();
        let order = self.calc_morton_order()?;
        self.reorder(&order)?;
        tracing::debug!(
            splats = self.num_splats(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Reordered splats into Morton order"
        );
        Ok(())
    }
}
