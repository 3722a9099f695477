//! Axis-aligned bounds and focal point statistics over the vertex columns.

use crate::structures::SplatData;
use glam::{DVec3, Mat3, Quat, Vec3, Vec4};
use std::borrow::Cow;

/// Axis-aligned box in center / half-extent form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Aabb {
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        Self {
            center: (min + max) * 0.5,
            half_extents: (max - min) * 0.5,
        }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.half_extents
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.half_extents
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min()).all() && p.cmple(self.max()).all()
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        self.contains_point(other.min()) && self.contains_point(other.max())
    }
}

/// Running min/max accumulator.
struct Extents {
    min: Vec3,
    max: Vec3,
    any: bool,
}

impl Extents {
    fn new() -> Self {
        Self {
            min: Vec3::INFINITY,
            max: Vec3::NEG_INFINITY,
            any: false,
        }
    }

    #[inline]
    fn expand(&mut self, center: Vec3, half: Vec3) {
        self.min = self.min.min(center - half);
        self.max = self.max.max(center + half);
        self.any = true;
    }

    fn finish(self) -> Option<Aabb> {
        self.any.then(|| Aabb::from_min_max(self.min, self.max))
    }
}

/// Optional record filter shared by the statistics below.
pub type Predicate<'p> = Option<&'p dyn Fn(usize) -> bool>;

#[inline]
fn accepted(predicate: Predicate<'_>, i: usize) -> bool {
    predicate.map_or(true, |p| p(i))
}

impl SplatData {
    fn columns<const N: usize>(&self, names: [&str; N]) -> Option<[Cow<'_, [f32]>; N]> {
        let mut out: [Cow<'_, [f32]>; N] = std::array::from_fn(|_| Cow::Borrowed(&[][..]));
        for (slot, name) in out.iter_mut().zip(names) {
            *slot = self.column_f32(name)?;
        }
        Some(out)
    }

    /// Cheap bound expanding each center by twice its largest axis scale.
    ///
    /// Columns of any numeric type are read as `f32`.
    ///
    /// `None` when the columns are missing or the predicate rejects every record.
    pub fn calc_aabb_pessimistic(&self, predicate: Predicate<'_>) -> Option<Aabb> {
        let [x, y, z] = self.columns(["x", "y", "z"])?;
        let [s0, s1, s2] = self.columns(["scale_0", "scale_1", "scale_2"])?;

        let mut extents = Extents::new();
        for i in 0..self.num_splats() {
            if !accepted(predicate, i) {
                continue;
            }
            let radius = 2.0 * s0[i].max(s1[i]).max(s2[i]).exp();
            extents.expand(Vec3::new(x[i], y[i], z[i]), Vec3::splat(radius));
        }
        extents.finish()
    }

    /// Union of the world bounds of each rotated 2σ ellipsoid.
    ///
    /// Each splat is bounded by its ellipsoid rather than by the rotated box with the same radii:
    /// a rotated box can reach `sqrt(3)` times its largest radius along a world axis, which would
    /// poke out of [`calc_aabb_pessimistic`](Self::calc_aabb_pessimistic). The ellipsoid bound
    /// never exceeds the largest radius per axis, so it is always contained in the pessimistic
    /// box for the same predicate.
    pub fn calc_aabb_exact(&self, predicate: Predicate<'_>) -> Option<Aabb> {
        let [x, y, z] = self.columns(["x", "y", "z"])?;
        let [r0, r1, r2, r3] = self.columns(["rot_0", "rot_1", "rot_2", "rot_3"])?;
        let [s0, s1, s2] = self.columns(["scale_0", "scale_1", "scale_2"])?;

        let mut extents = Extents::new();
        for i in 0..self.num_splats() {
            if !accepted(predicate, i) {
                continue;
            }
            let rotation = Vec4::new(r1[i], r2[i], r3[i], r0[i])
                .try_normalize()
                .map_or(Quat::IDENTITY, Quat::from_vec4);
            let m = Mat3::from_quat(rotation);
            let radii = Vec3::new(s0[i].exp(), s1[i].exp(), s2[i].exp()) * 2.0;

            let a = m.x_axis * radii.x;
            let b = m.y_axis * radii.y;
            let c = m.z_axis * radii.z;
            let half = (a * a + b * b + c * c).powf(0.5);
            extents.expand(Vec3::new(x[i], y[i], z[i]), half);
        }
        extents.finish()
    }

    /// Centroid weighted towards small splats: `w = 1 / (1 + exp(max scale))`.
    ///
    /// `None` when no record is accepted or the accepted weights sum to zero.
    pub fn calc_focal_point(&self, predicate: Predicate<'_>) -> Option<Vec3> {
        let [x, y, z] = self.columns(["x", "y", "z"])?;
        let [s0, s1, s2] = self.columns(["scale_0", "scale_1", "scale_2"])?;

        let mut sum = DVec3::ZERO;
        let mut weight = 0.0f64;
        for i in 0..self.num_splats() {
            if !accepted(predicate, i) {
                continue;
            }
            let w = 1.0 / (1.0 + (s0[i].max(s1[i]).max(s2[i]) as f64).exp());
            sum += DVec3::new(x[i] as f64, y[i] as f64, z[i] as f64) * w;
            weight += w;
        }

        if weight > 0.0 && weight.is_finite() {
            Some((sum / weight).as_vec3())
        } else {
            None
        }
    }

    /// Positions interleaved as `[x0, y0, z0, x1, ...]`.
    pub fn get_centers(&self) -> Option<Vec<f32>> {
        let [x, y, z] = self.columns(["x", "y", "z"])?;
        let mut centers = Vec::with_capacity(self.num_splats() * 3);
        for ((&x, &y), &z) in x.iter().zip(y.iter()).zip(z.iter()) {
            centers.extend_from_slice(&[x, y, z]);
        }
        Some(centers)
    }
}
