use crate::common::{sh_to_color, sigmoid};
use crate::error::{Result, SplatError};
use crate::structures::SplatData;
use glam::{Quat, Vec3, Vec4};
use std::borrow::Cow;

/// Which outputs a [`SplatIter`] fills on every [`read`](SplatIter::read).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterFields {
    pub position: bool,
    pub rotation: bool,
    pub scale: bool,
    pub color: bool,
}

impl IterFields {
    pub const ALL: Self = Self {
        position: true,
        rotation: true,
        scale: true,
        color: true,
    };
}

/// Cursor over the vertex columns that decodes one splat at a time into reusable slots.
///
/// Columns of any numeric type are accepted; non-float32 ones are converted once up front.
///
/// Slots that were not requested stay `None`; requested ones are overwritten by each `read`.
#[derive(Debug)]
pub struct SplatIter<'a> {
    len: usize,
    position_columns: Option<[Cow<'a, [f32]>; 3]>,
    rotation_columns: Option<[Cow<'a, [f32]>; 4]>,
    scale_columns: Option<[Cow<'a, [f32]>; 3]>,
    color_columns: Option<[Cow<'a, [f32]>; 4]>,
    pub position: Option<Vec3>,
    pub rotation: Option<Quat>,
    pub scale: Option<Vec3>,
    /// Linear RGB plus alpha.
    pub color: Option<Vec4>,
}

impl<'a> SplatIter<'a> {
    pub fn new(data: &'a SplatData, fields: IterFields) -> Result<Self> {
        let position_columns = if fields.position {
            Some([
                data.require_column("x")?,
                data.require_column("y")?,
                data.require_column("z")?,
            ])
        } else {
            None
        };
        let rotation_columns = if fields.rotation {
            Some([
                data.require_column("rot_0")?,
                data.require_column("rot_1")?,
                data.require_column("rot_2")?,
                data.require_column("rot_3")?,
            ])
        } else {
            None
        };
        let scale_columns = if fields.scale {
            Some([
                data.require_column("scale_0")?,
                data.require_column("scale_1")?,
                data.require_column("scale_2")?,
            ])
        } else {
            None
        };
        let color_columns = if fields.color {
            Some([
                data.require_column("f_dc_0")?,
                data.require_column("f_dc_1")?,
                data.require_column("f_dc_2")?,
                data.require_column("opacity")?,
            ])
        } else {
            None
        };

        Ok(Self {
            len: data.num_splats(),
            position_columns,
            rotation_columns,
            scale_columns,
            color_columns,
            position: fields.position.then_some(Vec3::ZERO),
            rotation: fields.rotation.then_some(Quat::IDENTITY),
            scale: fields.scale.then_some(Vec3::ZERO),
            color: fields.color.then_some(Vec4::ZERO),
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Decodes splat `i` into every requested slot.
    pub fn read(&mut self, i: usize) -> Result<()> {
        if i >= self.len {
            return Err(SplatError::Index {
                index: i,
                len: self.len,
            });
        }

        if let (Some(out), Some([x, y, z])) = (self.position.as_mut(), &self.position_columns) {
            *out = Vec3::new(x[i], y[i], z[i]);
        }
        if let (Some(out), Some([r0, r1, r2, r3])) = (self.rotation.as_mut(), &self.rotation_columns)
        {
            // rot_0 carries the scalar part.
            *out = Quat::from_xyzw(r1[i], r2[i], r3[i], r0[i]);
        }
        if let (Some(out), Some([s0, s1, s2])) = (self.scale.as_mut(), &self.scale_columns) {
            *out = Vec3::new(s0[i].exp(), s1[i].exp(), s2[i].exp());
        }
        if let (Some(out), Some([r, g, b, a])) = (self.color.as_mut(), &self.color_columns) {
            *out = Vec4::new(
                sh_to_color(r[i]),
                sh_to_color(g[i]),
                sh_to_color(b[i]),
                sigmoid(a[i]),
            );
        }
        Ok(())
    }
}

impl SplatData {
    pub fn create_iter(&self, fields: IterFields) -> Result<SplatIter<'_>> {
        SplatIter::new(self, fields)
    }
}
