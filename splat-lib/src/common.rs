/// Zeroth-order spherical harmonic basis constant.
pub const SH_C0: f32 = 0.282_094_8;

/// Logit stored for a fully opaque splat.
pub const OPACITY_MAX_LOGIT: f32 = 20.0;

/// Grid resolution per axis used for Morton quantisation (10 bits).
pub const MORTON_GRID: f32 = 1024.0;

#[inline]
pub(crate) fn sigmoid(x: f32) -> f32 {
    if x > 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Inverse of [`sigmoid`], saturated to `±OPACITY_MAX_LOGIT` at the ends of the range.
#[inline]
pub(crate) fn inv_sigmoid(x: f32) -> f32 {
    if x >= 1.0 {
        OPACITY_MAX_LOGIT
    } else if x <= 0.0 {
        -OPACITY_MAX_LOGIT
    } else {
        -(1.0 / x - 1.0).ln()
    }
}

#[inline]
pub(crate) fn color_to_sh(c: f32) -> f32 {
    (c - 0.5) / SH_C0
}

#[inline]
pub(crate) fn sh_to_color(sh: f32) -> f32 {
    0.5 + sh * SH_C0
}

#[inline]
pub(crate) fn unquantize_rot(x: u8) -> f32 {
    (x as f32 - 128.0) / 128.0
}

#[inline]
pub(crate) fn quat_norm(q: (f32, f32, f32, f32)) -> f32 {
    (q.0 * q.0 + q.1 * q.1 + q.2 * q.2 + q.3 * q.3).sqrt()
}

/// Spreads the low 10 bits of `v` so that two zero bits separate each bit.
#[inline]
pub(crate) const fn spread_bits_3d(v: u32) -> u32 {
    let mut x = v & 0x3ff;
    x = (x | (x << 16)) & 0x0300_00ff;
    x = (x | (x << 8)) & 0x0300_f00f;
    x = (x | (x << 4)) & 0x030c_30c3;
    x = (x | (x << 2)) & 0x0924_9249;
    x
}

#[inline]
pub const fn morton_encode_3d(x: u32, y: u32, z: u32) -> u32 {
    (spread_bits_3d(z) << 2) | (spread_bits_3d(y) << 1) | spread_bits_3d(x)
}

/// Number of spherical harmonic bands implied by a count of `f_rest_*` coefficients.
#[inline]
pub(crate) const fn sh_bands_for_coeffs(coeffs: usize) -> u8 {
    match coeffs {
        9 => 1,
        24 => 2,
        45 => 3,
        _ => 0,
    }
}
