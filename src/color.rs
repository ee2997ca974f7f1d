//! 8-bit CIELab to sRGB conversion (D65 white point).
//!
//! Bytes follow the common 8-bit Lab packing: `L = l·100/255`,
//! `a = a8 − 128`, `b = b8 − 128`.

// D65 reference white, Y normalised to 1
const XN: f64 = 0.950456;
const ZN: f64 = 1.088754;

const DELTA: f64 = 6.0 / 29.0;

/// Inverse of the CIELab companding function.
#[inline(always)]
fn lab_f_inv(t: f64) -> f64 {
    if t > DELTA {
        t * t * t
    } else {
        3.0 * DELTA * DELTA * (t - 4.0 / 29.0)
    }
}

#[inline(always)]
fn srgb_gamma(c: f64) -> f64 {
    if c <= 0.0031308 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

/// CIELab (`L ∈ [0, 100]`) to gamma-encoded sRGB in `[0, 1]`.
pub fn lab_to_srgb(l: f64, a: f64, b: f64) -> [f64; 3] {
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let x = XN * lab_f_inv(fx);
    let y = lab_f_inv(fy);
    let z = ZN * lab_f_inv(fz);

    // XYZ → linear sRGB
    let r = 3.2404542 * x - 1.5371385 * y - 0.4985314 * z;
    let g = -0.9692660 * x + 1.8760108 * y + 0.0415560 * z;
    let bl = 0.0556434 * x - 0.2040259 * y + 1.0572252 * z;

    [
        srgb_gamma(r.clamp(0.0, 1.0)).clamp(0.0, 1.0),
        srgb_gamma(g.clamp(0.0, 1.0)).clamp(0.0, 1.0),
        srgb_gamma(bl.clamp(0.0, 1.0)).clamp(0.0, 1.0),
    ]
}

/// One 8-bit Lab pixel to one 8-bit sRGB pixel.
pub fn lab8_to_rgb8(lab: [u8; 3]) -> [u8; 3] {
    let l = lab[0] as f64 * 100.0 / 255.0;
    let a = lab[1] as f64 - 128.0;
    let b = lab[2] as f64 - 128.0;
    let rgb = lab_to_srgb(l, a, b);
    [
        (rgb[0] * 255.0).round() as u8,
        (rgb[1] * 255.0).round() as u8,
        (rgb[2] * 255.0).round() as u8,
    ]
}
