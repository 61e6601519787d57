use image::Rgb;

use crate::config::ColorMode;

pub const KNOWN: Rgb<u8> = Rgb([0, 255, 0]);
pub const UNKNOWN: Rgb<u8> = Rgb([255, 0, 0]);
pub const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

/// Color used to draw a known identity.
pub fn identity_color(name: &str, mode: ColorMode) -> Rgb<u8> {
    match mode {
        ColorMode::Fixed => KNOWN,
        ColorMode::PerIdentity => color_for_name(name),
    }
}

/// Bright color derived from `name`; the same name always maps to the same
/// color. Hues close to pure red are avoided so nobody looks unrecognized.
pub fn color_for_name(name: &str) -> Rgb<u8> {
    let hash = fnv1a(name.as_bytes());
    let unit = |bits: u64| (bits & 0xffff) as f32 / 65535.0;

    let hue = 30.0 + 300.0 * unit(hash);
    let saturation = 0.6 + 0.4 * unit(hash >> 16);
    let value = 0.75 + 0.25 * unit(hash >> 32);
    hsv_to_rgb(hue, saturation, value)
}

/// 64-bit FNV-1a; its output is fixed across platforms and releases.
fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, &b| {
        (hash ^ b as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// `hue` in degrees, `saturation` and `value` in [0, 1].
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> Rgb<u8> {
    let h = hue.rem_euclid(360.0) / 60.0;
    let c = value * saturation;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let m = value - c;
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_hues() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb([255, 0, 0]));
        assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Rgb([0, 255, 0]));
        assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), Rgb([0, 0, 255]));
        assert_eq!(hsv_to_rgb(0.0, 0.0, 1.0), Rgb([255, 255, 255]));
    }

    #[test]
    fn name_colors_are_stable() {
        assert_eq!(color_for_name("alice"), color_for_name("alice"));
        assert_ne!(color_for_name("alice"), UNKNOWN);
    }

    #[test]
    fn name_hash_is_fnv1a() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn name_colors_avoid_red() {
        for name in ["alice", "bob", "carol", "dave", "eve"] {
            let Rgb([r, g, b]) = color_for_name(name);
            assert!(!(r > 200 && g < 60 && b < 60), "{} is red-ish", name);
        }
    }

    #[test]
    fn fixed_mode_is_green() {
        assert_eq!(identity_color("bob", ColorMode::Fixed), KNOWN);
    }
}
