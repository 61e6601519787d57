use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::palette;
use crate::BoundingBox;

/// Height of the filled name bar along the bottom edge of a face box.
pub const LABEL_HEIGHT: u32 = 20;
pub const LABEL_TEXT_SCALE: f32 = 16.0;
const BOX_THICKNESS: u32 = 2;

const SYSTEM_FONTS: [&str; 4] = [
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

/// One identified face, ready to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub bbox: BoundingBox,
    pub label: String,
    pub color: Rgb<u8>,
    /// Face distance to the matched (or nearest) known face
    pub distance: Option<f32>,
}

/// Load the label font: the configured file if given, otherwise the first
/// common system font found. Returns `None` (and warns) when nothing loads;
/// labels are then drawn without text.
pub fn load_font(configured: Option<&Path>) -> Option<FontArc> {
    let candidates: Vec<PathBuf> = match configured {
        Some(path) => vec![path.to_path_buf()],
        None => SYSTEM_FONTS.iter().map(PathBuf::from).collect(),
    };

    for path in &candidates {
        let Ok(bytes) = std::fs::read(path) else {
            continue;
        };
        match FontArc::try_from_vec(bytes) {
            Ok(font) => {
                log::debug!("using label font {}", path.display());
                return Some(font);
            }
            Err(e) => log::warn!("cannot parse font {}: {}", path.display(), e),
        }
    }
    log::warn!("no usable font found, face labels will be drawn without names");
    None
}

/// Draw every recognition onto `frame`: an outline around the face and a
/// filled name bar across its bottom edge.
pub fn draw(frame: &mut RgbImage, recognitions: &[Recognition], font: Option<&FontArc>) {
    let (width, height) = frame.dimensions();
    for rec in recognitions {
        let bbox = clamp_box(rec.bbox, width, height);
        if bbox.is_empty() {
            continue;
        }

        for inset in 0..BOX_THICKNESS {
            let w = bbox.width().saturating_sub(2 * inset);
            let h = bbox.height().saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let rect =
                Rect::at((bbox.left + inset) as i32, (bbox.top + inset) as i32).of_size(w, h);
            draw_hollow_rect_mut(frame, rect, rec.color);
        }

        let bar_top = bbox.bottom.saturating_sub(LABEL_HEIGHT).max(bbox.top);
        let bar = Rect::at(bbox.left as i32, bar_top as i32)
            .of_size(bbox.width(), bbox.bottom - bar_top);
        draw_filled_rect_mut(frame, bar, rec.color);

        if let Some(font) = font {
            draw_text_mut(
                frame,
                palette::LABEL_TEXT,
                bbox.left as i32 + 5,
                bar_top as i32 + 2,
                PxScale::from(LABEL_TEXT_SCALE),
                font,
                &rec.label,
            );
        }
    }
}

fn clamp_box(b: BoundingBox, width: u32, height: u32) -> BoundingBox {
    BoundingBox {
        top: b.top.min(height),
        right: b.right.min(width),
        bottom: b.bottom.min(height),
        left: b.left.min(width),
    }
}
