//! Layout thumbnails: a small PNG sketch of where the text of a slide sits.

use std::io::Cursor;

use image::{ImageFormat, Rgb, RgbImage};

use crate::error::StorageError;
use crate::model::{ShapeRecord, SlideGeometry};

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_FILL: Rgb<u8> = Rgb([211, 211, 211]);
const TITLE_FILL: Rgb<u8> = Rgb([169, 169, 169]);
const BORDER: Rgb<u8> = Rgb([105, 105, 105]);

/// Draws the boxes of `shapes` onto a `width`-pixel wide canvas with the
/// slide's aspect ratio and returns the PNG bytes.
pub fn render_thumbnail(
    shapes: &[&ShapeRecord],
    geometry: SlideGeometry,
    width: u32,
) -> Result<Vec<u8>, StorageError> {
    if width == 0 || geometry.width_px <= 0.0 || geometry.height_px <= 0.0 {
        return Err(StorageError::Image(format!(
            "cannot draw {}px thumbnail of a {}x{} slide",
            width, geometry.width_px, geometry.height_px
        )));
    }

    let scale = width as f64 / geometry.width_px;
    let height = ((geometry.height_px * scale).round() as u32).max(1);
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);

    for shape in shapes {
        let fill = if shape.is_title { TITLE_FILL } else { BOX_FILL };
        let x0 = clamp_px(shape.x * scale, width);
        let y0 = clamp_px(shape.y * scale, height);
        let x1 = clamp_px((shape.x + shape.width) * scale, width);
        let y1 = clamp_px((shape.y + shape.height) * scale, height);
        if x1 <= x0 || y1 <= y0 {
            continue;
        }

        for y in y0..y1 {
            for x in x0..x1 {
                let edge = x == x0 || x == x1 - 1 || y == y0 || y == y1 - 1;
                img.put_pixel(x, y, if edge { BORDER } else { fill });
            }
        }
    }

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| StorageError::Image(e.to_string()))?;
    Ok(buf)
}

fn clamp_px(value: f64, limit: u32) -> u32 {
    if value.is_nan() || value <= 0.0 {
        0
    } else {
        (value.round() as u32).min(limit)
    }
}
