use crate::config::ColorRange;
use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};

/// Axis-aligned sampling rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clips the rectangle to an image of the given size.
    pub fn clamp_to(&self, max_w: u32, max_h: u32) -> Rect {
        let x = self.x.min(max_w);
        let y = self.y.min(max_h);
        let x2 = (self.x + self.width).min(max_w);
        let y2 = (self.y + self.height).min(max_h);
        Rect::new(x, y, x2 - x, y2 - y)
    }

    pub fn area(&self) -> u32 {
        self.width * self.height
    }
}

/// Converts an RGB pixel to HSV with hue in 0..180 and saturation/value in 0..255.
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;

    let s = if max == 0.0 { 0.0 } else { 255.0 * delta / max };
    let mut h = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (gf - bf) / delta
    } else if max == gf {
        120.0 + 60.0 * (bf - rf) / delta
    } else {
        240.0 + 60.0 * (rf - gf) / delta
    };
    if h < 0.0 {
        h += 360.0;
    }

    [
        (h / 2.0).round().min(179.0) as u8,
        s.round().min(255.0) as u8,
        max as u8,
    ]
}

pub fn in_range(hsv: [u8; 3], range: &ColorRange) -> bool {
    hsv.iter()
        .zip(range.lower.iter().zip(range.upper.iter()))
        .all(|(v, (lo, hi))| v >= lo && v <= hi)
}

/// Builds a binary mask of the pixels inside `rect` that fall within the
/// color range, with erosion followed by dilation to suppress speckle.
pub fn color_mask(image: &RgbImage, rect: Rect, range: &ColorRange) -> GrayImage {
    let rect = rect.clamp_to(image.width(), image.height());
    let mask = GrayImage::from_fn(rect.width, rect.height, |x, y| {
        let p = image.get_pixel(rect.x + x, rect.y + y);
        if in_range(rgb_to_hsv(p[0], p[1], p[2]), range) {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    let mask = if range.erode_radius > 0 {
        erode(&mask, Norm::LInf, range.erode_radius)
    } else {
        mask
    };
    if range.dilate_radius > 0 {
        dilate(&mask, Norm::LInf, range.dilate_radius)
    } else {
        mask
    }
}

pub fn count_nonzero(mask: &GrayImage) -> u32 {
    mask.pixels().filter(|p| p[0] > 0).count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn cyan_falls_inside_default_range() {
        let range = ColorRange::default();
        assert!(in_range(rgb_to_hsv(0, 200, 200), &range));
        assert!(!in_range(rgb_to_hsv(200, 30, 30), &range));
        assert!(!in_range(rgb_to_hsv(0, 0, 0), &range));
    }

    #[test]
    fn primary_hues_follow_half_degree_convention() {
        assert_eq!(rgb_to_hsv(255, 0, 0)[0], 0);
        assert_eq!(rgb_to_hsv(0, 255, 0)[0], 60);
        assert_eq!(rgb_to_hsv(0, 0, 255)[0], 120);
        assert_eq!(rgb_to_hsv(0, 255, 255), [90, 255, 255]);
    }

    #[test]
    fn isolated_speckle_is_removed_by_erosion() {
        let mut image = RgbImage::from_pixel(40, 40, Rgb([0, 0, 0]));
        image.put_pixel(5, 5, Rgb([0, 220, 220]));
        for y in 20..36 {
            for x in 20..36 {
                image.put_pixel(x, y, Rgb([0, 220, 220]));
            }
        }
        let range = ColorRange {
            erode_radius: 1,
            dilate_radius: 1,
            ..ColorRange::default()
        };
        let mask = color_mask(&image, Rect::new(0, 0, 40, 40), &range);
        assert_eq!(mask.get_pixel(5, 5)[0], 0);
        assert_eq!(mask.get_pixel(28, 28)[0], 255);
    }

    #[test]
    fn rect_is_clipped_to_image() {
        let rect = Rect::new(30, 30, 50, 50).clamp_to(40, 60);
        assert_eq!(rect, Rect::new(30, 30, 10, 30));
        assert_eq!(Rect::new(50, 0, 10, 10).clamp_to(40, 40).area(), 0);
    }
}
