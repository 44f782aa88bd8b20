use crate::config::{ColorRange, LineThresholds, RegionLayout};
use crate::pipeline::color::{color_mask, count_nonzero, Rect};
use image::RgbImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Color-matched pixel counts of one control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteeringSignal {
    pub left_pixels: u32,
    pub right_pixels: u32,
    pub center_pixels: u32,
    pub line_visible: bool,
}

impl SteeringSignal {
    pub fn from_counts(left: u32, right: u32, center: u32, visibility_threshold: u32) -> Self {
        Self {
            left_pixels: left,
            right_pixels: right,
            center_pixels: center,
            line_visible: left + right >= visibility_threshold,
        }
    }

    pub fn total(&self) -> u32 {
        self.left_pixels + self.right_pixels
    }

    pub fn ratio_left(&self) -> f32 {
        match self.total() {
            0 => 0.0,
            total => self.left_pixels as f32 / total as f32,
        }
    }

    pub fn ratio_right(&self) -> f32 {
        match self.total() {
            0 => 0.0,
            total => self.right_pixels as f32 / total as f32,
        }
    }

    /// Balance error in [0, 1]; 0 when both sides match.
    pub fn deviation(&self) -> f32 {
        (self.ratio_left() - self.ratio_right()).abs()
    }

    /// Turn intensity proportional to the deviation, clamped to [0, 1].
    pub fn intensity(&self, max_deviation_norm: f32) -> f32 {
        if max_deviation_norm <= 0.0 {
            return 1.0;
        }
        (self.deviation() / max_deviation_norm).clamp(0.0, 1.0)
    }

    pub fn heavier_side(&self) -> Option<Side> {
        if self.left_pixels > self.right_pixels {
            Some(Side::Left)
        } else if self.right_pixels > self.left_pixels {
            Some(Side::Right)
        } else {
            None
        }
    }

    pub fn pixels(&self, side: Side) -> u32 {
        match side {
            Side::Left => self.left_pixels,
            Side::Right => self.right_pixels,
        }
    }

    /// Strong forward band with weak sides: a crossing line ahead.
    pub fn is_intersection(&self, thresholds: &LineThresholds) -> bool {
        self.center_pixels > thresholds.center_threshold
            && self.total() < thresholds.visibility_threshold * 2
    }

    /// Either side saturated, e.g. the camera is pressed against colored floor.
    pub fn is_overloaded(&self, thresholds: &LineThresholds) -> bool {
        self.left_pixels > thresholds.overload_pixels
            || self.right_pixels > thresholds.overload_pixels
    }
}

/// The three sampling rectangles for a frame of a given size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingRegions {
    pub left: Rect,
    pub right: Rect,
    pub center: Rect,
}

impl SamplingRegions {
    pub fn for_frame(width: u32, height: u32, layout: &RegionLayout) -> Self {
        let box_w = (width as f32 * layout.side_width_ratio) as u32;
        let box_h = (height as f32 * layout.side_height_ratio) as u32;
        let center_w = (width as f32 * layout.center_width_ratio) as u32;
        let center_h = (height as f32 * layout.center_height_ratio) as u32;
        let center_x = (width - center_w.min(width)) / 2;
        let center_y = (height as f32 * layout.center_top_ratio) as u32;

        Self {
            left: Rect::new(0, height - box_h.min(height), box_w, box_h),
            right: Rect::new(width - box_w.min(width), height - box_h.min(height), box_w, box_h),
            center: Rect::new(center_x, center_y, center_w, center_h),
        }
    }
}

/// Turns a frame into a [`SteeringSignal`]. Pure: the same frame and
/// configuration always yield the same signal.
#[derive(Debug, Clone)]
pub struct LineSignalExtractor {
    color: ColorRange,
    layout: RegionLayout,
    visibility_threshold: u32,
}

impl LineSignalExtractor {
    pub fn new(color: ColorRange, layout: RegionLayout, visibility_threshold: u32) -> Self {
        Self {
            color,
            layout,
            visibility_threshold,
        }
    }

    pub fn extract(&self, image: &RgbImage) -> SteeringSignal {
        let regions = SamplingRegions::for_frame(image.width(), image.height(), &self.layout);
        let left = count_nonzero(&color_mask(image, regions.left, &self.color));
        let right = count_nonzero(&color_mask(image, regions.right, &self.color));
        let center = count_nonzero(&color_mask(image, regions.center, &self.color));
        SteeringSignal::from_counts(left, right, center, self.visibility_threshold)
    }
}
