use super::FrameSource;
use crate::common::Frame;
use crate::config::CameraConfig;
use crate::error::AppError;
use async_trait::async_trait;
use image::{imageops, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const FLOOR: Rgb<u8> = Rgb([52, 48, 44]);
const TAPE: Rgb<u8> = Rgb([0, 200, 210]);

/// Renders a synthetic two-edge lane seen through the upside-down camera:
/// the lane drifts sideways, a crossing appears periodically and the floor
/// carries sensor noise.
pub struct SimulatedTrack {
    width: u32,
    height: u32,
    upside_down: bool,
    frame_index: u64,
    crossing_every: u64,
    crossing_frames: u64,
    noise_pixels: u32,
    rng: StdRng,
}

impl SimulatedTrack {
    pub fn new(camera: &CameraConfig, seed: u64) -> Self {
        Self {
            width: camera.width,
            height: camera.height,
            upside_down: camera.rotate_180,
            frame_index: 0,
            crossing_every: 600,
            crossing_frames: 25,
            noise_pixels: 200,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    // Sets how many frames pass between crossings (0 disables them).
    pub fn crossing_every(mut self, frames: u64) -> Self {
        self.crossing_every = frames;
        self
    }

    fn at_crossing(&self) -> bool {
        self.crossing_every > 0
            && self.frame_index % self.crossing_every >= self.crossing_every - self.crossing_frames.min(self.crossing_every)
    }

    fn render(&mut self) -> RgbImage {
        let (w, h) = (self.width, self.height);
        let mut image = RgbImage::from_pixel(w, h, FLOOR);
        let tape = (w / 16).max(2);

        if self.at_crossing() {
            // Side tape ends; a crossing strip spans the view ahead.
            fill(&mut image, w / 8, h * 3 / 10, w * 3 / 4, h / 8);
        } else {
            let drift = (self.frame_index as f32 / 90.0).sin() * w as f32 * 0.06;
            let left_edge = (w as f32 * 0.12 + drift).max(0.0) as u32;
            let right_edge = (w as f32 * 0.88 - tape as f32 + drift).max(0.0) as u32;
            fill(&mut image, left_edge, h / 2, tape, h / 2);
            fill(&mut image, right_edge, h / 2, tape, h / 2);
        }

        for _ in 0..self.noise_pixels {
            let x = self.rng.random_range(0..w);
            let y = self.rng.random_range(0..h);
            image.put_pixel(x, y, TAPE);
        }

        if self.upside_down {
            imageops::rotate180(&image)
        } else {
            image
        }
    }
}

fn fill(image: &mut RgbImage, x: u32, y: u32, width: u32, height: u32) {
    let x_end = (x + width).min(image.width());
    let y_end = (y + height).min(image.height());
    for py in y..y_end {
        for px in x..x_end {
            image.put_pixel(px, py, TAPE);
        }
    }
}

#[async_trait]
impl FrameSource for SimulatedTrack {
    async fn read(&mut self) -> Result<Frame, AppError> {
        let image = self.render();
        self.frame_index += 1;
        Ok(Frame::new(image))
    }

    fn name(&self) -> &'static str {
        "simulated-track"
    }
}
