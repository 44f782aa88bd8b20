use super::FrameSource;
use crate::common::Frame;
use crate::error::AppError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

const EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

/// Plays back a directory of recorded camera frames in file name order.
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    position: usize,
    looping: bool,
}

impl ImageSequenceSource {
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        if paths.is_empty() {
            return Err(AppError::FrameSource(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        info!("Loaded {} recorded frames from {}", paths.len(), dir.display());
        Ok(Self {
            paths,
            position: 0,
            looping: false,
        })
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

#[async_trait]
impl FrameSource for ImageSequenceSource {
    async fn read(&mut self) -> Result<Frame, AppError> {
        if self.position >= self.paths.len() {
            if !self.looping {
                return Err(AppError::FrameSource("image sequence exhausted".to_string()));
            }
            self.position = 0;
        }
        let path = self.paths[self.position].clone();
        self.position += 1;

        let image = tokio::task::spawn_blocking(move || image::open(&path)).await??;
        Ok(Frame::new(image.to_rgb8()))
    }

    fn name(&self) -> &'static str {
        "image-sequence"
    }
}
