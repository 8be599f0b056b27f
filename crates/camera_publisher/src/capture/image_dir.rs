use super::{CaptureBackend, CaptureError, CaptureSettings, FramePacer, RawFrame};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};

/// Replays the images of a directory as a camera, looping forever.
///
/// Useful to exercise subscribers without camera hardware. Images are
/// resized to the requested geometry when needed.
pub struct ImageDirectory {
    files: Vec<PathBuf>,
    cursor: usize,
    settings: CaptureSettings,
    pacer: FramePacer,
}

impl ImageDirectory {
    pub(crate) fn open(
        path: &Path,
        settings: CaptureSettings,
        pacer: FramePacer,
    ) -> Result<Self, CaptureError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let path = entry?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(CaptureError::OpenFailed {
                descriptor: path.display().to_string(),
                reason: "directory contains no files".to_string(),
            });
        }

        log::debug!("Replaying {} images from {}", files.len(), path.display());
        Ok(Self {
            files,
            cursor: 0,
            settings,
            pacer,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl CaptureBackend for ImageDirectory {
    fn read(&mut self) -> Result<RawFrame, CaptureError> {
        let path = &self.files[self.cursor];
        self.cursor = (self.cursor + 1) % self.files.len();
        self.pacer.wait();

        let CaptureSettings { width, height } = self.settings;
        let mut image = image::open(path)?;
        if image.width() != width || image.height() != height {
            image = image.resize_exact(width, height, FilterType::Triangle);
        }

        Ok(RawFrame {
            data: image.to_rgb8().into_raw(),
            width,
            height,
        })
    }
}
