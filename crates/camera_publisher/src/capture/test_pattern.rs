use super::{CaptureBackend, CaptureError, CaptureSettings, FramePacer, RawFrame, BYTES_PER_PIXEL};

/// Width of one colour bar in pixels
const BAR_WIDTH: u32 = 32;

const COLOURS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

/// Synthetic source: colour bars scrolling one pixel per frame
pub struct TestPattern {
    settings: CaptureSettings,
    pacer: FramePacer,
    frame: u32,
}

impl TestPattern {
    pub(crate) fn new(settings: CaptureSettings, pacer: FramePacer) -> Self {
        Self {
            settings,
            pacer,
            frame: 0,
        }
    }

    fn render(&self) -> Vec<u8> {
        let CaptureSettings { width, height } = self.settings;
        let mut row = Vec::with_capacity(width as usize * BYTES_PER_PIXEL);
        for x in 0..width {
            let bar = ((x + self.frame) / BAR_WIDTH) as usize % COLOURS.len();
            row.extend_from_slice(&COLOURS[bar]);
        }
        row.repeat(height as usize)
    }
}

impl CaptureBackend for TestPattern {
    fn read(&mut self) -> Result<RawFrame, CaptureError> {
        if self.settings.width == 0 || self.settings.height == 0 {
            return Err(CaptureError::ReadFailed("empty frame size".to_string()));
        }
        self.pacer.wait();
        let data = self.render();
        self.frame = self.frame.wrapping_add(1);
        Ok(RawFrame {
            data,
            width: self.settings.width,
            height: self.settings.height,
        })
    }
}
