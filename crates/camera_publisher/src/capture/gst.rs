use super::{CaptureBackend, CaptureError, CaptureSettings, RawFrame, BYTES_PER_PIXEL};
use gstreamer::prelude::*;

/// How long a single read waits for the next sample
const PULL_TIMEOUT_MS: u64 = 500;

/// Captures RGB frames from a GStreamer pipeline ending in `appsink name=sink`
pub struct GstCapture {
    pipeline: gstreamer::Pipeline,
    sink: gstreamer_app::AppSink,
    released: bool,
}

impl GstCapture {
    /// Open `/dev/video<index>` through v4l2src
    pub fn open_device(index: u32, settings: &CaptureSettings) -> Result<Self, CaptureError> {
        let description = format!("v4l2src device=/dev/video{index} ! {}", rgb_tail(settings));
        Self::launch(&description, &format!("/dev/video{index}"))
    }

    /// Open a user-provided pipeline.
    ///
    /// If the description has no appsink, a conversion to RGB at the requested
    /// size is appended. Otherwise the pipeline must name its sink `sink` and
    /// produce RGB itself.
    pub fn open_pipeline(description: &str, settings: &CaptureSettings) -> Result<Self, CaptureError> {
        let description = if description.contains("appsink") {
            description.to_string()
        } else {
            format!("{description} ! {}", rgb_tail(settings))
        };
        Self::launch(&description, "pipeline")
    }

    fn launch(description: &str, label: &str) -> Result<Self, CaptureError> {
        let open_failed = |reason: String| CaptureError::OpenFailed {
            descriptor: label.to_string(),
            reason,
        };

        if !gstreamer::INITIALIZED.load(std::sync::atomic::Ordering::Relaxed) {
            gstreamer::init().map_err(|e| open_failed(e.to_string()))?;
        }

        log::debug!("Creating pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(description)
            .map_err(|e| open_failed(e.to_string()))?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| open_failed("Failed to downcast pipeline".to_string()))?;

        let sink = pipeline
            .by_name("sink")
            .ok_or_else(|| open_failed("No element named 'sink'".to_string()))?
            .dynamic_cast::<gstreamer_app::AppSink>()
            .map_err(|_| open_failed("'sink' is not an appsink".to_string()))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_failed(e.to_string()))?;

        Ok(Self {
            pipeline,
            sink,
            released: false,
        })
    }
}

fn rgb_tail(settings: &CaptureSettings) -> String {
    format!(
        "videoconvert ! videoscale ! \
         video/x-raw,format=RGB,width={},height={} ! \
         appsink name=sink max-buffers=1 drop=true sync=false",
        settings.width, settings.height
    )
}

impl CaptureBackend for GstCapture {
    fn read(&mut self) -> Result<RawFrame, CaptureError> {
        let sample = self
            .sink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
            .ok_or_else(|| CaptureError::ReadFailed("no sample (timeout or EOS)".to_string()))?;

        let caps = sample
            .caps()
            .ok_or_else(|| CaptureError::ReadFailed("sample without caps".to_string()))?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .map_err(|e| CaptureError::ReadFailed(e.to_string()))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::ReadFailed("sample without buffer".to_string()))?;
        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::ReadFailed("buffer not readable".to_string()))?;

        // Rows may be padded to a 4-byte stride
        let width = info.width();
        let height = info.height();
        let row_bytes = width as usize * BYTES_PER_PIXEL;
        let stride = info.stride()[0] as usize;
        let src = map.as_slice();
        if height == 0 || src.len() < stride * (height as usize - 1) + row_bytes {
            return Err(CaptureError::ReadFailed("short buffer".to_string()));
        }

        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in src.chunks(stride).take(height as usize) {
            data.extend_from_slice(&row[..row_bytes]);
        }

        Ok(RawFrame {
            data,
            width,
            height,
        })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = self.pipeline.send_event(gstreamer::event::Eos::new());
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("Failed to stop pipeline: {}", e);
        }
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        self.release();
    }
}
