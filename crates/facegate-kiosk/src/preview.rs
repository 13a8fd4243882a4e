//! Live preview tick: read a frame, detect faces, draw the overlay, show it.

use crate::session::SessionContext;
use facegate_core::FaceRegion;
use facegate_hw::{Frame, FrameSource};
use image::ImageFormat;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Overlay rectangle color (RGB) and line width.
pub const OVERLAY_COLOR: [u8; 3] = [0, 0, 255];
pub const OVERLAY_THICKNESS: u32 = 2;

/// Receives each overlaid preview frame.
pub trait PreviewSink {
    fn show(&mut self, frame: &Frame, regions: &[FaceRegion]);
}

/// Sink that only logs. Used when no display target is configured.
pub struct TracingSink;

impl PreviewSink for TracingSink {
    fn show(&mut self, frame: &Frame, regions: &[FaceRegion]) {
        tracing::trace!(seq = frame.sequence, faces = regions.len(), "preview frame");
    }
}

/// Replaces a JPEG file with the latest preview frame.
pub struct JpegSnapshotSink {
    path: PathBuf,
}

impl JpegSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write(&self, frame: &Frame) -> anyhow::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let image = frame.to_rgb_image()?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            image.write_to(&mut writer, ImageFormat::Jpeg)?;
            writer.flush()?;
        }
        tmp.persist(&self.path)?;
        Ok(())
    }
}

impl PreviewSink for JpegSnapshotSink {
    fn show(&mut self, frame: &Frame, _regions: &[FaceRegion]) {
        if let Err(err) = self.write(frame) {
            tracing::debug!(path = %self.path.display(), error = %err, "preview snapshot failed");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No frame this cycle; the next tick retries.
    Skipped,
    Rendered { faces: usize },
}

pub fn draw_overlay(frame: &mut Frame, regions: &[FaceRegion]) {
    for r in regions {
        frame.draw_rect(r.x, r.y, r.width, r.height, OVERLAY_COLOR, OVERLAY_THICKNESS);
    }
}

/// One preview cycle. Device and detector failures never escape the tick.
pub fn tick<S: FrameSource>(ctx: &mut SessionContext<S>, sink: &mut dyn PreviewSink) -> TickOutcome {
    let frame = match ctx.read_frame() {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!(error = %err, "frame unavailable; skipping cycle");
            return TickOutcome::Skipped;
        }
    };

    let gray = frame.to_grayscale();
    let regions = match ctx.detector.detect(&gray, frame.width, frame.height) {
        Ok(regions) => regions,
        Err(err) => {
            tracing::warn!(error = %err, "face detection failed; drawing no overlay");
            Vec::new()
        }
    };

    let mut display = frame.clone();
    draw_overlay(&mut display, &regions);
    ctx.captures.record(frame);
    sink.show(&display, &regions);

    TickOutcome::Rendered {
        faces: regions.len(),
    }
}
