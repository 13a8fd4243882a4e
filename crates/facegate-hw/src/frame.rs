//! Frame type and pixel conversion: YUYV/GREY/Y16 to RGB, luminance, overlay drawing.

use image::RgbImage;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Build a frame from packed RGB8 data, checking the buffer length.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = (width * height * 3) as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Luminance plane (BT.601 weights), one byte per pixel.
    pub fn to_grayscale(&self) -> Vec<u8> {
        self.data
            .chunks_exact(3)
            .map(|px| luma(px[0], px[1], px[2]))
            .collect()
    }

    /// Copy the frame into an owned `image` buffer.
    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
        let actual = self.data.len();
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected: (self.width * self.height * 3) as usize,
                actual,
            },
        )
    }

    /// Draw a hollow rectangle outline, clipped to the frame.
    pub fn draw_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: [u8; 3], thickness: u32) {
        if self.width == 0 || self.height == 0 || w == 0 || h == 0 {
            return;
        }
        if x >= self.width || y >= self.height {
            return;
        }

        let x0 = x;
        let y0 = y;
        let x1 = x.saturating_add(w - 1).min(self.width - 1);
        let y1 = y.saturating_add(h - 1).min(self.height - 1);

        for t in 0..thickness.max(1) {
            let top = (y0 + t).min(y1);
            let bottom = y1.saturating_sub(t).max(y0);
            for px in x0..=x1 {
                self.put_pixel(px, top, color);
                self.put_pixel(px, bottom, color);
            }

            let left = (x0 + t).min(x1);
            let right = x1.saturating_sub(t).max(x0);
            for py in y0..=y1 {
                self.put_pixel(left, py, color);
                self.put_pixel(right, py, color);
            }
        }
    }

    fn put_pixel(&mut self, x: u32, y: u32, color: [u8; 3]) {
        let idx = ((y * self.width + x) * 3) as usize;
        if let Some(px) = self.data.get_mut(idx..idx + 3) {
            px.copy_from_slice(&color);
        }
    }
}

/// BT.601 luma in integer arithmetic.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// Convert packed YUYV (4:2:2) to RGB8.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale into RGB8 by replicating the channel.
pub fn grey_to_rgb(gray: &[u8]) -> Vec<u8> {
    gray.iter().flat_map(|&g| [g, g, g]).collect()
}

/// Downscale 16-bit little-endian grayscale to 8 bits and expand to RGB8.
pub fn y16_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width * height) as usize;
    let expected = pixels * 2;
    if buf.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: buf.len(),
        });
    }
    let gray: Vec<u8> = buf[..expected]
        .chunks_exact(2)
        .map(|le| (u16::from_le_bytes([le[0], le[1]]) >> 8) as u8)
        .collect();
    Ok(grey_to_rgb(&gray))
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;
    let r = y + 1.402 * v;
    let g = y - 0.344_136 * u - 0.714_136 * v;
    let b = y + 1.772 * u;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        Frame::from_rgb(vec![value; (width * height * 3) as usize], width, height, 0).unwrap()
    }

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // 2x1 image: [Y0=100, U=128, Y1=200, V=128]
        let rgb = yuyv_to_rgb(&[100, 128, 200, 128], 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let result = yuyv_to_rgb(&[100, 128], 2, 1);
        assert!(result.is_err());
    }

    #[test]
    fn test_y16_downscales_high_byte() {
        // 0x1234 little-endian → high byte 0x12
        let rgb = y16_to_rgb(&[0x34, 0x12], 1, 1).unwrap();
        assert_eq!(rgb, vec![0x12, 0x12, 0x12]);
    }

    #[test]
    fn test_grayscale_of_gray_frame_is_identity() {
        let frame = solid(4, 2, 128);
        let gray = frame.to_grayscale();
        assert_eq!(gray.len(), 8);
        assert!(gray.iter().all(|&g| g == 128));
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(255, 255, 255), 255);
        assert_eq!(luma(0, 0, 0), 0);
        // Green dominates perceived brightness
        assert!(luma(0, 255, 0) > luma(255, 0, 0));
        assert!(luma(255, 0, 0) > luma(0, 0, 255));
    }

    #[test]
    fn test_from_rgb_rejects_short_buffer() {
        assert!(Frame::from_rgb(vec![0; 5], 2, 1, 0).is_err());
    }

    #[test]
    fn test_draw_rect_outline_only() {
        let mut frame = solid(10, 10, 0);
        frame.draw_rect(2, 2, 5, 5, [0, 0, 255], 1);

        let at = |f: &Frame, x: u32, y: u32| {
            let i = ((y * f.width + x) * 3) as usize;
            [f.data[i], f.data[i + 1], f.data[i + 2]]
        };
        assert_eq!(at(&frame, 2, 2), [0, 0, 255]);
        assert_eq!(at(&frame, 6, 6), [0, 0, 255]);
        assert_eq!(at(&frame, 4, 2), [0, 0, 255]);
        // Interior untouched
        assert_eq!(at(&frame, 4, 4), [0, 0, 0]);
        // Outside untouched
        assert_eq!(at(&frame, 7, 7), [0, 0, 0]);
    }

    #[test]
    fn test_draw_rect_clips_to_frame() {
        let mut frame = solid(4, 4, 0);
        frame.draw_rect(2, 2, 100, 100, [255, 0, 0], 2);
        assert_eq!(frame.data.len(), 4 * 4 * 3);
        let last = frame.data.len() - 3;
        assert_eq!(&frame.data[last..], &[255, 0, 0]);
    }

    #[test]
    fn test_draw_rect_outside_frame_is_noop() {
        let mut frame = solid(4, 4, 7);
        frame.draw_rect(10, 10, 3, 3, [255, 0, 0], 1);
        assert!(frame.data.iter().all(|&b| b == 7));
    }

    #[test]
    fn test_to_rgb_image_dimensions() {
        let frame = solid(3, 2, 9);
        let img = frame.to_rgb_image().unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(2, 1).0, [9, 9, 9]);
    }
}
