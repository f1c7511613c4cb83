use super::error::CarpetError;
use std::time::Duration;

/// 相机帧（RGBA 格式）
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>, // RGBA 格式
    pub timestamp: Duration,
    pub frame_number: u64,
}

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        data: Vec<u8>,
        timestamp_ms: u64,
        frame_number: u64,
    ) -> Self {
        Self {
            width,
            height,
            data,
            timestamp: Duration::from_millis(timestamp_ms),
            frame_number,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// 检查尺寸与缓冲区长度是否一致
    pub fn validate(&self) -> Result<(), CarpetError> {
        if self.width == 0 || self.height == 0 {
            return Err(CarpetError::InvalidFrame(format!(
                "zero-sized frame {}x{}",
                self.width, self.height
            )));
        }

        let expected = self.pixel_count() * 4;
        if self.data.len() != expected {
            return Err(CarpetError::InvalidFrame(format!(
                "buffer length {} does not match {}x{} RGBA ({} bytes)",
                self.data.len(),
                self.width,
                self.height,
                expected
            )));
        }

        Ok(())
    }

    /// 取 (x, y) 处的 RGB，越界返回 None
    pub fn rgb_at(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.data
            .get(idx..idx + 3)
            .map(|px| [px[0], px[1], px[2]])
    }

    /// 灰度图（luma = 0.299R + 0.587G + 0.114B）
    pub fn to_luma(&self) -> Vec<u8> {
        self.data
            .chunks_exact(4)
            .map(|rgba| luma_u8(rgba[0], rgba[1], rgba[2]))
            .collect()
    }

    pub fn resize_to(&self, target_width: u32, target_height: u32) -> Result<Frame, CarpetError> {
        if target_width == 0 || target_height == 0 {
            return Err(CarpetError::InvalidFrame(format!(
                "invalid resize target {}x{}",
                target_width, target_height
            )));
        }

        if self.width == target_width && self.height == target_height {
            return Ok(self.clone());
        }

        let img = image::RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| {
                CarpetError::ImageBuffer(format!(
                    "cannot wrap {} bytes as {}x{} RGBA",
                    self.data.len(),
                    self.width,
                    self.height
                ))
            })?;
        let resized = image::imageops::resize(
            &img,
            target_width,
            target_height,
            image::imageops::FilterType::Triangle,
        );

        Ok(Frame {
            width: target_width,
            height: target_height,
            data: resized.into_raw(),
            timestamp: self.timestamp,
            frame_number: self.frame_number,
        })
    }
}

#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> f32 {
    0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32
}

#[inline]
pub fn luma_u8(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}

/// 从原生层传递的原始帧数据（I420）
#[derive(Debug)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub y_plane: Vec<u8>,
    pub u_plane: Vec<u8>,
    pub v_plane: Vec<u8>,
    pub timestamp_ms: u64,
    pub frame_number: u64,
}

impl RawFrame {
    pub fn to_rgba(&self) -> Result<Frame, CarpetError> {
        let w = self.width as usize;
        let h = self.height as usize;
        if w == 0 || h == 0 {
            return Err(CarpetError::InvalidFrame(format!(
                "zero-sized raw frame {}x{}",
                self.width, self.height
            )));
        }

        let chroma_w = w.div_ceil(2);
        let chroma_len = chroma_w * h.div_ceil(2);
        if self.y_plane.len() < w * h
            || self.u_plane.len() < chroma_len
            || self.v_plane.len() < chroma_len
        {
            return Err(CarpetError::InvalidFrame(format!(
                "plane sizes y={} u={} v={} too small for {}x{}",
                self.y_plane.len(),
                self.u_plane.len(),
                self.v_plane.len(),
                self.width,
                self.height
            )));
        }

        let mut rgba_data = vec![0u8; w * h * 4];

        for y in 0..h {
            for x in 0..w {
                let y_idx = y * w + x;
                let uv_idx = (y / 2) * chroma_w + x / 2;

                let y_val = self.y_plane[y_idx] as f32;
                let u_val = self.u_plane[uv_idx] as f32 - 128.0;
                let v_val = self.v_plane[uv_idx] as f32 - 128.0;

                let r = (y_val + 1.402 * v_val).clamp(0.0, 255.0) as u8;
                let g = (y_val - 0.344136 * u_val - 0.714136 * v_val).clamp(0.0, 255.0) as u8;
                let b = (y_val + 1.772 * u_val).clamp(0.0, 255.0) as u8;

                let rgba_idx = y_idx * 4;
                rgba_data[rgba_idx] = r;
                rgba_data[rgba_idx + 1] = g;
                rgba_data[rgba_idx + 2] = b;
                rgba_data[rgba_idx + 3] = 255;
            }
        }

        Ok(Frame::new(
            self.width,
            self.height,
            rgba_data,
            self.timestamp_ms,
            self.frame_number,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_creation() {
        let data = vec![255u8; 100 * 100 * 4];
        let frame = Frame::new(100, 100, data, 1000, 30);

        assert_eq!(frame.pixel_count(), 10000);
        assert_eq!(frame.timestamp.as_millis(), 1000);
        assert_eq!(frame.frame_number, 30);
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_frame_validate_rejects_bad_buffers() {
        assert!(Frame::new(0, 10, vec![], 0, 0).validate().is_err());
        assert!(Frame::new(10, 10, vec![0u8; 399], 0, 0).validate().is_err());
    }

    #[test]
    fn test_frame_resize() {
        let frame = Frame::new(100, 100, vec![255u8; 100 * 100 * 4], 0, 0);
        let resized = frame.resize_to(32, 32).unwrap();

        assert_eq!(resized.width, 32);
        assert_eq!(resized.height, 32);
        assert_eq!(resized.data.len(), 32 * 32 * 4);
    }

    #[test]
    fn test_resize_same_size_is_identity() {
        let data: Vec<u8> = (0..16 * 16 * 4).map(|i| (i % 251) as u8).collect();
        let frame = Frame::new(16, 16, data.clone(), 0, 0);
        let resized = frame.resize_to(16, 16).unwrap();
        assert_eq!(resized.data, data);
    }

    #[test]
    fn test_resize_rejects_mismatched_buffer() {
        let frame = Frame::new(10, 10, vec![0u8; 12], 0, 0);
        assert!(matches!(
            frame.resize_to(5, 5),
            Err(CarpetError::ImageBuffer(_))
        ));
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma_u8(255, 255, 255), 255);
        assert_eq!(luma_u8(0, 0, 0), 0);
        assert!((luma(255, 0, 0) - 76.245).abs() < 0.01);
    }

    #[test]
    fn test_yuv_to_rgba() {
        let width = 64;
        let height = 64;
        let raw_frame = RawFrame {
            width,
            height,
            y_plane: vec![128u8; (width * height) as usize],
            u_plane: vec![128u8; (width * height / 4) as usize],
            v_plane: vec![128u8; (width * height / 4) as usize],
            timestamp_ms: 0,
            frame_number: 0,
        };

        let frame = raw_frame.to_rgba().unwrap();
        assert_eq!(frame.data.len(), (width * height * 4) as usize);
        assert_eq!(frame.rgb_at(10, 10), Some([128, 128, 128]));
    }

    #[test]
    fn test_yuv_short_planes_rejected() {
        let raw_frame = RawFrame {
            width: 8,
            height: 8,
            y_plane: vec![0u8; 64],
            u_plane: vec![0u8; 4],
            v_plane: vec![0u8; 16],
            timestamp_ms: 0,
            frame_number: 0,
        };
        assert!(raw_frame.to_rgba().is_err());
    }
}
