use image::RgbImage;

/// A single decoded camera frame: packed 24-bit RGB, top-down row order.
///
/// Buffer layout:
///   row y starts at byte `y * stride` and carries `width * 3` payload bytes
///   (R, G, B per pixel); any remaining `stride - width * 3` bytes are row
///   padding and are never read.
///
/// A `Frame` is owned by exactly one container at a time; `Clone` is the
/// explicit copy and `Drop` is the single release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    stride: usize,
    data: Vec<u8>,
}

impl Frame {
    /// Build a frame from a raw buffer, validating the layout invariants.
    pub fn from_raw(
        width: u32,
        height: u32,
        stride: usize,
        data: Vec<u8>,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimension { width, height });
        }
        let min_stride = width as usize * 3;
        if stride < min_stride {
            return Err(FrameError::StrideTooSmall {
                stride,
                width,
                min: min_stride,
            });
        }
        let expected = stride * height as usize;
        if data.len() != expected {
            return Err(FrameError::BufferSize {
                got: data.len(),
                expected,
                width,
                height,
                stride,
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    /// Build a frame from a tightly packed buffer (stride = width * 3).
    pub fn packed(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
        Self::from_raw(width, height, width as usize * 3, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Payload bytes of row `y` (exactly `width * 3` bytes, padding excluded).
    ///
    /// `y` must be less than `height`.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * 3]
    }

    /// Reverse the row order in place. Sources that deliver bottom-up rows
    /// are corrected once at acquisition so every consumer sees top-down.
    pub fn flip_vertical(&mut self) {
        let stride = self.stride;
        let height = self.height as usize;
        for y in 0..height / 2 {
            let (upper, lower) = self.data.split_at_mut((height - 1 - y) * stride);
            upper[y * stride..(y + 1) * stride].swap_with_slice(&mut lower[..stride]);
        }
    }

    /// Copy into a tightly packed `RgbImage` for PNG encoding.
    pub fn to_rgb_image(&self) -> RgbImage {
        let mut packed = Vec::with_capacity(self.width as usize * 3 * self.height as usize);
        for y in 0..self.height {
            packed.extend_from_slice(self.row(y));
        }
        RgbImage::from_raw(self.width, self.height, packed)
            .expect("packed buffer matches dimensions")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer is {got} bytes, expected {expected} for {width}x{height} stride {stride}")]
    BufferSize {
        got: usize,
        expected: usize,
        width: u32,
        height: u32,
        stride: usize,
    },
    #[error("stride {stride} too small for width {width}: need at least {min} bytes")]
    StrideTooSmall { stride: usize, width: u32, min: usize },
    #[error("frame dimensions must be nonzero, got {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },
}
