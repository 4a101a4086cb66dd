use crate::frame::Frame;
use crate::hotspot::HotSpot;

/// A hotspot that fired: its position in the scan order and the measured
/// mean luminance delta.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionHit {
    pub index: usize,
    pub mean_delta: f32,
}

/// Scan hotspots in order against the previous frame and return the first
/// one whose mean absolute luminance delta strictly exceeds `threshold`.
///
/// No previous frame or no hotspots means no trigger. Later hotspots are
/// not evaluated once one fires, so the scan order decides which region
/// gets reported.
pub fn scan(
    current: &Frame,
    previous: Option<&Frame>,
    hotspots: &[HotSpot],
    threshold: u8,
) -> Option<RegionHit> {
    let previous = previous?;
    let threshold = threshold as f32;
    for (index, spot) in hotspots.iter().enumerate() {
        if let Some(mean_delta) = region_mean_delta(current, previous, spot) {
            if mean_delta > threshold {
                return Some(RegionHit { index, mean_delta });
            }
        }
    }
    None
}

/// Boolean form of [`scan`].
pub fn detect(
    current: &Frame,
    previous: Option<&Frame>,
    hotspots: &[HotSpot],
    threshold: u8,
) -> bool {
    scan(current, previous, hotspots, threshold).is_some()
}

/// Mean absolute luminance difference over `region` intersected with both
/// frames' bounds. `None` when the intersection is empty (off-frame or
/// zero-area rectangles contribute nothing).
pub fn region_mean_delta(current: &Frame, previous: &Frame, region: &HotSpot) -> Option<f32> {
    let width = current.width().min(previous.width()) as i32;
    let height = current.height().min(previous.height()) as i32;

    let x0 = region.left.max(0);
    let y0 = region.top.max(0);
    let x1 = region.right().min(width);
    let y1 = region.bottom().min(height);
    if x0 >= x1 || y0 >= y1 {
        return None;
    }

    let byte_start = x0 as usize * 3;
    let byte_end = x1 as usize * 3;
    let mut sum = 0.0f32;
    for y in y0..y1 {
        let cur = &current.row(y as u32)[byte_start..byte_end];
        let prev = &previous.row(y as u32)[byte_start..byte_end];
        for (c, p) in cur.chunks_exact(3).zip(prev.chunks_exact(3)) {
            sum += (luma(c) - luma(p)).abs();
        }
    }

    let pixels = ((x1 - x0) * (y1 - y0)) as f32;
    Some(sum / pixels)
}

/// Rec. 601 luminance of one packed RGB pixel.
fn luma(px: &[u8]) -> f32 {
    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
}
