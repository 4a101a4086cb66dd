use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A region of interest in frame pixel coordinates.
///
/// No geometric validation happens here: rectangles may extend past the
/// frame or have zero area. The detector intersects each hotspot with the
/// frame bounds before reading pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotSpot {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl HotSpot {
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// Exclusive right edge. Saturates so a parseable-but-absurd rectangle
    /// never overflows; the detector sees an empty intersection instead.
    pub fn right(&self) -> i32 {
        self.left.saturating_add(self.width)
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i32 {
        self.top.saturating_add(self.height)
    }

    /// One line of the persisted hotspot file: `left,top,width,height`.
    pub fn to_line(&self) -> String {
        format!("{},{},{},{}", self.left, self.top, self.width, self.height)
    }
}

impl fmt::Display for HotSpot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{},{},{})",
            self.left, self.top, self.width, self.height
        )
    }
}

impl FromStr for HotSpot {
    type Err = HotSpotParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() != 4 {
            return Err(HotSpotParseError::FieldCount(fields.len()));
        }
        let parse = |field: &'static str, raw: &str| {
            raw.trim()
                .parse::<i32>()
                .map_err(|source| HotSpotParseError::BadInt { field, source })
        };
        Ok(Self {
            left: parse("left", fields[0])?,
            top: parse("top", fields[1])?,
            width: parse("width", fields[2])?,
            height: parse("height", fields[3])?,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HotSpotParseError {
    #[error("expected 4 comma-separated fields, got {0}")]
    FieldCount(usize),
    #[error("invalid {field} value: {source}")]
    BadInt {
        field: &'static str,
        source: std::num::ParseIntError,
    },
}

/// Insertion-ordered set of hotspots. Order matters: the detector scans in
/// file/add order and stops at the first triggering region.
#[derive(Debug, Default, Clone)]
pub struct HotSpotSet {
    spots: Vec<HotSpot>,
}

impl HotSpotSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, spot: HotSpot) {
        self.spots.push(spot);
    }

    /// Remove the hotspot at `index`, preserving the order of the rest.
    pub fn remove_at(&mut self, index: usize) -> Option<HotSpot> {
        if index < self.spots.len() {
            Some(self.spots.remove(index))
        } else {
            None
        }
    }

    pub fn list(&self) -> &[HotSpot] {
        &self.spots
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    /// Load a hotspot file, one `left,top,width,height` line per region.
    /// Malformed lines are reported and skipped, never fatal.
    pub fn load(path: &Path) -> Result<Self, HotSpotFileError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HotSpotFileError::Read(path.display().to_string(), e))?;

        let mut set = Self::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.parse::<HotSpot>() {
                Ok(spot) => set.add(spot),
                Err(e) => {
                    warn!(
                        line = lineno + 1,
                        content = line,
                        error = %e,
                        "skipping malformed hotspot line"
                    );
                }
            }
        }
        debug!(count = set.len(), path = path.display().to_string(), "hotspots loaded");
        Ok(set)
    }

    /// Write the set back out in the same line format, preserving order.
    pub fn save(&self, path: &Path) -> Result<(), HotSpotFileError> {
        let mut content = String::new();
        for spot in &self.spots {
            content.push_str(&spot.to_line());
            content.push('\n');
        }
        std::fs::write(path, content)
            .map_err(|e| HotSpotFileError::Write(path.display().to_string(), e))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HotSpotFileError {
    #[error("failed to read hotspot file {0}: {1}")]
    Read(String, std::io::Error),
    #[error("failed to write hotspot file {0}: {1}")]
    Write(String, std::io::Error),
}
