//! Display frame types for the mirrored screen

use serde::{Deserialize, Serialize};

/// Screen geometry: `width` columns by `pages` rows of 8-pixel-high pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    /// Bytes per page (one byte per column).
    pub width: usize,
    /// Number of pages.
    pub pages: usize,
}

impl DisplayGeometry {
    /// Total frame buffer size in bytes.
    pub fn frame_size(&self) -> usize {
        self.width * self.pages
    }
}

impl Default for DisplayGeometry {
    fn default() -> Self {
        Self { width: 128, pages: 6 }
    }
}

/// What last produced the frame contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    /// Nothing received since connect or reset.
    Blank,
    /// Full bitmap, from a full frame or a delta on top of one.
    Bitmap,
    /// 7-segment display: raw segment bytes per digit and a dot bitmask.
    SevenSegment { digits: [u8; 4], dots: u8 },
}

/// The current screen contents.
///
/// The pixel buffer always has exactly `geometry.frame_size()` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    /// Page-major pixel bytes.
    pub pixels: Vec<u8>,
    /// Discriminator for the last update kind.
    pub mode: RenderMode,
    /// Geometry the buffer was sized for.
    pub geometry: DisplayGeometry,
}

impl DisplayFrame {
    /// A zeroed frame.
    pub fn blank(geometry: DisplayGeometry) -> Self {
        Self { pixels: vec![0; geometry.frame_size()], mode: RenderMode::Blank, geometry }
    }

    /// Bytes of one page, if it exists.
    pub fn page(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.geometry.width)?;
        self.pixels.get(start..start + self.geometry.width)
    }

    /// Whether the pixel at (`x`, `y`) is lit. Each byte holds 8 vertical pixels, LSB on top.
    pub fn pixel(&self, x: usize, y: usize) -> bool {
        if x >= self.geometry.width {
            return false;
        }
        self.page(y / 8).is_some_and(|page| page[x] & (1 << (y % 8)) != 0)
    }
}
