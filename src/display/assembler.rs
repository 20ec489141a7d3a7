//! Screen buffer reconstruction from full and delta updates

use tracing::trace;

use crate::codec::unpack_bounded;
use crate::types::{DisplayFrame, DisplayGeometry, RenderMode};
use crate::{BridgeError, Result};

/// Byte offset of a delta's first page within the frame.
const DELTA_PAGE_STRIDE: usize = 8;

/// Maintains the mirrored screen.
///
/// Every update is decoded and validated before the buffer is touched, so a malformed
/// message leaves the previous frame intact.
#[derive(Debug, Clone)]
pub struct DisplayAssembler {
    frame: DisplayFrame,
}

impl DisplayAssembler {
    pub fn new(geometry: DisplayGeometry) -> Self {
        Self { frame: DisplayFrame::blank(geometry) }
    }

    pub fn frame(&self) -> &DisplayFrame {
        &self.frame
    }

    pub fn geometry(&self) -> DisplayGeometry {
        self.frame.geometry
    }

    /// Replace the whole buffer with a packed full frame.
    pub fn apply_full(&mut self, row: u8, col: u8, packed: &[u8]) -> Result<()> {
        let size = self.frame.geometry.frame_size();
        let pixels = unpack_bounded(packed, Some(size), size)?;
        if pixels.len() != size {
            return Err(BridgeError::malformed_frame(format!(
                "full frame decoded to {} bytes, expected {size}",
                pixels.len()
            )));
        }

        trace!(row, col, packed = packed.len(), "Full frame");
        self.frame.pixels = pixels;
        self.frame.mode = RenderMode::Bitmap;
        Ok(())
    }

    /// Splice `page_count` pages of packed data in at byte `8 * first_page`.
    pub fn apply_delta(&mut self, first_page: u8, page_count: u8, packed: &[u8]) -> Result<()> {
        let geometry = self.frame.geometry;
        let expected = usize::from(page_count) * geometry.width;
        let offset = DELTA_PAGE_STRIDE * usize::from(first_page);

        if page_count == 0 || offset + expected > geometry.frame_size() {
            return Err(BridgeError::malformed_frame(format!(
                "delta of {page_count} pages at offset {offset} does not fit a {} byte frame",
                geometry.frame_size()
            )));
        }

        let data = unpack_bounded(packed, Some(expected), expected)?;
        if data.len() != expected {
            return Err(BridgeError::malformed_frame(format!(
                "delta decoded to {} bytes, expected {expected}",
                data.len()
            )));
        }

        trace!(first_page, page_count, offset, "Delta frame");
        self.frame.pixels[offset..offset + expected].copy_from_slice(&data);
        self.frame.mode = RenderMode::Bitmap;
        Ok(())
    }

    /// Switch to 7-segment mode. The pixel buffer is left as it was.
    pub fn apply_seven_segment(&mut self, digits: [u8; 4], dots: u8) {
        trace!(?digits, dots, "Seven-segment update");
        self.frame.mode = RenderMode::SevenSegment { digits, dots };
    }

    /// Back to a blank frame, as after a disconnect.
    pub fn reset(&mut self) {
        self.frame = DisplayFrame::blank(self.frame.geometry);
    }
}
