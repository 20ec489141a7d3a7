//! Cyclic message-ID window

use crate::config::MAX_WINDOW_SIZE;
use crate::error::ProtocolError;

/// The device-assigned range of message IDs for one session, plus the counter
/// that walks it.
///
/// The current ID is `min + ((counter - 1) mod size)`; `counter` runs `1..=size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageIdWindow {
    min: u8,
    max: u8,
    counter: u32,
}

impl MessageIdWindow {
    /// Validate a window handed out by the device.
    ///
    /// The window must be non-empty, at most 16 IDs wide, 7-bit, and must not contain
    /// the handshake ID `0`.
    pub fn new(min: u8, max: u8) -> Result<Self, ProtocolError> {
        let invalid = |why: &str| ProtocolError::MalformedResponse {
            details: format!("message ID window {min:#04x}..={max:#04x} {why}"),
        };
        if min > max {
            return Err(invalid("is empty"));
        }
        if min == 0 {
            return Err(invalid("includes the handshake ID"));
        }
        if max > 0x7F {
            return Err(invalid("is not 7-bit"));
        }
        if usize::from(max - min) + 1 > MAX_WINDOW_SIZE {
            return Err(invalid("is too wide"));
        }
        Ok(Self { min, max, counter: 1 })
    }

    pub fn min(&self) -> u8 {
        self.min
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Number of IDs in the window.
    pub fn size(&self) -> u32 {
        u32::from(self.max - self.min) + 1
    }

    /// The ID the next request will use.
    pub fn current(&self) -> u8 {
        // counter - 1 < size <= 16, so the sum stays within [min, max].
        self.min + ((self.counter - 1) % self.size()) as u8
    }

    /// Move to the next ID, wrapping after `max`.
    pub fn advance(&mut self) {
        self.counter = (self.counter % self.size()) + 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn cycles_through_the_full_window() {
        let mut window = MessageIdWindow::new(0x41, 0x4F).unwrap();
        assert_eq!(window.size(), 15);

        let ids: Vec<u8> = (0..30)
            .map(|_| {
                let id = window.current();
                window.advance();
                id
            })
            .collect();

        let expected: Vec<u8> = (0x41..=0x4F).chain(0x41..=0x4F).collect();
        assert_eq!(ids, expected);
        assert_eq!(ids[14], 0x4F);
        assert_eq!(ids[15], 0x41);
    }

    #[test]
    fn single_id_window_repeats() {
        let mut window = MessageIdWindow::new(0x10, 0x10).unwrap();
        window.advance();
        assert_eq!(window.current(), 0x10);
        assert_eq!(window.counter(), 1);
    }

    #[test]
    fn rejects_unusable_windows() {
        assert!(MessageIdWindow::new(0x20, 0x1F).is_err());
        assert!(MessageIdWindow::new(0x00, 0x0F).is_err());
        assert!(MessageIdWindow::new(0x78, 0x80).is_err());
        assert!(MessageIdWindow::new(0x01, 0x11).is_err());
        assert!(MessageIdWindow::new(0x01, 0x10).is_ok());
    }

    proptest! {
        #[test]
        fn prop_current_id_stays_in_window(min in 1u8..0x70, width in 0u8..16, steps in 0usize..200) {
            let max = (min + width).min(0x7F);
            let mut window = MessageIdWindow::new(min, max).unwrap();
            for _ in 0..steps {
                window.advance();
                prop_assert!((min..=max).contains(&window.current()));
                prop_assert!(window.counter() >= 1 && window.counter() <= window.size());
            }
        }
    }
}
