//! Per-object tri-color state.
//!
//! Every heap object carries an [`AtomicColor`]. The collector and, under the
//! write barrier, mutator threads both change it, so every transition is an
//! atomic compare-and-swap: a lost Gray shade would let a reachable object be
//! swept.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Mark color of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Color {
    /// Not yet proven live in the current cycle.
    White = 0,
    /// Proven live, fields not yet scanned.
    Gray = 1,
    /// Proven live and fully scanned.
    Black = 2,
}

impl Color {
    /// Decodes a stored discriminant.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::White),
            1 => Some(Self::Gray),
            2 => Some(Self::Black),
            _ => None,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::White => "white",
            Self::Gray => "gray",
            Self::Black => "black",
        };
        f.write_str(name)
    }
}

/// Atomic wrapper around [`Color`].
#[repr(transparent)]
pub struct AtomicColor(AtomicU8);

impl AtomicColor {
    /// Creates a color cell.
    #[must_use]
    pub const fn new(color: Color) -> Self {
        Self(AtomicU8::new(color as u8))
    }

    /// Loads the current color.
    #[must_use]
    pub fn load(&self) -> Color {
        // Only `Color` discriminants are ever stored.
        Color::from_u8(self.0.load(Ordering::Acquire)).unwrap_or(Color::White)
    }

    /// Unconditionally stores `color`.
    ///
    /// Only valid outside of marking: when allocating, when the sweeper
    /// resets a survivor, or when an aborted cycle is rolled back.
    pub fn store(&self, color: Color) {
        self.0.store(color as u8, Ordering::Release);
    }

    /// Atomically moves from `current` to `new`.
    ///
    /// Returns `Ok(current)` on success and `Err(actual)` otherwise.
    pub fn transition(&self, current: Color, new: Color) -> Result<Color, Color> {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|v| Color::from_u8(v).unwrap_or(Color::White))
            .map_err(|v| Color::from_u8(v).unwrap_or(Color::White))
    }

    /// White → Gray. Returns `true` only for the caller that won the shade,
    /// which is then responsible for enqueueing the object.
    pub fn shade(&self) -> bool {
        self.transition(Color::White, Color::Gray).is_ok()
    }

    /// Gray → Black. Returns `false` if the object was not Gray.
    pub fn blacken(&self) -> bool {
        self.transition(Color::Gray, Color::Black).is_ok()
    }
}

impl fmt::Debug for AtomicColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicColor").field(&self.load()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_from_u8_round_trips_discriminants() {
        for color in [Color::White, Color::Gray, Color::Black] {
            assert_eq!(Color::from_u8(color as u8), Some(color));
        }
        assert_eq!(Color::from_u8(3), None);
    }

    #[test]
    fn test_shade_only_from_white() {
        let c = AtomicColor::new(Color::White);
        assert!(c.shade());
        assert_eq!(c.load(), Color::Gray);
        assert!(!c.shade());

        let black = AtomicColor::new(Color::Black);
        assert!(!black.shade());
        assert_eq!(black.load(), Color::Black);
    }

    #[test]
    fn test_blacken_requires_gray() {
        let c = AtomicColor::new(Color::White);
        assert!(!c.blacken());
        c.shade();
        assert!(c.blacken());
        assert_eq!(c.load(), Color::Black);
    }

    #[test]
    fn test_transition_reports_actual_on_failure() {
        let c = AtomicColor::new(Color::Black);
        assert_eq!(c.transition(Color::White, Color::Gray), Err(Color::Black));
    }

    #[test]
    fn test_concurrent_shade_has_single_winner() {
        let color = Arc::new(AtomicColor::new(Color::White));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let color = Arc::clone(&color);
                std::thread::spawn(move || color.shade())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(color.load(), Color::Gray);
    }
}
