//! Controller input value type and button bitmask.

use serde::{Deserialize, Serialize};

/// Button bitmask constants (N64 controller layout)
pub mod buttons {
    /// C-right
    pub const C_RIGHT: u16 = 1 << 0;
    /// C-left
    pub const C_LEFT: u16 = 1 << 1;
    /// C-down
    pub const C_DOWN: u16 = 1 << 2;
    /// C-up
    pub const C_UP: u16 = 1 << 3;
    /// R trigger
    pub const R: u16 = 1 << 4;
    /// L trigger
    pub const L: u16 = 1 << 5;
    /// D-pad right
    pub const D_RIGHT: u16 = 1 << 8;
    /// D-pad left
    pub const D_LEFT: u16 = 1 << 9;
    /// D-pad down
    pub const D_DOWN: u16 = 1 << 10;
    /// D-pad up
    pub const D_UP: u16 = 1 << 11;
    /// Start
    pub const START: u16 = 1 << 12;
    /// Z trigger
    pub const Z: u16 = 1 << 13;
    /// B button
    pub const B: u16 = 1 << 14;
    /// A button
    pub const A: u16 = 1 << 15;
}

/// One frame of controller input
///
/// Immutable value type: a button bitmask plus two signed analog axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Input {
    /// Button bitmask (see [`buttons`])
    pub buttons: u16,
    /// Analog stick X axis
    pub stick_x: i8,
    /// Analog stick Y axis
    pub stick_y: i8,
}

impl Input {
    /// Create a new input record
    #[must_use]
    pub fn new(buttons: u16, stick_x: i8, stick_y: i8) -> Self {
        Self {
            buttons,
            stick_x,
            stick_y,
        }
    }

    /// The neutral input (no buttons, centered stick)
    #[must_use]
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Whether this is the neutral input
    #[must_use]
    pub fn is_neutral(&self) -> bool {
        self.buttons == 0 && self.stick_x == 0 && self.stick_y == 0
    }

    /// Whether all buttons in `mask` are held
    #[must_use]
    pub fn pressed(&self, mask: u16) -> bool {
        self.buttons & mask == mask
    }

    /// This input with additional buttons held
    #[must_use]
    pub fn with_buttons(mut self, mask: u16) -> Self {
        self.buttons |= mask;
        self
    }

    /// This input with the stick repositioned
    #[must_use]
    pub fn with_stick(mut self, x: i8, y: i8) -> Self {
        self.stick_x = x;
        self.stick_y = y;
        self
    }
}
