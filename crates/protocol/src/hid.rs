//! HID mouse profile for AOA accessories
//!
//! Report layout (5 bytes), in descriptor field order:
//! ```text
//! Byte 0: Button bitfield
//!         Bit 0 = Primary, Bit 1 = Secondary, Bit 2 = Tertiary, bits 3-7 padding
//! Byte 1: X displacement (signed, relative)
//! Byte 2: Y displacement (signed, relative)
//! Byte 3: Vertical wheel (signed, relative)
//! Byte 4: Horizontal pan (signed, relative, Consumer AC Pan)
//! ```

/// Mouse report size in bytes
pub const MOUSE_REPORT_SIZE: usize = 5;

/// Logical range of the relative axes declared by the descriptor
pub const AXIS_MIN: i8 = -127;
pub const AXIS_MAX: i8 = 127;

/// Button bits
pub struct MouseButtons;

impl MouseButtons {
    pub const PRIMARY: u8 = 0x01;
    pub const SECONDARY: u8 = 0x02;
    pub const TERTIARY: u8 = 0x04;
}

/// Relative mouse with wheel and horizontal pan
pub struct HidMouse;

impl HidMouse {
    /// HID report descriptor.
    ///
    /// Byte-for-byte stable: device-side parsers match this exact sequence.
    pub const DESCRIPTOR: &'static [u8] = &[
        0x05, 0x01, // Usage Page (Generic Desktop)
        0x09, 0x02, // Usage (Mouse)
        0xa1, 0x01, // Collection (Application)
        0x09, 0x01, //   Usage (Pointer)
        0xa1, 0x00, //   Collection (Physical)
        0x05, 0x09, //     Usage Page (Button)
        0x19, 0x01, //     Usage Minimum (Button 1)
        0x29, 0x05, //     Usage Maximum (Button 5)
        0x15, 0x00, //     Logical Minimum (0)
        0x25, 0x01, //     Logical Maximum (1)
        0x95, 0x03, //     Report Count (3)
        0x75, 0x01, //     Report Size (1)
        0x81, 0x02, //     Input (Data, Var, Abs)
        0x95, 0x01, //     Report Count (1)
        0x75, 0x05, //     Report Size (5)
        0x81, 0x01, //     Input (Cnst, Var, Abs)
        0x05, 0x01, //     Usage Page (Generic Desktop)
        0x09, 0x30, //     Usage (X)
        0x09, 0x31, //     Usage (Y)
        0x09, 0x38, //     Usage (Wheel)
        0x15, 0x81, //     Logical Minimum (-127)
        0x25, 0x7f, //     Logical Maximum (127)
        0x75, 0x08, //     Report Size (8)
        0x95, 0x03, //     Report Count (3)
        0x81, 0x06, //     Input (Data, Var, Rel)
        0x05, 0x0c, //     Usage Page (Consumer)
        0x0a, 0x38, 0x02, // Usage (AC Pan)
        0x15, 0x81, //     Logical Minimum (-127)
        0x25, 0x7f, //     Logical Maximum (127)
        0x75, 0x08, //     Report Size (8)
        0x95, 0x01, //     Report Count (1)
        0x81, 0x06, //     Input (Data, Var, Rel)
        0xc0, //   End Collection
        0xc0, // End Collection
    ];

    /// Serialize a report from raw pointer deltas.
    ///
    /// Values are truncated to their low 8 bits (two's complement), not
    /// clamped. Callers that need clamping use [`MouseReport::clamped`].
    pub fn serialize_report(
        relative_x: i32,
        relative_y: i32,
        buttons: u8,
        scroll_x: i32,
        scroll_y: i32,
    ) -> [u8; MOUSE_REPORT_SIZE] {
        [
            buttons,
            relative_x as u8,
            relative_y as u8,
            scroll_y as u8,
            scroll_x as u8,
        ]
    }
}

/// The mouse report descriptor
pub fn mouse_descriptor() -> &'static [u8] {
    HidMouse::DESCRIPTOR
}

/// See [`HidMouse::serialize_report`]
pub fn serialize_mouse_report(
    dx: i32,
    dy: i32,
    buttons: u8,
    scroll_x: i32,
    scroll_y: i32,
) -> [u8; MOUSE_REPORT_SIZE] {
    HidMouse::serialize_report(dx, dy, buttons, scroll_x, scroll_y)
}

/// One mouse input report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseReport {
    pub buttons: u8,
    pub dx: i8,
    pub dy: i8,
    pub wheel_y: i8,
    pub wheel_x: i8,
}

impl MouseReport {
    /// Buttons only, no movement
    pub const fn buttons(buttons: u8) -> Self {
        Self {
            buttons,
            dx: 0,
            dy: 0,
            wheel_y: 0,
            wheel_x: 0,
        }
    }

    /// Build a report saturating every axis to the descriptor's logical range
    pub fn clamped(dx: i32, dy: i32, buttons: u8, scroll_x: i32, scroll_y: i32) -> Self {
        let clamp = |v: i32| v.clamp(AXIS_MIN as i32, AXIS_MAX as i32) as i8;
        Self {
            buttons,
            dx: clamp(dx),
            dy: clamp(dy),
            wheel_y: clamp(scroll_y),
            wheel_x: clamp(scroll_x),
        }
    }

    pub fn to_bytes(&self) -> [u8; MOUSE_REPORT_SIZE] {
        HidMouse::serialize_report(
            self.dx as i32,
            self.dy as i32,
            self.buttons,
            self.wheel_x as i32,
            self.wheel_y as i32,
        )
    }
}
