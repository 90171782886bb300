//! Fixed-layout uplink frame.
//!
//! Every uplink is exactly five little-endian `u16` fields:
//!
//! | field | contents |
//! |-------|----------|
//! | 0 | device id (last two DevEUI bytes) |
//! | 1 | status word, see [`STATUS_CLOSURE_BIT`] and [`STATUS_COMPANION_BIT`] |
//! | 2 | battery voltage in millivolts |
//! | 3, 4 | reserved, zero |

use crate::events::HallLevel;

pub const PAYLOAD_FIELDS: usize = 5;
pub const PAYLOAD_BYTES: usize = PAYLOAD_FIELDS * 2;

pub const FIELD_DEVICE_ID: usize = 0;
pub const FIELD_STATUS: usize = 1;
pub const FIELD_BATTERY: usize = 2;

/// Raw closure level, 1 when the hall sensor reads high.
pub const STATUS_CLOSURE_BIT: u16 = 0x0001;
/// Set on frames that are not a live door-change report (join and test).
pub const STATUS_COMPANION_BIT: u16 = 0x0002;

/// Why a frame is being sent.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageKind {
    Join,
    Door,
    Test,
}

impl MessageKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            MessageKind::Join => "join",
            MessageKind::Door => "door",
            MessageKind::Test => "test",
        }
    }
}

/// Derives the 16-bit device id from a provisioned DevEUI.
#[must_use]
pub const fn device_id_from_eui(eui: &[u8; 8]) -> u16 {
    u16::from_be_bytes([eui[6], eui[7]])
}

/// Five-field uplink payload, mutated in place before each send.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct UplinkPayload {
    fields: [u16; PAYLOAD_FIELDS],
}

impl UplinkPayload {
    /// Builds the boot-time frame: device id set, companion bit set, closure
    /// and battery unknown.
    #[must_use]
    pub const fn new(device_id: u16) -> Self {
        Self {
            fields: [device_id, STATUS_COMPANION_BIT, 0, 0, 0],
        }
    }

    /// Rewrites the status word for the given message kind.
    ///
    /// A `None` level leaves the closure bit clear.
    pub fn set_status(&mut self, kind: MessageKind, level: Option<HallLevel>) {
        let mut status = match level {
            Some(HallLevel::High) => STATUS_CLOSURE_BIT,
            Some(HallLevel::Low) | None => 0,
        };
        if kind != MessageKind::Door {
            status |= STATUS_COMPANION_BIT;
        }
        self.fields[FIELD_STATUS] = status;
    }

    pub fn set_battery_millivolts(&mut self, millivolts: u16) {
        self.fields[FIELD_BATTERY] = millivolts;
    }

    #[must_use]
    pub const fn device_id(&self) -> u16 {
        self.fields[FIELD_DEVICE_ID]
    }

    #[must_use]
    pub const fn status(&self) -> u16 {
        self.fields[FIELD_STATUS]
    }

    /// Closure flag carried in bit 0 of the status word.
    #[must_use]
    pub const fn closure_flag(&self) -> u8 {
        (self.fields[FIELD_STATUS] & STATUS_CLOSURE_BIT) as u8
    }

    #[must_use]
    pub const fn battery_millivolts(&self) -> u16 {
        self.fields[FIELD_BATTERY]
    }

    #[must_use]
    pub const fn fields(&self) -> &[u16; PAYLOAD_FIELDS] {
        &self.fields
    }

    /// Serializes the frame for the radio, each field little-endian.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; PAYLOAD_BYTES] {
        let mut bytes = [0u8; PAYLOAD_BYTES];
        for (chunk, field) in bytes.chunks_exact_mut(2).zip(self.fields.iter()) {
            chunk.copy_from_slice(&field.to_le_bytes());
        }
        bytes
    }
}
