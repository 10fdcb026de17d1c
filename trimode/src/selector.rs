//! Transport selection keys
//!
//! Three kinds of keys pick the active transport:
//!
//! - `Next` cycles USB → BT1 → BT2 → BT3 → 2.4G → USB on press
//! - `Usb` switches to USB
//! - `Select(t)` is a tap/hold key with a long tapping term
//!   ([`WIRELESS_TAPPING_TERM_MS`]): a tap switches to `t`, a hold switches
//!   to `t` and starts pairing
//!
//! [`WIRELESS_TAPPING_TERM_MS`]: crate::config::WIRELESS_TAPPING_TERM_MS

use crate::config::TrimodeConfig;
use crate::transport::{ConnectionState, Transport};

/// Receiver of switch requests
///
/// Implemented by [`TransportController`](crate::controller::TransportController).
pub trait DeviceSwitch {
    /// Transport the radio module currently considers active
    fn current_transport(&self) -> Transport;

    /// Connection state of the active transport
    fn connection_state(&self) -> ConnectionState;

    /// Switch from `old` to `new`, entering pairing mode when `reset` is set
    fn switch(&mut self, old: Transport, new: Transport, reset: bool);
}

/// Keys handled by the selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrimodeKey {
    /// Switch to USB
    Usb,
    /// Cycle to the next transport
    Next,
    /// Tap to select, hold to select and pair
    Select(Transport),
}

impl TrimodeKey {
    /// Tapping term of this key in milliseconds
    ///
    /// The wireless select keys use the long wireless term so that a hold
    /// means "pair", every other key uses the default term.
    pub fn tapping_term(&self, config: &TrimodeConfig) -> u16 {
        match self {
            TrimodeKey::Select(t) if t.is_wireless() => config.wireless_tapping_term_ms,
            _ => config.tapping_term_ms,
        }
    }
}

/// A resolved key event
///
/// Tap/hold resolution happens upstream: `tap_count` is non-zero when the
/// press was released within the tapping term, zero when the key is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyEvent {
    pub pressed: bool,
    pub tap_count: u8,
}

impl KeyEvent {
    /// Press resolved as a tap
    pub const fn tap() -> Self {
        Self {
            pressed: true,
            tap_count: 1,
        }
    }

    /// Press held beyond the tapping term
    pub const fn hold() -> Self {
        Self {
            pressed: true,
            tap_count: 0,
        }
    }

    pub const fn release() -> Self {
        Self {
            pressed: false,
            tap_count: 0,
        }
    }
}

/// Circular transport selection
///
/// The only state is the cursor used by the `Next` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceSelector {
    cursor: usize,
}

impl DeviceSelector {
    /// Selector whose cursor starts at USB
    pub fn new() -> Self {
        Self::default()
    }

    /// Selector whose cursor starts at `transport`
    pub fn starting_at(transport: Transport) -> Self {
        Self {
            cursor: transport.slot(),
        }
    }

    /// Transport under the cursor
    pub fn cursor(&self) -> Transport {
        Transport::ALL[self.cursor]
    }

    /// Advance the cursor and switch to the transport under it
    pub fn select_next<S: DeviceSwitch>(&mut self, switch: &mut S) {
        self.cursor = (self.cursor + 1) % Transport::ALL.len();
        let target = Transport::ALL[self.cursor];
        debug!("Next device: {:?}", target);
        switch.switch(switch.current_transport(), target, false);
    }

    /// Handle a tap/hold select key event for `target`
    ///
    /// A tap switches without pairing. A hold switches and pairs, unless the
    /// link is already pairing. Releases do nothing.
    pub fn select_device<S: DeviceSwitch>(&mut self, switch: &mut S, target: Transport, event: KeyEvent) {
        if !event.pressed {
            return;
        }
        let current = switch.current_transport();
        if event.tap_count > 0 {
            switch.switch(current, target, false);
        } else if switch.connection_state() != ConnectionState::Pairing {
            info!("Hold on {:?}, switching and pairing", target);
            switch.switch(current, target, true);
        } else {
            debug!("Already pairing, ignoring hold on {:?}", target);
        }
    }

    /// Switch to USB
    pub fn select_usb<S: DeviceSwitch>(&mut self, switch: &mut S) {
        switch.switch(switch.current_transport(), Transport::Usb, false);
    }

    /// Dispatch a key event
    ///
    /// Returns `true`: every selector key is consumed, including releases.
    pub fn process_key<S: DeviceSwitch>(&mut self, switch: &mut S, key: TrimodeKey, event: KeyEvent) -> bool {
        match key {
            TrimodeKey::Usb => self.select_usb(switch),
            TrimodeKey::Next => {
                if event.pressed {
                    self.select_next(switch);
                }
            }
            TrimodeKey::Select(target) => self.select_device(switch, target, event),
        }
        true
    }
}
