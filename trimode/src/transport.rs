//! Transport links and the radio module interface
//!
//! The radio module is an external collaborator: it owns the actual link
//! state, and this crate only observes it through [`WirelessModule`] and
//! drives it with fire-and-forget [`ModuleCommand`]s.

use core::fmt;

use strum::{EnumCount, EnumIter};
use usbd_hid::descriptor::KeyboardReport;

use crate::report::NKRO_REPORT_BYTES;

/// Errors that can occur in the tri-mode core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrimodeError {
    /// A device index that doesn't map to any known transport
    UnknownTransport(u8),

    /// Persistent storage read or write failed
    Storage,

    /// A GPIO line could not be driven
    Pin,

    /// Board configuration out of range
    InvalidConfig,
}

impl fmt::Display for TrimodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownTransport(id) => write!(f, "Unknown transport index {}", id),
            Self::Storage => write!(f, "Storage access failed"),
            Self::Pin => write!(f, "GPIO write failed"),
            Self::InvalidConfig => write!(f, "Invalid configuration"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for TrimodeError {}

/// Result type for tri-mode operations
pub type Result<T> = core::result::Result<T, TrimodeError>;

/// A communication link the keyboard can use
///
/// The declaration order is the cyclic order used by the "next device" key.
/// Discriminants are the device indices used by the radio module and the
/// persisted config word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumCount, EnumIter)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Transport {
    /// Wired USB
    Usb = 0,
    /// Bluetooth host slot 1
    Bt1 = 1,
    /// Bluetooth host slot 2
    Bt2 = 2,
    /// Bluetooth host slot 3
    Bt3 = 3,
    /// 2.4GHz long-range link through the receiver dongle
    Rf24 = 6,
}

impl Transport {
    /// All transports in cyclic selection order
    pub const ALL: [Transport; Transport::COUNT] = [
        Transport::Usb,
        Transport::Bt1,
        Transport::Bt2,
        Transport::Bt3,
        Transport::Rf24,
    ];

    /// Device index understood by the radio module
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Position of this transport in [`Transport::ALL`], also the indicator slot
    pub const fn slot(self) -> usize {
        match self {
            Transport::Usb => 0,
            Transport::Bt1 => 1,
            Transport::Bt2 => 2,
            Transport::Bt3 => 3,
            Transport::Rf24 => 4,
        }
    }

    pub const fn is_wireless(self) -> bool {
        !matches!(self, Transport::Usb)
    }

    /// The transport whose device index is the logical negation of this one.
    ///
    /// USB maps to the first Bluetooth slot, every wireless link maps to USB.
    /// Used as a guaranteed-different "old" transport to make the radio
    /// module re-evaluate the link after boot.
    pub const fn inverse(self) -> Transport {
        match self {
            Transport::Usb => Transport::Bt1,
            _ => Transport::Usb,
        }
    }
}

impl TryFrom<u8> for Transport {
    type Error = TrimodeError;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Transport::Usb),
            1 => Ok(Transport::Bt1),
            2 => Ok(Transport::Bt2),
            3 => Ok(Transport::Bt3),
            6 => Ok(Transport::Rf24),
            _ => Err(TrimodeError::UnknownTransport(id)),
        }
    }
}

/// Connection state of the active transport, as reported by the radio module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disconnected,
    Pairing,
    Connected,
}

/// Device control commands sent to the radio module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModuleCommand {
    UseUsb,
    UseBt1,
    UseBt2,
    UseBt3,
    UseRf24,
    /// Enter pairing mode on the currently selected wireless link
    Pair,
    /// Query the module firmware version
    FirmwareVersion,
    /// Enable the auto-sleep timeout while linked over Bluetooth
    SleepBtEnable,
    /// Enable the auto-sleep timeout while linked over 2.4GHz
    SleepRf24Enable,
}

impl ModuleCommand {
    /// The command selecting `transport` as the active link
    pub const fn select(transport: Transport) -> Self {
        match transport {
            Transport::Usb => ModuleCommand::UseUsb,
            Transport::Bt1 => ModuleCommand::UseBt1,
            Transport::Bt2 => ModuleCommand::UseBt2,
            Transport::Bt3 => ModuleCommand::UseBt3,
            Transport::Rf24 => ModuleCommand::UseRf24,
        }
    }
}

/// Interface of the radio module that carries the wireless links
///
/// All commands are fire-and-forget: the module acknowledges nothing, and
/// its view of the current transport and connection state changes
/// asynchronously. Callers observe it by polling the accessors.
///
/// # Example Implementation
///
/// ```ignore
/// struct UartModule { /* ... */ }
///
/// impl WirelessModule for UartModule {
///     fn connection_state(&self) -> ConnectionState {
///         self.state
///     }
///     // ...
/// }
/// ```
pub trait WirelessModule {
    /// Connection state of the active transport
    fn connection_state(&self) -> ConnectionState;

    /// Transport the module currently considers active
    fn current_transport(&self) -> Transport;

    /// Notify the module that the link changes from `old` to `new`
    ///
    /// # Notes
    ///
    /// - The module records the pending change; the commands that drive the
    ///   radio are sent separately through [`WirelessModule::send_command`]
    /// - `reset` is true when the switch is followed by pairing
    fn request_switch(&mut self, old: Transport, new: Transport, reset: bool);

    /// Send a device control command
    fn send_command(&mut self, command: ModuleCommand);

    /// Announce the device name used for Bluetooth advertising
    fn send_device_info(&mut self, name: &str);

    /// Check whether the module's message channel is still busy
    fn is_busy(&self) -> bool;

    /// Run one step of the module's cooperative task
    ///
    /// Progresses pending transmissions so that [`WirelessModule::is_busy`]
    /// eventually turns false.
    fn pump(&mut self);

    /// Send a boot-protocol shaped keyboard report
    fn send_keyboard(&mut self, report: &KeyboardReport);

    /// Send the auxiliary NKRO bitmap carrying keys that didn't fit the keyboard report
    fn send_nkro(&mut self, bitmap: &[u8; NKRO_REPORT_BYTES]);
}
