//! Board configuration and the persisted config word
//!
//! [`TrimodeConfig`] gathers the constants a board variant needs. Two
//! presets model the boards this core ships on: [`TrimodeConfig::neo70`]
//! drives discrete indicator LEDs, [`TrimodeConfig::neoergo`] draws the
//! indicators on an RGB matrix.

use bitfield_struct::bitfield;
use strum::EnumCount;

use crate::transport::{Result, Transport, TrimodeError};

/// Number of keycode slots of the legacy keyboard report used over wireless
pub const WLS_KEYBOARD_REPORT_KEYS: usize = 5;

/// Tapping term of the transport select keys, in milliseconds
///
/// Holding a select key shorter than this switches to the device, holding it
/// longer switches and enters pairing mode.
pub const WIRELESS_TAPPING_TERM_MS: u16 = 3000;

/// Default tapping term for every other key, in milliseconds
pub const TAPPING_TERM_MS: u16 = 200;

/// Full blink cycle of the fast indicator pattern, in milliseconds
pub const LED_BLINK_FAST_PERIOD_MS: u64 = 300;

/// Delay between the device name announcement and the first switch at boot
pub const DEVICE_INFO_DELAY_MS: u32 = 10;

/// Time after boot before the one-shot module setup commands are sent
pub const POST_INIT_DELAY_MS: u64 = 100;

/// Idle time before entering low power mode on a wireless link
pub const LPWR_TIMEOUT_MS: u32 = 120_000;

/// Persisted configuration word
///
/// Layout of the 32-bit storage word:
///
/// ```text
/// bit 0     initialized flag, set once the word has been written
/// bits 1-3  device index of the last active transport
/// bits 4-31 reserved, zero
/// ```
///
/// An all-zero word means the keyboard has never booted.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct ConfigRecord {
    pub initialized: bool,
    #[bits(3)]
    pub device: u8,
    #[bits(28)]
    __: u32,
}

impl ConfigRecord {
    /// Record written on first boot
    pub fn first_boot() -> Self {
        Self::new()
            .with_initialized(true)
            .with_device(Transport::Usb.id())
    }

    /// Whether the storage word was never written
    pub fn is_blank(&self) -> bool {
        self.into_bits() == 0
    }

    /// The persisted transport
    pub fn transport(&self) -> Result<Transport> {
        Transport::try_from(self.device())
    }

    pub fn set_transport(&mut self, transport: Transport) {
        self.set_device(transport.id());
    }
}

/// RGB color of an indicator cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    /// Dimmed white used by the stock firmware
    pub const ADJ_WHITE: Rgb = Rgb::new(0xC8, 0xC8, 0xC8);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Indicator cells on an RGB matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixIndicatorConfig {
    /// Matrix cell of each transport, indexed by [`Transport::slot`]
    pub cells: [u8; Transport::COUNT],

    /// Color of the active transport's cell
    pub color: Rgb,

    /// First and last cell (inclusive) lit while caps lock is on
    pub caps_lock_cells: (u8, u8),

    /// Color of the caps lock region
    pub caps_lock_color: Rgb,
}

impl Default for MatrixIndicatorConfig {
    fn default() -> Self {
        Self {
            cells: [0, 1, 2, 3, 4],
            color: Rgb::ADJ_WHITE,
            caps_lock_cells: (0, 15),
            caps_lock_color: Rgb::ADJ_WHITE,
        }
    }
}

/// How the board shows the link state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorKind {
    /// One GPIO line per transport
    Pins,
    /// Cells of the RGB matrix, redrawn by the lighting effect
    Matrix(MatrixIndicatorConfig),
}

/// Board configuration of a tri-mode keyboard
///
/// # Example
///
/// ```no_run
/// use trimode::config::TrimodeConfig;
///
/// let config = TrimodeConfig {
///     device_name: "MY BOARD BT$",
///     ..TrimodeConfig::neo70()
/// };
/// assert!(config.validate());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimodeConfig {
    /// Bluetooth advertising name announced at boot
    pub device_name: &'static str,

    /// Tapping term of the transport select keys (ms)
    pub wireless_tapping_term_ms: u16,

    /// Tapping term of every other key (ms)
    pub tapping_term_ms: u16,

    /// Full fast-blink cycle (ms), the indicator ticks at half of it
    pub blink_fast_period_ms: u64,

    /// Delay after the device name announcement (ms)
    pub device_info_delay_ms: u32,

    /// Delay before the one-shot module setup commands (ms)
    pub post_init_delay_ms: u64,

    /// Idle time before low power mode (ms)
    pub low_power_timeout_ms: u32,

    pub indicator: IndicatorKind,
}

impl Default for TrimodeConfig {
    fn default() -> Self {
        Self::neo70()
    }
}

impl TrimodeConfig {
    /// 70% board with discrete indicator LEDs under Esc and the device keys
    pub fn neo70() -> Self {
        Self {
            device_name: "NEO70 BT$",
            wireless_tapping_term_ms: WIRELESS_TAPPING_TERM_MS,
            tapping_term_ms: TAPPING_TERM_MS,
            blink_fast_period_ms: LED_BLINK_FAST_PERIOD_MS,
            device_info_delay_ms: DEVICE_INFO_DELAY_MS,
            post_init_delay_ms: POST_INIT_DELAY_MS,
            low_power_timeout_ms: LPWR_TIMEOUT_MS,
            indicator: IndicatorKind::Pins,
        }
    }

    /// Ergonomic board with per-key RGB, the indicators use the matrix
    pub fn neoergo() -> Self {
        Self {
            device_name: "NEOERGO BT$",
            indicator: IndicatorKind::Matrix(MatrixIndicatorConfig::default()),
            ..Self::neo70()
        }
    }

    /// Validate configuration parameters
    ///
    /// Returns `true` if all parameters are usable.
    pub fn validate(&self) -> bool {
        let matrix_ok = match self.indicator {
            IndicatorKind::Pins => true,
            IndicatorKind::Matrix(m) => m.caps_lock_cells.0 <= m.caps_lock_cells.1,
        };
        !self.device_name.is_empty()
            && self.wireless_tapping_term_ms > self.tapping_term_ms
            && self.blink_fast_period_ms >= 2
            && matrix_ok
    }

    /// Same as [`TrimodeConfig::validate`], as a `Result`
    pub fn check(&self) -> Result<()> {
        if self.validate() {
            Ok(())
        } else {
            Err(TrimodeError::InvalidConfig)
        }
    }
}
