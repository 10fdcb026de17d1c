//! Control core of a tri-mode (USB, Bluetooth, 2.4GHz) wireless keyboard
//!
//! - Transport selection keys, with tap to switch and hold to pair
//! - Radio module command sequencing and the post-boot handshake
//! - Connection indicators on GPIO lines or an RGB matrix
//! - Wireless report reconciliation: more simultaneous keys than the
//!   module's keyboard report has slots, without duplicated or stuck keys
//! - The last active transport persisted in a single config word
//!
//! # Example
//!
//! ```no_run
//! use trimode::{KeyEvent, SharedLinkStatus, Transport, TrimodeConfig, TrimodeKey, TrimodeKeyboard};
//!
//! static LINK: SharedLinkStatus<CriticalSectionRawMutex> = SharedLinkStatus::new();
//!
//! let mut keyboard = TrimodeKeyboard::new(module, storage, TrimodeConfig::neo70(), &LINK)?;
//! keyboard.init(&mut delay, Instant::now());
//!
//! // hold BT1 for 3 seconds
//! keyboard.process_key(TrimodeKey::Select(Transport::Bt1), KeyEvent::hold());
//! ```
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
pub(crate) mod fmt;

pub mod config;
pub mod controller;
pub mod indicator;
pub mod keyboard;
pub mod power;
pub mod report;
pub mod selector;
pub mod storage;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(all(feature = "panic-reset", not(feature = "std")))]
use panic_reset as _;

pub use config::{ConfigRecord, IndicatorKind, MatrixIndicatorConfig, Rgb, TrimodeConfig};
pub use controller::TransportController;
pub use indicator::{ColorSink, IndicatorState, IndicatorTask, LinkStatus, MatrixIndicator, PinIndicator, SharedLinkStatus};
pub use keyboard::TrimodeKeyboard;
pub use power::{LedPower, NoPin, UsbPower};
pub use report::{NkroReport, ReportReconciler};
pub use selector::{DeviceSelector, DeviceSwitch, KeyEvent, TrimodeKey};
#[cfg(feature = "storage")]
pub use storage::FlashConfigStorage;
pub use storage::{ConfigStorage, MemoryStorage};
pub use transport::{ConnectionState, ModuleCommand, Result, Transport, TrimodeError, WirelessModule};

#[cfg(test)]
#[ctor::ctor]
unsafe fn init_log() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}
