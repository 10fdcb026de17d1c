//! Connection indicators
//!
//! Two variants share the same input, a [`LinkStatus`] snapshot:
//!
//! - [`PinIndicator`] drives one GPIO line per transport from an 8-step
//!   blink pattern, ticked by a self-rescheduling task
//! - [`MatrixIndicator`] colors cells of an RGB matrix, redrawn by the
//!   lighting effect on every frame

use core::cell::Cell;

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use embedded_hal::digital::{OutputPin, PinState};
use strum::EnumCount;

use crate::config::{IndicatorKind, MatrixIndicatorConfig, Rgb, TrimodeConfig};
use crate::transport::{ConnectionState, Transport, TrimodeError};

/// Number of phases of a blink pattern
const PHASES: u8 = 8;

/// Redraws between toggles of the fast matrix blink
const MATRIX_FAST_DIVISOR: u8 = 64;

/// Redraws between toggles of the slow matrix blink
const MATRIX_SLOW_DIVISOR: u8 = 128;

/// What an indicator shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IndicatorState {
    #[default]
    Off,
    On,
    BlinkSlow,
    BlinkFast,
}

impl IndicatorState {
    /// 8-phase blink pattern, bit `n` is the output at phase `n`
    pub const fn pattern(self) -> u8 {
        match self {
            IndicatorState::Off => 0x00,
            IndicatorState::On => 0xFF,
            IndicatorState::BlinkSlow => 0x0F,
            IndicatorState::BlinkFast => 0xAA,
        }
    }

    pub const fn is_lit(self, phase: u8) -> bool {
        self.pattern() & (1 << (phase % PHASES)) != 0
    }

    /// State of the active transport's indicator
    ///
    /// Pairing blinks fast on any transport. A wireless link that is not
    /// connected blinks slow.
    pub fn for_link(status: LinkStatus) -> Self {
        match status.state {
            ConnectionState::Pairing => IndicatorState::BlinkFast,
            ConnectionState::Connected => IndicatorState::On,
            ConnectionState::Disconnected if status.transport.is_wireless() => IndicatorState::BlinkSlow,
            ConnectionState::Disconnected => IndicatorState::On,
        }
    }
}

/// Active transport and its connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStatus {
    pub transport: Transport,
    pub state: ConnectionState,
}

/// Link status published by the keyboard, read by the indicator task
///
/// Use a `CriticalSectionRawMutex` when the task runs on another executor.
pub struct SharedLinkStatus<M: RawMutex> {
    inner: Mutex<M, Cell<LinkStatus>>,
}

impl<M: RawMutex> SharedLinkStatus<M> {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(LinkStatus {
                transport: Transport::Usb,
                state: ConnectionState::Disconnected,
            })),
        }
    }

    pub fn get(&self) -> LinkStatus {
        self.inner.lock(|status| status.get())
    }

    pub fn set(&self, status: LinkStatus) {
        self.inner.lock(|cell| cell.set(status));
    }
}

impl<M: RawMutex> Default for SharedLinkStatus<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Indicator state of every transport slot
///
/// Only the active transport's slot is ever lit.
pub fn indicator_states(status: LinkStatus) -> [IndicatorState; Transport::COUNT] {
    let mut states = [IndicatorState::Off; Transport::COUNT];
    states[status.transport.slot()] = IndicatorState::for_link(status);
    states
}

/// Call `step` after every delay it returns, until `stop` is signaled
///
/// The first call happens after `first`.
pub async fn repeat<M: RawMutex, F: FnMut() -> Duration>(stop: &Signal<M, ()>, first: Duration, mut step: F) {
    let mut delay = first;
    loop {
        match select(Timer::after(delay), stop.wait()).await {
            Either::First(()) => delay = step(),
            Either::Second(()) => {
                debug!("Indicator task stopped");
                return;
            }
        }
    }
}

/// Indicator LEDs on discrete GPIO lines, one per transport slot
pub struct PinIndicator<P: OutputPin> {
    pins: [P; Transport::COUNT],
    phase: u8,
    period: Duration,
}

impl<P: OutputPin> PinIndicator<P> {
    /// `pins` are indexed by [`Transport::slot`]
    pub fn new(pins: [P; Transport::COUNT], config: &TrimodeConfig) -> Self {
        Self {
            pins,
            phase: 0,
            period: Duration::from_millis(config.blink_fast_period_ms / 2),
        }
    }

    /// Delay between ticks
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn phase(&self) -> u8 {
        self.phase
    }

    /// Advance one phase and update every line
    ///
    /// Returns the delay until the next tick.
    pub fn tick(&mut self, status: LinkStatus) -> Duration {
        self.phase = (self.phase + 1) % PHASES;
        let states = indicator_states(status);
        for (slot, (pin, state)) in self.pins.iter_mut().zip(states).enumerate() {
            let level = PinState::from(state.is_lit(self.phase));
            if let Err(e) = pin.set_state(level).map_err(|_| TrimodeError::Pin) {
                warn!("Indicator {}: {:?}", slot, e);
            }
        }
        self.period
    }

    /// Tick forever, reading the link status before every tick
    pub async fn run<M: RawMutex, F: FnMut() -> LinkStatus>(&mut self, mut status: F, stop: &Signal<M, ()>) {
        let period = self.period;
        repeat(stop, period, || self.tick(status())).await
    }

    pub fn release(self) -> [P; Transport::COUNT] {
        self.pins
    }
}

/// Self-rescheduling indicator task
///
/// Only reads the shared status, so it runs next to the key handling that
/// publishes it.
pub struct IndicatorTask<'a, M: RawMutex> {
    status: &'a SharedLinkStatus<M>,
    config: TrimodeConfig,
}

impl<'a, M: RawMutex> IndicatorTask<'a, M> {
    pub fn new(status: &'a SharedLinkStatus<M>, config: &TrimodeConfig) -> Self {
        Self {
            status,
            config: *config,
        }
    }

    /// Drive `pins` until `stop` is signaled, then hand them back
    ///
    /// Returns at once when the board draws its indicators on the matrix.
    pub async fn run<P: OutputPin, S: RawMutex>(self, pins: [P; Transport::COUNT], stop: &Signal<S, ()>) -> [P; Transport::COUNT] {
        match self.config.indicator {
            IndicatorKind::Pins => {
                let mut indicator = PinIndicator::new(pins, &self.config);
                indicator.run(|| self.status.get(), stop).await;
                indicator.release()
            }
            IndicatorKind::Matrix(_) => {
                debug!("Indicators are drawn on the matrix, no pin task");
                pins
            }
        }
    }
}

/// Receiver of matrix colors
pub trait ColorSink {
    fn set_color(&mut self, index: u8, color: Rgb);
}

/// Indicators drawn on an RGB matrix
///
/// A wrapping redraw counter drives two blink flags: the fast one toggles
/// every 64 redraws, the slow one every 128.
pub struct MatrixIndicator {
    config: MatrixIndicatorConfig,
    blink_index: u8,
    blink_fast: bool,
    blink_slow: bool,
}

impl MatrixIndicator {
    pub fn new(config: MatrixIndicatorConfig) -> Self {
        Self {
            config,
            blink_index: 0,
            blink_fast: true,
            blink_slow: true,
        }
    }

    fn advance(&mut self) {
        self.blink_index = self.blink_index.wrapping_add(1);
        if self.blink_index % MATRIX_FAST_DIVISOR == 0 {
            self.blink_fast = !self.blink_fast;
        }
        if self.blink_index % MATRIX_SLOW_DIVISOR == 0 {
            self.blink_slow = !self.blink_slow;
        }
    }

    /// Draw the indicators of one frame
    ///
    /// USB and connected links are solid. Caps lock paints its whole region
    /// last, over the transport cell.
    pub fn render<C: ColorSink>(&mut self, sink: &mut C, status: LinkStatus, caps_lock: bool) {
        self.advance();

        let lit = match (status.transport, status.state) {
            (Transport::Usb, _) | (_, ConnectionState::Connected) => true,
            (_, ConnectionState::Pairing) => self.blink_fast,
            (_, ConnectionState::Disconnected) => self.blink_slow,
        };
        let cell = self.config.cells[status.transport.slot()];
        sink.set_color(cell, if lit { self.config.color } else { Rgb::OFF });

        if caps_lock {
            let (first, last) = self.config.caps_lock_cells;
            for index in first..=last {
                sink.set_color(index, self.config.caps_lock_color);
            }
        }
    }
}
