//! Tri-mode keyboard core
//!
//! [`TrimodeKeyboard`] wires the selector, the transport controller and the
//! report reconciler together, and publishes the link status for the
//! indicators. The board firmware feeds it key events, keyboard reports and
//! a periodic tick:
//!
//! ```ignore
//! static LINK: SharedLinkStatus<CriticalSectionRawMutex> = SharedLinkStatus::new();
//! static STOP: Signal<CriticalSectionRawMutex, ()> = Signal::new();
//!
//! let mut keyboard = TrimodeKeyboard::new(module, storage, TrimodeConfig::neo70(), &LINK)?;
//! keyboard.init(&mut delay, Instant::now());
//! let indicators = keyboard.indicators();
//!
//! join(indicators.run(pins, &STOP), async {
//!     loop {
//!         if let Some((key, event)) = next_trimode_key().await {
//!             keyboard.process_key(key, event);
//!         }
//!         keyboard.send_report(Some(&nkro));
//!         keyboard.task(Instant::now());
//!     }
//! })
//! .await;
//! ```

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::config::{IndicatorKind, TrimodeConfig};
use crate::controller::TransportController;
use crate::indicator::{ColorSink, IndicatorTask, LinkStatus, MatrixIndicator, SharedLinkStatus};
use crate::power::{LedPower, NoPin};
use crate::report::{NkroReport, ReportReconciler};
use crate::selector::{DeviceSelector, KeyEvent, TrimodeKey};
use crate::storage::ConfigStorage;
use crate::transport::{Result, WirelessModule};

pub struct TrimodeKeyboard<'a, M: WirelessModule, S: ConfigStorage, R: RawMutex, L: OutputPin = NoPin> {
    config: TrimodeConfig,
    selector: DeviceSelector,
    controller: TransportController<M, S>,
    reconciler: ReportReconciler,

    /// Published after every change of the link
    link: &'a SharedLinkStatus<R>,

    /// Present on boards drawing the indicators on the RGB matrix
    matrix: Option<MatrixIndicator>,

    led_power: Option<LedPower<L>>,
}

impl<'a, M: WirelessModule, S: ConfigStorage, R: RawMutex> TrimodeKeyboard<'a, M, S, R> {
    /// Validate `config` and load the persisted transport
    ///
    /// The "next device" cursor starts at the persisted transport.
    pub fn new(module: M, storage: S, config: TrimodeConfig, link: &'a SharedLinkStatus<R>) -> Result<Self> {
        config.check()?;
        let controller = TransportController::new(module, storage, &config);
        let selector = DeviceSelector::starting_at(controller.active());
        let matrix = match config.indicator {
            IndicatorKind::Pins => None,
            IndicatorKind::Matrix(m) => Some(MatrixIndicator::new(m)),
        };

        let keyboard = Self {
            config,
            selector,
            controller,
            reconciler: ReportReconciler::new(),
            link,
            matrix,
            led_power: None,
        };
        keyboard.publish();
        Ok(keyboard)
    }

    /// Take the LED power line, powering the LEDs
    ///
    /// The line is cut on suspend and restored on wake-up.
    pub fn with_led_power<L: OutputPin>(self, pin: L) -> Result<TrimodeKeyboard<'a, M, S, R, L>> {
        Ok(TrimodeKeyboard {
            config: self.config,
            selector: self.selector,
            controller: self.controller,
            reconciler: self.reconciler,
            link: self.link,
            matrix: self.matrix,
            led_power: Some(LedPower::new(pin)?),
        })
    }
}

impl<'a, M: WirelessModule, S: ConfigStorage, R: RawMutex, L: OutputPin> TrimodeKeyboard<'a, M, S, R, L> {
    /// Run the boot handshake
    pub fn init<D: DelayNs>(&mut self, delay: &mut D, now: Instant) {
        self.controller.init(delay, now);
        self.publish();
    }

    /// Handle a transport key event
    ///
    /// Returns `false` when the event was consumed and must not reach the
    /// host, like a keyboard's record processing hook.
    pub fn process_key(&mut self, key: TrimodeKey, event: KeyEvent) -> bool {
        let consumed = self.selector.process_key(&mut self.controller, key, event);
        self.publish();
        !consumed
    }

    /// Reconcile and transmit a keyboard report, `None` releases everything
    pub fn send_report(&mut self, snapshot: Option<&NkroReport>) {
        self.reconciler.send(self.controller.module_mut(), snapshot);
    }

    /// Periodic housekeeping, also picks up connection state changes
    pub fn task(&mut self, now: Instant) {
        self.controller.task(now);
        self.publish();
    }

    /// Host suspended: cut the LED power
    pub fn suspend_power_down(&mut self) {
        if let Some(power) = self.led_power.as_mut() {
            if let Err(e) = power.disable() {
                warn!("Failed to cut LED power: {:?}", e);
            }
        }
    }

    /// Host resumed: restore the LED power and re-evaluate the link
    pub fn suspend_wakeup(&mut self) {
        if let Some(power) = self.led_power.as_mut() {
            if let Err(e) = power.enable() {
                warn!("Failed to restore LED power: {:?}", e);
            }
        }
        self.controller.suspend_wakeup();
        self.publish();
    }

    pub fn allow_low_power_timeout(&self) -> bool {
        self.controller.allow_low_power_timeout()
    }

    /// Whether to enter low power mode after `idle` without input
    pub fn should_sleep(&self, idle: Duration) -> bool {
        self.controller.should_sleep(idle)
    }

    pub fn link_status(&self) -> LinkStatus {
        self.controller.link_status()
    }

    /// Indicator task reading the published link status
    ///
    /// The task doesn't borrow the keyboard, run it next to key handling.
    pub fn indicators(&self) -> IndicatorTask<'a, R> {
        IndicatorTask::new(self.link, &self.config)
    }

    /// Draw the indicators of one lighting frame
    ///
    /// Returns `false` on boards without matrix indicators.
    pub fn render_indicators<C: ColorSink>(&mut self, sink: &mut C, caps_lock: bool) -> bool {
        let status = self.controller.link_status();
        match self.matrix.as_mut() {
            Some(matrix) => {
                matrix.render(sink, status, caps_lock);
                true
            }
            None => false,
        }
    }

    /// Tapping term of a transport key in milliseconds
    pub fn tapping_term(&self, key: TrimodeKey) -> u16 {
        key.tapping_term(&self.config)
    }

    pub fn config(&self) -> &TrimodeConfig {
        &self.config
    }

    pub fn controller(&self) -> &TransportController<M, S> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut TransportController<M, S> {
        &mut self.controller
    }

    pub fn reconciler(&self) -> &ReportReconciler {
        &self.reconciler
    }

    pub fn take_led_power(&mut self) -> Option<LedPower<L>> {
        self.led_power.take()
    }

    fn publish(&self) {
        self.link.set(self.controller.link_status());
    }
}
