//! Transport switching and the boot handshake
//!
//! [`TransportController`] owns the radio module handle and the persisted
//! config record. It turns selection decisions into module commands, runs
//! the one-shot post-boot handshake and writes the config word back whenever
//! the module reports a different active transport.

use embassy_time::{Duration, Instant};
use embedded_hal::delay::DelayNs;

use crate::config::{ConfigRecord, TrimodeConfig};
use crate::indicator::LinkStatus;
use crate::selector::DeviceSwitch;
use crate::storage::{ConfigStorage, load_config};
use crate::transport::{ConnectionState, ModuleCommand, Transport, WirelessModule};

/// Commands sent once the post-boot window has elapsed, in order
const POST_INIT_COMMANDS: [ModuleCommand; 3] = [
    ModuleCommand::FirmwareVersion,
    ModuleCommand::SleepBtEnable,
    ModuleCommand::SleepRf24Enable,
];

/// Drives the radio module and keeps the persisted transport in sync
pub struct TransportController<M: WirelessModule, S: ConfigStorage> {
    module: M,
    storage: S,
    record: ConfigRecord,

    /// Transport of the persisted record, cached
    active: Transport,

    /// Boot time while the post-init action is armed
    post_init_at: Option<Instant>,
    post_init_delay: Duration,

    /// Idle time before low power mode on a wireless link
    low_power_timeout: Duration,

    device_name: &'static str,
    device_info_delay_ms: u32,
}

impl<M: WirelessModule, S: ConfigStorage> TransportController<M, S> {
    /// Load the persisted record and take ownership of the collaborators
    ///
    /// A record naming an unknown device falls back to USB. Nothing is sent
    /// to the module until [`TransportController::init`].
    pub fn new(module: M, mut storage: S, config: &TrimodeConfig) -> Self {
        let record = load_config(&mut storage);
        let active = record.transport().unwrap_or_else(|e| {
            warn!("Persisted transport invalid: {:?}, using USB", e);
            Transport::Usb
        });
        info!("Persisted transport: {:?}", active);

        Self {
            module,
            storage,
            record,
            active,
            post_init_at: None,
            post_init_delay: Duration::from_millis(config.post_init_delay_ms),
            low_power_timeout: Duration::from_millis(config.low_power_timeout_ms as u64),
            device_name: config.device_name,
            device_info_delay_ms: config.device_info_delay_ms,
        }
    }

    /// Boot handshake
    ///
    /// Announces the device name, waits the configured delay, then asks the
    /// module to move from a transport guaranteed to differ from the
    /// persisted one, so that it re-evaluates the link. Arms the post-init
    /// action relative to `now`.
    pub fn init<D: DelayNs>(&mut self, delay: &mut D, now: Instant) {
        info!("Announcing device name {}", self.device_name);
        self.module.send_device_info(self.device_name);
        delay.delay_ms(self.device_info_delay_ms);

        self.switch(self.active.inverse(), self.active, false);
        self.post_init_at = Some(now);
    }

    /// Periodic housekeeping
    ///
    /// Fires the post-init action once the post-init window has elapsed, and
    /// picks up transport changes the module made on its own.
    pub fn task(&mut self, now: Instant) {
        let due = self.post_init_at.is_some_and(|boot| {
            now.checked_duration_since(boot)
                .is_some_and(|elapsed| elapsed >= self.post_init_delay)
        });
        if due {
            self.post_init_at = None;
            self.post_init();
        }
        self.on_transport_changed();
    }

    fn post_init(&mut self) {
        info!("Post-init: module setup");
        for command in POST_INIT_COMMANDS {
            self.send(command);
        }
        self.switch(self.active.inverse(), self.active, false);
    }

    /// Whether the post-init action is still pending
    pub fn post_init_pending(&self) -> bool {
        self.post_init_at.is_some()
    }

    /// Switch the module from `old` to `new`, pairing when `reset` is set
    pub fn switch(&mut self, old: Transport, new: Transport, reset: bool) {
        info!("Switch {:?} -> {:?} (reset: {})", old, new, reset);
        self.module.request_switch(old, new, reset);
        self.apply_switch(old, new, reset);
        self.on_transport_changed();
    }

    /// Send the commands selecting `new`
    ///
    /// `reset` adds a pairing command, except on USB which never pairs.
    pub fn apply_switch(&mut self, old: Transport, new: Transport, reset: bool) {
        trace!("Apply switch from {:?}", old);
        self.send(ModuleCommand::select(new));
        if reset && new.is_wireless() {
            self.send(ModuleCommand::Pair);
        }
    }

    /// Switch by raw device index
    ///
    /// Indices without a transport are ignored.
    pub fn switch_to_index(&mut self, id: u8, reset: bool) {
        match Transport::try_from(id) {
            Ok(new) => self.switch(self.module.current_transport(), new, reset),
            Err(e) => debug!("Ignoring switch: {:?}", e),
        }
    }

    /// Persist the module's current transport if it differs from the record
    ///
    /// Returns `true` when the record changed.
    pub fn on_transport_changed(&mut self) -> bool {
        let current = self.module.current_transport();
        if current == self.active {
            return false;
        }

        self.active = current;
        self.record.set_transport(current);
        match self.storage.write_word(self.record.into_bits()) {
            Ok(()) => info!("Persisted transport {:?}", current),
            Err(e) => error!("Failed to persist transport {:?}: {:?}", current, e),
        }
        true
    }

    /// Host resumed: make the module re-evaluate the current link
    pub fn suspend_wakeup(&mut self) {
        let current = self.module.current_transport();
        self.switch(current, current, false);
    }

    /// Whether idling into low power mode is allowed
    ///
    /// Never on USB, the host powers the board.
    pub fn allow_low_power_timeout(&self) -> bool {
        self.module.current_transport().is_wireless()
    }

    /// Whether the keyboard should enter low power mode after `idle` without input
    pub fn should_sleep(&self, idle: Duration) -> bool {
        self.allow_low_power_timeout() && idle >= self.low_power_timeout
    }

    /// Transport of the persisted record
    pub fn active(&self) -> Transport {
        self.active
    }

    pub fn record(&self) -> ConfigRecord {
        self.record
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.module.connection_state()
    }

    /// Snapshot for the indicators
    pub fn link_status(&self) -> LinkStatus {
        LinkStatus {
            transport: self.active,
            state: self.module.connection_state(),
        }
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn module_mut(&mut self) -> &mut M {
        &mut self.module
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn send(&mut self, command: ModuleCommand) {
        debug!("Module command: {:?}", command);
        self.module.send_command(command);
    }
}

impl<M: WirelessModule, S: ConfigStorage> DeviceSwitch for TransportController<M, S> {
    fn current_transport(&self) -> Transport {
        self.module.current_transport()
    }

    fn connection_state(&self) -> ConnectionState {
        self.module.connection_state()
    }

    fn switch(&mut self, old: Transport, new: Transport, reset: bool) {
        TransportController::switch(self, old, new, reset)
    }
}
