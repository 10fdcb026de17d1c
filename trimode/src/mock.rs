//! Mock radio module for testing
//!
//! Records everything the core sends and simulates the module's view of
//! the active transport and connection state.

use heapless::Vec;
use usbd_hid::descriptor::KeyboardReport;

use crate::report::NKRO_REPORT_BYTES;
use crate::transport::{ConnectionState, ModuleCommand, Transport, WirelessModule};

/// Something the core handed to the module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleEvent {
    Switch {
        old: Transport,
        new: Transport,
        reset: bool,
    },
    Command(ModuleCommand),
    DeviceInfo,
    Keyboard {
        modifier: u8,
        keycodes: [u8; 6],
    },
    Nkro([u8; NKRO_REPORT_BYTES]),
}

/// Mock radio module
///
/// - `request_switch` makes the target the current transport immediately
/// - selecting a different transport drops the connection
/// - `Pair` puts the link in pairing mode
/// - `is_busy` stays true for `busy_polls` pump steps
pub struct MockModule {
    /// Everything sent to the module, in order (visible for testing)
    pub events: Vec<ModuleEvent, 64>,

    pub state: ConnectionState,

    pub current: Transport,

    /// Remaining pump steps before the channel turns idle
    pub busy_polls: usize,

    /// Total pump steps taken
    pub pumps: usize,
}

impl MockModule {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            state: ConnectionState::Connected,
            current: Transport::Usb,
            busy_polls: 0,
            pumps: 0,
        }
    }

    /// Module already on `transport` with the link in `state`
    pub fn on(transport: Transport, state: ConnectionState) -> Self {
        Self {
            current: transport,
            state,
            ..Self::new()
        }
    }

    pub fn commands(&self) -> impl Iterator<Item = ModuleCommand> + '_ {
        self.events.iter().filter_map(|e| match e {
            ModuleEvent::Command(c) => Some(*c),
            _ => None,
        })
    }

    pub fn switches(&self) -> impl Iterator<Item = (Transport, Transport, bool)> + '_ {
        self.events.iter().filter_map(|e| match e {
            ModuleEvent::Switch { old, new, reset } => Some((*old, *new, *reset)),
            _ => None,
        })
    }

    pub fn pair_count(&self) -> usize {
        self.commands().filter(|c| *c == ModuleCommand::Pair).count()
    }

    /// Clear recorded events
    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn record(&mut self, event: ModuleEvent) {
        self.events.push(event).expect("mock event queue full");
    }
}

impl Default for MockModule {
    fn default() -> Self {
        Self::new()
    }
}

impl WirelessModule for MockModule {
    fn connection_state(&self) -> ConnectionState {
        self.state
    }

    fn current_transport(&self) -> Transport {
        self.current
    }

    fn request_switch(&mut self, old: Transport, new: Transport, reset: bool) {
        self.record(ModuleEvent::Switch { old, new, reset });
        if new != self.current {
            self.current = new;
            self.state = ConnectionState::Disconnected;
        }
    }

    fn send_command(&mut self, command: ModuleCommand) {
        self.record(ModuleEvent::Command(command));
        if command == ModuleCommand::Pair {
            self.state = ConnectionState::Pairing;
        }
    }

    fn send_device_info(&mut self, _name: &str) {
        self.record(ModuleEvent::DeviceInfo);
    }

    fn is_busy(&self) -> bool {
        self.busy_polls > 0
    }

    fn pump(&mut self) {
        self.pumps += 1;
        self.busy_polls = self.busy_polls.saturating_sub(1);
    }

    fn send_keyboard(&mut self, report: &KeyboardReport) {
        self.record(ModuleEvent::Keyboard {
            modifier: report.modifier,
            keycodes: report.keycodes,
        });
    }

    fn send_nkro(&mut self, bitmap: &[u8; NKRO_REPORT_BYTES]) {
        self.record(ModuleEvent::Nkro(*bitmap));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_switch_drops_connection() {
        let mut module = MockModule::new();
        module.request_switch(Transport::Usb, Transport::Bt1, false);
        assert_eq!(module.current_transport(), Transport::Bt1);
        assert_eq!(module.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_mock_same_transport_keeps_state() {
        let mut module = MockModule::on(Transport::Bt2, ConnectionState::Connected);
        module.request_switch(Transport::Bt2, Transport::Bt2, false);
        assert_eq!(module.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_mock_pump_clears_busy() {
        let mut module = MockModule::new();
        module.busy_polls = 2;
        assert!(module.is_busy());
        module.pump();
        module.pump();
        assert!(!module.is_busy());
        assert_eq!(module.pumps, 2);
    }
}
