//! Wireless keyboard report reconciliation
//!
//! The radio module only understands a boot-protocol shaped keyboard report
//! with [`WLS_KEYBOARD_REPORT_KEYS`] keycode slots, and its wireless protocol
//! has no flag telling the host that a report is an NKRO report. Keys that
//! don't fit the slots are sent in a second message, an NKRO bitmap.
//!
//! [`ReportReconciler`] keeps the slot assignment between reports so a held
//! key never moves between slots, and every report satisfies:
//!
//! ```text
//! slots ∪ overflow bitmap == pressed keys, slots ∩ overflow bitmap == ∅
//! ```

use usbd_hid::descriptor::KeyboardReport;

pub use crate::config::WLS_KEYBOARD_REPORT_KEYS;
use crate::transport::WirelessModule;

/// Size of an NKRO bitmap in bytes, one bit per key identifier
pub const NKRO_REPORT_BYTES: usize = 30;

/// Number of key identifiers an NKRO bitmap can hold
pub const NKRO_KEY_COUNT: usize = NKRO_REPORT_BYTES * 8;

/// Key identifier marking an unused keycode slot
pub const EMPTY_SLOT: u8 = 0x00;

fn bit_is_set(bits: &[u8; NKRO_REPORT_BYTES], key: u8) -> bool {
    let byte = key as usize / 8;
    byte < NKRO_REPORT_BYTES && bits[byte] & (1 << (key % 8)) != 0
}

fn set_bit(bits: &mut [u8; NKRO_REPORT_BYTES], key: u8) {
    let byte = key as usize / 8;
    if byte < NKRO_REPORT_BYTES {
        bits[byte] |= 1 << (key % 8);
    }
}

fn clear_bit(bits: &mut [u8; NKRO_REPORT_BYTES], key: u8) {
    let byte = key as usize / 8;
    if byte < NKRO_REPORT_BYTES {
        bits[byte] &= !(1 << (key % 8));
    }
}

/// Snapshot of all pressed keys, as produced by the keyboard's NKRO report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NkroReport {
    /// Modifier bits, same layout as the keyboard report's modifier byte
    pub modifier: u8,

    /// One bit per pressed key identifier
    pub bits: [u8; NKRO_REPORT_BYTES],
}

impl NkroReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from a list of pressed keys
    pub fn from_keys(modifier: u8, keys: &[u8]) -> Self {
        let mut report = Self {
            modifier,
            ..Self::default()
        };
        for key in keys {
            report.press(*key);
        }
        report
    }

    /// Mark a key as pressed
    ///
    /// [`EMPTY_SLOT`] and identifiers beyond the bitmap are ignored.
    pub fn press(&mut self, key: u8) {
        if key != EMPTY_SLOT {
            set_bit(&mut self.bits, key);
        }
    }

    pub fn release(&mut self, key: u8) {
        clear_bit(&mut self.bits, key);
    }

    pub fn is_pressed(&self, key: u8) -> bool {
        key != EMPTY_SLOT && bit_is_set(&self.bits, key)
    }

    /// Number of pressed keys
    pub fn key_count(&self) -> usize {
        let total: u32 = self.bits.iter().map(|b| b.count_ones()).sum();
        total as usize - bit_is_set(&self.bits, EMPTY_SLOT) as usize
    }

    /// Pressed keys, lowest identifier first
    pub fn pressed_keys(&self) -> impl Iterator<Item = u8> + '_ {
        self.bits
            .iter()
            .enumerate()
            .flat_map(|(byte, bits)| {
                (0..8u8)
                    .filter(move |bit| *bits & (1u8 << *bit) != 0)
                    .map(move |bit| ((byte as u8) << 3) | bit)
            })
            .filter(|key| *key != EMPTY_SLOT)
    }
}

/// Splits pressed keys between the keycode slots and the overflow bitmap
///
/// # Assignment rules
///
/// - keys are visited lowest identifier first
/// - a key already in a slot keeps it
/// - a newly pressed key takes the first free slot, including a slot freed
///   by a release in the same update, and overflows to the bitmap otherwise
/// - a key that was already in the bitmap moves into a slot only if that
///   slot was free before the update started; it stays in the bitmap when
///   the only free slots were released in this very update
/// - released keys are cleared from both places
pub struct ReportReconciler {
    /// Keyboard report sent to the module, its keycodes are the slots
    report: KeyboardReport,

    /// Keys that didn't fit the slots
    overflow: [u8; NKRO_REPORT_BYTES],
}

impl Default for ReportReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportReconciler {
    pub fn new() -> Self {
        Self {
            report: KeyboardReport {
                modifier: 0,
                reserved: 0,
                leds: 0,
                keycodes: [EMPTY_SLOT; 6],
            },
            overflow: [0; NKRO_REPORT_BYTES],
        }
    }

    /// The keyboard report as it will be sent
    pub fn report(&self) -> &KeyboardReport {
        &self.report
    }

    /// Current keycode slots
    pub fn slots(&self) -> &[u8] {
        &self.report.keycodes[..WLS_KEYBOARD_REPORT_KEYS]
    }

    /// Current overflow bitmap
    pub fn overflow(&self) -> &[u8; NKRO_REPORT_BYTES] {
        &self.overflow
    }

    /// Whether `key` is reported through the overflow bitmap
    pub fn is_overflowed(&self, key: u8) -> bool {
        bit_is_set(&self.overflow, key)
    }

    /// Every key currently reported, slots first, then the bitmap
    pub fn reported_keys(&self) -> impl Iterator<Item = u8> + '_ {
        let slotted = self.slots().iter().copied().filter(|k| *k != EMPTY_SLOT);
        let overflowed = (1..=u8::MAX).filter(move |k| self.is_overflowed(*k));
        slotted.chain(overflowed)
    }

    /// Update the slots and the overflow bitmap from a new snapshot
    ///
    /// `None` clears everything, as sent on disconnect.
    pub fn reconcile(&mut self, snapshot: Option<&NkroReport>) {
        let Some(snapshot) = snapshot else {
            self.report.modifier = 0;
            self.report.keycodes = [EMPTY_SLOT; 6];
            self.overflow = [0; NKRO_REPORT_BYTES];
            return;
        };

        self.report.modifier = snapshot.modifier;

        let slots = &mut self.report.keycodes[..WLS_KEYBOARD_REPORT_KEYS];
        let mut free_before = [false; WLS_KEYBOARD_REPORT_KEYS];
        for (free, slot) in free_before.iter_mut().zip(slots.iter()) {
            *free = *slot == EMPTY_SLOT;
        }

        // Find key up and clear it
        for slot in slots.iter_mut() {
            if *slot != EMPTY_SLOT && !snapshot.is_pressed(*slot) {
                trace!("Key {:#X} released from slot", *slot);
                *slot = EMPTY_SLOT;
            }
        }

        let previous = self.overflow;
        self.overflow = [0; NKRO_REPORT_BYTES];

        for key in snapshot.pressed_keys() {
            if slots.contains(&key) {
                continue;
            }
            let carried = bit_is_set(&previous, key);
            let free = slots
                .iter()
                .zip(free_before.iter())
                .position(|(slot, was_free)| *slot == EMPTY_SLOT && (!carried || *was_free));
            match free {
                Some(i) => slots[i] = key,
                None => {
                    trace!("Key {:#X} overflows to NKRO bitmap", key);
                    set_bit(&mut self.overflow, key);
                }
            }
        }
    }

    /// Reconcile a snapshot and send both reports to the module
    ///
    /// Blocks, pumping the module, until its message channel is idle. This is
    /// the only place the core waits on the module, and the wait is bounded
    /// by the module's own timeout only.
    pub fn send<M: WirelessModule>(&mut self, module: &mut M, snapshot: Option<&NkroReport>) {
        self.reconcile(snapshot);

        while module.is_busy() {
            module.pump();
        }

        debug!(
            "Sending wireless keyboard report: {:?}",
            self.report.keycodes
        );
        module.send_keyboard(&self.report);
        module.send_nkro(&self.overflow);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockModule, ModuleEvent};

    const A: u8 = 0x04;
    const B: u8 = 0x05;
    const C: u8 = 0x06;
    const D: u8 = 0x07;
    const E: u8 = 0x08;
    const F: u8 = 0x09;
    const G: u8 = 0x0A;
    const H: u8 = 0x0B;

    /// Assert that the reported keys are exactly the pressed keys
    fn assert_consistent(reconciler: &ReportReconciler, snapshot: &NkroReport) {
        let mut seen = [false; 256];
        let mut count = 0;
        for key in reconciler.reported_keys() {
            assert!(!seen[key as usize], "key {:#X} reported twice", key);
            seen[key as usize] = true;
            assert!(snapshot.is_pressed(key), "key {:#X} reported but not pressed", key);
            count += 1;
        }
        assert_eq!(count, snapshot.key_count());
        for key in reconciler.slots() {
            if *key != EMPTY_SLOT {
                assert!(!reconciler.is_overflowed(*key));
            }
        }
    }

    fn slot_set(reconciler: &ReportReconciler) -> [u8; WLS_KEYBOARD_REPORT_KEYS] {
        let mut slots = [0; WLS_KEYBOARD_REPORT_KEYS];
        slots.copy_from_slice(reconciler.slots());
        slots
    }

    #[test]
    fn test_snapshot_ascending_order() {
        let snapshot = NkroReport::from_keys(0, &[0x50, A, 0x20, 0xE0]);
        let keys: std::vec::Vec<u8> = snapshot.pressed_keys().collect();
        assert_eq!(keys, [A, 0x20, 0x50, 0xE0]);
        assert_eq!(snapshot.key_count(), 4);
    }

    #[test]
    fn test_snapshot_ignores_empty_slot_key() {
        let mut snapshot = NkroReport::new();
        snapshot.press(EMPTY_SLOT);
        assert_eq!(snapshot.key_count(), 0);
        assert_eq!(snapshot.pressed_keys().count(), 0);
    }

    #[test]
    fn test_few_keys_fill_slots() {
        let mut reconciler = ReportReconciler::new();
        let snapshot = NkroReport::from_keys(0x02, &[C, A, B]);
        reconciler.reconcile(Some(&snapshot));

        assert_eq!(reconciler.slots(), &[A, B, C, EMPTY_SLOT, EMPTY_SLOT]);
        assert_eq!(reconciler.report().modifier, 0x02);
        assert_eq!(reconciler.overflow(), &[0; NKRO_REPORT_BYTES]);
        assert_consistent(&reconciler, &snapshot);
    }

    #[test]
    fn test_slots_are_stable() {
        let mut reconciler = ReportReconciler::new();
        reconciler.reconcile(Some(&NkroReport::from_keys(0, &[C])));
        reconciler.reconcile(Some(&NkroReport::from_keys(0, &[A, C])));
        // C keeps slot 0 even though A has a lower identifier
        assert_eq!(reconciler.slots(), &[C, A, EMPTY_SLOT, EMPTY_SLOT, EMPTY_SLOT]);
    }

    #[test]
    fn test_seven_keys_overflow() {
        let mut reconciler = ReportReconciler::new();
        let snapshot = NkroReport::from_keys(0, &[G, F, E, D, C, B, A]);
        reconciler.reconcile(Some(&snapshot));

        assert_eq!(reconciler.slots(), &[A, B, C, D, E]);
        assert!(reconciler.is_overflowed(F));
        assert!(reconciler.is_overflowed(G));
        assert_consistent(&reconciler, &snapshot);
    }

    #[test]
    fn test_release_does_not_promote_overflow_in_same_update() {
        let mut reconciler = ReportReconciler::new();
        reconciler.reconcile(Some(&NkroReport::from_keys(0, &[A, B, C, D, E, F, G])));

        let snapshot = NkroReport::from_keys(0, &[A, B, D, E, F, G]);
        reconciler.reconcile(Some(&snapshot));
        assert_eq!(reconciler.slots(), &[A, B, EMPTY_SLOT, D, E]);
        assert!(reconciler.is_overflowed(F));
        assert!(reconciler.is_overflowed(G));
        assert_consistent(&reconciler, &snapshot);

        // Next update, the slot was already free: lowest overflow key moves in
        reconciler.reconcile(Some(&snapshot));
        assert_eq!(reconciler.slots(), &[A, B, F, D, E]);
        assert!(!reconciler.is_overflowed(F));
        assert!(reconciler.is_overflowed(G));
        assert_consistent(&reconciler, &snapshot);
    }

    #[test]
    fn test_new_key_reuses_freed_slot() {
        let mut reconciler = ReportReconciler::new();
        reconciler.reconcile(Some(&NkroReport::from_keys(0, &[A, B, C, D, E])));

        // C released and H pressed in the same scan
        let snapshot = NkroReport::from_keys(0, &[A, B, D, E, H]);
        reconciler.reconcile(Some(&snapshot));
        assert_eq!(reconciler.slots(), &[A, B, H, D, E]);
        assert_eq!(reconciler.overflow(), &[0; NKRO_REPORT_BYTES]);
        assert_consistent(&reconciler, &snapshot);
    }

    #[test]
    fn test_overflow_key_release() {
        let mut reconciler = ReportReconciler::new();
        reconciler.reconcile(Some(&NkroReport::from_keys(0, &[A, B, C, D, E, F, G])));

        let snapshot = NkroReport::from_keys(0, &[A, B, C, D, E, G]);
        reconciler.reconcile(Some(&snapshot));
        assert_eq!(reconciler.slots(), &[A, B, C, D, E]);
        assert!(!reconciler.is_overflowed(F));
        assert!(reconciler.is_overflowed(G));
        assert_consistent(&reconciler, &snapshot);
    }

    #[test]
    fn test_none_clears_everything() {
        let mut reconciler = ReportReconciler::new();
        reconciler.reconcile(Some(&NkroReport::from_keys(0x01, &[A, B, C, D, E, F, G])));
        reconciler.reconcile(None);

        assert_eq!(reconciler.report().modifier, 0);
        assert_eq!(reconciler.slots(), &[EMPTY_SLOT; WLS_KEYBOARD_REPORT_KEYS]);
        assert_eq!(reconciler.overflow(), &[0; NKRO_REPORT_BYTES]);

        // Fresh assignment afterwards
        let snapshot = NkroReport::from_keys(0, &[G]);
        reconciler.reconcile(Some(&snapshot));
        assert_eq!(reconciler.slots(), &[G, EMPTY_SLOT, EMPTY_SLOT, EMPTY_SLOT, EMPTY_SLOT]);
        assert_consistent(&reconciler, &snapshot);
    }

    #[test]
    fn test_press_release_sequence_stays_consistent() {
        // Deterministic pseudo-random press/release walk over 16 keys
        let mut reconciler = ReportReconciler::new();
        let mut snapshot = NkroReport::new();
        let mut seed: u32 = 0x1234_5678;
        for _ in 0..500 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let key = A + ((seed >> 16) % 16) as u8;
            if snapshot.is_pressed(key) {
                snapshot.release(key);
            } else {
                snapshot.press(key);
            }
            reconciler.reconcile(Some(&snapshot));
            assert_consistent(&reconciler, &snapshot);
        }
    }

    #[test]
    fn test_every_key_pressed_is_reported() {
        let mut reconciler = ReportReconciler::new();
        let mut snapshot = NkroReport::new();
        for key in 1..NKRO_KEY_COUNT as u8 {
            snapshot.press(key);
        }
        reconciler.reconcile(Some(&snapshot));

        assert_eq!(snapshot.key_count(), NKRO_KEY_COUNT - 1);
        assert_eq!(reconciler.reported_keys().count(), NKRO_KEY_COUNT - 1);
        assert_eq!(reconciler.slots(), &[1, 2, 3, 4, 5]);
        assert!(reconciler.reported_keys().eq(1..NKRO_KEY_COUNT as u8));
        assert_consistent(&reconciler, &snapshot);
    }

    #[test]
    fn test_overflow_stays_clear_within_capacity() {
        let mut reconciler = ReportReconciler::new();
        let mut snapshot = NkroReport::new();
        let keys = [A, B, C, D, E, F, G, H];
        // Roll over keys, never more than five down at once
        for (i, key) in keys.iter().enumerate() {
            if i >= WLS_KEYBOARD_REPORT_KEYS {
                snapshot.release(keys[i - WLS_KEYBOARD_REPORT_KEYS]);
                reconciler.reconcile(Some(&snapshot));
                assert_eq!(reconciler.overflow(), &[0; NKRO_REPORT_BYTES]);
            }
            snapshot.press(*key);
            reconciler.reconcile(Some(&snapshot));
            assert_eq!(reconciler.overflow(), &[0; NKRO_REPORT_BYTES]);
            assert_consistent(&reconciler, &snapshot);
        }
        assert_eq!(slot_set(&reconciler), [F, G, H, D, E]);
    }

    #[test]
    fn test_send_waits_for_idle_channel() {
        let mut reconciler = ReportReconciler::new();
        let mut module = MockModule::new();
        module.busy_polls = 3;

        let snapshot = NkroReport::from_keys(0x01, &[A, B, C, D, E, F]);
        reconciler.send(&mut module, Some(&snapshot));

        assert_eq!(module.pumps, 3);
        assert_eq!(module.events.len(), 2);
        assert_eq!(
            module.events[0],
            ModuleEvent::Keyboard {
                modifier: 0x01,
                keycodes: [A, B, C, D, E, EMPTY_SLOT],
            }
        );
        let mut expected = [0u8; NKRO_REPORT_BYTES];
        expected[1] = 1 << (F % 8);
        assert_eq!(module.events[1], ModuleEvent::Nkro(expected));
    }

    #[test]
    fn test_send_none_sends_empty_reports() {
        let mut reconciler = ReportReconciler::new();
        let mut module = MockModule::new();
        reconciler.send(&mut module, Some(&NkroReport::from_keys(0, &[A])));
        module.clear();

        reconciler.send(&mut module, None);
        assert_eq!(
            module.events[0],
            ModuleEvent::Keyboard {
                modifier: 0,
                keycodes: [EMPTY_SLOT; 6],
            }
        );
        assert_eq!(module.events[1], ModuleEvent::Nkro([0; NKRO_REPORT_BYTES]));
        assert_eq!(module.pumps, 0);
    }
}
