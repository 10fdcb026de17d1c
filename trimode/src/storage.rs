//! Persistent storage of the config word
//!
//! The core only ever needs a single 32-bit word. [`ConfigStorage`] is the
//! opaque get/set pair the storage collaborator provides. It is read once at
//! boot through [`load_config`] and written only when the active transport
//! changes.

#[cfg(feature = "storage")]
use embedded_storage::nor_flash::NorFlash;

use crate::config::ConfigRecord;
use crate::transport::{Result, TrimodeError};

/// Storage of the persisted config word
pub trait ConfigStorage {
    /// Read the stored word, `0` if it was never written
    fn read_word(&mut self) -> Result<u32>;

    /// Replace the stored word
    fn write_word(&mut self, word: u32) -> Result<()>;
}

/// Read the config record, initializing it on first boot
///
/// A blank word is not an error: it is replaced by
/// [`ConfigRecord::first_boot`] and written back immediately. A failed read
/// is treated the same way.
pub fn load_config<S: ConfigStorage>(storage: &mut S) -> ConfigRecord {
    let word = storage.read_word().unwrap_or_else(|e| {
        warn!("Failed to read config word: {:?}, using defaults", e);
        0
    });

    let record = ConfigRecord::from_bits(word);
    if !record.is_blank() {
        debug!("Loaded config word {:#X}", word);
        return record;
    }

    let record = ConfigRecord::first_boot();
    info!("First boot, defaulting to USB");
    if let Err(e) = storage.write_word(record.into_bits()) {
        error!("Failed to persist first boot config: {:?}", e);
    }
    record
}

/// In-memory config storage
///
/// Keeps the word in RAM, for boards without a spare flash page and for
/// testing.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    word: u32,

    /// Total number of writes
    pub writes: usize,
}

impl MemoryStorage {
    pub fn new(word: u32) -> Self {
        Self { word, writes: 0 }
    }

    pub fn word(&self) -> u32 {
        self.word
    }
}

impl ConfigStorage for MemoryStorage {
    fn read_word(&mut self) -> Result<u32> {
        Ok(self.word)
    }

    fn write_word(&mut self, word: u32) -> Result<()> {
        self.word = word;
        self.writes += 1;
        Ok(())
    }
}

/// Config storage on a NOR flash page
///
/// The word is stored little-endian at `offset`, which must be aligned to
/// the flash erase size. The page is erased before every write, so it must
/// not be shared with other data. An erased word (all ones) reads as blank.
#[cfg(feature = "storage")]
pub struct FlashConfigStorage<F: NorFlash> {
    flash: F,
    offset: u32,
}

#[cfg(feature = "storage")]
impl<F: NorFlash> FlashConfigStorage<F> {
    pub fn new(flash: F, offset: u32) -> Self {
        Self { flash, offset }
    }

    pub fn into_inner(self) -> F {
        self.flash
    }
}

#[cfg(feature = "storage")]
impl<F: NorFlash> ConfigStorage for FlashConfigStorage<F> {
    fn read_word(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.flash
            .read(self.offset, &mut buf)
            .map_err(|_| TrimodeError::Storage)?;
        match u32::from_le_bytes(buf) {
            u32::MAX => Ok(0),
            word => Ok(word),
        }
    }

    fn write_word(&mut self, word: u32) -> Result<()> {
        let page_end = self.offset + F::ERASE_SIZE as u32;
        self.flash
            .erase(self.offset, page_end)
            .map_err(|_| TrimodeError::Storage)?;
        self.flash
            .write(self.offset, &word.to_le_bytes())
            .map_err(|_| TrimodeError::Storage)
    }
}
