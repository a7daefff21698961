//! Persistent settings store.
//!
//! One [`SettingsRecord`] lives in the last erase units of the flash address
//! space.  Validity is decided purely by the two bookend sentinels: a record
//! whose leading sentinel is wrong was never written (or was erased); one
//! whose trailing sentinel disagrees was torn mid-write.
//!
//! ## Power-loss behaviour
//!
//! `save` erases and then programs the region.  A power cut between those
//! two steps leaves an erased region (reads back as [`StoreError::NotFound`])
//! and one during programming leaves a record without a trailing sentinel
//! ([`StoreError::Corrupt`]).  Both fall back to defaults at boot.  Writes are
//! not read back for verification.

pub mod record;

use core::fmt;

use log::{info, warn};

use crate::app::ports::{CoreLockout, FlashError, FlashPort};
pub use record::{FieldDescriptor, SETTABLE_FIELDS, SETTINGS_SENTINEL, SettingsRecord};
use record::RECORD_LEN;

/// Minimum span that can be erased at once.
pub const ERASE_UNIT: usize = 4096;
/// Maximum span written by a single program operation.
pub const WRITE_UNIT: usize = 256;

/// Erase units occupied by the record, rounded up.
pub const REGION_UNITS: usize = RECORD_LEN.div_ceil(ERASE_UNIT);
/// Bytes reserved at the end of flash for the record.
pub const REGION_LEN: usize = REGION_UNITS * ERASE_UNIT;
/// Bytes actually programmed: the record rounded up to whole write units.
const PROGRAM_LEN: usize = RECORD_LEN.div_ceil(WRITE_UNIT) * WRITE_UNIT;

// ───────────────────────────────────────────────────────────────
// Errors
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// Leading sentinel missing: nothing has been saved yet.
    NotFound,
    /// Trailing sentinel does not match: the last write was interrupted.
    Corrupt,
    /// The flash driver failed.
    Flash(FlashError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no settings stored"),
            Self::Corrupt => write!(f, "stored settings corrupt"),
            Self::Flash(e) => write!(f, "flash: {e}"),
        }
    }
}

impl From<FlashError> for StoreError {
    fn from(e: FlashError) -> Self {
        Self::Flash(e)
    }
}

// ───────────────────────────────────────────────────────────────
// SettingsStore
// ───────────────────────────────────────────────────────────────

pub struct SettingsStore<F, L> {
    flash: F,
    lockout: L,
}

impl<F: FlashPort, L: CoreLockout> SettingsStore<F, L> {
    pub fn new(flash: F, lockout: L) -> Self {
        Self { flash, lockout }
    }

    /// Absolute flash offset of the record region.
    pub fn region_offset(&self) -> Result<usize, StoreError> {
        self.flash
            .size()
            .checked_sub(REGION_LEN)
            .ok_or(StoreError::Flash(FlashError::OutOfBounds))
    }

    /// Read and validate the stored record.
    pub fn load(&self) -> Result<SettingsRecord, StoreError> {
        let offset = self.region_offset()?;
        let mut image = vec![0u8; RECORD_LEN];
        self.flash.read(offset, &mut image)?;

        let record = SettingsRecord::from_image(&image).ok_or(StoreError::Corrupt)?;
        if record.leading_sentinel() != SETTINGS_SENTINEL {
            return Err(StoreError::NotFound);
        }
        if record.trailing_sentinel() != record.leading_sentinel() {
            return Err(StoreError::Corrupt);
        }
        Ok(record)
    }

    /// Stamp the bookends and persist the whole record.
    ///
    /// Erase and program run inside the lockout; no flash read is possible
    /// from the other core until this returns.
    pub fn save(&mut self, record: &mut SettingsRecord) -> Result<(), StoreError> {
        record.stamp();
        let offset = self.region_offset()?;

        let mut image = vec![0xFFu8; PROGRAM_LEN];
        image[..RECORD_LEN].copy_from_slice(record.as_bytes());

        let flash = &mut self.flash;
        let result = self.lockout.with_other_core_parked(|| -> Result<(), FlashError> {
            flash.erase(offset, REGION_LEN)?;
            for (i, page) in image.chunks(WRITE_UNIT).enumerate() {
                flash.program(offset + i * WRITE_UNIT, page)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {
                info!(
                    "Settings: saved {} bytes at 0x{:08X} ({} erase units)",
                    RECORD_LEN, offset, REGION_UNITS
                );
                Ok(())
            }
            Err(e) => {
                warn!("Settings: save failed: {}", e);
                Err(e.into())
            }
        }
    }

    /// Load the stored record, or fall back to compiled-in defaults and
    /// persist them.  Never fails: a flash error while saving the defaults
    /// is logged and the in-memory defaults are still returned.
    pub fn load_or_default(&mut self, tls: bool) -> SettingsRecord {
        match self.load() {
            Ok(record) => {
                info!("Settings: loaded ({:?})", record);
                record
            }
            Err(e) => {
                warn!("Settings: {}, using defaults", e);
                let mut record = SettingsRecord::compiled_defaults(tls);
                if let Err(e) = self.save(&mut record) {
                    warn!("Settings: could not persist defaults: {}", e);
                }
                record
            }
        }
    }

    /// Borrow the underlying flash (diagnostics and tests).
    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }
}
