//! Raw NOR flash adapter.
//!
//! Implements [`FlashPort`] and [`CoreLockout`] for the settings store.
//!
//! - **`target_os = "espidf"`**: `esp_flash_*` calls on the default chip.
//!   The driver takes the flash-op lock, disables caches and stalls the
//!   other core itself, so the lockout only marks the span and must not
//!   mask interrupts around it.
//! - **`not(target_os = "espidf")`**: a RAM image with real NOR rules
//!   (erase to `0xFF`, program can only clear bits) for host tests.  The
//!   lockout is a critical section.

use crate::app::ports::{CoreLockout, FlashError, FlashPort};
use crate::settings::{ERASE_UNIT, WRITE_UNIT};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

fn check_span(total: usize, offset: usize, len: usize) -> Result<(), FlashError> {
    match offset.checked_add(len) {
        Some(end) if end <= total => Ok(()),
        _ => Err(FlashError::OutOfBounds),
    }
}

// ───────────────────────────────────────────────────────────────
// RawFlash
// ───────────────────────────────────────────────────────────────

pub struct RawFlash {
    #[cfg(target_os = "espidf")]
    size: usize,
    #[cfg(not(target_os = "espidf"))]
    mem: Vec<u8>,
    #[cfg(not(target_os = "espidf"))]
    erases: Vec<(usize, usize)>,
}

#[cfg(target_os = "espidf")]
impl RawFlash {
    /// Bind to the default flash chip.
    pub fn new() -> Result<Self, FlashError> {
        let mut size: u32 = 0;
        // SAFETY: a null chip pointer selects the default chip; `size` is
        // a valid out-pointer for the duration of the call.
        let ret = unsafe { esp_flash_get_size(core::ptr::null_mut(), &mut size) };
        if ret != ESP_OK as i32 {
            return Err(FlashError::Device(ret));
        }
        log::info!("Flash: {} KiB", size / 1024);
        Ok(Self {
            size: size as usize,
        })
    }
}

#[cfg(not(target_os = "espidf"))]
impl RawFlash {
    /// A freshly erased simulated flash of `size` bytes.
    pub fn simulated(size: usize) -> Self {
        log::info!("Flash(sim): {} bytes", size);
        Self {
            mem: vec![0xFF; size],
            erases: Vec::new(),
        }
    }

    /// Flip every bit of one byte, as a torn write or bit rot would.
    pub fn corrupt_byte(&mut self, offset: usize) {
        if let Some(b) = self.mem.get_mut(offset) {
            *b = !*b;
        }
    }

    /// Every `(offset, len)` erase issued so far.
    pub fn erase_log(&self) -> &[(usize, usize)] {
        &self.erases
    }

    /// Raw view of the simulated memory.
    pub fn contents(&self) -> &[u8] {
        &self.mem
    }
}

impl FlashPort for RawFlash {
    #[cfg(target_os = "espidf")]
    fn size(&self) -> usize {
        self.size
    }

    #[cfg(not(target_os = "espidf"))]
    fn size(&self) -> usize {
        self.mem.len()
    }

    #[cfg(target_os = "espidf")]
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        check_span(self.size, offset, buf.len())?;
        // SAFETY: `buf` is valid for `buf.len()` writes; span checked above.
        let ret = unsafe {
            esp_flash_read(
                core::ptr::null_mut(),
                buf.as_mut_ptr().cast(),
                offset as u32,
                buf.len() as u32,
            )
        };
        if ret == ESP_OK as i32 { Ok(()) } else { Err(FlashError::Device(ret)) }
    }

    #[cfg(not(target_os = "espidf"))]
    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        check_span(self.mem.len(), offset, buf.len())?;
        buf.copy_from_slice(&self.mem[offset..offset + buf.len()]);
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        check_span(self.size, offset, len)?;
        if offset % ERASE_UNIT != 0 || len % ERASE_UNIT != 0 {
            return Err(FlashError::Misaligned);
        }
        // SAFETY: span is sector aligned and inside the chip.
        let ret = unsafe { esp_flash_erase_region(core::ptr::null_mut(), offset as u32, len as u32) };
        if ret == ESP_OK as i32 { Ok(()) } else { Err(FlashError::Device(ret)) }
    }

    #[cfg(not(target_os = "espidf"))]
    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        check_span(self.mem.len(), offset, len)?;
        if offset % ERASE_UNIT != 0 || len % ERASE_UNIT != 0 {
            return Err(FlashError::Misaligned);
        }
        self.mem[offset..offset + len].fill(0xFF);
        self.erases.push((offset, len));
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        check_span(self.size, offset, data.len())?;
        if offset % WRITE_UNIT != 0 || data.len() > WRITE_UNIT {
            return Err(FlashError::Misaligned);
        }
        // SAFETY: `data` is valid for `data.len()` reads; span checked above.
        let ret = unsafe {
            esp_flash_write(
                core::ptr::null_mut(),
                data.as_ptr().cast(),
                offset as u32,
                data.len() as u32,
            )
        };
        if ret == ESP_OK as i32 { Ok(()) } else { Err(FlashError::Device(ret)) }
    }

    #[cfg(not(target_os = "espidf"))]
    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        check_span(self.mem.len(), offset, data.len())?;
        if offset % WRITE_UNIT != 0 || data.len() > WRITE_UNIT {
            return Err(FlashError::Misaligned);
        }
        // NOR: programming can only pull bits low.
        for (cell, &b) in self.mem[offset..offset + data.len()].iter_mut().zip(data) {
            *cell &= b;
        }
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// OtherCoreLockout
// ───────────────────────────────────────────────────────────────

/// Keeps the other core off flash while it is unavailable.
#[derive(Default)]
pub struct OtherCoreLockout {
    #[cfg(not(target_os = "espidf"))]
    parked: usize,
}

impl OtherCoreLockout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed lock-out sections (simulation only).
    #[cfg(not(target_os = "espidf"))]
    pub fn parked_sections(&self) -> usize {
        self.parked
    }
}

impl CoreLockout for OtherCoreLockout {
    // esp_flash_erase_region / esp_flash_write park the other core through
    // the IPC flash guard and may yield; wrapping them in a stall or a
    // critical section deadlocks on the flash-op lock.
    #[cfg(target_os = "espidf")]
    fn with_other_core_parked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        log::debug!("Flash: write span, lockout via esp_flash guard");
        f()
    }

    #[cfg(not(target_os = "espidf"))]
    fn with_other_core_parked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        let result = critical_section::with(|_| f());
        self.parked += 1;
        result
    }
}

#[cfg(all(test, not(target_os = "espidf")))]
mod tests {
    use super::*;

    #[test]
    fn program_only_clears_bits() {
        let mut f = RawFlash::simulated(2 * ERASE_UNIT);
        f.program(0, &[0x0F]).unwrap();
        f.program(0, &[0xF0]).unwrap();
        assert_eq!(f.contents()[0], 0x00);
        f.erase(0, ERASE_UNIT).unwrap();
        assert_eq!(f.contents()[0], 0xFF);
    }

    #[test]
    fn misaligned_access_rejected() {
        let mut f = RawFlash::simulated(2 * ERASE_UNIT);
        assert_eq!(f.erase(1, ERASE_UNIT), Err(FlashError::Misaligned));
        assert_eq!(f.erase(0, 100), Err(FlashError::Misaligned));
        assert_eq!(f.program(3, &[0]), Err(FlashError::Misaligned));
        assert_eq!(f.program(0, &[0; WRITE_UNIT + 1]), Err(FlashError::Misaligned));
    }

    #[test]
    fn out_of_bounds_rejected() {
        let mut f = RawFlash::simulated(ERASE_UNIT);
        let mut buf = [0u8; 8];
        assert_eq!(f.read(ERASE_UNIT - 4, &mut buf), Err(FlashError::OutOfBounds));
        assert_eq!(f.erase(ERASE_UNIT, ERASE_UNIT), Err(FlashError::OutOfBounds));
        assert_eq!(f.read(usize::MAX, &mut buf), Err(FlashError::OutOfBounds));
    }

    #[test]
    fn lockout_counts_sections() {
        let mut l = OtherCoreLockout::new();
        let v = l.with_other_core_parked(|| 7);
        assert_eq!(v, 7);
        assert_eq!(l.parked_sections(), 1);
    }
}
