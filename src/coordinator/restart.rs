//! Restart handshake.
//!
//! The network unit raises the flag once new settings are durably written.
//! The sensor unit polls it once per cycle; on seeing it set it claims the
//! request, tears its sensors down, and only then clears it before handing
//! over to the watchdog.  The lock covers the phase change alone; teardown
//! runs outside it and the request stays visible until teardown finishes.
//! The radio and network stack are never reconfigured in place; a full
//! restart is the only way new settings take effect.

use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Requested,
    TearingDown,
}

pub struct RestartHandshake {
    phase: Mutex<CriticalSectionRawMutex, Cell<Phase>>,
}

impl Default for RestartHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl RestartHandshake {
    pub const fn new() -> Self {
        Self {
            phase: Mutex::new(Cell::new(Phase::Idle)),
        }
    }

    /// Ask for a coordinated restart.  Idempotent.
    pub fn request(&self) {
        self.phase.lock(|p| {
            if p.get() == Phase::Idle {
                p.set(Phase::Requested);
            }
        });
        info!("Restart: requested");
    }

    /// True from `request` until the acknowledging teardown has finished.
    pub fn is_requested(&self) -> bool {
        self.phase.lock(Cell::get) != Phase::Idle
    }

    /// If a restart is pending, claim it, run `teardown`, then clear the
    /// flag.  Returns whether it was pending.
    pub fn acknowledge_with(&self, teardown: impl FnOnce()) -> bool {
        let claimed = self.phase.lock(|p| {
            let pending = p.get() == Phase::Requested;
            if pending {
                p.set(Phase::TearingDown);
            }
            pending
        });
        if !claimed {
            return false;
        }
        teardown();
        self.phase.lock(|p| p.set(Phase::Idle));
        true
    }
}

/// Park the current core until the watchdog resets the chip.
pub fn spin_until_reset() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
