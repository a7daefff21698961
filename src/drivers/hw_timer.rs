//! One-shot alarm driver backing the water safety cutoff.
//!
//! [`HwAlarms`] implements [`AlarmPort`].  Expired alarms are not delivered
//! by callback into domain code; they are queued and picked up with
//! [`HwAlarms::poll_fired`] from the network loop, which then hands the id
//! to the actuator.  Handles are cheap clones sharing one alarm table.
//!
//! - **`target_os = "espidf"`**: `esp_timer` one-shots; the callback runs in
//!   the esp_timer task and only pushes the id into a static channel.
//!   `esp_timer_*` calls, handle drops and logging all happen outside the
//!   table lock; the lock only covers slot bookkeeping.
//! - **`not(target_os = "espidf")`**: deadlines against `std::time::Instant`.

use core::cell::RefCell;
use std::sync::Arc;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{debug, warn};

use crate::app::ports::{AlarmId, AlarmPort, AlarmSource};

/// Maximum simultaneously armed alarms.
pub const MAX_ALARMS: usize = 4;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
static FIRED: embassy_sync::channel::Channel<CriticalSectionRawMutex, AlarmId, MAX_ALARMS> =
    embassy_sync::channel::Channel::new();

#[cfg(target_os = "espidf")]
unsafe extern "C" fn alarm_cb(arg: *mut core::ffi::c_void) {
    // The id travels in the pointer value itself.
    let id = AlarmId(arg as usize as u32);
    if FIRED.try_send(id).is_err() {
        log::error!("hw_timer: fired queue full, alarm {} lost", id.0);
    }
}

#[cfg(target_os = "espidf")]
struct TimerHandle(esp_timer_handle_t);

// SAFETY: esp_timer handles are plain ids into the esp_timer service and
// may be started/stopped/deleted from any task.
#[cfg(target_os = "espidf")]
unsafe impl Send for TimerHandle {}

#[cfg(target_os = "espidf")]
impl Drop for TimerHandle {
    fn drop(&mut self) {
        // SAFETY: the handle was created by esp_timer_create and is deleted
        // exactly once, here.  Stopping an expired one-shot is harmless.
        unsafe {
            esp_timer_stop(self.0);
            esp_timer_delete(self.0);
        }
    }
}

#[cfg(target_os = "espidf")]
type ArmedEntry = (AlarmId, TimerHandle);
#[cfg(not(target_os = "espidf"))]
type ArmedEntry = (AlarmId, std::time::Instant);

struct AlarmTable {
    next_id: u32,
    armed: heapless::Vec<ArmedEntry, MAX_ALARMS>,
}

impl AlarmTable {
    fn take_id(&mut self) -> AlarmId {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        AlarmId(self.next_id)
    }

    /// Detach the entry for `id`.  The caller drops it after releasing the
    /// lock, which on device stops and deletes the timer.
    fn remove(&mut self, id: AlarmId) -> Option<ArmedEntry> {
        let i = self.armed.iter().position(|(a, _)| *a == id)?;
        Some(self.armed.swap_remove(i))
    }
}

/// Shared one-shot alarm service.
#[derive(Clone)]
pub struct HwAlarms {
    table: Arc<Mutex<CriticalSectionRawMutex, RefCell<AlarmTable>>>,
}

impl Default for HwAlarms {
    fn default() -> Self {
        Self::new()
    }
}

impl HwAlarms {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(RefCell::new(AlarmTable {
                next_id: 0,
                armed: heapless::Vec::new(),
            }))),
        }
    }

    /// Number of alarms currently armed.
    pub fn armed_count(&self) -> usize {
        self.table.lock(|t| t.borrow().armed.len())
    }

    /// Next expired alarm, if any.  The alarm is disarmed on return.
    #[cfg(target_os = "espidf")]
    pub fn poll_fired(&self) -> Option<AlarmId> {
        let id = FIRED.try_receive().ok()?;
        let expired = self.table.lock(|t| t.borrow_mut().remove(id));
        drop(expired);
        debug!("hw_timer: alarm {} fired", id.0);
        Some(id)
    }

    /// Next expired alarm, if any.  The alarm is disarmed on return.
    #[cfg(not(target_os = "espidf"))]
    pub fn poll_fired(&self) -> Option<AlarmId> {
        let now = std::time::Instant::now();
        let id = self.table.lock(|t| {
            let mut t = t.borrow_mut();
            let i = t.armed.iter().position(|(_, deadline)| *deadline <= now)?;
            Some(t.armed.swap_remove(i).0)
        })?;
        debug!("hw_timer(sim): alarm {} fired", id.0);
        Some(id)
    }

    /// Pull every armed deadline to "now" so the next polls return them.
    #[cfg(not(target_os = "espidf"))]
    pub fn expire_all(&self) {
        let now = std::time::Instant::now();
        self.table.lock(|t| {
            for (_, deadline) in t.borrow_mut().armed.iter_mut() {
                *deadline = now;
            }
        });
    }
}

impl AlarmSource for HwAlarms {
    fn poll_fired(&self) -> Option<AlarmId> {
        HwAlarms::poll_fired(self)
    }
}

impl AlarmPort for HwAlarms {
    #[cfg(target_os = "espidf")]
    fn arm(&mut self, delay_ms: u32) -> Option<AlarmId> {
        let Some(id) = self.table.lock(|t| {
            let mut t = t.borrow_mut();
            (!t.armed.is_full()).then(|| t.take_id())
        }) else {
            warn!("hw_timer: no free alarm slot");
            return None;
        };

        let args = esp_timer_create_args_t {
            callback: Some(alarm_cb),
            arg: id.0 as usize as *mut core::ffi::c_void,
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: c"safety".as_ptr(),
            skip_unhandled_events: false,
        };
        let mut handle: esp_timer_handle_t = core::ptr::null_mut();
        // SAFETY: `args` outlives the call; `handle` is a valid out-pointer.
        let ret = unsafe { esp_timer_create(&args, &mut handle) };
        if ret != ESP_OK as i32 {
            warn!("hw_timer: esp_timer_create failed (rc={})", ret);
            return None;
        }
        let handle = TimerHandle(handle);
        // SAFETY: handle freshly created above.
        let ret = unsafe { esp_timer_start_once(handle.0, u64::from(delay_ms) * 1000) };
        if ret != ESP_OK as i32 {
            warn!("hw_timer: esp_timer_start_once failed (rc={})", ret);
            return None;
        }

        // Another arm may have taken the last slot meanwhile; the handle is
        // then handed back and dropped outside the lock.
        let rejected = self.table.lock(|t| t.borrow_mut().armed.push((id, handle)).err());
        if rejected.is_some() {
            drop(rejected);
            warn!("hw_timer: no free alarm slot");
            return None;
        }
        debug!("hw_timer: alarm {} armed for {} ms", id.0, delay_ms);
        Some(id)
    }

    #[cfg(not(target_os = "espidf"))]
    fn arm(&mut self, delay_ms: u32) -> Option<AlarmId> {
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(u64::from(delay_ms));
        let Some(id) = self.table.lock(|t| {
            let mut t = t.borrow_mut();
            let id = t.take_id();
            t.armed.push((id, deadline)).ok().map(|()| id)
        }) else {
            warn!("hw_timer(sim): no free alarm slot");
            return None;
        };
        debug!("hw_timer(sim): alarm {} armed for {} ms", id.0, delay_ms);
        Some(id)
    }

    fn cancel(&mut self, id: AlarmId) -> bool {
        // Dropped at return, after the lock is released.
        let Some(_entry) = self.table.lock(|t| t.borrow_mut().remove(id)) else {
            return false;
        };
        debug!("hw_timer: alarm {} cancelled", id.0);
        true
    }
}
