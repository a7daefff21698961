//! Recording mocks for integration tests.
//!
//! Each mock keeps its history behind an `Arc` so a test can hand one clone
//! to the code under test and inspect another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::digital::{ErrorKind, ErrorType, OutputPin};
use greenhouse_node::adapters::flash::RawFlash;
use greenhouse_node::app::ports::{
    AlarmId, AlarmPort, AlarmSource, CoreLockout, FlashError, FlashPort, RestartPort,
};
use greenhouse_node::broker::{CommandHandler, TopicId};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ── RecordingPin ──────────────────────────────────────────────

#[derive(Default)]
struct PinLog {
    levels: Vec<bool>,
    fail: bool,
}

/// Output pin that records every level written.
#[derive(Clone, Default)]
pub struct RecordingPin {
    log: Arc<Mutex<PinLog>>,
}

#[allow(dead_code)]
impl RecordingPin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn levels(&self) -> Vec<bool> {
        lock(&self.log).levels.clone()
    }

    pub fn is_high(&self) -> bool {
        lock(&self.log).levels.last().copied().unwrap_or(false)
    }

    /// Make every following write fail.
    pub fn fail_writes(&self, fail: bool) {
        lock(&self.log).fail = fail;
    }

    fn write(&self, level: bool) -> Result<(), ErrorKind> {
        let mut log = lock(&self.log);
        if log.fail {
            return Err(ErrorKind::Other);
        }
        log.levels.push(level);
        Ok(())
    }
}

impl ErrorType for RecordingPin {
    type Error = ErrorKind;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true)
    }
}

// ── ManualAlarms ──────────────────────────────────────────────

#[derive(Default)]
struct AlarmLog {
    next: u32,
    armed: Vec<(AlarmId, u32)>,
    fired: VecDeque<AlarmId>,
    cancelled: Vec<AlarmId>,
    exhausted: bool,
}

/// Alarm facility whose alarms fire only when the test says so.
#[derive(Clone, Default)]
pub struct ManualAlarms {
    log: Arc<Mutex<AlarmLog>>,
}

#[allow(dead_code)]
impl ManualAlarms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every following `arm`.
    pub fn exhaust(&self) {
        lock(&self.log).exhausted = true;
    }

    pub fn armed(&self) -> Vec<(AlarmId, u32)> {
        lock(&self.log).armed.clone()
    }

    pub fn cancelled(&self) -> Vec<AlarmId> {
        lock(&self.log).cancelled.clone()
    }

    /// Expire every armed alarm.
    pub fn fire_all(&self) {
        let mut log = lock(&self.log);
        let armed: Vec<_> = log.armed.drain(..).map(|(id, _)| id).collect();
        log.fired.extend(armed);
    }

    /// Queue a fired alarm id directly, armed or not.
    pub fn inject(&self, id: AlarmId) {
        lock(&self.log).fired.push_back(id);
    }
}

impl AlarmPort for ManualAlarms {
    fn arm(&mut self, delay_ms: u32) -> Option<AlarmId> {
        let mut log = lock(&self.log);
        if log.exhausted {
            return None;
        }
        log.next += 1;
        let id = AlarmId(log.next);
        log.armed.push((id, delay_ms));
        Some(id)
    }

    fn cancel(&mut self, id: AlarmId) -> bool {
        let mut log = lock(&self.log);
        let before = log.armed.len();
        log.armed.retain(|(a, _)| *a != id);
        let found = log.armed.len() != before;
        if found {
            log.cancelled.push(id);
        }
        found
    }
}

impl AlarmSource for ManualAlarms {
    fn poll_fired(&self) -> Option<AlarmId> {
        lock(&self.log).fired.pop_front()
    }
}

// ── Flash and lockout ─────────────────────────────────────────

/// RAM flash that starts failing programs after a set number of calls.
pub struct FaultyFlash {
    inner: RawFlash,
    programs_left: Option<usize>,
    watch: Option<CountingLockout>,
    stray_writes: usize,
}

#[allow(dead_code)]
impl FaultyFlash {
    pub fn new(size: usize) -> Self {
        Self {
            inner: RawFlash::simulated(size),
            programs_left: None,
            watch: None,
            stray_writes: 0,
        }
    }

    /// Count erases and programs issued while `lockout` is not held.
    pub fn watching(size: usize, lockout: &CountingLockout) -> Self {
        Self {
            watch: Some(lockout.clone()),
            ..Self::new(size)
        }
    }

    /// Allow `n` more successful program calls, then fail.
    pub fn fail_after(&mut self, n: usize) {
        self.programs_left = Some(n);
    }

    pub fn stray_writes(&self) -> usize {
        self.stray_writes
    }

    fn note_write(&mut self) {
        if self.watch.as_ref().is_some_and(|l| !l.is_active()) {
            self.stray_writes += 1;
        }
    }
}

impl FlashPort for FaultyFlash {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        self.inner.read(offset, buf)
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        self.note_write();
        self.inner.erase(offset, len)
    }

    fn program(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        self.note_write();
        match self.programs_left.as_mut() {
            Some(0) => Err(FlashError::Device(-1)),
            Some(left) => {
                *left -= 1;
                self.inner.program(offset, data)
            }
            None => self.inner.program(offset, data),
        }
    }
}

#[derive(Default)]
struct LockoutLog {
    sections: usize,
    active: bool,
}

/// Lockout that only counts how often the other core was parked.
#[derive(Clone, Default)]
pub struct CountingLockout {
    log: Arc<Mutex<LockoutLog>>,
}

#[allow(dead_code)]
impl CountingLockout {
    pub fn sections(&self) -> usize {
        lock(&self.log).sections
    }

    pub fn is_active(&self) -> bool {
        lock(&self.log).active
    }
}

impl CoreLockout for CountingLockout {
    fn with_other_core_parked<R>(&mut self, f: impl FnOnce() -> R) -> R {
        {
            let mut log = lock(&self.log);
            log.sections += 1;
            log.active = true;
        }
        let result = f();
        lock(&self.log).active = false;
        result
    }
}

// ── Restart and commands ──────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingRestart {
    armed: Arc<Mutex<Vec<u32>>>,
}

#[allow(dead_code)]
impl RecordingRestart {
    pub fn armed(&self) -> Vec<u32> {
        lock(&self.armed).clone()
    }
}

impl RestartPort for RecordingRestart {
    fn arm_restart(&mut self, timeout_ms: u32) {
        lock(&self.armed).push(timeout_ms);
    }
}

/// Command handler that records `(topic, payload)` pairs.
#[derive(Default)]
pub struct RecordingHandler {
    topics: Vec<&'static str>,
    commands: Mutex<Vec<(TopicId, Vec<u8>)>>,
}

#[allow(dead_code)]
impl RecordingHandler {
    pub fn new(topics: &[&'static str]) -> Self {
        Self {
            topics: topics.to_vec(),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn commands(&self) -> Vec<(TopicId, Vec<u8>)> {
        lock(&self.commands).clone()
    }
}

impl CommandHandler for RecordingHandler {
    fn control_topics(&self) -> &[&'static str] {
        &self.topics
    }

    fn on_command(&self, topic: TopicId, payload: &[u8]) {
        lock(&self.commands).push((topic, payload.to_vec()));
    }
}
