//! GPIO, timers, watchdog and task helpers.

pub mod button;
pub mod hw_init;
pub mod hw_timer;
pub mod task_pin;
pub mod watchdog;
