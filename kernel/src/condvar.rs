//! Condition variable built directly on [`crate::proc::Process::sleep`];
//! the wait channel is the `Condvar`'s own address, same trick xv6 uses for
//! every other sleep/wakeup pair.
use crate::proc::{procs, Process, CPUS};
use crate::spinlock::MutexGuard;

pub struct Condvar;

impl Condvar {
    pub const fn new() -> Self {
        Self
    }

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let p = CPUS.my_proc().unwrap();
        p.sleep(self as *const _ as usize, guard)
    }

    pub fn notify_all(&self) {
        procs().wakeup(self as *const _ as usize);
    }
}
