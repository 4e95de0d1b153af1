use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Blocks until a fixed number of threads are inside the same section concurrently.
///
/// Used to prove that two units of work can run at the same time:
/// if either blocked the other, [`arrive`](Self::arrive) would time out.
#[derive(Debug)]
pub struct Overlap {
    expected: usize,
    arrived:  Mutex<usize>,
    condvar:  Condvar,
}

impl Overlap {
    /// Creates a section expecting `expected` concurrent threads.
    pub fn new(expected: usize) -> Self {
        Self { expected, arrived: Mutex::new(0), condvar: Condvar::new() }
    }

    /// Waits until all expected threads have arrived.
    ///
    /// # Panics
    /// Panics if the others do not arrive within 5 seconds.
    pub fn arrive(&self) {
        let mut arrived = self.arrived.lock();
        *arrived += 1;
        log::trace!("Overlap({}/{}).arrive()", *arrived, self.expected);
        assert!(*arrived <= self.expected, "more threads arrived than expected");

        if *arrived == self.expected {
            self.condvar.notify_all();
            return;
        }

        while *arrived < self.expected {
            let result = self.condvar.wait_for(&mut arrived, Duration::from_secs(5));
            if result.timed_out() {
                panic!("Deadlock: only {} of {} threads overlapped", *arrived, self.expected);
            }
        }
    }
}
