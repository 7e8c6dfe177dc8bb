//! Paced bus thread
//!
//! Advances a [`MockTransport`] clock in real time, one frame per
//! `frame_period`. Frames missed while the thread was descheduled are caught
//! up in a burst so the device clock tracks wall time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use spin_sleep::{SpinSleeper, SpinStrategy};
use tracing::debug;

use crate::mock::MockTransport;

/// Handle to a running bus thread; stops the thread when dropped
#[derive(Debug)]
pub struct BusHandle {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl BusHandle {
    /// Stop pacing and join the thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for BusHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl MockTransport {
    /// Start a thread that advances the clock in real time
    ///
    /// The thread exits on [`BusHandle::stop`] or when the device is unplugged.
    pub fn spawn_bus(self: &Arc<Self>) -> std::io::Result<BusHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let transport = Arc::clone(self);
        let flag = Arc::clone(&running);
        let period = self.config().frame_period;

        let thread = thread::Builder::new()
            .name("mock-usb-bus".to_string())
            .spawn(move || {
                let sleeper =
                    SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
                let started = Instant::now();
                let mut ticks: u128 = 0;
                let period_ns = period.as_nanos().max(1);

                while flag.load(Ordering::Acquire) && !transport.is_unplugged() {
                    let target = started.elapsed().as_nanos() / period_ns;
                    while ticks < target {
                        transport.tick();
                        ticks += 1;
                    }
                    sleeper.sleep(period);
                }
                flag.store(false, Ordering::Release);
                debug!(frames = ticks as u64, "Mock bus stopped");
            })?;

        Ok(BusHandle {
            running,
            thread: Some(thread),
        })
    }
}
