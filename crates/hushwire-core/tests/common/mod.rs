//! Shared test environment.

#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use hushwire_core::Environment;

/// Deterministic environment: counter-driven bytes and a settable clock.
#[derive(Clone, Default)]
pub struct SeededEnv {
    counter: Arc<AtomicU64>,
    now: Arc<AtomicU64>,
}

impl SeededEnv {
    pub fn at(now: u64) -> Self {
        let env = Self::default();
        env.set_now(now);
        env
    }

    pub fn set_now(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Environment for SeededEnv {
    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        let n = self.counter.fetch_add(1, Ordering::SeqCst).to_le_bytes();
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = n[i % n.len()].wrapping_add(i as u8);
        }
    }

    fn wall_clock_secs(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
