// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Panics reported through `tracing`, with an optional `parking_lot`
//! deadlock watchdog behind the `deadlock_detection` feature.

#[cfg(feature = "deadlock_detection")]
use std::time::Duration;
use std::{
    panic,
    sync::{LazyLock, Once},
};

use backtrace::Backtrace;
use prometheus::{IntCounter, register_int_counter};

pub static PANIC_COUNTER: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("rqueue_panic_counter", "Total number of panics").unwrap()
});

/// Chain a hook in front of the current one that logs the panic message,
/// location and backtrace as an `error!` event and counts it. Installed once
/// per process.
pub fn set_panic_hook() {
    static INSTALL: Once = Once::new();

    INSTALL.call_once(|| {
        let default_hook = panic::take_hook();
        panic::set_hook(Box::new(move |panic| {
            let backtrace = format!("{:?}", Backtrace::new());
            match panic.location() {
                Some(location) => tracing::error!(
                    message = %panic,
                    backtrace = %backtrace,
                    panic.file = location.file(),
                    panic.line = location.line(),
                    panic.column = location.column(),
                ),
                None => tracing::error!(message = %panic, backtrace = %backtrace),
            }
            PANIC_COUNTER.inc();
            default_hook(panic);
        }));

        #[cfg(feature = "deadlock_detection")]
        spawn_deadlock_watchdog();
    });
}

#[cfg(feature = "deadlock_detection")]
fn spawn_deadlock_watchdog() {
    let _ = std::thread::Builder::new()
        .name("deadlock-watchdog".into())
        .spawn(|| {
            loop {
                std::thread::sleep(Duration::from_secs(5));
                let deadlocks = parking_lot::deadlock::check_deadlock();
                if deadlocks.is_empty() {
                    continue;
                }

                tracing::error!(count = deadlocks.len(), "deadlocks detected");
                for (i, threads) in deadlocks.iter().enumerate() {
                    for t in threads {
                        tracing::error!(
                            deadlock = i,
                            thread = ?t.thread_id(),
                            backtrace = ?t.backtrace(),
                        );
                    }
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_is_counted() {
        set_panic_hook();
        let before = PANIC_COUNTER.get();
        let res = std::panic::catch_unwind(|| panic!("boom"));
        assert!(res.is_err());
        assert_eq!(PANIC_COUNTER.get(), before + 1);
    }
}
