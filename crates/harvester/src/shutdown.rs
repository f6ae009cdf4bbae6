/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Cooperative shutdown signalling between the signal handler and the
//! batching loop.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cloneable shutdown flag.
///
/// The signal task calls [`Shutdown::trigger`] once; the batching loop polls
/// [`Shutdown::is_running`] at its observation points and races
/// [`Shutdown::notified`] against bounded waits so a signal wakes it
/// promptly instead of sleeping out the batch timeout.
#[derive(Clone, Default)]
pub struct Shutdown {
    stop: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// True until [`Shutdown::trigger`] has been called.
    pub fn is_running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst)
    }

    /// Sets the flag and wakes every pending wait.
    pub fn trigger(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Resolves once [`Shutdown::trigger`] has been called.
    pub async fn notified(&self) {
        // Register interest before checking the flag so a trigger between
        // the check and the await is not lost.
        let mut notified = pin!(self.notify.notified());
        notified.as_mut().enable();
        if !self.is_running() {
            return;
        }
        notified.await;
    }
}
