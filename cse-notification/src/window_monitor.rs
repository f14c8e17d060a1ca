/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use async_trait::async_trait;
use log::*;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::duration::parse_duration;
use crate::workers::WorkerPool;
use crate::{NotificationError, ResponseStatusCode, TimeWindow, TimeWindowType};

// Time window state machines of cross-resource subscriptions (CRS). Each CRS has at most one window worker, which
// owns the set of unique notifier ids collected in its current window; notifier events reach it only through its
// mailbox. Periodic windows are evaluated on every tick and always start over empty, sliding windows fire as soon
// as enough notifiers are collected and are discarded when their deadline passes without that happening.
// Workers only hold a weak reference to their trigger, and end once it is gone.

const PERIODIC_PREFIX: &str = "crsPeriodic_";
const SLIDING_PREFIX: &str = "crsSliding_";

// Longer windows are timed as if they were this long, keeping deadlines representable
const MAX_TIMER_DURATION: Duration = Duration::from_secs(86400 * 365 * 30);

/// Receiver of satisfied windows.
#[async_trait]
pub(crate) trait WindowTrigger: Send + Sync {
    /// Called when a window of cross-resource subscription `crs_ri` collected its expected number of notifiers.
    ///
    /// # Returns
    ///
    /// Whether the subscription still exists; a periodic window stops once this is `false`.
    async fn window_satisfied(&self, crs_ri: &str) -> bool;
}

/// Window size (`tws`) of a time window descriptor.
///
/// # Errors
///
/// Returns a `BAD_REQUEST` status if `tws` is malformed or zero.
pub(crate) fn window_size(window: &TimeWindow) -> Result<Duration, NotificationError> {
    let size = parse_duration(&window.tws)?;
    if size.is_zero() {
        return Err(NotificationError::fail_with_code(
            ResponseStatusCode::BadRequest,
            "Time window size must not be zero",
        ));
    }
    Ok(size)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WindowKind {
    Periodic {
        interval: Duration,
        expected_count: usize,
    },
    Sliding,
}

#[derive(Clone)]
pub(crate) struct WindowMailbox {
    notifiers: UnboundedSender<String>,
    kind: WindowKind,
    trigger: Weak<dyn WindowTrigger>,
}

pub(crate) struct WindowMonitors {
    workers: WorkerPool<WindowMailbox>,
    // makes looking up, feeding and starting sliding windows one step
    sliding: Mutex<()>,
}

impl WindowMonitors {
    pub(crate) fn new() -> Self {
        WindowMonitors {
            workers: WorkerPool::new(),
            sliding: Mutex::new(()),
        }
    }

    /// Start the periodic window of `crs_ri`, replacing any window it had before.
    pub(crate) async fn start_periodic(
        &self,
        crs_ri: &str,
        interval: Duration,
        expected_count: usize,
        trigger: Arc<dyn WindowTrigger>,
    ) {
        self.spawn_periodic(crs_ri, interval, expected_count, Arc::downgrade(&trigger))
            .await;
    }

    async fn spawn_periodic(
        &self,
        crs_ri: &str,
        interval: Duration,
        expected_count: usize,
        trigger: Weak<dyn WindowTrigger>,
    ) {
        debug!("Starting periodic window for {crs_ri}, window size {interval:?}");
        let (sender, receiver) = mpsc::unbounded_channel();
        let mailbox = WindowMailbox {
            notifiers: sender,
            kind: WindowKind::Periodic {
                interval,
                expected_count,
            },
            trigger: trigger.clone(),
        };
        self.workers
            .start(
                &format!("{PERIODIC_PREFIX}{crs_ri}"),
                mailbox,
                periodic_window(
                    crs_ri.to_string(),
                    interval,
                    expected_count,
                    receiver,
                    trigger,
                ),
            )
            .await;
    }

    async fn start_sliding(
        &self,
        crs_ri: &str,
        window_size: Duration,
        expected_count: usize,
        first_notifier: String,
        trigger: Weak<dyn WindowTrigger>,
    ) {
        debug!("Starting sliding window for {crs_ri}, window size {window_size:?}");
        let (sender, receiver) = mpsc::unbounded_channel();
        let mailbox = WindowMailbox {
            notifiers: sender,
            kind: WindowKind::Sliding,
            trigger: trigger.clone(),
        };
        self.workers
            .start(
                &format!("{SLIDING_PREFIX}{crs_ri}"),
                mailbox,
                sliding_window(
                    crs_ri.to_string(),
                    window_size,
                    expected_count,
                    first_notifier,
                    receiver,
                    trigger,
                ),
            )
            .await;
    }

    /// Stop whatever window `crs_ri` has running, discarding the notifiers it collected.
    pub(crate) async fn stop(&self, crs_ri: &str) {
        debug!("Stopping windows of {crs_ri}");
        self.workers
            .stop(&format!("{PERIODIC_PREFIX}{crs_ri}"))
            .await;
        self.workers.stop(&format!("{SLIDING_PREFIX}{crs_ri}")).await;
    }

    /// Hand a notification from `notifier` to the window of `crs_ri`.
    ///
    /// A sliding window is started by the first notification that finds none accepting notifiers, including
    /// one that is just firing. Periodic windows are only ever started explicitly, so a notification arriving
    /// without one running is dropped.
    pub(crate) async fn receive_notifier_event(
        &self,
        crs_ri: &str,
        window: &TimeWindow,
        notifier: &str,
        trigger: Arc<dyn WindowTrigger>,
    ) -> Result<(), NotificationError> {
        match window.twt {
            TimeWindowType::Sliding => {
                let name = format!("{SLIDING_PREFIX}{crs_ri}");
                let _guard = self.sliding.lock().await;
                if let Some(mailbox) = self.workers.find(&name) {
                    if mailbox.notifiers.send(notifier.to_string()).is_ok() {
                        return Ok(());
                    }
                    // the window is firing, it ends by itself
                    self.workers.detach(&name);
                }
                let size = window_size(window)?;
                self.start_sliding(
                    crs_ri,
                    size,
                    window.expected_count(),
                    notifier.to_string(),
                    Arc::downgrade(&trigger),
                )
                .await;
            }
            TimeWindowType::Periodic => {
                match self.workers.find(&format!("{PERIODIC_PREFIX}{crs_ri}")) {
                    Some(mailbox) => {
                        if mailbox.notifiers.send(notifier.to_string()).is_err() {
                            debug!("Periodic window of {crs_ri} has ended, ignoring {notifier}");
                        }
                    }
                    None => debug!("No periodic window running for {crs_ri}, ignoring {notifier}"),
                }
            }
        }
        Ok(())
    }

    /// Stop all windows, then start the periodic ones over with their previous parameters.
    pub(crate) async fn restart(&self) {
        info!("Stopping all cross-resource subscription windows");
        let periodic = self.workers.stop_matching(PERIODIC_PREFIX).await;
        self.workers.stop_matching(SLIDING_PREFIX).await;

        for (name, mailbox) in periodic {
            let Some(crs_ri) = name.strip_prefix(PERIODIC_PREFIX) else {
                continue;
            };
            if let WindowKind::Periodic {
                interval,
                expected_count,
            } = mailbox.kind
            {
                self.spawn_periodic(crs_ri, interval, expected_count, mailbox.trigger)
                    .await;
            }
        }
    }

    pub(crate) async fn stop_all(&self) {
        self.workers.stop_all().await;
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self, crs_ri: &str, twt: TimeWindowType) -> bool {
        let prefix = match twt {
            TimeWindowType::Periodic => PERIODIC_PREFIX,
            TimeWindowType::Sliding => SLIDING_PREFIX,
        };
        self.workers.is_running(&format!("{prefix}{crs_ri}"))
    }
}

async fn periodic_window(
    crs_ri: String,
    interval: Duration,
    expected_count: usize,
    mut mailbox: UnboundedReceiver<String>,
    trigger: Weak<dyn WindowTrigger>,
) {
    let interval = interval.min(MAX_TIMER_DURATION);
    let mut notifiers = HashSet::new();
    let mut ticks = time::interval_at(Instant::now() + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let Some(trigger) = trigger.upgrade() else {
                    debug!("Trigger of {crs_ri} is gone, ending periodic window");
                    return;
                };
                debug!(
                    "Checking periodic window of {crs_ri}: {} unique notifiers, expecting {expected_count}",
                    notifiers.len()
                );
                let satisfied = notifiers.len() == expected_count;
                notifiers.clear();
                if satisfied && !trigger.window_satisfied(&crs_ri).await {
                    debug!("{crs_ri} is gone, ending periodic window");
                    return;
                }
            }
            notifier = mailbox.recv() => match notifier {
                Some(notifier) => {
                    notifiers.insert(notifier);
                }
                None => return,
            },
        }
    }
}

async fn sliding_window(
    crs_ri: String,
    window_size: Duration,
    expected_count: usize,
    first_notifier: String,
    mut mailbox: UnboundedReceiver<String>,
    trigger: Weak<dyn WindowTrigger>,
) {
    let window_size = window_size.min(MAX_TIMER_DURATION);
    let mut notifiers = HashSet::from([first_notifier]);
    let deadline = time::sleep(window_size);
    tokio::pin!(deadline);

    loop {
        if notifiers.len() >= expected_count {
            debug!("Sliding window of {crs_ri} collected {} unique notifiers", notifiers.len());
            // notifiers arriving from now on go to a new window
            mailbox.close();
            if let Some(trigger) = trigger.upgrade() {
                trigger.window_satisfied(&crs_ri).await;
            }
            return;
        }
        tokio::select! {
            _ = &mut deadline => {
                debug!(
                    "Sliding window of {crs_ri} timed out with {} of {expected_count} notifiers",
                    notifiers.len()
                );
                return;
            }
            notifier = mailbox.recv() => match notifier {
                Some(notifier) => {
                    if notifiers.insert(notifier) {
                        deadline.as_mut().reset(Instant::now() + window_size);
                    }
                }
                None => return,
            },
        }
    }
}
