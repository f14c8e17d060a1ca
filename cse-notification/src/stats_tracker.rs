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

use log::*;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::{NotificationStatsInfo, NotificationStorage, SubscriptionRecord};

// Per-target notification statistics of subscriptions with `nse` enabled. All counter updates share a single
// exclusive section, and each update re-reads the persisted subscription before writing it back, so that
// concurrent updates from different paths (regular deliveries, batch flushes, window firings) are not lost.

#[derive(Clone, Copy, Debug)]
enum Counter {
    Sent,
    Received,
}

pub(crate) struct StatsTracker {
    storage: Arc<dyn NotificationStorage>,
    lock: Mutex<()>,
}

impl StatsTracker {
    pub(crate) fn new(storage: Arc<dyn NotificationStorage>) -> Self {
        StatsTracker {
            storage,
            lock: Mutex::new(()),
        }
    }

    /// Hold off all statistics updates, for other read-modify-write cycles of subscription records.
    pub(crate) async fn lock_records(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Count `count` notification requests sent to `target`.
    pub(crate) async fn increment_sent(&self, ri: &str, target: &str, count: u64) {
        self.increment_target(ri, target, Counter::Sent, count).await
    }

    /// Count `count` responses received from `target`.
    pub(crate) async fn increment_received(&self, ri: &str, target: &str, count: u64) {
        self.increment_target(ri, target, Counter::Received, count)
            .await
    }

    /// Count one notification event, for every target of the subscription.
    pub(crate) async fn increment_event(&self, ri: &str) {
        debug!("Incrementing notification event stat for {ri}");
        self.update(ri, |nsi| {
            for entry in nsi.iter_mut() {
                entry.noec += 1;
            }
        })
        .await
    }

    async fn increment_target(&self, ri: &str, target: &str, counter: Counter, count: u64) {
        debug!("Incrementing notification stats for {ri} ({counter:?}, {target})");
        self.update(ri, |nsi| {
            if let Some(entry) = nsi.iter_mut().find(|entry| entry.tg == target) {
                match counter {
                    Counter::Sent => entry.rqs += count,
                    Counter::Received => entry.rsr += count,
                }
            }
        })
        .await
    }

    async fn update<F>(&self, ri: &str, apply: F)
    where
        F: FnOnce(&mut Vec<NotificationStatsInfo>),
    {
        let _guard = self.lock.lock().await;

        let mut subscription = match self.storage.get_subscription(ri).await {
            Ok(Some(subscription)) => subscription,
            Ok(None) => {
                debug!("Subscription {ri} is gone, not counting");
                return;
            }
            Err(e) => {
                warn!("Error loading subscription {ri} for statistics: {e}");
                return;
            }
        };
        if !subscription.stats_enabled() {
            return;
        }
        apply(subscription.nsi.get_or_insert_with(Vec::new));

        if let Err(e) = self.storage.update_subscription(&subscription).await {
            warn!("Error updating notification statistics of {ri}: {e}");
        }
    }
}

/// Make `nsi` hold exactly one entry per notification target, keeping existing counters.
/// Does nothing when the subscription carries no `nsi` list. Returns whether anything changed.
pub(crate) fn reconcile_targets(subscription: &mut SubscriptionRecord) -> bool {
    let targets = &subscription.nu;
    let Some(nsi) = subscription.nsi.as_mut() else {
        return false;
    };

    let before = nsi.len();
    nsi.retain(|entry| targets.contains(&entry.tg));
    let mut changed = nsi.len() != before;

    for target in targets {
        if !nsi.iter().any(|entry| &entry.tg == target) {
            nsi.push(NotificationStatsInfo::new(target.clone()));
            changed = true;
        }
    }
    changed
}

/// Apply a new `nse` value to a subscription. `None` means the attribute was removed.
pub(crate) fn update_of_nse(subscription: &mut SubscriptionRecord, new_nse: Option<bool>) {
    match new_nse {
        Some(false) => {
            // stop collecting, keep what was collected so far
        }
        Some(true) => {
            subscription.nsi = Some(Vec::new());
            reconcile_targets(subscription);
        }
        None => subscription.nsi = None,
    }
    subscription.nse = new_nse;
}
