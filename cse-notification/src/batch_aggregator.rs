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
use std::time::Duration;
use tokio::sync::Mutex;

use crate::configuration::MIN_BATCH_DURATION;
use crate::duration::parse_duration;
use crate::stats_tracker::StatsTracker;
use crate::workers::WorkerPool;
use crate::{
    helpers, BatchNotify, Envelope, EventCategory, Notification, NotificationConfiguration,
    NotificationError, NotificationStorage, NotificationTransport, NotifyParameters,
    NotifyRequest, ResponseStatusCode, SubscriptionRecord,
};

// Collects notifications of batching subscriptions per (subscription, target) pair in storage, and sends them as
// one aggregated notification once `bn.num` records are pending or `bn.dur` has elapsed since the first one.
// Each pair has at most one flush timer, registered under `<ri>;<nu>`.

/// Effective batch duration of a `bn` configuration, falling back to `default` when it has no `dur`.
///
/// # Errors
///
/// Returns a `BAD_REQUEST` status if `dur` is malformed or shorter than one second.
pub(crate) fn batch_duration(
    bn: &BatchNotify,
    default: Duration,
) -> Result<Duration, NotificationError> {
    let duration = match &bn.dur {
        Some(dur) => parse_duration(dur)?,
        None => default,
    };
    if duration < MIN_BATCH_DURATION {
        return Err(NotificationError::fail_with_code(
            ResponseStatusCode::BadRequest,
            format!("Batch notification duration must be at least {MIN_BATCH_DURATION:?}"),
        ));
    }
    Ok(duration)
}

fn timer_name(ri: &str, nu: &str) -> String {
    format!("{ri};{nu}")
}

pub(crate) struct BatchAggregator {
    config: Arc<NotificationConfiguration>,
    storage: Arc<dyn NotificationStorage>,
    transport: Arc<dyn NotificationTransport>,
    stats: Arc<StatsTracker>,
    // serializes adding records with reading, clearing and sending them
    flush_lock: Mutex<()>,
    timers: WorkerPool<()>,
}

impl BatchAggregator {
    pub(crate) fn new(
        config: Arc<NotificationConfiguration>,
        storage: Arc<dyn NotificationStorage>,
        transport: Arc<dyn NotificationTransport>,
        stats: Arc<StatsTracker>,
    ) -> Self {
        BatchAggregator {
            config,
            storage,
            transport,
            stats,
            flush_lock: Mutex::new(()),
            timers: WorkerPool::new(),
        }
    }

    /// Store `notification` for later aggregated delivery to `nu`, flushing right away if the count threshold is reached.
    pub(crate) async fn enqueue(
        self: &Arc<Self>,
        subscription: &SubscriptionRecord,
        nu: &str,
        notification: Notification,
    ) -> Result<(), NotificationError> {
        let bn = subscription.bn.clone().unwrap_or_default();
        let duration = batch_duration(&bn, self.config.default_batch_duration)?;
        let ri = subscription.ri.as_str();
        debug!("Storing batch notification for {ri}, target {nu}");

        {
            let _guard = self.flush_lock.lock().await;
            self.storage.add_batch_record(ri, nu, notification).await?;
        }

        if let Some(num) = bn.num {
            let count = self.storage.count_batch_records(ri, nu).await?;
            if count >= num as usize {
                debug!("Sending batch notification for {ri}: bn/num {num}, pending {count}");
                self.timers.stop(&timer_name(ri, nu)).await;
                self.flush(ri, nu, subscription.ln).await?;
                return Ok(());
            }
        }

        let name = timer_name(ri, nu);
        if !self.timers.is_running(&name) {
            debug!("Starting batch notification timer {name}, duration {duration:?}");
            let aggregator = self.clone();
            let (ri, nu, latest_only) = (ri.to_string(), nu.to_string(), subscription.ln);
            self.timers
                .start(&name, (), async move {
                    tokio::time::sleep(duration).await;
                    // run the flush detached from the timer, so that stopping the timer cannot interrupt it
                    helpers::spawn_and_log_error(async move {
                        aggregator.flush(&ri, &nu, latest_only).await?;
                        Ok(())
                    });
                })
                .await;
        }
        Ok(())
    }

    /// Send all pending records of a (subscription, target) pair as one aggregated notification.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` if an aggregated notification was delivered successfully
    /// * `Ok(false)` if nothing was pending, or delivery failed
    pub(crate) async fn flush(
        &self,
        ri: &str,
        nu: &str,
        latest_only: bool,
    ) -> Result<bool, NotificationError> {
        let _guard = self.flush_lock.lock().await;

        let mut records = self.storage.get_batch_records(ri, nu).await?;
        if records.is_empty() {
            return Ok(false);
        }
        self.storage.remove_batch_records(ri, nu).await?;
        records.sort_by(|a, b| a.tstamp.cmp(&b.tstamp).then(a.seq.cmp(&b.seq)));

        let count = records.len() as u64;
        let mut notifications: Vec<Notification> =
            records.into_iter().map(|record| record.notification).collect();
        if latest_only {
            notifications = notifications.split_off(notifications.len() - 1);
        }
        let mut request = NotifyRequest::new(
            nu,
            self.config.cse_id.clone(),
            Envelope::aggregate(notifications),
        );
        if latest_only {
            request = request.with_parameters(NotifyParameters {
                ec: Some(EventCategory::Latest),
            });
        }

        debug!("Sending aggregated notification for {ri} to {nu} ({count} pending)");
        self.stats.increment_sent(ri, nu, count).await;
        match self.transport.send_notify(request).await {
            Ok(code) if code.is_success() => {
                self.stats.increment_received(ri, nu, count).await;
                Ok(true)
            }
            Ok(code) => {
                warn!("Aggregated notification for {ri} rejected by {nu}: {code}");
                Ok(false)
            }
            Err(e) => {
                warn!("Error sending aggregated notification for {ri} to {nu}: {e}");
                Ok(false)
            }
        }
    }

    /// Stop the flush timers of all targets of `subscription` and send whatever is still pending.
    pub(crate) async fn flush_all(&self, subscription: &SubscriptionRecord) {
        debug!("Flushing batch notifications of {}", subscription.ri);
        for nu in &subscription.nu {
            self.timers.stop(&timer_name(&subscription.ri, nu)).await;
            if let Err(e) = self.flush(&subscription.ri, nu, subscription.ln).await {
                warn!("Error flushing batch notifications of {} for {nu}: {e}", subscription.ri);
            }
        }
    }

    pub(crate) async fn stop_timers(&self) {
        self.timers.stop_all().await;
    }

    #[cfg(test)]
    pub(crate) fn has_timer(&self, ri: &str, nu: &str) -> bool {
        self.timers.is_running(&timer_name(ri, nu))
    }
}
