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
use chrono::Utc;
use futures::future::join_all;
use log::*;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
#[cfg(test)]
use tokio::sync::oneshot;
use tokio::{
    sync::{
        mpsc::{self, Sender},
        Mutex, Notify,
    },
    task::JoinHandle,
};

use crate::batch_aggregator::{batch_duration, BatchAggregator};
use crate::delivery::{self, DeliveryEvent};
use crate::duration::parse_duration;
use crate::stats_tracker::{self, StatsTracker};
use crate::window_monitor::{window_size, WindowMonitors, WindowTrigger};
use crate::{
    helpers, Envelope, MissingData, Notification, NotificationConfiguration,
    NotificationContentType, NotificationError, NotificationEventType, NotificationStorage,
    NotificationTransport, NotifyRequest, Resource, ResourceEvent, ResourceType,
    ResponseStatusCode, SharedMissingData, SubscriptionRecord, TimeWindow, TimeWindowType,
};

/// Stopper for a running `NotificationManager`, returned by `NotificationManager::run()`.
pub struct NotificationManagerStopper {
    shutdown_notification: Arc<Notify>,
    delivery_joiner: Option<JoinHandle<()>>,
    manager: Arc<NotificationManager>,
}

impl NotificationManagerStopper {
    /// Stop the delivery engine, letting accepted asynchronous deliveries finish, then cancel all batch
    /// timers and time window monitors.
    pub async fn stop(&mut self) {
        let Some(delivery_joiner) = self.delivery_joiner.take() else {
            warn!("Notification manager has already been stopped");
            return;
        };
        self.shutdown_notification.notify_one();
        if let Err(e) = delivery_joiner.await {
            error!("Error shutting down delivery engine: {e}");
        }

        self.manager.windows.stop_all().await;
        self.manager.batches.stop_timers().await;
        info!("Notification manager stopped");
    }
}

/// The subscription and notification engine of a CSE.
///
/// Resource lifecycle events are handed to `check_subscriptions()`, which notifies all matching subscriptions,
/// either immediately, batched, or (for blocking event types) synchronously. Subscription and cross-resource
/// subscription lifecycle operations verify new notification targets and maintain notification statistics,
/// expiration counters and time windows.
pub struct NotificationManager {
    config: Arc<NotificationConfiguration>,
    storage: Arc<dyn NotificationStorage>,
    transport: Arc<dyn NotificationTransport>,

    stats: Arc<StatsTracker>,
    batches: Arc<BatchAggregator>,
    windows: WindowMonitors,

    async_notifications: AtomicBool,
    delivery_sender: Sender<DeliveryEvent>,
    // makes reload-decrement-update of expiration counters atomic
    expiration_lock: Mutex<()>,
}

impl NotificationManager {
    /// Start a notification manager.
    ///
    /// # Arguments
    ///
    /// * `config` - the CSE-wide notification settings
    /// * `storage` - subscription and batch notification persistence
    /// * `transport` - used for sending all outbound notification requests
    ///
    /// # Returns
    ///
    /// The manager, plus a `NotificationManagerStopper` for shutting it down again.
    pub fn run(
        config: Arc<NotificationConfiguration>,
        storage: Arc<dyn NotificationStorage>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Result<(Arc<NotificationManager>, NotificationManagerStopper), NotificationError> {
        helpers::init_once();

        let shutdown_notification = Arc::new(Notify::new());

        let shutdown_notification_cloned = shutdown_notification.clone();
        let (delivery_sender, delivery_receiver) =
            mpsc::channel::<DeliveryEvent>(config.delivery_command_buffer);
        let delivery_joiner = helpers::spawn_and_log_error(async move {
            delivery::delivery_engine(delivery_receiver, shutdown_notification_cloned).await;
            Ok(())
        });

        let stats = Arc::new(StatsTracker::new(storage.clone()));
        let batches = Arc::new(BatchAggregator::new(
            config.clone(),
            storage.clone(),
            transport.clone(),
            stats.clone(),
        ));
        let manager = Arc::new(NotificationManager {
            async_notifications: AtomicBool::new(config.async_subscription_notifications),
            config,
            storage,
            transport,
            stats,
            batches,
            windows: WindowMonitors::new(),
            delivery_sender,
            expiration_lock: Mutex::new(()),
        });
        info!("Notification manager started for CSE {}", manager.config.cse_id);

        Ok((
            manager.clone(),
            NotificationManagerStopper {
                shutdown_notification,
                delivery_joiner: Some(delivery_joiner),
                manager,
            },
        ))
    }

    /// Switch between asynchronous and synchronous delivery of non-blocking notifications.
    pub fn set_async_notifications(&self, enabled: bool) {
        info!("Asynchronous subscription notifications: {enabled}");
        self.async_notifications.store(enabled, Ordering::Relaxed);
    }

    /// Stop all time window monitors and start the periodic ones over. Sliding windows are not restarted.
    pub async fn restart(&self) {
        self.windows.restart().await;
        debug!("Notification manager restarted");
    }

    // Event routing

    /// Notify all subscriptions of `resource` that match `event`.
    ///
    /// Delivery failures of non-blocking notifications are logged and do not stop other subscriptions from
    /// being notified.
    ///
    /// # Errors
    ///
    /// * if the subscriptions of the resource cannot be loaded
    /// * the first failure of a blocking notification (`blockingUpdate`, `blockingRetrieve`, `blockingRetrieveDirectChild`)
    pub async fn check_subscriptions(
        self: &Arc<Self>,
        resource: &Resource,
        event: &ResourceEvent,
    ) -> Result<(), NotificationError> {
        if resource.is_virtual || event.child().is_some_and(|child| child.is_virtual) {
            return Ok(());
        }
        let net = event.event_type();
        debug!("Checking subscriptions ({net:?}) of {}", resource.ri);

        let mut first_error = None;
        for subscription in self.storage.get_subscriptions_for_resource(&resource.ri).await? {
            if subscription.is_cross_resource() {
                continue;
            }
            // no notifications for a subscription's own creation or deletion
            if net.is_direct_child()
                && event.child().is_some_and(|child| child.ri == subscription.ri)
            {
                continue;
            }
            if !subscription.net.contains(&net) {
                continue;
            }

            let notification = match event {
                ResourceEvent::CreateDirectChild { child }
                | ResourceEvent::DeleteDirectChild { child } => {
                    if let Some(chty) = subscription.chty.as_ref().filter(|chty| !chty.is_empty()) {
                        if !chty.contains(&child.ty) {
                            continue;
                        }
                    }
                    self.build_notification(&subscription, net, Some(child), None, None)
                }
                ResourceEvent::ResourceUpdate {
                    modified_attributes,
                } => {
                    if !attributes_match(&subscription, modified_attributes.as_ref()) {
                        debug!("Skipping {}: no matching attributes", subscription.ri);
                        continue;
                    }
                    self.build_notification(
                        &subscription,
                        net,
                        Some(resource),
                        modified_attributes.as_ref(),
                        None,
                    )
                }
                ResourceEvent::MissingDataReport { missing_data } => {
                    let Some(report) = take_due_report(missing_data, &subscription.ri) else {
                        continue;
                    };
                    self.build_notification(&subscription, net, None, None, Some(&report))
                }
                ResourceEvent::BlockingUpdate {
                    modified_attributes,
                } => self.build_notification(
                    &subscription,
                    net,
                    Some(resource),
                    modified_attributes.as_ref(),
                    None,
                ),
                ResourceEvent::ResourceDelete
                | ResourceEvent::RetrieveCntNoChild
                | ResourceEvent::TriggerReceivedForAe
                | ResourceEvent::BlockingRetrieve
                | ResourceEvent::BlockingRetrieveDirectChild => {
                    self.build_notification(&subscription, net, Some(resource), None, None)
                }
            };

            let ri = subscription.ri.clone();
            let result = if net.is_blocking() {
                self.notify_subscription(&subscription, notification, true)
                    .await
            } else {
                self.dispatch(subscription, notification).await
            };
            self.stats.increment_event(&ri).await;

            if let Err(e) = result {
                if net.is_blocking() {
                    first_error.get_or_insert(e);
                } else {
                    warn!("Error notifying {ri}: {e}");
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn build_notification(
        &self,
        subscription: &SubscriptionRecord,
        net: NotificationEventType,
        resource: Option<&Resource>,
        modified_attributes: Option<&Map<String, Value>>,
        missing_data: Option<&MissingData>,
    ) -> Notification {
        let rep = match subscription.nct {
            NotificationContentType::All => resource.map(Resource::as_dict),
            NotificationContentType::Ri => resource.map(|r| json!({ "m2m:uri": r.ri })),
            NotificationContentType::ModifiedAttributes => resource.map(|r| {
                let mut rep = Map::new();
                rep.insert(
                    r.tpe.clone(),
                    Value::Object(modified_attributes.cloned().unwrap_or_default()),
                );
                Value::Object(rep)
            }),
            NotificationContentType::TimeSeriesNotification => {
                missing_data.map(|md| json!({ "m2m:tsn": md.as_value() }))
            }
            NotificationContentType::TriggerPayload => None,
        };
        Notification::event(
            net,
            rep,
            self.subscription_reference(&subscription.ri),
            subscription.cr.clone(),
        )
    }

    // Hand a non-blocking notification to the delivery engine, or deliver it right away when asynchronous
    // notifications are disabled
    async fn dispatch(
        self: &Arc<Self>,
        subscription: SubscriptionRecord,
        notification: Notification,
    ) -> Result<(), NotificationError> {
        if !self.async_notifications.load(Ordering::Relaxed) {
            return self
                .notify_subscription(&subscription, notification, false)
                .await;
        }

        let manager = self.clone();
        let job = Box::pin(async move {
            if let Err(e) = manager
                .notify_subscription(&subscription, notification, false)
                .await
            {
                warn!("Error notifying {}: {e}", subscription.ri);
            }
        });
        self.delivery_sender
            .send(DeliveryEvent::Submit { job })
            .await
            .map_err(|e| {
                NotificationError::fail_with_code(
                    ResponseStatusCode::InternalServerError,
                    format!("Delivery engine not available: {e}"),
                )
            })
    }

    // Delivery

    /// Deliver one notification to all targets of `subscription`, and count down its expiration counter
    /// if at least one of the deliveries succeeded.
    async fn notify_subscription(
        &self,
        subscription: &SubscriptionRecord,
        notification: Notification,
        blocking: bool,
    ) -> Result<(), NotificationError> {
        let results = join_all(
            subscription
                .nu
                .iter()
                .map(|nu| self.deliver(subscription, nu, notification.clone(), blocking)),
        )
        .await;

        let mut delivered = false;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(()) => delivered = true,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if delivered {
            self.decrement_expiration_counter(&subscription.ri).await;
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn deliver(
        &self,
        subscription: &SubscriptionRecord,
        nu: &str,
        notification: Notification,
        blocking: bool,
    ) -> Result<(), NotificationError> {
        if subscription.bn.is_some() {
            return self.batches.enqueue(subscription, nu, notification).await;
        }

        let ri = subscription.ri.as_str();
        debug!("Sending notification for {ri} to {nu}, blocking: {blocking}");
        self.stats.increment_sent(ri, nu, 1).await;
        let request = NotifyRequest::new(nu, self.config.cse_id.clone(), notification.into());
        match self.transport.send_notify(request).await {
            Ok(code) if code.is_success() => {
                self.stats.increment_received(ri, nu, 1).await;
                Ok(())
            }
            Ok(code) if blocking => Err(remote_failure(code, nu)),
            Ok(code) => Err(NotificationError::fail_with_code(
                code,
                format!("Notification rejected by {nu}"),
            )),
            Err(e) if blocking => Err(remote_failure(e.code, nu)),
            Err(e) => Err(e),
        }
    }

    // Count down the expiration counter of subscription `ri`, removing the subscription once it runs out.
    // Returns whether the subscription still exists afterwards.
    async fn decrement_expiration_counter(&self, ri: &str) -> bool {
        let _guard = self.expiration_lock.lock().await;

        let subscription = {
            // statistics are written back as whole records, too
            let _records = self.stats.lock_records().await;
            let mut subscription = match self.storage.get_subscription(ri).await {
                Ok(Some(subscription)) => subscription,
                Ok(None) => return false,
                Err(e) => {
                    warn!("Error loading subscription {ri}: {e}");
                    return true;
                }
            };
            let Some(exc) = subscription.exc else {
                return true;
            };

            let remaining = exc.saturating_sub(1);
            debug!("Decrementing expiration counter of {ri}: {exc} -> {remaining}");
            if remaining > 0 {
                subscription.exc = Some(remaining);
                if let Err(e) = self.storage.update_subscription(&subscription).await {
                    warn!("Error updating expiration counter of {ri}: {e}");
                }
                return true;
            }
            subscription
        };

        info!("Expiration counter of {ri} expired, removing subscription");
        let result = if subscription.is_cross_resource() {
            // this may run inside the window monitor of the subscription, which therefore is left to end by itself
            self.retire_cross_resource_subscription(&subscription).await
        } else {
            self.remove_subscription(&subscription).await
        };
        if let Err(e) = result {
            warn!("Error removing expired subscription {ri}: {e}");
        }
        false
    }

    // Verification

    // Send verification requests to all targets of `subscription` that are not in `previous_nus`, then bring
    // its notification statistics in line with the new target list.
    async fn verify_targets(
        &self,
        subscription: &mut SubscriptionRecord,
        previous_nus: Option<&[String]>,
        originator: Option<&str>,
    ) -> Result<(), NotificationError> {
        for nu in &subscription.nu {
            if previous_nus.is_some_and(|previous| previous.contains(nu)) {
                continue;
            }
            if let Some(originator) = originator {
                if helpers::compare_ids(&self.config.cse_id, nu, originator) {
                    debug!("Not verifying {nu}, it is the originator");
                    continue;
                }
            }
            if !self
                .send_verification_request(nu, &subscription.ri, originator)
                .await
            {
                return Err(NotificationError::fail_with_code(
                    ResponseStatusCode::SubscriptionVerificationInitiationFailed,
                    format!("Verification request failed for: {nu}"),
                ));
            }
        }

        if subscription.stats_enabled() && subscription.nsi.is_none() {
            subscription.nsi = Some(Vec::new());
        }
        stats_tracker::reconcile_targets(subscription);
        Ok(())
    }

    async fn send_verification_request(&self, nu: &str, ri: &str, originator: Option<&str>) -> bool {
        if helpers::is_internal_target(nu) {
            debug!("Skipping verification request to internal target {nu}");
            return true;
        }

        debug!("Sending verification request to {nu}");
        let notification = Notification::verification(
            self.subscription_reference(ri),
            originator.map(str::to_string),
        );
        let request = NotifyRequest::new(nu, self.config.cse_id.clone(), notification.into());
        match self.transport.send_notify(request).await {
            Ok(ResponseStatusCode::Ok) => true,
            Ok(code) => {
                debug!("Verification request to {nu} answered with {code}");
                false
            }
            Err(e) => {
                debug!("Sending verification request to {nu} failed: {e}");
                false
            }
        }
    }

    // Best effort, returns whether all deletion notifications were delivered
    async fn send_deletion_notification(&self, targets: &[String], ri: &str) -> bool {
        let mut all_delivered = true;
        for target in targets {
            debug!("Sending deletion notification for {ri} to {target}");
            let notification = Notification::deletion(self.subscription_reference(ri));
            let request =
                NotifyRequest::new(target, self.config.cse_id.clone(), notification.into());
            if let Err(e) = self.transport.send_notify(request).await {
                warn!("Deletion notification to {target} failed: {e}");
                all_delivered = false;
            }
        }
        all_delivered
    }

    // Subscriptions

    /// Verify the notification targets of a new subscription and store it.
    ///
    /// # Returns
    ///
    /// The subscription as stored, with its notification statistics set up.
    ///
    /// # Errors
    ///
    /// * `BAD_REQUEST` for an invalid batch notification duration
    /// * `SUBSCRIPTION_VERIFICATION_INITIATION_FAILED` if any target fails verification; nothing is stored
    /// * `INTERNAL_SERVER_ERROR` if the subscription cannot be stored
    pub async fn add_subscription(
        &self,
        mut subscription: SubscriptionRecord,
        originator: Option<&str>,
    ) -> Result<SubscriptionRecord, NotificationError> {
        debug!("Adding subscription {}", subscription.ri);
        self.validate_batch_notify(&subscription)?;
        self.verify_targets(&mut subscription, None, originator)
            .await?;
        self.storage
            .add_subscription(&subscription)
            .await
            .map_err(|e| storage_failure("Cannot add subscription", e))?;
        Ok(subscription)
    }

    /// Verify the targets a subscription gained compared to `previous_nus`, and store the updated subscription.
    ///
    /// # Errors
    ///
    /// Same as `add_subscription()`; on a verification failure the stored subscription stays unchanged.
    pub async fn update_subscription(
        &self,
        mut subscription: SubscriptionRecord,
        previous_nus: &[String],
        originator: Option<&str>,
    ) -> Result<SubscriptionRecord, NotificationError> {
        debug!("Updating subscription {}", subscription.ri);
        self.validate_batch_notify(&subscription)?;
        self.verify_targets(&mut subscription, Some(previous_nus), originator)
            .await?;
        // a statistics update in flight must not write back the previous record afterwards
        let _records = self.stats.lock_records().await;
        self.storage
            .update_subscription(&subscription)
            .await
            .map_err(|e| storage_failure("Cannot update subscription", e))?;
        Ok(subscription)
    }

    /// Remove a subscription: send its pending batch notifications, notify the subscriber and associated
    /// cross-resource subscriptions about the deletion, and remove it from storage.
    pub async fn remove_subscription(
        &self,
        subscription: &SubscriptionRecord,
    ) -> Result<(), NotificationError> {
        debug!("Removing subscription {}", subscription.ri);
        let stored = match self.storage.get_subscription(&subscription.ri).await {
            Ok(Some(stored)) => stored,
            _ => subscription.clone(),
        };
        self.batches.flush_all(&stored).await;

        if let Some(su) = &subscription.su {
            self.send_deletion_notification(std::slice::from_ref(su), &subscription.ri)
                .await;
        }
        if let Some(acrs) = &subscription.acrs {
            self.send_deletion_notification(acrs, &subscription.ri)
                .await;
        }

        self.storage
            .remove_subscription(&subscription.ri)
            .await
            .map_err(|e| storage_failure("Cannot remove subscription", e))
    }

    /// Subscriptions of resource `ri` that have any of the event types in `net`, and, if `chty` is given,
    /// either no child type filter or one that includes `chty`.
    pub async fn get_subscriptions_by_net_chty(
        &self,
        ri: &str,
        net: Option<&[NotificationEventType]>,
        chty: Option<ResourceType>,
    ) -> Result<Vec<SubscriptionRecord>, NotificationError> {
        let subscriptions = self.storage.get_subscriptions_for_resource(ri).await?;
        Ok(subscriptions
            .into_iter()
            .filter(|sub| net.map_or(true, |net| sub.net.iter().any(|n| net.contains(n))))
            .filter(|sub| match (chty, &sub.chty) {
                (Some(ty), Some(sub_chty)) => sub_chty.contains(&ty),
                _ => true,
            })
            .collect())
    }

    /// Apply a changed `nse` attribute to a subscription's notification statistics. `None` means the attribute was removed.
    pub fn update_of_nse_attribute(
        &self,
        subscription: &mut SubscriptionRecord,
        new_nse: Option<bool>,
    ) {
        stats_tracker::update_of_nse(subscription, new_nse);
    }

    fn validate_batch_notify(&self, subscription: &SubscriptionRecord) -> Result<(), NotificationError> {
        if let Some(bn) = &subscription.bn {
            batch_duration(bn, self.config.default_batch_duration)?;
        }
        Ok(())
    }

    // Blocking requests

    /// Notify the `blockingUpdate` subscriptions of `resource` about an UPDATE request, before it is performed.
    ///
    /// # Errors
    ///
    /// * `REMOTE_ENTITY_NOT_REACHABLE` if the notification target cannot be reached
    /// * `OPERATION_DENIED_BY_REMOTE_ENTITY` if the target answers with `OPERATION_NOT_ALLOWED`
    /// * any other non-OK status the target answers with
    pub async fn check_perform_blocking_update(
        &self,
        resource: &Resource,
        originator: &str,
        updated_attributes: &Map<String, Value>,
    ) -> Result<(), NotificationError> {
        debug!("Looking for blocking UPDATE subscriptions of {}, originator {originator}", resource.ri);

        let subscriptions = self
            .get_subscriptions_by_net_chty(
                &resource.ri,
                Some(&[NotificationEventType::BlockingUpdate]),
                None,
            )
            .await?;
        for subscription in subscriptions {
            if let Some(atr) = subscription.atr.as_ref().filter(|atr| !atr.is_empty()) {
                if !pure_attributes(updated_attributes)
                    .keys()
                    .any(|key| atr.contains(key))
                {
                    debug!("Skipping {}: no matching attributes", subscription.ri);
                    continue;
                }
            }
            let Some(target) = subscription.nu.first() else {
                continue;
            };

            let rep = (!resource.is_virtual).then(|| Value::Object(updated_attributes.clone()));
            let notification = Notification::event(
                NotificationEventType::BlockingUpdate,
                rep,
                self.subscription_reference(&subscription.ri),
                None,
            );
            let request =
                NotifyRequest::new(target, self.config.cse_id.clone(), notification.into());
            let code = self
                .transport
                .send_notify(request)
                .await
                .map_err(|e| remote_failure(e.code, target))?;
            if code != ResponseStatusCode::Ok {
                return Err(remote_failure(code, target));
            }
        }
        Ok(())
    }

    /// Notify the blocking RETRIEVE subscriptions of `resource` (and the `blockingRetrieveDirectChild` ones of its
    /// parent) if the resource is older than the requested or subscribed maximum age.
    ///
    /// # Errors
    ///
    /// * `BAD_REQUEST` for a malformed max age
    /// * the failure of the first notification that could not be delivered
    pub async fn check_perform_blocking_retrieve(
        &self,
        resource: &Resource,
        request_max_age: Option<&str>,
    ) -> Result<(), NotificationError> {
        debug!("Looking for blocking RETRIEVE subscriptions of {}", resource.ri);
        let request_max_age = request_max_age.map(parse_duration).transpose()?;

        let mut subscriptions = self
            .get_subscriptions_by_net_chty(
                &resource.ri,
                Some(&[NotificationEventType::BlockingRetrieve]),
                None,
            )
            .await?;
        if let Some(pi) = &resource.pi {
            subscriptions.extend(
                self.get_subscriptions_by_net_chty(
                    pi,
                    Some(&[NotificationEventType::BlockingRetrieveDirectChild]),
                    Some(resource.ty),
                )
                .await?,
            );
        }

        let mut sent = 0;
        for subscription in subscriptions {
            let subscription_max_age = subscription.ma.as_deref().map(parse_duration).transpose()?;
            let Some(max_age) = request_max_age.into_iter().chain(subscription_max_age).min() else {
                debug!("No max age for {}, no blocking RETRIEVE notification needed", subscription.ri);
                continue;
            };
            if let Some(lt) = resource.lt {
                let age = (Utc::now() - lt).to_std().unwrap_or(Duration::ZERO);
                if age < max_age {
                    continue;
                }
            }
            let Some(target) = subscription.nu.first() else {
                continue;
            };

            let net = subscription
                .net
                .first()
                .copied()
                .unwrap_or(NotificationEventType::BlockingRetrieve);
            let rep = (!resource.is_virtual).then(|| resource.as_dict());
            let notification = Notification::event(
                net,
                rep,
                self.subscription_reference(&subscription.ri),
                subscription.cr.clone(),
            );
            let originator = subscription
                .cr
                .clone()
                .unwrap_or_else(|| self.config.cse_id.clone());

            sent += 1;
            match self
                .transport
                .send_notify(NotifyRequest::new(target, originator, notification.into()))
                .await?
            {
                code if code.is_success() => {}
                code => {
                    return Err(NotificationError::fail_with_code(
                        code,
                        format!("Blocking RETRIEVE notification rejected by {target}"),
                    ))
                }
            }
        }
        debug!("Sent {sent} blocking RETRIEVE notification(s) for {}", resource.ri);
        Ok(())
    }

    // Cross-resource subscriptions

    /// Verify the targets of a new cross-resource subscription, store it, and start its window if it is periodic.
    ///
    /// # Errors
    ///
    /// * `BAD_REQUEST` if the subscription has no valid time window
    /// * see `add_subscription()`
    pub async fn add_cross_resource_subscription(
        self: &Arc<Self>,
        mut crs: SubscriptionRecord,
        originator: Option<&str>,
    ) -> Result<SubscriptionRecord, NotificationError> {
        debug!("Adding cross-resource subscription {}", crs.ri);
        let (window, size) = valid_window(&crs)?;
        self.verify_targets(&mut crs, None, originator).await?;
        self.storage
            .add_subscription(&crs)
            .await
            .map_err(|e| storage_failure("Cannot add cross-resource subscription", e))?;

        if window.twt == TimeWindowType::Periodic {
            self.windows
                .start_periodic(&crs.ri, size, window.expected_count(), self.clone())
                .await;
        }
        Ok(crs)
    }

    /// Verify new targets of an updated cross-resource subscription and store it. A changed time window replaces
    /// the running one.
    pub async fn update_cross_resource_subscription(
        self: &Arc<Self>,
        mut crs: SubscriptionRecord,
        previous_nus: &[String],
        previous_window: Option<&TimeWindow>,
        originator: Option<&str>,
    ) -> Result<SubscriptionRecord, NotificationError> {
        debug!("Updating cross-resource subscription {}", crs.ri);
        let (window, size) = valid_window(&crs)?;
        self.verify_targets(&mut crs, Some(previous_nus), originator)
            .await?;
        {
            let _records = self.stats.lock_records().await;
            self.storage
                .update_subscription(&crs)
                .await
                .map_err(|e| storage_failure("Cannot update cross-resource subscription", e))?;
        }

        if previous_window != Some(&window) {
            debug!("Time window of {} changed, restarting", crs.ri);
            self.windows.stop(&crs.ri).await;
            if window.twt == TimeWindowType::Periodic {
                self.windows
                    .start_periodic(&crs.ri, size, window.expected_count(), self.clone())
                    .await;
            }
        }
        Ok(crs)
    }

    /// Stop the time window of a cross-resource subscription, discarding what it collected, notify the
    /// subscriber about the deletion and remove it from storage.
    pub async fn remove_cross_resource_subscription(
        &self,
        crs: &SubscriptionRecord,
    ) -> Result<(), NotificationError> {
        debug!("Removing cross-resource subscription {}", crs.ri);
        self.windows.stop(&crs.ri).await;
        self.retire_cross_resource_subscription(crs).await
    }

    async fn retire_cross_resource_subscription(
        &self,
        crs: &SubscriptionRecord,
    ) -> Result<(), NotificationError> {
        if let Some(su) = &crs.su {
            self.send_deletion_notification(std::slice::from_ref(su), &crs.ri)
                .await;
        }
        match self.storage.remove_subscription(&crs.ri).await {
            Err(e) if e.code != ResponseStatusCode::NotFound => Err(storage_failure(
                "Cannot remove cross-resource subscription",
                e,
            )),
            _ => Ok(()),
        }
    }

    /// Feed a notification, received by cross-resource subscription `crs` from the subscription `sur`, into its time window.
    pub async fn received_cross_resource_subscription_notification(
        self: &Arc<Self>,
        sur: &str,
        crs: &SubscriptionRecord,
    ) -> Result<(), NotificationError> {
        let Some(window) = &crs.window else {
            return Err(NotificationError::fail_with_code(
                ResponseStatusCode::BadRequest,
                format!("{} is not a cross-resource subscription", crs.ri),
            ));
        };
        debug!("Received notification from {sur} for {} ({:?})", crs.ri, window.twt);
        self.windows
            .receive_notifier_event(&crs.ri, window, sur, self.clone())
            .await
    }

    fn subscription_reference(&self, ri: &str) -> String {
        helpers::to_sp_relative(&self.config.cse_id, ri)
    }

    #[cfg(test)]
    pub(crate) async fn drain_deliveries(&self) {
        let (respond_to, drained) = oneshot::channel();
        if self
            .delivery_sender
            .send(DeliveryEvent::Drain { respond_to })
            .await
            .is_ok()
        {
            let _ = drained.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn has_batch_timer(&self, ri: &str, nu: &str) -> bool {
        self.batches.has_timer(ri, nu)
    }

    #[cfg(test)]
    pub(crate) fn has_window(&self, crs_ri: &str, twt: TimeWindowType) -> bool {
        self.windows.is_running(crs_ri, twt)
    }
}

#[async_trait]
impl WindowTrigger for NotificationManager {
    async fn window_satisfied(&self, crs_ri: &str) -> bool {
        let crs = match self.storage.get_subscription(crs_ri).await {
            Ok(Some(crs)) => crs,
            Ok(None) => {
                warn!("Cannot retrieve cross-resource subscription {crs_ri}");
                return false;
            }
            Err(e) => {
                warn!("Cannot retrieve cross-resource subscription {crs_ri}: {e}");
                return true;
            }
        };
        debug!("Time window of {crs_ri} satisfied, notifying");

        let content = Envelope::aggregate(vec![Notification::reference(
            self.subscription_reference(crs_ri),
        )]);
        join_all(crs.nu.iter().map(|nu| {
            let request = NotifyRequest::new(nu, self.config.cse_id.clone(), content.clone());
            async move {
                self.stats.increment_sent(crs_ri, nu, 1).await;
                match self.transport.send_notify(request).await {
                    Ok(code) if code.is_success() => {
                        self.stats.increment_received(crs_ri, nu, 1).await
                    }
                    Ok(code) => warn!("Notification for {crs_ri} rejected by {nu}: {code}"),
                    Err(e) => warn!("Error sending notification for {crs_ri} to {nu}: {e}"),
                }
            }
        }))
        .await;
        self.stats.increment_event(crs_ri).await;

        self.decrement_expiration_counter(crs_ri).await
    }
}

// Time window descriptor and window size of a cross-resource subscription
fn valid_window(crs: &SubscriptionRecord) -> Result<(TimeWindow, Duration), NotificationError> {
    let window = crs.window.clone().ok_or_else(|| {
        NotificationError::fail_with_code(
            ResponseStatusCode::BadRequest,
            format!("{} has no time window", crs.ri),
        )
    })?;
    let size = window_size(&window)?;
    Ok((window, size))
}

// An `atr` filter matches if it is unset or empty, or shares a key with the modified attributes
fn attributes_match(
    subscription: &SubscriptionRecord,
    modified_attributes: Option<&Map<String, Value>>,
) -> bool {
    match subscription.atr.as_ref().filter(|atr| !atr.is_empty()) {
        None => true,
        Some(atr) => modified_attributes
            .is_some_and(|modified| atr.iter().any(|attribute| modified.contains_key(attribute))),
    }
}

// Resource attributes without the `{"<tpe>": {...}}` wrapper, if there is one
fn pure_attributes(attributes: &Map<String, Value>) -> &Map<String, Value> {
    match attributes.iter().next() {
        Some((key, Value::Object(inner))) if attributes.len() == 1 && key.contains(':') => inner,
        _ => attributes,
    }
}

// The missing data report of subscription `ri`, if it is due; resets the subscription's counter
fn take_due_report(missing_data: &SharedMissingData, ri: &str) -> Option<MissingData> {
    let mut missing_data = missing_data
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    let entry = missing_data.get_mut(ri)?;
    if !entry.is_report_due() {
        return None;
    }
    let report = entry.clone();
    entry.clear_missing_data_list();
    Some(report)
}

fn remote_failure(code: ResponseStatusCode, target: &str) -> NotificationError {
    match code {
        ResponseStatusCode::TargetNotReachable => NotificationError::fail_with_code(
            ResponseStatusCode::RemoteEntityNotReachable,
            format!("Remote entity not reachable: {target}"),
        ),
        ResponseStatusCode::OperationNotAllowed => NotificationError::fail_with_code(
            ResponseStatusCode::OperationDeniedByRemoteEntity,
            format!("Operation denied by remote entity: {target}"),
        ),
        code => NotificationError::fail_with_code(
            code,
            format!("Blocking notification to {target} failed"),
        ),
    }
}

fn storage_failure(context: &str, e: NotificationError) -> NotificationError {
    NotificationError::fail_with_code(
        ResponseStatusCode::InternalServerError,
        format!("{context}: {e}"),
    )
}
