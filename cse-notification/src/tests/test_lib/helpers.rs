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

use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    InMemoryStorage, NotificationConfiguration, NotificationEventType, NotificationManager,
    NotificationManagerStopper, NotificationStorage, NotificationTransport, Resource,
    SubscriptionRecord,
};

pub(crate) const CSE_ID: &str = "/id-in";
pub(crate) const ORIGINATOR: &str = "CAE01";
pub(crate) const TARGET1: &str = "http://127.0.0.1:9001/notify";
pub(crate) const TARGET2: &str = "http://127.0.0.1:9002/notify";
pub(crate) const SUBSCRIBER: &str = "http://127.0.0.1:9100/subscriber";

pub(crate) fn config(async_notifications: bool) -> Arc<NotificationConfiguration> {
    NotificationConfiguration::create(
        CSE_ID.to_string(),
        async_notifications,
        Some(Duration::from_secs(60)),
        None,
    )
    .expect("Error creating test configuration")
}

pub(crate) fn run_manager(
    transport: Arc<dyn NotificationTransport>,
    async_notifications: bool,
) -> (
    Arc<NotificationManager>,
    NotificationManagerStopper,
    Arc<InMemoryStorage>,
) {
    let storage = Arc::new(InMemoryStorage::new());
    let (manager, stopper) =
        run_manager_with_storage(transport, storage.clone(), async_notifications);
    (manager, stopper, storage)
}

pub(crate) fn run_manager_with_storage(
    transport: Arc<dyn NotificationTransport>,
    storage: Arc<dyn NotificationStorage>,
    async_notifications: bool,
) -> (Arc<NotificationManager>, NotificationManagerStopper) {
    NotificationManager::run(config(async_notifications), storage, transport)
        .expect("Error starting notification manager")
}

pub(crate) fn container(ri: &str) -> Resource {
    Resource::new(ri, 3, "m2m:cnt").with_parent("CSEBase")
}

pub(crate) fn content_instance(ri: &str, pi: &str) -> Resource {
    Resource::new(ri, 4, "m2m:cin").with_parent(pi)
}

pub(crate) fn subscription(
    ri: &str,
    pi: &str,
    nus: &[&str],
    net: &[NotificationEventType],
) -> SubscriptionRecord {
    let mut subscription = SubscriptionRecord::new(
        ri,
        pi,
        nus.iter().map(|nu| nu.to_string()).collect(),
        net.to_vec(),
    );
    subscription.cr = Some(ORIGINATOR.to_string());
    subscription
}

/// Store a subscription directly, bypassing target verification
pub(crate) async fn store(storage: &InMemoryStorage, subscription: &SubscriptionRecord) {
    storage
        .add_subscription(subscription)
        .await
        .expect("Error storing subscription");
}

pub(crate) async fn stored(storage: &InMemoryStorage, ri: &str) -> Option<SubscriptionRecord> {
    storage
        .get_subscription(ri)
        .await
        .expect("Error loading subscription")
}

pub(crate) fn attributes(entries: &[(&str, Value)]) -> Map<String, Value> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}
