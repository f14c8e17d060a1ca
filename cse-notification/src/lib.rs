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

/*!
cse-notification is the subscription and notification engine of a [oneM2M](https://www.onem2m.org) Common Service Entity (CSE), for the rust programming language.

It detects resource lifecycle events that match registered subscriptions, verifies new notification targets, and delivers notifications
immediately, batched, as blocking requests, or through the time windows of cross-resource subscriptions. Per-target notification statistics
and subscription expiration counters are maintained along the way.

## Library contents

* `NotificationManager`, the engine itself, started via `NotificationManager::run()` and stopped through a `NotificationManagerStopper`
* `NotificationStorage` and `NotificationTransport`, the collaborator interfaces the engine depends on, plus an `InMemoryStorage`
* Data types for subscription records, resource events and notification content

## References

* [oneM2M TS-0001 Functional Architecture](https://www.onem2m.org/technical/published-specifications)
* [oneM2M TS-0004 Service Layer Core Protocol](https://www.onem2m.org/technical/published-specifications)

*/

mod common {
    pub(crate) mod duration;
    pub(crate) mod helpers;
    pub(crate) mod workers;
}
pub use common::helpers::init_once;
pub(crate) use common::*;

mod batch_aggregator;
mod delivery;
mod notification_manager;
mod stats_tracker;
mod window_monitor;
pub use notification_manager::{NotificationManager, NotificationManagerStopper};

mod configuration;
pub use configuration::{ConfigurationError, NotificationConfiguration};

mod envelope;
mod event;
mod resource;
mod storage;
mod transport;
mod types;
pub use envelope::{AggregatedNotification, Envelope, Notification, NotificationEvent};
pub use event::{MissingData, ResourceEvent, SharedMissingData};
pub use resource::{
    BatchNotify, NotificationStatsInfo, Resource, ResourceType, SubscriptionRecord, TimeWindow,
};
pub use storage::{BatchNotificationRecord, InMemoryStorage, NotificationStorage};
pub use transport::{NotificationTransport, NotifyParameters, NotifyRequest};
pub use types::{
    EventCategory, NotificationContentType, NotificationError, NotificationEventType,
    ResponseStatusCode, TimeWindowType,
};

#[cfg(test)]
pub(crate) use tests::*;
