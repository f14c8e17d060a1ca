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
use mockall::mock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{
    BatchNotificationRecord, InMemoryStorage, Notification, NotificationError,
    NotificationStorage, NotificationTransport, NotifyRequest, ResponseStatusCode,
    SubscriptionRecord,
};

mock! {
    pub Transport {}
    #[async_trait]
    impl NotificationTransport for Transport {
        async fn send_notify(
            &self,
            request: NotifyRequest,
        ) -> Result<ResponseStatusCode, NotificationError>;
    }
}

/// Transport mock that never expects to send anything.
pub(crate) fn silent_transport() -> MockTransport {
    let mut transport = MockTransport::new();
    transport.expect_send_notify().never();
    transport
}

/// Transport fake that records every request, answering with `OK` unless a target has a scripted response.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    requests: Mutex<Vec<NotifyRequest>>,
    responses: Mutex<HashMap<String, Result<ResponseStatusCode, NotificationError>>>,
}

impl RecordingTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn respond(&self, target: &str, response: Result<ResponseStatusCode, NotificationError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(target.to_string(), response);
    }

    pub(crate) fn unreachable(&self, target: &str) {
        self.respond(
            target,
            Err(NotificationError::fail_with_code(
                ResponseStatusCode::TargetNotReachable,
                format!("{target} not reachable"),
            )),
        );
    }

    pub(crate) fn requests(&self) -> Vec<NotifyRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn requests_to(&self, target: &str) -> Vec<NotifyRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.target == target)
            .collect()
    }

    /// Requests sent to `target` that carry notification events (neither verification nor deletion requests)
    pub(crate) fn event_requests_to(&self, target: &str) -> Vec<NotifyRequest> {
        self.requests_to(target)
            .into_iter()
            .filter(|request| {
                request
                    .content
                    .notifications()
                    .iter()
                    .all(|n| n.vrq.is_none() && n.sud.is_none())
            })
            .collect()
    }

    /// All notifications carrying an event that were sent to `target`, in order
    pub(crate) fn events_to(&self, target: &str) -> Vec<Notification> {
        self.event_requests_to(target)
            .iter()
            .flat_map(|request| {
                request
                    .content
                    .notifications()
                    .into_iter()
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub(crate) fn verifications_to(&self, target: &str) -> Vec<Notification> {
        self.requests_to(target)
            .iter()
            .flat_map(|request| request.content.notifications().into_iter().cloned().collect::<Vec<_>>())
            .filter(|n| n.vrq == Some(true))
            .collect()
    }

    pub(crate) fn deletions_to(&self, target: &str) -> Vec<Notification> {
        self.requests_to(target)
            .iter()
            .flat_map(|request| request.content.notifications().into_iter().cloned().collect::<Vec<_>>())
            .filter(|n| n.sud == Some(true))
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.requests.lock().unwrap().clear();
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send_notify(
        &self,
        request: NotifyRequest,
    ) -> Result<ResponseStatusCode, NotificationError> {
        let response = self
            .responses
            .lock()
            .unwrap()
            .get(&request.target)
            .cloned()
            .unwrap_or(Ok(ResponseStatusCode::Ok));
        self.requests.lock().unwrap().push(request);
        response
    }
}

/// Storage whose subscription lookups take `delay` to return, handing out the record as it was when the lookup began.
pub(crate) struct SlowStorage {
    pub(crate) inner: InMemoryStorage,
    delay: Duration,
}

impl SlowStorage {
    pub(crate) fn new(delay: Duration) -> Arc<Self> {
        Arc::new(SlowStorage {
            inner: InMemoryStorage::new(),
            delay,
        })
    }
}

#[async_trait]
impl NotificationStorage for SlowStorage {
    async fn get_subscriptions_for_resource(
        &self,
        ri: &str,
    ) -> Result<Vec<SubscriptionRecord>, NotificationError> {
        self.inner.get_subscriptions_for_resource(ri).await
    }

    async fn get_subscription(
        &self,
        ri: &str,
    ) -> Result<Option<SubscriptionRecord>, NotificationError> {
        let subscription = self.inner.get_subscription(ri).await;
        tokio::time::sleep(self.delay).await;
        subscription
    }

    async fn add_subscription(
        &self,
        subscription: &SubscriptionRecord,
    ) -> Result<(), NotificationError> {
        self.inner.add_subscription(subscription).await
    }

    async fn update_subscription(
        &self,
        subscription: &SubscriptionRecord,
    ) -> Result<(), NotificationError> {
        self.inner.update_subscription(subscription).await
    }

    async fn remove_subscription(&self, ri: &str) -> Result<(), NotificationError> {
        self.inner.remove_subscription(ri).await
    }

    async fn add_batch_record(
        &self,
        ri: &str,
        nu: &str,
        notification: Notification,
    ) -> Result<(), NotificationError> {
        self.inner.add_batch_record(ri, nu, notification).await
    }

    async fn count_batch_records(&self, ri: &str, nu: &str) -> Result<usize, NotificationError> {
        self.inner.count_batch_records(ri, nu).await
    }

    async fn get_batch_records(
        &self,
        ri: &str,
        nu: &str,
    ) -> Result<Vec<BatchNotificationRecord>, NotificationError> {
        self.inner.get_batch_records(ri, nu).await
    }

    async fn remove_batch_records(&self, ri: &str, nu: &str) -> Result<(), NotificationError> {
        self.inner.remove_batch_records(ri, nu).await
    }
}
