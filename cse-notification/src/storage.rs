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
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{Notification, NotificationError, ResponseStatusCode, SubscriptionRecord};

/// One pending notification of a batch, for a single (subscription, target) pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchNotificationRecord {
    pub ri: String,
    pub nu: String,
    pub tstamp: DateTime<Utc>,
    /// Insertion sequence number, orders records with equal time stamps
    pub seq: u64,
    pub notification: Notification,
}

/// Subscription and batch notification persistence, as provided by the CSE's storage layer.
#[async_trait]
pub trait NotificationStorage: Send + Sync {
    /// All subscriptions registered against resource `ri`, in registration order
    async fn get_subscriptions_for_resource(
        &self,
        ri: &str,
    ) -> Result<Vec<SubscriptionRecord>, NotificationError>;
    async fn get_subscription(&self, ri: &str)
        -> Result<Option<SubscriptionRecord>, NotificationError>;
    async fn add_subscription(&self, subscription: &SubscriptionRecord)
        -> Result<(), NotificationError>;
    async fn update_subscription(
        &self,
        subscription: &SubscriptionRecord,
    ) -> Result<(), NotificationError>;
    async fn remove_subscription(&self, ri: &str) -> Result<(), NotificationError>;

    async fn add_batch_record(
        &self,
        ri: &str,
        nu: &str,
        notification: Notification,
    ) -> Result<(), NotificationError>;
    async fn count_batch_records(&self, ri: &str, nu: &str) -> Result<usize, NotificationError>;
    /// Pending batch records of a (subscription, target) pair, ordered by insertion
    async fn get_batch_records(
        &self,
        ri: &str,
        nu: &str,
    ) -> Result<Vec<BatchNotificationRecord>, NotificationError>;
    async fn remove_batch_records(&self, ri: &str, nu: &str) -> Result<(), NotificationError>;
}

#[derive(Default)]
struct StorageState {
    subscriptions: Vec<SubscriptionRecord>,
    batch_records: Vec<BatchNotificationRecord>,
    next_seq: u64,
}

/// `NotificationStorage` kept in process memory, for embedding without a database and for testing.
#[derive(Default)]
pub struct InMemoryStorage {
    state: Mutex<StorageState>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StorageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(ri: &str) -> NotificationError {
    NotificationError::fail_with_code(
        ResponseStatusCode::NotFound,
        format!("Subscription not found: {ri}"),
    )
}

#[async_trait]
impl NotificationStorage for InMemoryStorage {
    async fn get_subscriptions_for_resource(
        &self,
        ri: &str,
    ) -> Result<Vec<SubscriptionRecord>, NotificationError> {
        Ok(self
            .state()
            .subscriptions
            .iter()
            .filter(|sub| sub.pi == ri)
            .cloned()
            .collect())
    }

    async fn get_subscription(
        &self,
        ri: &str,
    ) -> Result<Option<SubscriptionRecord>, NotificationError> {
        Ok(self
            .state()
            .subscriptions
            .iter()
            .find(|sub| sub.ri == ri)
            .cloned())
    }

    async fn add_subscription(
        &self,
        subscription: &SubscriptionRecord,
    ) -> Result<(), NotificationError> {
        let mut state = self.state();
        if state.subscriptions.iter().any(|sub| sub.ri == subscription.ri) {
            return Err(NotificationError::fail_with_code(
                ResponseStatusCode::InternalServerError,
                format!("Subscription already exists: {}", subscription.ri),
            ));
        }
        state.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn update_subscription(
        &self,
        subscription: &SubscriptionRecord,
    ) -> Result<(), NotificationError> {
        let mut state = self.state();
        let entry = state
            .subscriptions
            .iter_mut()
            .find(|sub| sub.ri == subscription.ri)
            .ok_or_else(|| not_found(&subscription.ri))?;
        *entry = subscription.clone();
        Ok(())
    }

    async fn remove_subscription(&self, ri: &str) -> Result<(), NotificationError> {
        let mut state = self.state();
        let before = state.subscriptions.len();
        state.subscriptions.retain(|sub| sub.ri != ri);
        if state.subscriptions.len() == before {
            return Err(not_found(ri));
        }
        Ok(())
    }

    async fn add_batch_record(
        &self,
        ri: &str,
        nu: &str,
        notification: Notification,
    ) -> Result<(), NotificationError> {
        let mut state = self.state();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.batch_records.push(BatchNotificationRecord {
            ri: ri.to_string(),
            nu: nu.to_string(),
            tstamp: Utc::now(),
            seq,
            notification,
        });
        Ok(())
    }

    async fn count_batch_records(&self, ri: &str, nu: &str) -> Result<usize, NotificationError> {
        Ok(self
            .state()
            .batch_records
            .iter()
            .filter(|record| record.ri == ri && record.nu == nu)
            .count())
    }

    async fn get_batch_records(
        &self,
        ri: &str,
        nu: &str,
    ) -> Result<Vec<BatchNotificationRecord>, NotificationError> {
        Ok(self
            .state()
            .batch_records
            .iter()
            .filter(|record| record.ri == ri && record.nu == nu)
            .cloned()
            .collect())
    }

    async fn remove_batch_records(&self, ri: &str, nu: &str) -> Result<(), NotificationError> {
        self.state()
            .batch_records
            .retain(|record| record.ri != ri || record.nu != nu);
        Ok(())
    }
}
