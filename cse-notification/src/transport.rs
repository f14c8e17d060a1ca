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

use crate::{Envelope, EventCategory, NotificationError, ResponseStatusCode};

/// Optional request parameters of a notification request
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NotifyParameters {
    pub ec: Option<EventCategory>,
}

/// An outbound NOTIFY request.
#[derive(Clone, Debug, PartialEq)]
pub struct NotifyRequest {
    /// Notification target, either a URL or the identifier of an entity with a point of access
    pub target: String,
    pub originator: String,
    pub content: Envelope,
    pub parameters: Option<NotifyParameters>,
}

impl NotifyRequest {
    pub fn new<T, U>(target: T, originator: U, content: Envelope) -> Self
    where
        T: Into<String>,
        U: Into<String>,
    {
        NotifyRequest {
            target: target.into(),
            originator: originator.into(),
            content,
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: NotifyParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Outbound request sending, as provided by the CSE's transport bindings (HTTP, MQTT, ...).
///
/// Each call is one attempt; retry or backoff policies are up to the implementation.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Send a notification request.
    ///
    /// # Returns
    ///
    /// * `Ok` with the response status code received from the notification target
    /// * `Err` when the request could not be delivered, e.g. `TargetNotReachable`
    async fn send_notify(
        &self,
        request: NotifyRequest,
    ) -> Result<ResponseStatusCode, NotificationError>;
}
