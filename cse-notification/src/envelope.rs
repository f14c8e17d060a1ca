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

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::NotificationEventType;

/// notificationEvent
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net: Option<NotificationEventType>,
    /// Representation, its shape depends on the subscription's notificationContentType
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rep: Option<Value>,
}

/// A single notification (`m2m:sgn`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nev: Option<NotificationEvent>,
    /// verificationRequest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vrq: Option<bool>,
    /// subscriptionDeletion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sud: Option<bool>,
    /// subscriptionReference
    pub sur: String,
    /// creator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cr: Option<String>,
}

impl Notification {
    pub fn event(
        net: NotificationEventType,
        rep: Option<Value>,
        sur: String,
        cr: Option<String>,
    ) -> Self {
        Notification {
            nev: Some(NotificationEvent {
                net: Some(net),
                rep,
            }),
            sur,
            cr,
            ..Default::default()
        }
    }

    pub fn verification(sur: String, cr: Option<String>) -> Self {
        Notification {
            vrq: Some(true),
            sur,
            cr,
            ..Default::default()
        }
    }

    pub fn deletion(sur: String) -> Self {
        Notification {
            sud: Some(true),
            sur,
            ..Default::default()
        }
    }

    /// A notification carrying only the subscription reference, as sent when a cross-resource window is satisfied
    pub fn reference(sur: String) -> Self {
        Notification {
            sur,
            ..Default::default()
        }
    }
}

/// aggregatedNotification (`m2m:agn`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedNotification {
    #[serde(rename = "m2m:sgn")]
    pub notifications: Vec<Notification>,
}

/// Notification request content as handed to the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    #[serde(rename = "m2m:sgn")]
    Single(Notification),
    #[serde(rename = "m2m:agn")]
    Aggregated(AggregatedNotification),
}

impl Envelope {
    pub fn aggregate(notifications: Vec<Notification>) -> Self {
        Envelope::Aggregated(AggregatedNotification { notifications })
    }

    /// All notifications carried by this envelope, in order
    pub fn notifications(&self) -> Vec<&Notification> {
        match self {
            Envelope::Single(notification) => vec![notification],
            Envelope::Aggregated(aggregated) => aggregated.notifications.iter().collect(),
        }
    }
}

impl From<Notification> for Envelope {
    fn from(notification: Notification) -> Self {
        Envelope::Single(notification)
    }
}
