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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{NotificationContentType, NotificationEventType, TimeWindowType};

/// oneM2M resource type code
pub type ResourceType = u16;

/// The view of a resource tree entry that the notification engine needs: identity, type, and its
/// attribute representation for notification content.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Resource {
    pub ri: String,
    pub pi: Option<String>,
    pub ty: ResourceType,
    /// Type short name, e.g. `m2m:cnt`, which wraps the attributes in a full representation
    pub tpe: String,
    /// lastModifiedTime
    pub lt: Option<DateTime<Utc>>,
    pub is_virtual: bool,
    pub attributes: Map<String, Value>,
}

impl Resource {
    pub fn new<T, U>(ri: T, ty: ResourceType, tpe: U) -> Self
    where
        T: Into<String>,
        U: Into<String>,
    {
        Resource {
            ri: ri.into(),
            ty,
            tpe: tpe.into(),
            ..Default::default()
        }
    }

    pub fn with_parent<T: Into<String>>(mut self, pi: T) -> Self {
        self.pi = Some(pi.into());
        self
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_last_modified(mut self, lt: DateTime<Utc>) -> Self {
        self.lt = Some(lt);
        self
    }

    pub fn as_virtual(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Full representation, `{ <tpe>: { <attributes> } }`
    pub fn as_dict(&self) -> Value {
        let mut attributes = self.attributes.clone();
        attributes
            .entry("ri")
            .or_insert_with(|| Value::String(self.ri.clone()));
        attributes.entry("ty").or_insert_with(|| Value::from(self.ty));

        let mut dict = Map::new();
        dict.insert(self.tpe.clone(), Value::Object(attributes));
        Value::Object(dict)
    }
}

/// batchNotify
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchNotify {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur: Option<String>,
}

/// One notificationStatsInfo entry, per notification target
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationStatsInfo {
    /// target
    pub tg: String,
    /// requestsSent
    pub rqs: u64,
    /// responsesReceived
    pub rsr: u64,
    /// notificationEventsCounted
    pub noec: u64,
}

impl NotificationStatsInfo {
    pub fn new<T: Into<String>>(target: T) -> Self {
        NotificationStatsInfo {
            tg: target.into(),
            rqs: 0,
            rsr: 0,
            noec: 0,
        }
    }
}

/// Time window descriptor of a cross-resource subscription.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub twt: TimeWindowType,
    /// timeWindowSize, ISO 8601 duration
    pub tws: String,
    /// Subscriptions whose notifications feed this window
    pub sources: Vec<String>,
}

impl TimeWindow {
    /// Number of unique notifiers needed to satisfy a window
    pub fn expected_count(&self) -> usize {
        self.sources.len()
    }
}

/// Subscription (or cross-resource subscription) record as held by the storage collaborator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub ri: String,
    /// Resource that this subscription is registered against
    pub pi: String,
    #[serde(rename = "nus")]
    pub nu: Vec<String>,
    pub net: Vec<NotificationEventType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chty: Option<Vec<ResourceType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atr: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bn: Option<BatchNotify>,
    #[serde(default)]
    pub ln: bool,
    #[serde(default)]
    pub nct: NotificationContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exc: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nse: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsi: Option<Vec<NotificationStatsInfo>>,
    /// Creator, included in notifications when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cr: Option<String>,
    /// subscriberURI, receives the deletion notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub su: Option<String>,
    /// associatedCrossResourceSub, also receive the deletion notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acrs: Option<Vec<String>>,
    /// maxAge for blocking RETRIEVE, ISO 8601 duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ma: Option<String>,
    /// Present for cross-resource subscriptions only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeWindow>,
}

impl SubscriptionRecord {
    pub fn new<T, U>(ri: T, pi: U, nu: Vec<String>, net: Vec<NotificationEventType>) -> Self
    where
        T: Into<String>,
        U: Into<String>,
    {
        SubscriptionRecord {
            ri: ri.into(),
            pi: pi.into(),
            nu,
            net,
            ..Default::default()
        }
    }

    pub fn is_cross_resource(&self) -> bool {
        self.window.is_some()
    }

    pub fn stats_enabled(&self) -> bool {
        self.nse == Some(true)
    }

    pub fn stats_for(&self, target: &str) -> Option<&NotificationStatsInfo> {
        self.nsi.as_ref()?.iter().find(|entry| entry.tg == target)
    }
}
