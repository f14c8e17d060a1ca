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

use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{NotificationEventType, Resource};

/// Missing data state of one time series subscription
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MissingData {
    pub subscription_ri: String,
    /// Number of missing data points that must be reached before a report is sent
    pub missing_data_number: u32,
    pub missing_data_current_nr: u32,
    pub missing_data_list: Vec<String>,
}

impl MissingData {
    pub fn new<T: Into<String>>(subscription_ri: T, missing_data_number: u32) -> Self {
        MissingData {
            subscription_ri: subscription_ri.into(),
            missing_data_number,
            ..Default::default()
        }
    }

    pub fn add_missing_data_point<T: Into<String>>(&mut self, timestamp: T) {
        self.missing_data_list.push(timestamp.into());
        self.missing_data_current_nr += 1;
    }

    pub fn is_report_due(&self) -> bool {
        self.missing_data_current_nr >= self.missing_data_number
    }

    pub fn clear_missing_data_list(&mut self) {
        self.missing_data_list.clear();
        self.missing_data_current_nr = 0;
    }

    /// timeSeriesNotification content
    pub fn as_value(&self) -> Value {
        json!({
            "mdlt": self.missing_data_list,
            "mdc": self.missing_data_current_nr,
        })
    }
}

/// Missing data states of a time series, keyed by subscription resource ID. Shared between the
/// time series that detects missing data points and the notification engine that resets them.
pub type SharedMissingData = Arc<Mutex<HashMap<String, MissingData>>>;

/// A resource lifecycle event, each variant carrying exactly the facts relevant to its notification event type.
#[derive(Clone, Debug)]
pub enum ResourceEvent {
    ResourceUpdate {
        modified_attributes: Option<Map<String, Value>>,
    },
    ResourceDelete,
    CreateDirectChild {
        child: Resource,
    },
    DeleteDirectChild {
        child: Resource,
    },
    RetrieveCntNoChild,
    TriggerReceivedForAe,
    BlockingUpdate {
        modified_attributes: Option<Map<String, Value>>,
    },
    MissingDataReport {
        missing_data: SharedMissingData,
    },
    BlockingRetrieve,
    BlockingRetrieveDirectChild,
}

impl ResourceEvent {
    pub fn event_type(&self) -> NotificationEventType {
        match self {
            ResourceEvent::ResourceUpdate { .. } => NotificationEventType::ResourceUpdate,
            ResourceEvent::ResourceDelete => NotificationEventType::ResourceDelete,
            ResourceEvent::CreateDirectChild { .. } => NotificationEventType::CreateDirectChild,
            ResourceEvent::DeleteDirectChild { .. } => NotificationEventType::DeleteDirectChild,
            ResourceEvent::RetrieveCntNoChild => NotificationEventType::RetrieveCntNoChild,
            ResourceEvent::TriggerReceivedForAe => NotificationEventType::TriggerReceivedForAe,
            ResourceEvent::BlockingUpdate { .. } => NotificationEventType::BlockingUpdate,
            ResourceEvent::MissingDataReport { .. } => {
                NotificationEventType::ReportOnGeneratedMissingDataPoints
            }
            ResourceEvent::BlockingRetrieve => NotificationEventType::BlockingRetrieve,
            ResourceEvent::BlockingRetrieveDirectChild => {
                NotificationEventType::BlockingRetrieveDirectChild
            }
        }
    }

    pub fn child(&self) -> Option<&Resource> {
        match self {
            ResourceEvent::CreateDirectChild { child }
            | ResourceEvent::DeleteDirectChild { child } => Some(child),
            _ => None,
        }
    }

    pub fn modified_attributes(&self) -> Option<&Map<String, Value>> {
        match self {
            ResourceEvent::ResourceUpdate {
                modified_attributes,
            }
            | ResourceEvent::BlockingUpdate {
                modified_attributes,
            } => modified_attributes.as_ref(),
            _ => None,
        }
    }
}
