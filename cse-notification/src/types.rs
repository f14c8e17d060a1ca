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

// oneM2M enumerations used by the notification engine. They are exchanged as their integer
// codes, both in envelopes and in persisted subscription records.

macro_rules! integer_enum {
    ($name:ident : $repr:ty { $($variant:ident = $value:expr),+ $(,)? }) => {
        impl From<$name> for $repr {
            fn from(value: $name) -> $repr {
                match value {
                    $($name::$variant => $value,)+
                }
            }
        }

        impl TryFrom<$repr> for $name {
            type Error = String;

            fn try_from(value: $repr) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok($name::$variant),)+
                    other => Err(format!("Invalid {} value: {}", stringify!($name), other)),
                }
            }
        }
    };
}

/// eventNotificationCriteria/notificationEventType
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NotificationEventType {
    ResourceUpdate,
    ResourceDelete,
    CreateDirectChild,
    DeleteDirectChild,
    RetrieveCntNoChild,
    TriggerReceivedForAe,
    BlockingUpdate,
    ReportOnGeneratedMissingDataPoints,
    BlockingRetrieve,
    BlockingRetrieveDirectChild,
}

integer_enum!(NotificationEventType: u8 {
    ResourceUpdate = 1,
    ResourceDelete = 2,
    CreateDirectChild = 3,
    DeleteDirectChild = 4,
    RetrieveCntNoChild = 5,
    TriggerReceivedForAe = 6,
    BlockingUpdate = 7,
    ReportOnGeneratedMissingDataPoints = 8,
    BlockingRetrieve = 9,
    BlockingRetrieveDirectChild = 10,
});

impl NotificationEventType {
    /// Blocking event types are always notified synchronously.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            NotificationEventType::BlockingUpdate
                | NotificationEventType::BlockingRetrieve
                | NotificationEventType::BlockingRetrieveDirectChild
        )
    }

    pub fn is_direct_child(&self) -> bool {
        matches!(
            self,
            NotificationEventType::CreateDirectChild | NotificationEventType::DeleteDirectChild
        )
    }
}

/// notificationContentType
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NotificationContentType {
    #[default]
    All,
    ModifiedAttributes,
    Ri,
    TriggerPayload,
    TimeSeriesNotification,
}

integer_enum!(NotificationContentType: u8 {
    All = 1,
    ModifiedAttributes = 2,
    Ri = 3,
    TriggerPayload = 4,
    TimeSeriesNotification = 5,
});

/// timeWindowType of a cross-resource subscription
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TimeWindowType {
    #[default]
    Periodic,
    Sliding,
}

integer_enum!(TimeWindowType: u8 {
    Periodic = 1,
    Sliding = 2,
});

/// eventCategory request parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EventCategory {
    Immediate,
    BestEffort,
    Latest,
}

integer_enum!(EventCategory: u8 {
    Immediate = 2,
    BestEffort = 3,
    Latest = 4,
});

/// The subset of oneM2M response status codes that the notification engine produces or interprets.
/// Codes not known here are carried through as `Other`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", from = "u16")]
pub enum ResponseStatusCode {
    Ok,
    BadRequest,
    NotFound,
    OperationNotAllowed,
    OperationDeniedByRemoteEntity,
    InternalServerError,
    TargetNotReachable,
    RemoteEntityNotReachable,
    SubscriptionVerificationInitiationFailed,
    Other(u16),
}

impl From<ResponseStatusCode> for u16 {
    fn from(value: ResponseStatusCode) -> u16 {
        match value {
            ResponseStatusCode::Ok => 2000,
            ResponseStatusCode::BadRequest => 4000,
            ResponseStatusCode::NotFound => 4004,
            ResponseStatusCode::OperationNotAllowed => 4005,
            ResponseStatusCode::OperationDeniedByRemoteEntity => 4127,
            ResponseStatusCode::InternalServerError => 5000,
            ResponseStatusCode::TargetNotReachable => 5103,
            ResponseStatusCode::RemoteEntityNotReachable => 5107,
            ResponseStatusCode::SubscriptionVerificationInitiationFailed => 5204,
            ResponseStatusCode::Other(code) => code,
        }
    }
}

impl From<u16> for ResponseStatusCode {
    fn from(value: u16) -> Self {
        match value {
            2000 => ResponseStatusCode::Ok,
            4000 => ResponseStatusCode::BadRequest,
            4004 => ResponseStatusCode::NotFound,
            4005 => ResponseStatusCode::OperationNotAllowed,
            4127 => ResponseStatusCode::OperationDeniedByRemoteEntity,
            5000 => ResponseStatusCode::InternalServerError,
            5103 => ResponseStatusCode::TargetNotReachable,
            5107 => ResponseStatusCode::RemoteEntityNotReachable,
            5204 => ResponseStatusCode::SubscriptionVerificationInitiationFailed,
            code => ResponseStatusCode::Other(code),
        }
    }
}

impl ResponseStatusCode {
    /// Whether this is one of the 2xxx success codes
    pub fn is_success(&self) -> bool {
        (2000..3000).contains(&u16::from(*self))
    }
}

impl std::fmt::Display for ResponseStatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({})", self, u16::from(*self))
    }
}

/// Status object returned by all fallible notification engine operations and by the transport and storage collaborators.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationError {
    pub code: ResponseStatusCode,
    pub message: String,
}

impl NotificationError {
    pub fn fail_with_code<T>(code: ResponseStatusCode, message: T) -> NotificationError
    where
        T: Into<String>,
    {
        NotificationError {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for NotificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{}: {}", self.code, self.message))
    }
}

impl std::error::Error for NotificationError {}
