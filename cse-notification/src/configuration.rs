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

use std::sync::Arc;
use std::time::Duration;

use uriparse::Path;

/// Default delivery command channel buffer size
pub(crate) const DEFAULT_COMMAND_BUFFER_SIZE: usize = 1024;

/// Batch notification duration used when a subscription's `bn` carries no `dur`
pub(crate) const DEFAULT_BATCH_DURATION: Duration = Duration::from_secs(60);

/// Shortest accepted batch notification duration
pub(crate) const MIN_BATCH_DURATION: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct ConfigurationError(String);

impl ConfigurationError {
    pub fn new<T>(message: T) -> ConfigurationError
    where
        T: Into<String>,
    {
        ConfigurationError(message.into())
    }
}

impl std::fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("Configuration error: {}", self.0))
    }
}

impl std::error::Error for ConfigurationError {}

#[derive(Clone, Debug)]
pub struct NotificationConfiguration {
    pub cse_id: String,
    pub async_subscription_notifications: bool,
    pub default_batch_duration: Duration,
    pub delivery_command_buffer: usize,
}

/// Holder object for notification engine configuration options; this performs validation of configuration parameters at construction time.
impl NotificationConfiguration {
    /// Create an "immutable" (Arc) `NotificationConfiguration` object from a set of configuration parameters.
    ///
    /// Note: the default internal command channel buffer size is DEFAULT_COMMAND_BUFFER_SIZE = 1024
    ///
    /// # Arguments
    ///
    /// * `cse_id` - SP-relative CSE-ID of this CSE (e.g. `/id-in`), used as notification originator and to build subscription references
    /// * `async_subscription_notifications` - whether non-blocking notifications are sent in the background
    /// * `default_batch_duration` - batch notification duration for subscriptions without `bn/dur`, defaults to DEFAULT_BATCH_DURATION when `None` is passed
    /// * `delivery_command_buffer` - buffer size for delivery actor commands, defaults to DEFAULT_COMMAND_BUFFER_SIZE when `None` or 0 is passed
    ///
    /// # Errors
    ///
    /// Returns a ConfigurationError in case an invalid CSE-ID is provided (this is determined via the uriparse crate Path::try_from() method),
    /// or when the default batch duration is shorter than one second.
    pub fn create(
        cse_id: String,
        async_subscription_notifications: bool,
        default_batch_duration: Option<Duration>,
        delivery_command_buffer: Option<usize>,
    ) -> Result<Arc<NotificationConfiguration>, ConfigurationError> {
        let cse_id = cse_id.trim().trim_end_matches('/').to_string();
        match Path::try_from(cse_id.as_str()) {
            Err(e) => {
                return Err(ConfigurationError::new(format!("Invalid CSE-ID: {e}")));
            }
            Ok(path) => {
                if !path.is_absolute() || cse_id.starts_with("//") || cse_id.len() < 2 {
                    return Err(ConfigurationError::new(format!(
                        "CSE-ID must be SP-relative: {cse_id}"
                    )));
                }
            }
        }

        let default_batch_duration = default_batch_duration.unwrap_or(DEFAULT_BATCH_DURATION);
        if default_batch_duration < MIN_BATCH_DURATION {
            return Err(ConfigurationError::new(
                "Default batch notification duration must be at least one second",
            ));
        }

        Ok(Arc::new(NotificationConfiguration {
            cse_id,
            async_subscription_notifications,
            default_batch_duration,
            delivery_command_buffer: delivery_command_buffer
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_COMMAND_BUFFER_SIZE)
                .clamp(1, DEFAULT_COMMAND_BUFFER_SIZE),
        }))
    }
}
