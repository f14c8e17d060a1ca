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

// oneM2M carries durations (batch notify duration, time window size, max age) as ISO 8601
// duration strings, e.g. `PT5S` or `P1DT2H30M`. Calendar units (years, months) are not
// supported since they have no fixed length.

use std::time::Duration;

use crate::{NotificationError, ResponseStatusCode};

const SECONDS_PER_MINUTE: f64 = 60.0;
const SECONDS_PER_HOUR: f64 = 3600.0;
const SECONDS_PER_DAY: f64 = 86400.0;
const SECONDS_PER_WEEK: f64 = 604800.0;

/// Parse an ISO 8601 duration string into a `Duration`.
///
/// # Errors
///
/// Returns a `BAD_REQUEST` status for anything that is not a well-formed, non-calendar duration.
pub(crate) fn parse_duration(value: &str) -> Result<Duration, NotificationError> {
    let invalid = || {
        NotificationError::fail_with_code(
            ResponseStatusCode::BadRequest,
            format!("Invalid duration: {value}"),
        )
    };

    let rest = value.trim().strip_prefix('P').ok_or_else(invalid)?;
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut seconds = 0.0;
    let mut in_time = false;
    let mut number = String::new();
    let mut components = 0;
    let mut date_components = 0;

    for c in rest.chars() {
        match c {
            'T' if !in_time && number.is_empty() => {
                in_time = true;
                date_components = components;
            }
            '0'..='9' => number.push(c),
            '.' | ',' if in_time && !number.contains('.') => number.push('.'),
            unit => {
                if number.is_empty() {
                    return Err(invalid());
                }
                let amount: f64 = number.parse().map_err(|_| invalid())?;
                let factor = match (in_time, unit) {
                    (false, 'W') => SECONDS_PER_WEEK,
                    (false, 'D') => SECONDS_PER_DAY,
                    (true, 'H') => SECONDS_PER_HOUR,
                    (true, 'M') => SECONDS_PER_MINUTE,
                    (true, 'S') => 1.0,
                    _ => return Err(invalid()),
                };
                // only seconds may carry a fraction
                if unit != 'S' && number.contains('.') {
                    return Err(invalid());
                }
                seconds += amount * factor;
                number.clear();
                components += 1;
            }
        }
    }

    if !number.is_empty() || components == 0 || (in_time && components == date_components) {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(seconds).map_err(|_| invalid())
}
