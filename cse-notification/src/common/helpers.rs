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

use log::*;
use std::future::Future;
use std::sync::Once;
use tokio::task;
use uriparse::URI;

static INIT: Once = Once::new();

/// URI scheme of CSE-internal notification receivers, which never get verification requests
pub(crate) const INTERNAL_TARGET_SCHEME: &str = "acme";

pub fn init_once() {
    INIT.call_once(env_logger::init);
}

type SpawnResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
pub(crate) fn spawn_and_log_error<F>(fut: F) -> task::JoinHandle<()>
where
    F: Future<Output = SpawnResult<()>> + Send + 'static,
{
    task::spawn(async move {
        if let Err(e) = fut.await {
            error!("{}", e)
        }
    })
}

/// An identifier is SP-relative when it has the form `/<csi>/<id>`.
pub(crate) fn is_sp_relative(id: &str) -> bool {
    id.len() >= 2 && id.starts_with('/') && !id.starts_with("//")
}

/// Prefix a CSE-relative identifier with the CSE-ID of this CSE.
pub(crate) fn to_sp_relative(cse_id: &str, id: &str) -> String {
    if is_sp_relative(id) {
        id.to_string()
    } else {
        format!("{cse_id}/{id}")
    }
}

/// Compare two unstructured identifiers, which may be given in CSE-relative or SP-relative form.
pub(crate) fn compare_ids(cse_id: &str, id1: &str, id2: &str) -> bool {
    to_sp_relative(cse_id, id1) == to_sp_relative(cse_id, id2)
}

pub(crate) fn is_internal_target(target: &str) -> bool {
    match URI::try_from(target) {
        Ok(uri) => uri.scheme().as_str().eq_ignore_ascii_case(INTERNAL_TARGET_SCHEME),
        Err(_) => false,
    }
}
