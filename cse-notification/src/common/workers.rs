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
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;

use crate::helpers;

// Registry of named background workers (batch flush timers, time window monitors). A name identifies
// at most one worker; starting a worker under a name that is already in use first cancels the previous one.
// Workers must never stop themselves through the pool, as `stop()` awaits the cancelled task.

struct Worker<T> {
    handle: JoinHandle<()>,
    data: T,
}

pub(crate) struct WorkerPool<T> {
    workers: Mutex<HashMap<String, Worker<T>>>,
}

impl<T: Clone + Send + 'static> WorkerPool<T> {
    pub(crate) fn new() -> Self {
        WorkerPool {
            workers: Mutex::new(HashMap::new()),
        }
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<String, Worker<T>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `worker` under `name`, carrying `data` alongside it. A running worker of the same name is cancelled first.
    pub(crate) async fn start<F>(&self, name: &str, data: T, worker: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.stop(name).await;

        debug!("Starting worker {name}");
        let handle = helpers::spawn_and_log_error(async move {
            worker.await;
            Ok(())
        });
        if let Some(replaced) = self
            .workers()
            .insert(name.to_string(), Worker { handle, data })
        {
            // lost a race against another start() for the same name
            replaced.handle.abort();
        }
    }

    /// Cancel the worker registered under `name`, returning its data if it was still running.
    pub(crate) async fn stop(&self, name: &str) -> Option<T> {
        let worker = self.workers().remove(name)?;
        Self::cancel(name, worker).await
    }

    /// Cancel all workers whose name starts with `prefix`; returns name and data of those that were still running.
    pub(crate) async fn stop_matching(&self, prefix: &str) -> Vec<(String, T)> {
        let matching: Vec<(String, Worker<T>)> = {
            let mut workers = self.workers();
            let names: Vec<String> = workers
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect();
            names
                .into_iter()
                .filter_map(|name| workers.remove(&name).map(|w| (name, w)))
                .collect()
        };

        let mut stopped = Vec::new();
        for (name, worker) in matching {
            if let Some(data) = Self::cancel(&name, worker).await {
                stopped.push((name, data));
            }
        }
        stopped
    }

    /// Forget the worker registered under `name` without cancelling it; it keeps running to its end.
    pub(crate) fn detach(&self, name: &str) {
        if self.workers().remove(name).is_some() {
            debug!("Detached worker {name}");
        }
    }

    pub(crate) async fn stop_all(&self) {
        self.stop_matching("").await;
    }

    async fn cancel(name: &str, worker: Worker<T>) -> Option<T> {
        let Worker { handle, data } = worker;
        if handle.is_finished() {
            return None;
        }
        debug!("Stopping worker {name}");
        handle.abort();
        let _ = handle.await;
        Some(data)
    }

    /// Data of the worker registered under `name`, if that worker is still running.
    pub(crate) fn find(&self, name: &str) -> Option<T> {
        self.workers()
            .get(name)
            .filter(|w| !w.handle.is_finished())
            .map(|w| w.data.clone())
    }

    pub(crate) fn is_running(&self, name: &str) -> bool {
        self.find(name).is_some()
    }
}
