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

use futures::future::BoxFuture;
use log::*;
use std::sync::Arc;
#[cfg(test)]
use tokio::sync::oneshot;
use tokio::sync::{mpsc::Receiver, Notify};
use tokio::task::JoinSet;

use crate::helpers;

// Background delivery of asynchronous notifications. The notification manager submits one job per notification
// event (fan-out to all targets, statistics, expiration counter) and does not wait for it. On shutdown, jobs that
// were already accepted are run to completion, queued ones are dropped.

pub(crate) enum DeliveryEvent {
    Submit {
        job: BoxFuture<'static, ()>,
    },
    // Purely for use during testing: wait for all accepted jobs to finish
    #[cfg(test)]
    Drain { respond_to: oneshot::Sender<()> },
}

pub(crate) async fn delivery_engine(mut events: Receiver<DeliveryEvent>, shutdown: Arc<Notify>) {
    helpers::init_once();

    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                None => {
                    error!("Problem with delivery command channel, received None-event");
                    break
                },
                Some(event) => event,
            },
            Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = result {
                    error!("Notification delivery task failed: {e}");
                }
                continue;
            },
            _ = shutdown.notified() => break,
        };
        match event {
            DeliveryEvent::Submit { job } => {
                in_flight.spawn(job);
            }
            #[cfg(test)]
            DeliveryEvent::Drain { respond_to } => {
                while let Some(result) = in_flight.join_next().await {
                    if let Err(e) = result {
                        error!("Notification delivery task failed: {e}");
                    }
                }
                let _r = respond_to.send(());
            }
        }
    }

    debug!("Delivery engine stopping, {} deliveries in flight", in_flight.len());
    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            error!("Notification delivery task failed: {e}");
        }
    }
}
