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

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use test_case::test_case;

    use crate::test_lib::{
        self,
        helpers::{ORIGINATOR, TARGET1, TARGET2},
        mocks::RecordingTransport,
    };
    use crate::{
        helpers, MissingData, NotificationContentType, NotificationEventType, ResourceEvent,
        ResponseStatusCode,
    };

    fn update(modified: &[(&str, serde_json::Value)]) -> ResourceEvent {
        ResourceEvent::ResourceUpdate {
            modified_attributes: Some(test_lib::helpers::attributes(modified)),
        }
    }

    #[test_case(ResourceEvent::ResourceDelete; "resourceDelete")]
    #[test_case(ResourceEvent::CreateDirectChild { child: test_lib::helpers::content_instance("cin1", "cnt1") }; "createDirectChild")]
    #[test_case(ResourceEvent::DeleteDirectChild { child: test_lib::helpers::content_instance("cin1", "cnt1") }; "deleteDirectChild")]
    #[test_case(ResourceEvent::RetrieveCntNoChild; "retrieveCntNoChild")]
    #[test_case(ResourceEvent::BlockingRetrieve; "blockingRetrieve")]
    #[test_case(ResourceEvent::BlockingUpdate { modified_attributes: None }; "blockingUpdate")]
    #[tokio::test]
    async fn test_event_type_not_subscribed_is_never_delivered(event: ResourceEvent) {
        helpers::init_once();
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(Arc::new(test_lib::mocks::silent_transport()), false);
        let subscription = test_lib::helpers::subscription(
            "sub1",
            "cnt1",
            &[TARGET1],
            &[NotificationEventType::ResourceUpdate],
        );
        test_lib::helpers::store(&storage, &subscription).await;

        let result = manager
            .check_subscriptions(&test_lib::helpers::container("cnt1"), &event)
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_resource_update_is_delivered() {
        helpers::init_once();
        let transport = RecordingTransport::new();
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(transport.clone(), false);
        let subscription = test_lib::helpers::subscription(
            "sub1",
            "cnt1",
            &[TARGET1, TARGET2],
            &[NotificationEventType::ResourceUpdate],
        );
        test_lib::helpers::store(&storage, &subscription).await;

        manager
            .check_subscriptions(
                &test_lib::helpers::container("cnt1"),
                &update(&[("lbl", json!(["a"]))]),
            )
            .await
            .expect("Error checking subscriptions");

        for target in [TARGET1, TARGET2] {
            let requests = transport.event_requests_to(target);
            assert_eq!(requests.len(), 1);
            assert_eq!(requests[0].originator, "/id-in");
            assert_eq!(
                serde_json::to_value(&requests[0].content).unwrap(),
                json!({
                    "m2m:sgn": {
                        "nev": { "net": 1, "rep": { "m2m:cnt": { "ri": "cnt1", "ty": 3 } } },
                        "sur": "/id-in/sub1",
                        "cr": ORIGINATOR
                    }
                })
            );
        }
    }

    #[tokio::test]
    async fn test_attribute_filter() {
        helpers::init_once();
        let transport = RecordingTransport::new();
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(transport.clone(), false);
        let mut subscription = test_lib::helpers::subscription(
            "sub1",
            "cnt1",
            &[TARGET1],
            &[NotificationEventType::ResourceUpdate],
        );
        subscription.atr = Some(vec!["con".to_string()]);
        test_lib::helpers::store(&storage, &subscription).await;
        let container = test_lib::helpers::container("cnt1");

        manager
            .check_subscriptions(&container, &update(&[("con", json!("x"))]))
            .await
            .unwrap();
        assert_eq!(transport.events_to(TARGET1).len(), 1);

        manager
            .check_subscriptions(&container, &update(&[("lbl", json!("y"))]))
            .await
            .unwrap();
        manager
            .check_subscriptions(
                &container,
                &ResourceEvent::ResourceUpdate {
                    modified_attributes: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(transport.events_to(TARGET1).len(), 1);
    }

    #[tokio::test]
    async fn test_child_events() {
        helpers::init_once();
        let transport = RecordingTransport::new();
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(transport.clone(), false);
        let mut subscription = test_lib::helpers::subscription(
            "sub1",
            "cnt1",
            &[TARGET1],
            &[
                NotificationEventType::CreateDirectChild,
                NotificationEventType::DeleteDirectChild,
            ],
        );
        subscription.chty = Some(vec![4]);
        test_lib::helpers::store(&storage, &subscription).await;
        let container = test_lib::helpers::container("cnt1");

        // matching child type
        let cin = test_lib::helpers::content_instance("cin1", "cnt1");
        manager
            .check_subscriptions(&container, &ResourceEvent::CreateDirectChild { child: cin })
            .await
            .unwrap();
        // child type not in chty
        let child_container = test_lib::helpers::container("cnt2").with_parent("cnt1");
        manager
            .check_subscriptions(
                &container,
                &ResourceEvent::DeleteDirectChild {
                    child: child_container,
                },
            )
            .await
            .unwrap();
        // the subscription's own creation
        let own = crate::Resource::new("sub1", 4, "m2m:sub").with_parent("cnt1");
        manager
            .check_subscriptions(&container, &ResourceEvent::CreateDirectChild { child: own })
            .await
            .unwrap();
        // virtual child resources
        let latest = crate::Resource::new("la", 4, "m2m:cin").as_virtual();
        manager
            .check_subscriptions(&container, &ResourceEvent::CreateDirectChild { child: latest })
            .await
            .unwrap();

        let events = transport.events_to(TARGET1);
        assert_eq!(events.len(), 1);
        let nev = events[0].nev.as_ref().unwrap();
        assert_eq!(nev.net, Some(NotificationEventType::CreateDirectChild));
        assert_eq!(nev.rep, Some(json!({ "m2m:cin": { "ri": "cin1", "ty": 4 } })));
    }

    #[tokio::test]
    async fn test_virtual_resource_is_skipped() {
        helpers::init_once();
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(Arc::new(test_lib::mocks::silent_transport()), false);
        let subscription = test_lib::helpers::subscription(
            "sub1",
            "la",
            &[TARGET1],
            &[NotificationEventType::ResourceDelete],
        );
        test_lib::helpers::store(&storage, &subscription).await;

        let resource = crate::Resource::new("la", 4, "m2m:cin").as_virtual();
        assert!(manager
            .check_subscriptions(&resource, &ResourceEvent::ResourceDelete)
            .await
            .is_ok());
    }

    #[test_case(NotificationContentType::All, Some(json!({ "m2m:cnt": { "con": "x", "ri": "cnt1", "ty": 3 } })); "all attributes")]
    #[test_case(NotificationContentType::ModifiedAttributes, Some(json!({ "m2m:cnt": { "con": "x" } })); "modified attributes")]
    #[test_case(NotificationContentType::Ri, Some(json!({ "m2m:uri": "cnt1" })); "resource id")]
    #[test_case(NotificationContentType::TriggerPayload, None; "trigger payload")]
    #[tokio::test]
    async fn test_notification_content_type(
        nct: NotificationContentType,
        expected: Option<serde_json::Value>,
    ) {
        helpers::init_once();
        let transport = RecordingTransport::new();
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(transport.clone(), false);
        let mut subscription = test_lib::helpers::subscription(
            "sub1",
            "cnt1",
            &[TARGET1],
            &[NotificationEventType::ResourceUpdate],
        );
        subscription.nct = nct;
        test_lib::helpers::store(&storage, &subscription).await;

        let container = test_lib::helpers::container("cnt1")
            .with_attributes(test_lib::helpers::attributes(&[("con", json!("x"))]));
        manager
            .check_subscriptions(&container, &update(&[("con", json!("x"))]))
            .await
            .unwrap();

        let events = transport.events_to(TARGET1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].nev.as_ref().unwrap().rep, expected);
    }

    #[tokio::test]
    async fn test_missing_data_report() {
        helpers::init_once();
        let transport = RecordingTransport::new();
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(transport.clone(), false);
        let mut subscription = test_lib::helpers::subscription(
            "sub1",
            "ts1",
            &[TARGET1],
            &[NotificationEventType::ReportOnGeneratedMissingDataPoints],
        );
        subscription.nct = NotificationContentType::TimeSeriesNotification;
        test_lib::helpers::store(&storage, &subscription).await;

        let time_series = crate::Resource::new("ts1", 29, "m2m:ts");
        let mut missing_data = MissingData::new("sub1", 2);
        missing_data.add_missing_data_point("20241010T101010");
        let shared = Arc::new(Mutex::new(HashMap::from([(
            "sub1".to_string(),
            missing_data,
        )])));
        let event = ResourceEvent::MissingDataReport {
            missing_data: shared.clone(),
        };

        // threshold not reached yet
        manager.check_subscriptions(&time_series, &event).await.unwrap();
        assert!(transport.events_to(TARGET1).is_empty());

        shared
            .lock()
            .unwrap()
            .get_mut("sub1")
            .unwrap()
            .add_missing_data_point("20241010T101020");
        manager.check_subscriptions(&time_series, &event).await.unwrap();

        let events = transport.events_to(TARGET1);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].nev.as_ref().unwrap().rep,
            Some(json!({ "m2m:tsn": { "mdlt": ["20241010T101010", "20241010T101020"], "mdc": 2 } }))
        );
        let reset = shared.lock().unwrap().get("sub1").unwrap().clone();
        assert_eq!(reset.missing_data_current_nr, 0);
        assert!(reset.missing_data_list.is_empty());
    }

    #[tokio::test]
    async fn test_asynchronous_delivery() {
        helpers::init_once();
        let transport = RecordingTransport::new();
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(transport.clone(), true);
        let subscription = test_lib::helpers::subscription(
            "sub1",
            "cnt1",
            &[TARGET1],
            &[NotificationEventType::ResourceDelete],
        );
        test_lib::helpers::store(&storage, &subscription).await;

        manager
            .check_subscriptions(
                &test_lib::helpers::container("cnt1"),
                &ResourceEvent::ResourceDelete,
            )
            .await
            .unwrap();
        manager.drain_deliveries().await;
        assert_eq!(transport.events_to(TARGET1).len(), 1);

        // switched to synchronous delivery at runtime
        manager.set_async_notifications(false);
        manager
            .check_subscriptions(
                &test_lib::helpers::container("cnt1"),
                &ResourceEvent::ResourceDelete,
            )
            .await
            .unwrap();
        assert_eq!(transport.events_to(TARGET1).len(), 2);
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_stop_fan_out() {
        helpers::init_once();
        let transport = RecordingTransport::new();
        transport.unreachable(TARGET1);
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(transport.clone(), false);
        for ri in ["sub1", "sub2"] {
            let subscription = test_lib::helpers::subscription(
                ri,
                "cnt1",
                &[TARGET1, TARGET2],
                &[NotificationEventType::ResourceDelete],
            );
            test_lib::helpers::store(&storage, &subscription).await;
        }

        let result = manager
            .check_subscriptions(
                &test_lib::helpers::container("cnt1"),
                &ResourceEvent::ResourceDelete,
            )
            .await;
        assert!(result.is_ok());
        assert_eq!(transport.events_to(TARGET1).len(), 2);
        assert_eq!(transport.events_to(TARGET2).len(), 2);
    }

    #[test_case(Err(ResponseStatusCode::TargetNotReachable), ResponseStatusCode::RemoteEntityNotReachable; "target not reachable")]
    #[test_case(Ok(ResponseStatusCode::OperationNotAllowed), ResponseStatusCode::OperationDeniedByRemoteEntity; "operation not allowed")]
    #[test_case(Ok(ResponseStatusCode::Other(4103)), ResponseStatusCode::Other(4103); "other status")]
    #[tokio::test]
    async fn test_blocking_event_failure_is_surfaced(
        response: Result<ResponseStatusCode, ResponseStatusCode>,
        expected: ResponseStatusCode,
    ) {
        helpers::init_once();
        let transport = RecordingTransport::new();
        transport.respond(
            TARGET1,
            response.map_err(|code| crate::NotificationError::fail_with_code(code, "failed")),
        );
        // asynchronous notifications do not apply to blocking event types
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(transport.clone(), true);
        let subscription = test_lib::helpers::subscription(
            "sub1",
            "cnt1",
            &[TARGET1],
            &[NotificationEventType::BlockingRetrieve],
        );
        test_lib::helpers::store(&storage, &subscription).await;

        let result = manager
            .check_subscriptions(
                &test_lib::helpers::container("cnt1"),
                &ResourceEvent::BlockingRetrieve,
            )
            .await;
        assert_eq!(result.unwrap_err().code, expected);
        assert_eq!(transport.events_to(TARGET1).len(), 1);
    }

    #[tokio::test]
    async fn test_statistics() {
        helpers::init_once();
        let transport = RecordingTransport::new();
        transport.unreachable(TARGET2);
        let (manager, _stopper, storage) =
            test_lib::helpers::run_manager(transport.clone(), false);
        let mut subscription = test_lib::helpers::subscription(
            "sub1",
            "cnt1",
            &[TARGET1, TARGET2],
            &[NotificationEventType::ResourceUpdate],
        );
        subscription.nse = Some(true);
        manager.update_of_nse_attribute(&mut subscription, Some(true));
        test_lib::helpers::store(&storage, &subscription).await;

        for _ in 0..2 {
            manager
                .check_subscriptions(
                    &test_lib::helpers::container("cnt1"),
                    &update(&[("con", json!("x"))]),
                )
                .await
                .unwrap();
        }

        let stored = test_lib::helpers::stored(&storage, "sub1").await.unwrap();
        let target1 = stored.stats_for(TARGET1).unwrap();
        assert_eq!((target1.rqs, target1.rsr, target1.noec), (2, 2, 2));
        let target2 = stored.stats_for(TARGET2).unwrap();
        assert_eq!((target2.rqs, target2.rsr, target2.noec), (2, 0, 2));
    }
}
