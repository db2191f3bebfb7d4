// SPDX-License-Identifier: Apache-2.0
//! Live query behavior: fetch policies, error policies, ordering, and
//! entry lifecycle.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use bramble_client::{ErrorPolicy, FetchPolicy, WatchOptions, WatchState};
use bramble_graphql::{ops, GraphqlError};
use common::{event_sink, scripted_client, wait_for_events, wait_until};
use serde_json::{json, Value};
use std::sync::Arc;

fn project(id: &str, name: &str) -> Value {
    json!({
        "__typename": "Project",
        "id": id,
        "name": name,
        "description": null,
        "status": "ACTIVE",
        "dueDate": null,
        "taskCount": 0,
        "completedTasks": 0,
        "completionRate": 0.0,
    })
}

fn task(id: &str, title: &str, status: &str) -> Value {
    json!({
        "__typename": "Task",
        "id": id,
        "title": title,
        "description": null,
        "status": status,
        "assigneeEmail": null,
        "dueDate": null,
    })
}

fn project_names(event_data: &Value) -> Vec<String> {
    event_data["projects"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap().to_string())
        .collect()
}

fn task_titles(event_data: &Value) -> Vec<String> {
    event_data["tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["title"].as_str().unwrap().to_string())
        .collect()
}

// =============================================================================
// Fetch policies
// =============================================================================

#[tokio::test]
async fn cache_and_network_delivers_cache_immediately_then_the_network_result() {
    let (client, transport) = scripted_client();
    transport.push_data(json!({"projects": [project("p1", "Alpha"), project("p2", "Beta")]}));

    let (events, sink) = event_sink();
    let _handle = client.watch(ops::projects(), json!({}), WatchOptions::default(), sink);

    // The cache view (empty list fallback) arrives synchronously, flagged
    // provisional.
    {
        let seen = events.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].data, Some(json!({"projects": []})));
        assert!(seen[0].provisional);
    }

    wait_for_events(&events, 2).await;
    let seen = events.lock().unwrap();
    let last = seen.last().unwrap();
    // Replace, not concatenation: exactly the two fetched projects, in order.
    assert_eq!(project_names(last.data.as_ref().unwrap()), vec!["Alpha", "Beta"]);
    assert!(!last.provisional);
}

#[tokio::test]
async fn cache_first_serves_a_warm_cache_without_refetching() {
    let (client, transport) = scripted_client();
    transport.push_data(json!({"projects": [project("p1", "Alpha")]}));
    client.query(&ops::projects(), json!({})).await.unwrap();

    let (events, sink) = event_sink();
    let handle = client.watch(
        ops::projects(),
        json!({}),
        WatchOptions {
            fetch: FetchPolicy::CacheFirst,
            errors: ErrorPolicy::Ignore,
        },
        sink,
    );

    let seen = events.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(project_names(seen[0].data.as_ref().unwrap()), vec!["Alpha"]);
    assert!(!seen[0].provisional);
    drop(seen);
    assert_eq!(handle.state(), WatchState::Settled);
    // Only the warming query hit the network.
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn changed_variables_are_a_separate_query_entry() {
    let (client, transport) = scripted_client();
    transport.push_data(json!({"tasks": [task("t-1", "A", "TODO")]}));
    transport.push_data(json!({"tasks": [task("t-9", "Z", "DONE")]}));

    let (first, sink_a) = event_sink();
    let (second, sink_b) = event_sink();
    let _a = client.watch(ops::tasks(), json!({"projectId": "p1"}), WatchOptions::default(), sink_a);
    let _b = client.watch(ops::tasks(), json!({"projectId": "p2"}), WatchOptions::default(), sink_b);

    let (fc, sc) = (Arc::clone(&first), Arc::clone(&second));
    wait_until(move || {
        let a = fc.lock().unwrap();
        let b = sc.lock().unwrap();
        let settled = |events: &Vec<bramble_client::QueryEvent>| {
            events
                .last()
                .and_then(|e| e.data.as_ref())
                .is_some_and(|d| !d["tasks"].as_array().unwrap().is_empty())
        };
        settled(&a) && settled(&b)
    })
    .await;

    let a = first.lock().unwrap();
    let b = second.lock().unwrap();
    assert_eq!(task_titles(a.last().unwrap().data.as_ref().unwrap()), vec!["A"]);
    assert_eq!(task_titles(b.last().unwrap().data.as_ref().unwrap()), vec!["Z"]);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn watching_the_same_query_joins_the_existing_entry() {
    let (client, transport) = scripted_client();
    transport.push_data(json!({"projects": [project("p1", "Alpha")]}));

    let (first, sink_a) = event_sink();
    let handle_a = client.watch(ops::projects(), json!({}), WatchOptions::default(), sink_a);
    wait_until({
        let first = Arc::clone(&first);
        move || {
            first
                .lock()
                .unwrap()
                .last()
                .and_then(|e| e.data.as_ref())
                .is_some_and(|d| !d["projects"].as_array().unwrap().is_empty())
        }
    })
    .await;

    // Same document, same canonical variables: no second network request,
    // and the new subscriber replays the current result immediately.
    let (second, sink_b) = event_sink();
    let handle_b = client.watch(ops::projects(), json!({}), WatchOptions::default(), sink_b);
    {
        let seen = second.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(project_names(seen[0].data.as_ref().unwrap()), vec!["Alpha"]);
    }
    assert_eq!(transport.requests().len(), 1);
    drop(handle_a);
    drop(handle_b);
}

// =============================================================================
// Ordering
// =============================================================================

#[tokio::test]
async fn writes_to_the_same_entity_notify_in_write_order() {
    let (client, transport) = scripted_client();
    transport.push_data(json!({"tasks": [task("t-1", "A", "TODO")]}));

    let (events, sink) = event_sink();
    let _handle = client.watch(ops::tasks(), json!({"projectId": "p1"}), WatchOptions::default(), sink);
    wait_for_events(&events, 2).await;

    // Two authoritative writes, W1 then W2, touching the same entity.
    for title in ["B", "C"] {
        let patches = client.store().normalize(
            &ops::tasks().selection,
            &json!({"projectId": "p1"}),
            &json!({"tasks": [task("t-1", title, "TODO")]}),
        );
        client.store().apply(patches);
    }

    wait_for_events(&events, 4).await;
    let seen = events.lock().unwrap();
    let titles: Vec<Vec<String>> = seen
        .iter()
        .map(|e| task_titles(e.data.as_ref().unwrap()))
        .collect();
    // W1's effect is visible, then superseded by W2's — never the reverse.
    assert_eq!(
        titles,
        vec![
            Vec::<String>::new(),
            vec!["A".to_string()],
            vec!["B".to_string()],
            vec!["C".to_string()],
        ]
    );
}

// =============================================================================
// Error policies
// =============================================================================

#[tokio::test]
async fn error_policy_all_delivers_partial_data_and_errors_together() {
    let (client, transport) = scripted_client();
    transport.push_data_with_errors(
        json!({"projects": [project("p1", "Alpha")]}),
        vec![GraphqlError::new("completionRate unavailable".into())],
    );

    let (events, sink) = event_sink();
    let _handle = client.watch(
        ops::projects(),
        json!({}),
        WatchOptions {
            fetch: FetchPolicy::NetworkOnly,
            errors: ErrorPolicy::All,
        },
        sink,
    );

    wait_for_events(&events, 1).await;
    let seen = events.lock().unwrap();
    let event = &seen[0];
    // Both halves in one delivery — never an error alone beside partial data.
    assert_eq!(project_names(event.data.as_ref().unwrap()), vec!["Alpha"]);
    assert_eq!(event.errors.len(), 1);
    assert_eq!(event.errors[0].message, "completionRate unavailable");
}

#[tokio::test]
async fn error_policy_ignore_delivers_only_the_data() {
    let (client, transport) = scripted_client();
    transport.push_data_with_errors(
        json!({"projects": [project("p1", "Alpha")]}),
        vec![GraphqlError::new("completionRate unavailable".into())],
    );

    let (events, sink) = event_sink();
    let _handle = client.watch(
        ops::projects(),
        json!({}),
        WatchOptions {
            fetch: FetchPolicy::NetworkOnly,
            errors: ErrorPolicy::Ignore,
        },
        sink,
    );

    wait_for_events(&events, 1).await;
    let seen = events.lock().unwrap();
    assert_eq!(project_names(seen[0].data.as_ref().unwrap()), vec!["Alpha"]);
    assert!(seen[0].errors.is_empty());
}

#[tokio::test]
async fn errors_without_data_still_reach_all_policy_subscribers() {
    let (client, transport) = scripted_client();
    transport.push_errors(vec![GraphqlError::new("organizations unavailable".into())]);

    let (events, sink) = event_sink();
    let handle = client.watch(
        ops::organizations(),
        json!({}),
        WatchOptions {
            fetch: FetchPolicy::NetworkOnly,
            errors: ErrorPolicy::All,
        },
        sink,
    );

    wait_for_events(&events, 1).await;
    let seen = events.lock().unwrap();
    assert!(seen[0].data.is_none());
    assert_eq!(seen[0].errors.len(), 1);
    drop(seen);
    assert_eq!(handle.state(), WatchState::Errored);
}

// =============================================================================
// Entry lifecycle
// =============================================================================

#[tokio::test]
async fn dropping_the_last_subscriber_aborts_the_in_flight_fetch() {
    let (client, transport) = scripted_client();
    let gate = transport.push_gated_data(json!({"projects": [project("p1", "Alpha")]}));

    let (events, sink) = event_sink();
    let handle = client.watch(
        ops::projects(),
        json!({}),
        WatchOptions {
            fetch: FetchPolicy::NetworkOnly,
            errors: ErrorPolicy::Ignore,
        },
        sink,
    );
    {
        let transport = Arc::clone(&transport);
        wait_until(move || transport.requests().len() == 1).await;
    }

    drop(handle);
    gate.add_permits(1);
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    // The late completion left no orphaned effect on the store and produced
    // no delivery.
    assert_eq!(client.store().version(), 0);
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn an_eviction_that_breaks_the_cached_result_triggers_a_refetch() {
    let (client, transport) = scripted_client();
    transport.push_data(json!({"tasks": [task("t-1", "A", "TODO")]}));
    transport.push_data(json!({"tasks": [task("t-9", "Z", "DONE")]}));

    let (events, sink) = event_sink();
    let _handle = client.watch(ops::tasks(), json!({"projectId": "p1"}), WatchOptions::default(), sink);
    wait_for_events(&events, 2).await;

    // Evict the task out from under the cached list: the recompute misses
    // internally (nothing surfaces to the subscriber) and revalidates.
    let mut patches = bramble_cache::PatchSet::new();
    patches.push_eviction(bramble_cache::EntityKey::new("Task", "t-1"));
    client.store().apply(patches);

    {
        let events = Arc::clone(&events);
        wait_until(move || {
            events
                .lock()
                .unwrap()
                .last()
                .and_then(|e| e.data.as_ref())
                .is_some_and(|d| task_titles(d) == vec!["Z".to_string()])
        })
        .await;
    }
    assert_eq!(transport.requests().len(), 2);
}
