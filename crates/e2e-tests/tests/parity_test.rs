//! Backend parity E2E tests.
//!
//! Every scenario here runs once per backend kind and must observe exactly
//! the same outcomes.

use pretty_assertions::assert_eq;

use e2e_tests::{create_test_metrics, ts, BackendKind, TestHarness, BASE_TS_MS};
use hub_storage::{StorageError, WriteOptions};
use hub_types::{MetricKind, ModelProvider, RegistryEntry, SessionEvent, SessionStatus, TimeRange};

/// Put then get returns the identical bytes, on every backend.
#[tokio::test]
async fn test_put_get_byte_identical() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

    for kind in BackendKind::ALL {
        let harness = TestHarness::new(kind).await;
        harness
            .backend
            .put("blobs/all-bytes.bin", payload.clone(), WriteOptions::overwrite())
            .await
            .unwrap();

        let object = harness.backend.get("blobs/all-bytes.bin").await.unwrap();
        assert_eq!(object.payload, payload, "backend {}", kind.label());
        assert_eq!(object.content_type, "application/octet-stream", "backend {}", kind.label());
    }
}

/// Absence, lost preconditions and listing order look the same everywhere.
#[tokio::test]
async fn test_contract_outcomes_match() {
    for kind in BackendKind::ALL {
        let harness = TestHarness::new(kind).await;
        let backend = &harness.backend;

        assert!(
            matches!(backend.get("registry/none.json").await, Err(StorageError::NotFound(_))),
            "backend {}",
            kind.label()
        );
        assert!(
            matches!(backend.delete("registry/none.json").await, Err(StorageError::NotFound(_))),
            "backend {}",
            kind.label()
        );

        let v1 = backend
            .put("registry/a.json", b"1".to_vec(), WriteOptions::create_only())
            .await
            .unwrap();
        assert!(
            matches!(
                backend
                    .put("registry/a.json", b"2".to_vec(), WriteOptions::create_only())
                    .await,
                Err(StorageError::Conflict(_))
            ),
            "backend {}",
            kind.label()
        );
        backend
            .put("registry/a.json", b"2".to_vec(), WriteOptions::if_version(v1.clone()))
            .await
            .unwrap();
        assert!(
            matches!(
                backend
                    .put("registry/a.json", b"3".to_vec(), WriteOptions::if_version(v1))
                    .await,
                Err(StorageError::Conflict(_))
            ),
            "backend {}",
            kind.label()
        );

        for key in ["registry/c.json", "registry/b-2.json", "registry/b.json"] {
            backend
                .put(key, b"{}".to_vec(), WriteOptions::overwrite())
                .await
                .unwrap();
        }
        assert_eq!(
            backend.list("registry/").await.unwrap(),
            vec![
                "registry/a.json",
                "registry/b-2.json",
                "registry/b.json",
                "registry/c.json",
            ],
            "backend {}",
            kind.label()
        );
        assert_eq!(
            backend.list_after("registry/", Some("registry/b.json")).await.unwrap(),
            vec!["registry/c.json"],
            "backend {}",
            kind.label()
        );
    }
}

/// Open, three appends, close; a late append is rejected.
#[tokio::test]
async fn test_session_scenario() {
    for kind in BackendKind::ALL {
        let harness = TestHarness::new(kind).await;
        let sessions = harness.hub.sessions();

        let id = sessions.open().await.unwrap();
        for tool in ["research_topic", "write_post", "save_post"] {
            sessions
                .append(&id, SessionEvent::new(tool, "{}", "ok", 15, true))
                .await
                .unwrap();
        }
        sessions.close(&id, SessionStatus::Completed).await.unwrap();

        let events = sessions.read(&id).await.unwrap();
        let tools: Vec<&str> = events.iter().map(|e| e.tool_name.as_str()).collect();
        assert_eq!(tools, vec!["research_topic", "write_post", "save_post"], "backend {}", kind.label());

        let late = sessions
            .append(&id, SessionEvent::new("late", "{}", "ok", 1, true))
            .await
            .unwrap_err();
        assert!(late.is_not_found(), "backend {}", kind.label());
    }
}

/// Closing twice leaves exactly what closing once left.
#[tokio::test]
async fn test_close_twice_equals_close_once() {
    for kind in BackendKind::ALL {
        let harness = TestHarness::new(kind).await;
        let sessions = harness.hub.sessions();

        let id = sessions.open().await.unwrap();
        sessions.close(&id, SessionStatus::Completed).await.unwrap();
        let once = sessions.load(&id).await.unwrap();
        let keys_once = harness.backend.list("sessions/").await.unwrap();

        sessions.close(&id, SessionStatus::Failed).await.unwrap();
        let twice = sessions.load(&id).await.unwrap();
        let keys_twice = harness.backend.list("sessions/").await.unwrap();

        assert_eq!(once, twice, "backend {}", kind.label());
        assert_eq!(keys_once, keys_twice, "backend {}", kind.label());
    }
}

/// "Hello" then "Hi" yield versions 1 and 2.
#[tokio::test]
async fn test_prompt_scenario() {
    for kind in BackendKind::ALL {
        let harness = TestHarness::new(kind).await;
        let prompts = harness.hub.prompts();

        assert_eq!(prompts.put("greeting", "Hello", "").await.unwrap(), 1);
        assert_eq!(prompts.put("greeting", "Hi", "").await.unwrap(), 2);

        let current = prompts.get("greeting").await.unwrap();
        assert_eq!((current.version, current.content.as_str()), (2, "Hi"), "backend {}", kind.label());
        assert_eq!(
            prompts.get_version("greeting", 1).await.unwrap().content,
            "Hello",
            "backend {}",
            kind.label()
        );
    }
}

/// Registering one name twice leaves one entry holding the second data.
#[tokio::test]
async fn test_register_twice_keeps_second() {
    for kind in BackendKind::ALL {
        let harness = TestHarness::new(kind).await;
        let registry = harness.hub.registry();

        registry
            .register(RegistryEntry::new("content-agent", ModelProvider::Anthropic, "alice"))
            .await
            .unwrap();
        registry
            .register(
                RegistryEntry::new("content-agent", ModelProvider::Openai, "bob")
                    .with_capability("publish"),
            )
            .await
            .unwrap();

        let entries = registry.list().await.unwrap();
        assert_eq!(entries.len(), 1, "backend {}", kind.label());
        assert_eq!(entries[0].owner, "bob");
        assert_eq!(entries[0].provider, ModelProvider::Openai);
    }
}

/// Export counts equal the number of recorded events in range.
#[tokio::test]
async fn test_export_counts_match_records() {
    for kind in BackendKind::ALL {
        let harness = TestHarness::new(kind).await;
        let metrics = harness.hub.metrics();

        for event in create_test_metrics("s-export", 9) {
            metrics.record(event).await;
        }
        assert_eq!(metrics.stats().recorded, 9, "backend {}", kind.label());

        // [base, base + 600ms) holds events 0..=5
        let report = metrics
            .export(TimeRange::new(ts(BASE_TS_MS), ts(BASE_TS_MS + 600)))
            .await
            .unwrap();
        assert_eq!(report.total.count, 6, "backend {}", kind.label());
        assert_eq!(report.count_of(MetricKind::ToolCall), 2);
        assert_eq!(report.count_of(MetricKind::Generation), 2);
        assert_eq!(report.count_of(MetricKind::Error), 2);
        assert_eq!(report.by_session["s-export"].tokens_in_total, 600);

        let keys = metrics.list_reports().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(metrics.load_report(&keys[0]).await.unwrap(), report);
    }
}
