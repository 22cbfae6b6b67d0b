//! Concurrent writer E2E tests.
//!
//! Writers race inside one process on a multi-thread runtime; the
//! conditional-create loop must hand out every version exactly once.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use e2e_tests::{BackendKind, TestHarness};
use hub_types::{ModelProvider, RegistryEntry, SessionEvent, SessionStatus};

const WRITERS: u32 = 8;

/// N concurrent puts on one prompt name yield exactly {1..N}.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_prompt_puts_yield_contiguous_versions() {
    for kind in BackendKind::ALL {
        let harness = Arc::new(TestHarness::new(kind).await);

        let mut handles = Vec::new();
        for i in 0..WRITERS {
            let harness = harness.clone();
            handles.push(tokio::spawn(async move {
                harness
                    .hub
                    .prompts()
                    .put("system", &format!("variant {i}"), "")
                    .await
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap().unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=WRITERS).collect::<Vec<_>>(), "backend {}", kind.label());

        let history = harness.hub.prompts().history("system").await.unwrap();
        assert_eq!(history.len(), WRITERS as usize);
    }
}

/// Concurrent appends to one session all land, in distinct slots.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_session_appends() {
    for kind in BackendKind::ALL {
        let harness = Arc::new(TestHarness::new(kind).await);
        let id = harness.hub.sessions().open().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..WRITERS {
            let harness = harness.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                harness
                    .hub
                    .sessions()
                    .append(&id, SessionEvent::new(format!("tool-{i}"), "{}", "ok", 5, true))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        harness
            .hub
            .sessions()
            .close(&id, SessionStatus::Completed)
            .await
            .unwrap();

        let mut tools: Vec<String> = harness
            .hub
            .sessions()
            .read(&id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.tool_name)
            .collect();
        tools.sort();
        let expected: Vec<String> = (0..WRITERS).map(|i| format!("tool-{i}")).collect();
        assert_eq!(tools, expected, "backend {}", kind.label());
    }
}

/// Separate sessions and metrics never contend.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_agents_do_not_interfere() {
    let harness = Arc::new(TestHarness::local().await);

    let mut handles = Vec::new();
    for agent in ["writer", "reviewer", "publisher"] {
        let harness = harness.clone();
        handles.push(tokio::spawn(async move {
            let hub = &harness.hub;
            hub.registry()
                .register(RegistryEntry::new(agent, ModelProvider::Gemini, "ops"))
                .await?;
            let id = hub.sessions().open_for(Some(agent), None).await?;
            for step in 0..3 {
                hub.record_tool_call(&id, &format!("{agent}-{step}"), &serde_json::json!({}), "done", 3, true)
                    .await?;
            }
            hub.sessions().close(&id, SessionStatus::Completed).await?;
            hub.registry().record_run(agent, &id, true).await?;
            Ok::<_, hub_types::HubError>(id)
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap());
    }

    for id in &ids {
        assert_eq!(harness.hub.sessions().read(id).await.unwrap().len(), 3);
        assert_eq!(harness.hub.metrics().session_summary(id).await.unwrap().count, 3);
    }
    let entries = harness.hub.registry().list().await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.run_count == 1));
}
