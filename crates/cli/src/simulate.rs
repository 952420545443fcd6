//! `cadence simulate` -- drive events through an in-memory engine.
//!
//! Builds an engine over the memory store with recording collaborators,
//! processes one event (or a script of events) for a user, and prints each
//! outcome plus the final state as JSON. The simulator exists for inspecting
//! a snapshot's behavior; nothing persists between invocations.

use std::path::Path;
use std::sync::Arc;

use cadence_core::EventTag;
use cadence_engine::{
    Collaborators, Engine, EngineConfig, RecordingAuditLog, RecordingLedger, RecordingNotifier,
    RecordingTagStore, SystemClock,
};
use cadence_storage::MemoryStore;
use serde::Deserialize;

use crate::load_snapshot;

#[derive(Debug, Deserialize)]
struct ScriptStep {
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
}

pub(crate) async fn run(
    snapshot_path: &Path,
    user: &str,
    event: Option<&str>,
    payload: &str,
    script: Option<&Path>,
    sweep: bool,
) -> i32 {
    let snapshot = match load_snapshot(snapshot_path) {
        Ok(snapshot) => snapshot,
        Err(message) => {
            eprintln!("invalid snapshot: {}", message);
            return 1;
        }
    };

    let steps = match build_steps(event, payload, script) {
        Ok(steps) => steps,
        Err(message) => {
            eprintln!("{}", message);
            return 1;
        }
    };

    let notifier = Arc::new(RecordingNotifier::new());
    let ledger = Arc::new(RecordingLedger::new());
    let tags = Arc::new(RecordingTagStore::new());
    let engine = Engine::new(
        Arc::new(snapshot),
        Arc::new(MemoryStore::new()),
        Collaborators {
            ledger: ledger.clone(),
            tags: tags.clone(),
            notifier: notifier.clone(),
            audit: Arc::new(RecordingAuditLog::new()),
        },
        Arc::new(SystemClock),
        EngineConfig::default(),
    );

    for (tag, payload) in steps {
        match engine.process_event(user, tag, &payload).await {
            Ok(outcome) => print_json(&serde_json::json!({ "outcome": outcome })),
            Err(e) => {
                eprintln!("event {} failed: {}", tag, e);
                return 1;
            }
        }
    }

    if sweep {
        match engine.sweep().await {
            Ok(report) => print_json(&serde_json::json!({ "sweep": report })),
            Err(e) => {
                eprintln!("sweep failed: {}", e);
                return 1;
            }
        }
    }

    let state = match engine.user_state(user).await {
        Ok(record) => record,
        Err(e) => {
            eprintln!("reading final state failed: {}", e);
            return 1;
        }
    };
    let overlays = match engine.user_overlays(user).await {
        Ok(overlays) => overlays,
        Err(e) => {
            eprintln!("reading overlays failed: {}", e);
            return 1;
        }
    };
    print_json(&serde_json::json!({
        "final": {
            "state": state,
            "overlays": overlays,
            "messagesSent": notifier.messages().len(),
            "offersSent": notifier.offers().len(),
            "tagsApplied": tags.tags().iter().map(|(_, t)| t.clone()).collect::<Vec<_>>(),
        }
    }));
    0
}

fn build_steps(
    event: Option<&str>,
    payload: &str,
    script: Option<&Path>,
) -> Result<Vec<(EventTag, serde_json::Value)>, String> {
    if let Some(script_path) = script {
        let text = std::fs::read_to_string(script_path)
            .map_err(|e| format!("cannot read {}: {}", script_path.display(), e))?;
        let steps: Vec<ScriptStep> =
            serde_json::from_str(&text).map_err(|e| format!("invalid script: {}", e))?;
        return steps
            .into_iter()
            .map(|step| {
                let tag = EventTag::parse(&step.event)
                    .ok_or_else(|| format!("unknown event tag '{}'", step.event))?;
                Ok((tag, step.payload))
            })
            .collect();
    }

    let Some(event) = event else {
        return Err("either --event or --script is required".to_string());
    };
    let tag = EventTag::parse(event).ok_or_else(|| format!("unknown event tag '{}'", event))?;
    let payload: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| format!("invalid payload: {}", e))?;
    Ok(vec![(tag, payload)])
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to render output: {}", e),
    }
}
