use std::fs;
use std::sync::Arc;
use std::thread;

use livelog::config::FailurePolicy;
use livelog::directive::LanguageTag;
use livelog::error::ApiError;
use livelog::store::{MetadataStore, SnapshotRecord};
use livelog::workspace::{CycleOutcome, Workspace};
use livelog::PlaybackRequest;
use tempfile::TempDir;

use crate::integration::support::{memory_context, write_files};

fn record(recorder: &mut livelog::workspace::SnapshotRecorder) {
    assert!(matches!(
        recorder.run_cycle().unwrap(),
        CycleOutcome::Recorded { .. }
    ));
}

#[test]
fn playback_replays_each_snapshot_with_directives() {
    let temp = TempDir::new().unwrap();
    let workspace = temp.path().join("workspace");
    let (context, _store) = memory_context(&temp);
    let mut recorder = context.recorder(&workspace).unwrap();

    write_files(
        &workspace,
        &[("app.py", "#@\"content\": \"define the entry point\"\ndef main(): pass\n")],
    );
    record(&mut recorder);
    write_files(
        &workspace,
        &[
            ("app.py", "#@\"content\": \"call it\"\ndef main(): pass\nmain()\n"),
            (".cui.log", "$ python app.py\n$ #@\"content\": \"run it\"\n"),
            ("style.css", "body {}\n"),
        ],
    );
    record(&mut recorder);

    let entries = context
        .playback(PlaybackRequest::new(recorder.project_id().clone()))
        .unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].sequence_index, 1);
    assert_eq!(entries[1].sequence_index, 2);
    assert_eq!(entries[0].project_name, "workspace");

    let first = &entries[0].files;
    assert_eq!(first.len(), 1);
    assert_eq!(first["app.py"].directive.content, "define the entry point");
    assert_eq!(first["app.py"].language_tag, LanguageTag::Python);

    let second = &entries[1].files;
    assert_eq!(second["app.py"].directive.content, "call it");
    assert_eq!(second[".cui.log"].directive.content, "run it");
    assert_eq!(second[".cui.log"].language_tag.as_str(), "bash");
    assert!(second["style.css"].directive.is_empty());
    assert!(second["style.css"].directive_error.is_some());
    assert!(entries.iter().all(|e| e.error.is_none()));

    let json = serde_json::to_value(&entries).unwrap();
    assert_eq!(json[1]["files"]["app.py"]["language_tag"], "python");
    assert_eq!(json[1]["files"][".cui.log"]["directive"]["content"], "run it");
}

#[test]
fn tip_restored_after_success_and_failure() {
    let temp = TempDir::new().unwrap();
    let workspace = temp.path().join("workspace");
    let (context, store) = memory_context(&temp);
    let mut recorder = context.recorder(&workspace).unwrap();
    let project_id = recorder.project_id().clone();

    write_files(&workspace, &[("a.txt", "one")]);
    record(&mut recorder);
    write_files(&workspace, &[("a.txt", "two"), ("b.txt", "added")]);
    record(&mut recorder);

    let repo = Workspace::open(&workspace).unwrap();
    let tip = repo.tip().unwrap();

    context.playback(PlaybackRequest::new(project_id.clone())).unwrap();
    assert_eq!(repo.tip().unwrap(), tip);
    assert_eq!(fs::read_to_string(workspace.join("a.txt")).unwrap(), "two");
    assert!(workspace.join("b.txt").exists());

    // a revision the workspace doesn't have
    let snapshots = store.list_snapshots(&project_id).unwrap();
    let last = snapshots.last().unwrap();
    store
        .append_snapshot(&SnapshotRecord {
            revision_id: "0000000000000000000000000000000000000001".to_string(),
            sequence_index: last.sequence_index + 1,
            ..last.clone()
        })
        .unwrap();

    let entries = context.playback(PlaybackRequest::new(project_id.clone())).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries[0].error.is_none());
    assert!(entries[2].error.is_some());
    assert!(entries[2].files.is_empty());
    assert_eq!(repo.tip().unwrap(), tip);

    let err = context
        .playback(PlaybackRequest {
            project_id: project_id.clone(),
            failure_policy: Some(FailurePolicy::FailFast),
            timeout_ms: None,
        })
        .unwrap_err();
    assert!(matches!(err, ApiError::Materialization { .. }));
    assert_eq!(repo.tip().unwrap(), tip);
    assert_eq!(fs::read_to_string(workspace.join("a.txt")).unwrap(), "two");
}

#[test]
fn concurrent_playback_of_one_project_is_consistent() {
    let temp = TempDir::new().unwrap();
    let workspace = temp.path().join("workspace");
    let (context, _store) = memory_context(&temp);
    let mut recorder = context.recorder(&workspace).unwrap();
    for step in 0..4 {
        let content = format!("//@\"content\": \"step {}\"\nconst x = {};\n", step, step);
        write_files(&workspace, &[("index.js", content.as_str())]);
        record(&mut recorder);
    }
    let project_id = recorder.project_id().clone();

    let context = Arc::new(context);
    let expected = context.playback(PlaybackRequest::new(project_id.clone())).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let context = Arc::clone(&context);
            let project_id = project_id.clone();
            thread::spawn(move || context.playback(PlaybackRequest::new(project_id)).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }

    let captions: Vec<&str> = expected
        .iter()
        .map(|e| e.files["index.js"].directive.content.as_str())
        .collect();
    assert_eq!(captions, vec!["step 0", "step 1", "step 2", "step 3"]);
    assert!(!context.locks().is_held(&project_id));
}

#[test]
fn playback_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let workspace = temp.path().join("workspace");
    let (context, _store) = memory_context(&temp);
    let mut recorder = context.recorder(&workspace).unwrap();
    write_files(&workspace, &[("main.go", "package main\n")]);
    record(&mut recorder);

    let request = PlaybackRequest::new(recorder.project_id().clone());
    let first = context.playback(request.clone()).unwrap();
    let second = context.playback(request).unwrap();
    assert_eq!(first, second);
}

#[test]
fn expired_request_is_cancelled() {
    let temp = TempDir::new().unwrap();
    let workspace = temp.path().join("workspace");
    let (context, _store) = memory_context(&temp);
    let mut recorder = context.recorder(&workspace).unwrap();
    write_files(&workspace, &[("a.txt", "x")]);
    record(&mut recorder);

    let err = context
        .playback(PlaybackRequest {
            project_id: recorder.project_id().clone(),
            failure_policy: None,
            timeout_ms: Some(0),
        })
        .unwrap_err();
    assert!(matches!(err, ApiError::Cancelled));
}

#[test]
fn playback_of_unknown_project_is_not_found() {
    let temp = TempDir::new().unwrap();
    let (context, _store) = memory_context(&temp);
    let err = context
        .playback(PlaybackRequest::new("doesNotExist"))
        .unwrap_err();
    assert!(matches!(err, ApiError::ProjectNotFound(_)));
    assert_eq!(
        livelog::ErrorResponse::from(&err).kind,
        livelog::ErrorKind::NotFound
    );
}

#[test]
fn playback_of_dirty_workspace_keeps_live_edits_out() {
    let temp = TempDir::new().unwrap();
    let workspace = temp.path().join("workspace");
    let (context, _store) = memory_context(&temp);
    let mut recorder = context.recorder(&workspace).unwrap();

    write_files(&workspace, &[("a.txt", "one"), ("b.txt", "x")]);
    record(&mut recorder);
    write_files(&workspace, &[("a.txt", "two")]);
    record(&mut recorder);

    write_files(
        &workspace,
        &[("a.txt", "live a"), ("b.txt", "live edit"), ("new.txt", "untracked")],
    );
    let entries = context
        .playback(PlaybackRequest::new(recorder.project_id().clone()))
        .unwrap();

    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.error.is_none()));
    let first = &entries[0].files;
    assert_eq!(first.len(), 2);
    assert_eq!(first["a.txt"].content, "one");
    assert_eq!(first["b.txt"].content, "x");
    let second = &entries[1].files;
    assert_eq!(second["a.txt"].content, "two");
    assert!(!second.contains_key("new.txt"));

    assert_eq!(fs::read_to_string(workspace.join("a.txt")).unwrap(), "live a");
    assert_eq!(fs::read_to_string(workspace.join("b.txt")).unwrap(), "live edit");
    assert_eq!(fs::read_to_string(workspace.join("new.txt")).unwrap(), "untracked");
}
