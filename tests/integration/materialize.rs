use std::fs;
use std::time::Duration;

use livelog::cancel::Cancellation;
use livelog::error::ApiError;
use livelog::materialize::MaterializationEngine;
use livelog::workspace::{Tip, Workspace};
use tempfile::TempDir;

use crate::integration::support::{memory_context, repo_with_history, tar_gz_dir, Step};

const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

fn imported_project(temp: &TempDir, source: &TempDir) -> (livelog::ReplayContext, String, Vec<String>) {
    let revisions = repo_with_history(
        source.path(),
        &[
            Step {
                files: &[("src/main.c", "int main() { return 0; }\n")],
                message: "first",
                seconds: 1_600_000_000,
            },
            Step {
                files: &[("src/main.c", "int main() { return 1; }\n"), ("notes.md", "# notes\n")],
                message: "second",
                seconds: 1_600_000_060,
            },
        ],
    );
    let (context, _store) = memory_context(temp);
    let response = context
        .import_archive(&tar_gz_dir(source.path())[..], "c-demo")
        .unwrap();
    (context, response.project_id, revisions)
}

#[test]
fn materialize_imported_revisions_and_restore_tip() {
    let temp = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let (context, project_id, revisions) = imported_project(&temp, &source);
    let project = context.project(&project_id).unwrap();
    let workspace = Workspace::open(&project.workspace_path).unwrap();
    let tip = workspace.tip().unwrap();
    assert!(matches!(tip, Tip::Branch(_)));

    let guard = context.locks().try_acquire_for(&project_id, LOCK_TIMEOUT).unwrap();
    let first =
        MaterializationEngine::materialize(&workspace, &revisions[0], &guard, &Cancellation::none())
            .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first["src/main.c"], "int main() { return 0; }\n");
    assert_eq!(workspace.tip().unwrap(), tip);
    assert!(project.workspace_path.join("notes.md").exists());

    let again =
        MaterializationEngine::materialize(&workspace, &revisions[0], &guard, &Cancellation::none())
            .unwrap();
    assert_eq!(first, again);

    let second =
        MaterializationEngine::materialize(&workspace, &revisions[1], &guard, &Cancellation::none())
            .unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(second["notes.md"], "# notes\n");
    assert_eq!(
        fs::read_to_string(project.workspace_path.join("src/main.c")).unwrap(),
        "int main() { return 1; }\n"
    );
}

#[test]
fn failed_materialization_leaves_tip_in_place() {
    let temp = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let (context, project_id, revisions) = imported_project(&temp, &source);
    let project = context.project(&project_id).unwrap();
    let workspace = Workspace::open(&project.workspace_path).unwrap();
    let tip = workspace.tip().unwrap();
    let guard = context.locks().try_acquire_for(&project_id, LOCK_TIMEOUT).unwrap();

    for bogus in ["not-a-revision", "ffffffffffffffffffffffffffffffffffffffff"] {
        let err =
            MaterializationEngine::materialize(&workspace, bogus, &guard, &Cancellation::none())
                .unwrap_err();
        assert!(matches!(err, ApiError::Materialization { .. }), "{}", err);
        assert_eq!(workspace.tip().unwrap(), tip);
    }

    let cancel = Cancellation::none();
    cancel.cancel();
    let err = MaterializationEngine::materialize(&workspace, &revisions[0], &guard, &cancel)
        .unwrap_err();
    assert!(matches!(err, ApiError::Cancelled));
    assert_eq!(workspace.tip().unwrap(), tip);
    assert!(project.workspace_path.join("notes.md").exists());
}

#[test]
fn lock_is_exclusive_per_project() {
    let temp = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let (context, project_id, _) = imported_project(&temp, &source);

    let guard = context.locks().try_acquire_for(&project_id, LOCK_TIMEOUT).unwrap();
    assert!(context.locks().is_held(&project_id));
    let err = context
        .locks()
        .try_acquire_for(&project_id, Duration::from_millis(20))
        .unwrap_err();
    assert!(matches!(err, ApiError::LockTimeout(_)));

    // other projects are unaffected
    assert!(context
        .locks()
        .try_acquire_for("someOtherProject", Duration::from_millis(20))
        .is_ok());

    drop(guard);
    assert!(!context.locks().is_held(&project_id));
}
