use std::fs;

use git2::Repository;
use livelog::error::{ApiError, StorageError};
use livelog::store::MetadataStore;
use tempfile::TempDir;

use crate::integration::support::{
    flaky_context, hosting_root_is_empty, memory_context, repo_with_history, tar_gz_dir,
    tar_gz_raw_entry, write_files, Step,
};

fn three_commit_archive(source: &TempDir) -> (Vec<u8>, Vec<String>) {
    let revisions = repo_with_history(
        source.path(),
        &[
            Step {
                files: &[("main.py", "#@\"content\": \"start\"\nprint(1)\n")],
                message: "first",
                seconds: 1_600_000_000,
            },
            Step {
                files: &[("main.py", "print(2)\n"), ("lib/util.go", "package lib\n")],
                message: "second",
                seconds: 1_600_000_100,
            },
            Step {
                files: &[("README.md", "# demo\n")],
                message: "1700000000123",
                seconds: 1_600_000_200,
            },
        ],
    );
    (tar_gz_dir(source.path()), revisions)
}

#[test]
fn import_catalogs_every_revision_in_order() {
    let temp = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let (archive, revisions) = three_commit_archive(&source);
    let (context, store) = memory_context(&temp);

    let response = context.import_archive(&archive[..], "demo").unwrap();
    assert_eq!(response.original_name, "demo");
    assert_eq!(response.project_id.len(), 20);
    assert!(response.hosted_path.join(".git").is_dir());

    let snapshots = store.list_snapshots(&response.project_id).unwrap();
    let ids: Vec<&str> = snapshots.iter().map(|s| s.revision_id.as_str()).collect();
    let expected: Vec<&str> = revisions.iter().map(String::as_str).collect();
    assert_eq!(ids, expected);

    let indexes: Vec<u64> = snapshots.iter().map(|s| s.sequence_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);

    // committer time for foreign messages, the message stamp otherwise
    assert_eq!(snapshots[0].captured_at, 1_600_000_000_000);
    assert_eq!(snapshots[1].captured_at, 1_600_000_100_000);
    assert_eq!(snapshots[2].captured_at, 1_700_000_000_123);

    let project = context.project(&response.project_id).unwrap();
    assert_eq!(project.original_name.as_deref(), Some("demo"));
    assert!(context
        .list_projects()
        .unwrap()
        .contains(&response.project_id));
}

#[test]
fn import_stashes_uncommitted_changes() {
    let temp = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    repo_with_history(
        source.path(),
        &[Step {
            files: &[("a.txt", "committed")],
            message: "only",
            seconds: 1_600_000_000,
        }],
    );
    write_files(source.path(), &[("a.txt", "edited after commit")]);
    let archive = tar_gz_dir(source.path());
    let (context, _store) = memory_context(&temp);

    let response = context.import_archive(&archive[..], "dirty").unwrap();
    assert_eq!(
        fs::read_to_string(response.hosted_path.join("a.txt")).unwrap(),
        "committed"
    );
}

#[test]
fn traversal_entry_rejected_with_nothing_written() {
    let temp = TempDir::new().unwrap();
    let (context, store) = memory_context(&temp);

    let names: [&[u8]; 3] = [b"../escape.txt", b"/tmp/absolute.txt", b"dir\\file.txt"];
    for name in names {
        let archive = tar_gz_raw_entry(name, b"payload");
        let err = context.import_archive(&archive[..], "evil").unwrap_err();
        assert!(
            matches!(err, ApiError::InvalidArchive(_)),
            "unexpected error for {:?}: {}",
            String::from_utf8_lossy(name),
            err
        );
    }

    assert!(hosting_root_is_empty(&temp));
    assert!(!temp.path().join("escape.txt").exists());
    assert!(store.list_projects().unwrap().is_empty());
}

#[test]
fn oversized_upload_rejected() {
    let temp = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let (archive, _) = three_commit_archive(&source);

    let store = std::sync::Arc::new(livelog::store::MemoryMetadataStore::new());
    let mut config = crate::integration::support::test_config(&temp);
    config.import.max_upload_bytes = (archive.len() - 1) as u64;
    let context = livelog::ReplayContext::new(store.clone(), config);

    let err = context.import_archive(&archive[..], "big").unwrap_err();
    assert!(matches!(err, ApiError::UploadTooLarge { .. }));
    assert!(hosting_root_is_empty(&temp));
    assert!(store.list_projects().unwrap().is_empty());
}

#[test]
fn malformed_uploads_rejected() {
    let temp = TempDir::new().unwrap();
    let (context, store) = memory_context(&temp);

    let err = context
        .import_archive(&b"plain text, not gzip"[..], "junk")
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidArchive(_)));

    let source = TempDir::new().unwrap();
    let (archive, _) = three_commit_archive(&source);
    for name in ["", "a/b", "a\\b"] {
        let err = context.import_archive(&archive[..], name).unwrap_err();
        assert!(matches!(err, ApiError::InvalidProjectName(_)));
    }

    assert!(hosting_root_is_empty(&temp));
    assert!(store.list_projects().unwrap().is_empty());
}

#[test]
fn archive_without_repository_is_cleaned_up() {
    let temp = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    write_files(source.path(), &[("notes.txt", "no history here")]);
    let archive = tar_gz_dir(source.path());
    let (context, store) = memory_context(&temp);

    let err = context.import_archive(&archive[..], "plain").unwrap_err();
    assert!(matches!(err, ApiError::InvalidArchive(_)));
    assert!(hosting_root_is_empty(&temp));
    assert!(store.list_projects().unwrap().is_empty());
}

#[test]
fn archive_redirecting_worktree_is_rejected() {
    let temp = TempDir::new().unwrap();
    let outside = TempDir::new().unwrap();
    write_files(outside.path(), &[("victim.txt", "keep me")]);

    let source = TempDir::new().unwrap();
    three_commit_archive(&source);
    Repository::open(source.path())
        .unwrap()
        .config()
        .unwrap()
        .set_str("core.worktree", outside.path().to_str().unwrap())
        .unwrap();
    write_files(source.path(), &[("main.py", "print('dirty')\n")]);
    let archive = tar_gz_dir(source.path());
    let (context, store) = memory_context(&temp);

    let err = context.import_archive(&archive[..], "redirect").unwrap_err();
    assert!(matches!(err, ApiError::InvalidArchive(_)), "{}", err);
    assert!(hosting_root_is_empty(&temp));
    assert!(store.list_projects().unwrap().is_empty());

    let entries: Vec<_> = fs::read_dir(outside.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        fs::read_to_string(outside.path().join("victim.txt")).unwrap(),
        "keep me"
    );
}

#[test]
fn archive_pointing_at_foreign_repository_is_rejected() {
    let temp = TempDir::new().unwrap();
    let foreign = TempDir::new().unwrap();
    repo_with_history(
        foreign.path(),
        &[Step {
            files: &[("secret.txt", "elsewhere")],
            message: "foreign",
            seconds: 1_600_000_000,
        }],
    );

    let source = TempDir::new().unwrap();
    let gitlink = format!("gitdir: {}\n", foreign.path().join(".git").display());
    write_files(source.path(), &[(".git", gitlink.as_str()), ("a.txt", "a")]);
    let archive = tar_gz_dir(source.path());
    let (context, store) = memory_context(&temp);

    let err = context.import_archive(&archive[..], "gitlink").unwrap_err();
    assert!(matches!(err, ApiError::InvalidArchive(_)), "{}", err);
    assert!(hosting_root_is_empty(&temp));
    assert!(store.list_projects().unwrap().is_empty());

    let mut foreign_repo = Repository::open(foreign.path()).unwrap();
    let mut stashes = 0;
    foreign_repo
        .stash_foreach(|_, _, _| {
            stashes += 1;
            true
        })
        .unwrap();
    assert_eq!(stashes, 0);
}

#[test]
fn store_failure_during_import_removes_project() {
    let temp = TempDir::new().unwrap();
    let source = TempDir::new().unwrap();
    let (archive, _) = three_commit_archive(&source);
    let (context, store) = flaky_context(&temp);

    store.fail_snapshot_appends(true);
    let err = context.import_archive(&archive[..], "demo").unwrap_err();
    assert!(matches!(
        err,
        ApiError::StorageError(StorageError::Database(_))
    ));
    assert!(hosting_root_is_empty(&temp));
    assert!(store.list_projects().unwrap().is_empty());

    store.fail_snapshot_appends(false);
    store.fail_project_appends(true);
    let err = context.import_archive(&archive[..], "demo").unwrap_err();
    assert!(matches!(
        err,
        ApiError::StorageError(StorageError::Database(_))
    ));
    assert!(hosting_root_is_empty(&temp));
    assert!(store.list_projects().unwrap().is_empty());

    store.fail_project_appends(false);
    let response = context.import_archive(&archive[..], "demo").unwrap();
    assert_eq!(store.list_projects().unwrap().len(), 1);
    assert_eq!(store.list_snapshots(&response.project_id).unwrap().len(), 3);
}
