//! Workspace-level behavior: snapshots, backups and concurrent metadata
//! writes through the facade.

use std::sync::Arc;
use waypoint_core::{Config, Workspace};
use waypoint_snapshot::SnapshotOptions;
use waypoint_storage::{Conversation, Message, MessageRole};
use waypoint_test_utils::assertions::{assert_file_equals, assert_trees_equal};
use waypoint_test_utils::TestProject;

#[tokio::test]
async fn test_snapshot_restores_whole_tree_into_fresh_directory() {
    let project = TestProject::new()
        .with_file("a.txt", "x")
        .with_file("b.txt", "x")
        .with_file("c.txt", "y")
        .with_file("src/nested/mod.rs", "pub mod nested;\n")
        .build();
    let workspace = Workspace::open(project.path(), Config::default())
        .await
        .unwrap();

    let capture = workspace
        .create_snapshot("msg_tree", &SnapshotOptions::default())
        .await
        .unwrap();
    assert!(capture.skipped.is_empty());

    let fresh = tempfile::TempDir::new().unwrap();
    let report = workspace
        .snapshots()
        .restore_into(&capture.collection.id, fresh.path())
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_trees_equal(fresh.path(), project.path());
}

#[tokio::test]
async fn test_compare_and_stats_through_facade() {
    let project = TestProject::new()
        .with_file("main.rs", "fn main() {}")
        .with_file("notes.md", "# notes")
        .build();
    let workspace = Workspace::open(project.path(), Config::default())
        .await
        .unwrap();

    let first = workspace
        .create_snapshot("msg_1", &SnapshotOptions::default())
        .await
        .unwrap();
    project.write_file("main.rs", "fn main() { run() }");
    let second = workspace
        .create_snapshot("msg_2", &SnapshotOptions::default())
        .await
        .unwrap();

    let comparison = workspace
        .compare_snapshots(&first.collection.id, &second.collection.id)
        .await
        .unwrap();
    assert_eq!(comparison.modified, vec![project.path().join("main.rs")]);
    assert!(comparison.added.is_empty());
    assert!(comparison.deleted.is_empty());

    let stats = workspace
        .get_snapshot_stats(&second.collection.id)
        .await
        .unwrap();
    assert_eq!(stats.file_count, 2);
    assert_eq!(stats.languages, vec!["markdown", "rust"]);

    // Unchanged file is captured incrementally the second time.
    let notes = second
        .collection
        .get(&project.path().join("notes.md"))
        .unwrap();
    assert!(notes.is_incremental());

    project.write_file("notes.md", "overwritten");
    workspace
        .restore_from_snapshot(&second.collection.id, None)
        .await
        .unwrap();
    assert_file_equals(&project.path().join("notes.md"), "# notes");
}

#[tokio::test]
async fn test_backup_round_trip_through_facade() {
    let project = TestProject::new().with_file("keep.txt", "original").build();
    let workspace = Workspace::open(project.path(), Config::default())
        .await
        .unwrap();

    let id = workspace.create_backup(Some("manual")).await.unwrap();
    project.write_file("keep.txt", "edited");
    workspace.restore_backup(&id).await.unwrap();
    assert_file_equals(&project.path().join("keep.txt"), "original");

    let listed = workspace.list_backups().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].description.as_deref(), Some("manual"));
    assert_eq!(listed[0].file_count, 1);

    workspace.delete_backup(&id).await.unwrap();
    assert!(workspace.restore_backup(&id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_open_removes_interrupted_backups() {
    let project = TestProject::new().with_file("a.txt", "a").build();
    project.write_file(".waypoint/backups/bak_interrupted/files/a.txt", "partial");

    let workspace = Workspace::open(project.path(), Config::default())
        .await
        .unwrap();
    assert!(!project.data_dir().join("backups/bak_interrupted").exists());
    assert!(workspace.list_backups().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_saves_to_one_conversation_are_serialized() {
    let project = TestProject::new().build();
    let workspace = Workspace::open(project.path(), Config::default())
        .await
        .unwrap();
    let store = Arc::clone(workspace.conversations());
    let conversation = store
        .save_conversation(&Conversation::new("busy"))
        .await
        .unwrap();

    let base = chrono::Utc::now().timestamp_millis() - 60_000;
    let mut handles = Vec::new();
    for i in 0..16 {
        let store = Arc::clone(&store);
        let conversation_id = conversation.id.clone();
        handles.push(tokio::spawn(async move {
            let mut message = Message::new(conversation_id, MessageRole::Assistant, format!("m{i}"));
            message.timestamp = base + i;
            store.save_message(&message).await.unwrap();
            message.id
        }));
    }
    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }

    let stored = store.get_conversation(&conversation.id).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 16);
    assert_eq!(stored.metadata.message_count, 16);
    // Ordered by timestamp regardless of completion order.
    assert_eq!(stored.messages, ids);
}

#[tokio::test]
async fn test_reopened_workspace_sees_persisted_state() {
    let project = TestProject::new().with_file("a.txt", "persist me").build();

    let snapshot_id = {
        let workspace = Workspace::open(project.path(), Config::default())
            .await
            .unwrap();
        let store = workspace.conversations();
        let conversation = store
            .save_conversation(&Conversation::new("durable"))
            .await
            .unwrap();
        let message = Message::new(&conversation.id, MessageRole::User, "checkpoint");
        store.save_message(&message).await.unwrap();
        workspace
            .create_snapshot(&message.id, &SnapshotOptions::default())
            .await
            .unwrap()
            .collection
            .id
    };

    let workspace = Workspace::open(project.path(), Config::default())
        .await
        .unwrap();
    let summaries = workspace.snapshots().list_snapshots().await;
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].id, snapshot_id);

    project.write_file("a.txt", "changed");
    let report = workspace
        .restore_from_snapshot(&snapshot_id, None)
        .await
        .unwrap();
    assert!(report.is_complete());
    assert_file_equals(&project.path().join("a.txt"), "persist me");
}
