
use std::path::PathBuf;

use resmgr::config::{parse_dir_list, MonitorKind};
use resmgr::mapping::{load_backends, load_nodes, load_queue_mapping, QueueBackend};
use resmgr::scheduler::LruQueueManager;
use test_harness::{node, write_file};

const THREE_NODES: &str = r#"
[[node]]
id = "node-1"
queues = ["q1"]

[[node]]
id = "node-2"
queues = ["q1", "q2"]

[[node]]
id = "node-3"
queues = ["q1"]
"#;

#[test]
fn test_bad_directory_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "cluster-node-to-queue-mapping.toml", THREE_NODES);

    let dirs = vec![
        dir.path().display().to_string(),
        "/nonexistent/resmgr/queues".to_string(),
    ];
    let mapping = load_queue_mapping(&dirs);

    assert_eq!(mapping["q1"], ["node-1", "node-2", "node-3"]);
    assert_eq!(mapping["q2"], ["node-2"]);
    assert_eq!(mapping.len(), 2);
}

#[test]
fn test_file_uri_directories() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "node-to-queue-mapping.toml", THREE_NODES);

    let uri = format!("file://{}", dir.path().display());
    let mapping = load_queue_mapping(&[uri]);

    assert_eq!(mapping["q1"].len(), 3);
}

#[test]
fn test_discovery_order_across_files_and_directories() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write_file(
        first.path(),
        "b-node-to-queue-mapping.toml",
        "[[node]]\nid = \"node-b\"\nqueues = [\"q1\"]\n",
    );
    write_file(
        first.path(),
        "a-node-to-queue-mapping.toml",
        "[[node]]\nid = \"node-a\"\nqueues = [\"q1\"]\n",
    );
    write_file(
        second.path(),
        "node-to-queue-mapping.toml",
        "[[node]]\nid = \"node-c\"\nqueues = [\"q1\"]\n\n[[node]]\nid = \"node-a\"\nqueues = [\"q1\"]\n",
    );

    let dirs = vec![
        second.path().display().to_string(),
        first.path().display().to_string(),
    ];
    let mapping = load_queue_mapping(&dirs);

    assert_eq!(mapping["q1"], ["node-c", "node-a", "node-b"]);
}

#[test]
fn test_unparseable_and_unrelated_files_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "broken-node-to-queue-mapping.toml", "[[node]\nid = ");
    write_file(dir.path(), "good-node-to-queue-mapping.toml", THREE_NODES);
    write_file(dir.path(), "notes.txt", "[[node]]\nid = \"node-9\"\nqueues = [\"q9\"]\n");
    std::fs::create_dir(dir.path().join("sub-node-to-queue-mapping.toml")).unwrap();

    let mapping = load_queue_mapping(&[dir.path().display().to_string()]);

    assert_eq!(mapping.len(), 2);
    assert!(!mapping.contains_key("q9"));
}

#[test]
fn test_empty_directory_list_yields_empty_mapping() {
    assert!(load_queue_mapping(&[]).is_empty());
}

#[test]
fn test_load_nodes_later_definition_wins() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write_file(
        first.path(),
        "nodes.toml",
        r#"
[[node]]
id = "N1"
address = "http://N1:2001"
capacity = 2

[[node]]
id = "N2"
address = "http://N2:2001"
capacity = 4
"#,
    );
    write_file(
        second.path(),
        "extra-nodes.toml",
        "[[node]]\nid = \"N1\"\naddress = \"http://N1:2001\"\ncapacity = 4\n",
    );

    let nodes = load_nodes(&[
        first.path().display().to_string(),
        second.path().display().to_string(),
    ]);

    assert_eq!(nodes, vec![node("N1", 4), node("N2", 4)]);
}

#[test]
fn test_nodes_and_mapping_share_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "node-to-queue-mapping.toml", THREE_NODES);
    write_file(
        dir.path(),
        "nodes.toml",
        "[[node]]\nid = \"node-1\"\naddress = \"http://node-1:2001\"\ncapacity = 1\n",
    );
    let dirs = vec![dir.path().display().to_string()];

    assert_eq!(load_nodes(&dirs).len(), 1);
    assert_eq!(load_queue_mapping(&dirs).len(), 2);
}

#[test]
fn test_environment_variables_in_directory_list() {
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "node-to-queue-mapping.toml", THREE_NODES);
    std::env::set_var("RESMGR_MAPPING_TEST_DIR", dir.path());

    let dirs = parse_dir_list("file://${RESMGR_MAPPING_TEST_DIR}, /nonexistent");
    let queues = LruQueueManager::from_mapping(load_queue_mapping(&dirs));

    assert_eq!(queues.queues(), ["q1", "q2"]);
    assert_eq!(queues.queues_with_node("node-2"), ["q1", "q2"]);
}

#[test]
fn test_backends_skip_bad_entries_and_keep_last_definition() {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "backends.toml",
        r#"
[[queue]]
name = "cpu"
monitor = "feed"
feed_path = "/var/run/cpu.json"

[[queue]]
name = "cpu"
monitor = "assignment"

[[queue]]
name = "gpu"
monitor = "feed"
feed_path = "/var/run/gpu.json"
poll_interval_ms = 250

[[queue]]
name = "nested"
monitor = "queue-mux"

[[queue]]
name = "broken"
monitor = "feed"

[[queue]]
name = "other"
monitor = "ganglia"
"#,
    );

    let uri = format!("file://{}", dir.path().join("backends.toml").display());
    let backends = load_backends(&uri).unwrap();

    assert_eq!(
        backends,
        vec![
            QueueBackend {
                queue: "cpu".to_string(),
                monitor: MonitorKind::Assignment,
            },
            QueueBackend {
                queue: "gpu".to_string(),
                monitor: MonitorKind::Feed {
                    path: PathBuf::from("/var/run/gpu.json"),
                    poll_interval_ms: 250,
                },
            },
        ]
    );
}

#[test]
fn test_missing_backends_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("backends.toml");
    assert!(load_backends(&path.display().to_string()).is_err());
}
