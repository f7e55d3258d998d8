//! Integration tests exercising descriptor loading, machine selection, and
//! the persisted-state stores together, without touching any external tool.

use machinery::context::{ClusterContext, MachineryConfig};
use machinery::model::Cluster;
use machinery::{cluster, token};
use std::io::Write;

fn write_descriptor(dir: &std::path::Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("cluster.yml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    path
}

#[test]
fn loads_a_two_machine_descriptor_and_orders_master_first() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = write_descriptor(
        dir.path(),
        r#"
version: '2'
machines:
  db:
    master: false
    memory: 1024
  web:
    master: true
    memory: 2048
    aliases:
      - frontend
"#,
    );

    let cluster = Cluster::load(&descriptor).unwrap();
    assert_eq!(cluster.machines.len(), 2);

    let selected = cluster::select_machines(&cluster, &[]);
    assert_eq!(selected, vec!["db", "web"]);

    let ordered = cluster::master_first_order(&cluster, &selected);
    assert_eq!(ordered, vec!["web", "db"]);

    let alias_match = cluster::select_machines(&cluster, &["frontend".to_string()]);
    assert_eq!(alias_match, vec!["web"]);
}

#[test]
fn hidden_machines_are_declared_but_never_selected() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = write_descriptor(
        dir.path(),
        r#"
version: '2'
machines:
  x-base:
    memory: 512
  db:
    extends: x-base
"#,
    );

    let cluster = Cluster::load(&descriptor).unwrap();
    let selected = cluster::select_machines(&cluster, &[]);
    assert_eq!(selected, vec!["db"]);

    let db = &cluster.machines["db"];
    assert_eq!(db.memory, Some(512));
}

#[tokio::test]
async fn token_store_persists_across_context_instances() {
    let dir = tempfile::tempdir().unwrap();
    let descriptor = write_descriptor(dir.path(), "version: '2'\nmachines:\n  db: {}\n");
    let ctx = ClusterContext::test_context(&descriptor, MachineryConfig::default());

    let store = token::TokenStore::new(ctx.paths.token_file());
    let generate: token::TokenGenerator = Box::new(|| Box::pin(async { Ok("a".repeat(32)) }));
    let first = store.create(false, &generate).await.unwrap();

    let store_again = token::TokenStore::new(ctx.paths.token_file());
    let second = store_again.create(false, &generate).await.unwrap();

    assert_eq!(first, second);
}
