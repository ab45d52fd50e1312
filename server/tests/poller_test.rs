//! Anti-entropy tests: two routers converging through a poller with no
//! fast-path traffic between them.

use beacon_engine::{Config, Tombstone};
use beacon_server::{Poller, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn config(kind: &str, id: &str, version: u64) -> Config {
    Config::new(kind, id, version, json!({"v": version}))
}

async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn pull_cycle_repairs_a_silent_peer() {
    let source = Router::builder().spawn();
    let target = Router::builder().spawn();

    // Mutate the source with no fast path wired anywhere.
    for i in 0..48 {
        source.new_config(config("t", &format!("r{i}"), 1)).await;
    }
    source.dead_config(Tombstone::new("t", "r0", 1)).await;
    source.new_config(config("t", "r1", 7)).await;
    wait_for("source mutations", || {
        let store = source.pull_configs();
        store.len() == 48 && store.get("t", "r1").unwrap().version() == Some(7)
    })
    .await;

    // One pull cycle runs at start; the long rate keeps a second from
    // interfering with the assertion.
    let poller = Poller::builder()
        .local(Arc::new(target.clone()))
        .remote(Arc::new(source.clone()))
        .pull(true)
        .rate(Duration::from_secs(3600))
        .build();
    poller.start();

    wait_for("convergence", || target.pull_configs().len() == 48).await;
    assert_eq!(target.pull_configs(), source.pull_configs());

    poller.stop().await;
    source.close().await;
    target.close().await;
}

#[tokio::test]
async fn push_cycle_propagates_local_state() {
    let local = Router::builder().spawn();
    let remote = Router::builder().spawn();

    local.new_config(config("t", "a", 1)).await;
    local.new_config(config("t", "b", 2)).await;
    wait_for("local mutations", || local.pull_configs().len() == 2).await;

    let poller = Poller::builder()
        .local(Arc::new(local.clone()))
        .remote(Arc::new(remote.clone()))
        .push(true)
        .rate(Duration::from_secs(3600))
        .build();
    poller.start();

    wait_for("push", || remote.pull_configs().len() == 2).await;
    assert_eq!(remote.pull_configs(), local.pull_configs());

    poller.stop().await;
    local.close().await;
    remote.close().await;
}

#[tokio::test]
async fn bidirectional_cycles_converge_both_sides() {
    let left = Router::builder().spawn();
    let right = Router::builder().spawn();

    left.new_config(config("t", "only-left", 1)).await;
    right.new_config(config("t", "only-right", 1)).await;
    right.new_config(config("t", "shared", 3)).await;
    left.new_config(config("t", "shared", 5)).await;
    wait_for("seeds", || {
        left.pull_configs().len() == 2 && right.pull_configs().len() == 2
    })
    .await;

    let poller = Poller::builder()
        .local(Arc::new(left.clone()))
        .remote(Arc::new(right.clone()))
        .push(true)
        .pull(true)
        .rate(Duration::from_millis(50))
        .build();
    poller.start();

    wait_for("convergence", || {
        left.pull_configs() == right.pull_configs() && left.pull_configs().len() == 3
    })
    .await;

    // The higher version won on both sides.
    assert_eq!(
        left.pull_configs().get("t", "shared").unwrap().version(),
        Some(5)
    );
    assert_eq!(
        right.pull_configs().get("t", "shared").unwrap().version(),
        Some(5)
    );

    poller.stop().await;
    left.close().await;
    right.close().await;
}

#[tokio::test]
async fn repeated_cycles_are_idempotent() {
    let source = Router::builder().spawn();
    let target = Router::builder().spawn();

    source.new_config(config("t", "a", 1)).await;
    wait_for("seed", || source.pull_configs().len() == 1).await;

    let poller = Poller::builder()
        .local(Arc::new(target.clone()))
        .remote(Arc::new(source.clone()))
        .pull(true)
        .rate(Duration::from_millis(20))
        .build();
    poller.start();

    wait_for("first sync", || target.pull_configs().len() == 1).await;

    // Let several more cycles run against an unchanged source.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(target.pull_configs(), source.pull_configs());

    poller.stop().await;
    source.close().await;
    target.close().await;
}
