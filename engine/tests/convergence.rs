//! Convergence tests for the store merge.
//!
//! These exercise the version tie-break rules end to end and verify the
//! algebraic properties (commutativity, idempotence) that the anti-entropy
//! protocol relies on, including under randomized interleavings.

use beacon_engine::{Config, Store, Tombstone};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;

fn config(kind: &str, id: &str, version: u64) -> Arc<Config> {
    Arc::new(Config::new(kind, id, version, json!({"v": version})))
}

fn tombstone(kind: &str, id: &str, version: u64) -> Arc<Tombstone> {
    Arc::new(Tombstone::new(kind, id, version))
}

#[test]
fn merge_rule_walkthrough() {
    let mut store = Store::new();

    // First config is always accepted.
    let accepted = store.insert_config(config("t", "c", 1));
    assert!(accepted.is_new);
    assert!(accepted.replaced.is_none());
    assert_eq!(store.get("t", "c").unwrap().version(), Some(1));

    // Lower version is rejected.
    assert!(!store.insert_config(config("t", "c", 0)).is_new);
    assert_eq!(store.get("t", "c").unwrap().version(), Some(1));

    // Higher version replaces and reports the old config.
    let accepted = store.insert_config(config("t", "c", 2));
    assert!(accepted.is_new);
    assert_eq!(accepted.replaced.unwrap().version, 1);

    // Tombstone below the live version is rejected.
    assert!(!store.insert_tombstone(tombstone("t", "c", 1)).is_new);
    assert!(store.get("t", "c").unwrap().is_live());

    // Tombstone at the live version wins the tie and kills it.
    let killed = store.insert_tombstone(tombstone("t", "c", 2));
    assert!(killed.is_new);
    assert_eq!(killed.replaced.unwrap().version, 2);
    assert!(!store.get("t", "c").unwrap().is_live());

    // A newer tombstone replaces the old one; nothing live was killed.
    let killed = store.insert_tombstone(tombstone("t", "c", 3));
    assert!(killed.is_new);
    assert!(killed.replaced.is_none());

    // A config needs a strictly greater version than the tombstone.
    assert!(!store.insert_config(config("t", "c", 3)).is_new);
    assert!(!store.get("t", "c").unwrap().is_live());

    let revived = store.insert_config(config("t", "c", 4));
    assert!(revived.is_new);
    assert!(revived.replaced.is_none());
    assert_eq!(store.get("t", "c").unwrap().version(), Some(4));
}

#[test]
fn version_is_monotonic_per_id() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut store = Store::new();
    let mut high_water = 0u64;

    for _ in 0..500 {
        let version = rng.gen_range(0..50);
        if rng.gen_bool(0.5) {
            store.insert_config(config("t", "x", version));
        } else {
            store.insert_tombstone(tombstone("t", "x", version));
        }

        let resident = store.get("t", "x").unwrap().version().unwrap();
        assert!(resident >= high_water, "version went backwards");
        high_water = resident;
    }
}

fn random_store(rng: &mut StdRng, mutations: usize) -> Store {
    let kinds = ["t1", "t2", "t3"];
    let ids = ["a", "b", "c", "d", "e"];

    let mut store = Store::new();
    for _ in 0..mutations {
        let kind = kinds[rng.gen_range(0..kinds.len())];
        let id = ids[rng.gen_range(0..ids.len())];
        let version = rng.gen_range(1..20);

        if rng.gen_bool(0.7) {
            store.insert_config(config(kind, id, version));
        } else {
            store.insert_tombstone(tombstone(kind, id, version));
        }
    }
    store
}

#[test]
fn merge_is_commutative() {
    for seed in 0..50 {
        let mut rng = StdRng::seed_from_u64(seed);
        let a = random_store(&mut rng, 40);
        let b = random_store(&mut rng, 40);

        let mut ab = a.clone();
        ab.merge(&b);

        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab, ba, "A∪B != B∪A for seed {seed}");
    }
}

#[test]
fn merge_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(42);
    let store = random_store(&mut rng, 60);

    let mut merged = store.clone();
    let (live, dead) = merged.merge(&store);

    assert!(live.is_empty());
    assert!(dead.is_empty());
    assert_eq!(merged, store);
}

#[test]
fn merge_is_associative() {
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(1000 + seed);
        let a = random_store(&mut rng, 30);
        let b = random_store(&mut rng, 30);
        let c = random_store(&mut rng, 30);

        // (A ∪ B) ∪ C
        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        // A ∪ (B ∪ C)
        let mut bc = b.clone();
        bc.merge(&c);
        let mut right = a.clone();
        right.merge(&bc);

        assert_eq!(left, right, "merge not associative for seed {seed}");
    }
}

#[test]
fn diff_agrees_with_merge() {
    let mut rng = StdRng::seed_from_u64(99);
    let a = random_store(&mut rng, 40);
    let b = random_store(&mut rng, 40);

    let (preview_live, preview_dead) = a.diff(&b);

    let mut merged = a.clone();
    let (live, dead) = merged.merge(&b);

    let mut preview_live_ids: Vec<_> = preview_live
        .iter()
        .map(|c| (c.kind.clone(), c.id.clone(), c.version))
        .collect();
    let mut live_ids: Vec<_> = live
        .iter()
        .map(|c| (c.kind.clone(), c.id.clone(), c.version))
        .collect();
    preview_live_ids.sort();
    live_ids.sort();
    assert_eq!(preview_live_ids, live_ids);
    assert_eq!(preview_dead.len(), dead.len());
}

#[test]
fn wire_round_trip_preserves_contents() {
    let mut rng = StdRng::seed_from_u64(5);
    let store = random_store(&mut rng, 80);

    let json = serde_json::to_string(&store).unwrap();
    let parsed: Store = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed, store);
}
