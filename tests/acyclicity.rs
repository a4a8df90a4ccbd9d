//! Randomized edge additions never produce a cycle

mod common;

use common::engine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stategraph::{Adjacency, EdgeDeclaration, GraphEngine, GraphError, NodeId};
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use std::thread;

const NODES: usize = 12;
const ATTEMPTS: usize = 300;
const KEYS: [&str; 3] = ["id", "arn", "endpoint"];

fn adjacency(engine: &GraphEngine) -> Adjacency {
    let edges = engine.store().all_edges().unwrap();
    Adjacency::from_links(edges.iter().map(|e| (e.producer, e.consumer)))
}

fn run(seed: u64) {
    let engine = engine();
    let nodes: Vec<NodeId> = (0..NODES)
        .map(|i| engine.declare_node(format!("n{}", i)).unwrap().id)
        .collect();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut accepted = 0;
    let mut rejected = 0;

    for _ in 0..ATTEMPTS {
        let producer = nodes[rng.gen_range(0..NODES)];
        let consumer = nodes[rng.gen_range(0..NODES)];
        let key = KEYS[rng.gen_range(0..KEYS.len())];
        let before = engine.store().all_edges().unwrap().len();

        match engine.declare_edge(EdgeDeclaration::new(producer, key, consumer)) {
            Ok(declared) => {
                if declared.is_created() {
                    accepted += 1;
                }
            }
            Err(GraphError::Cycle { path }) => {
                rejected += 1;
                assert_eq!(path.first(), Some(&producer));
                assert_eq!(path.last(), Some(&producer));
                assert_eq!(path.get(1), Some(&consumer));

                // Every hop after the proposed one is an existing edge
                let existing = adjacency(&engine);
                for hop in path[1..].windows(2) {
                    assert!(
                        existing.successors(&hop[0]).any(|n| *n == hop[1]),
                        "cycle path uses a missing edge"
                    );
                }
                assert_eq!(engine.store().all_edges().unwrap().len(), before);
            }
            Err(other) => panic!("unexpected error {:?}", other),
        }

        assert!(!adjacency(&engine).has_cycle(), "cycle after seed {}", seed);
    }

    assert!(accepted > 0);
    assert!(rejected > 0);

    // The layered view of an acyclic graph puts every producer strictly first
    let layered = engine.layered_order_all().unwrap();
    assert_eq!(layered.node_count(), NODES);
    let depth: HashMap<NodeId, usize> = nodes
        .iter()
        .map(|id| (*id, layered.depth_of(id).unwrap()))
        .collect();
    for edge in engine.store().all_edges().unwrap() {
        assert!(depth[&edge.producer] < depth[&edge.consumer]);
    }
}

#[test]
fn random_additions_stay_acyclic() {
    for seed in [1, 7, 42, 2024] {
        run(seed);
    }
}

#[test]
fn self_dependency_is_a_cycle_of_one() {
    let engine = engine();
    let node = engine.declare_node("solo").unwrap();
    let err = engine
        .declare_edge(EdgeDeclaration::new(node.id, "out", node.id))
        .unwrap_err();
    assert!(matches!(err, GraphError::Cycle { ref path } if path == &vec![node.id, node.id]));
}

#[test]
fn concurrent_opposite_edges_admit_exactly_one() {
    for round in 0..50 {
        let engine = engine();
        let a = engine.declare_node("a").unwrap().id;
        let b = engine.declare_node("b").unwrap().id;
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [(a, b), (b, a)]
            .into_iter()
            .map(|(producer, consumer)| {
                let engine = engine.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.declare_edge(EdgeDeclaration::new(producer, "id", consumer))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let created = results.iter().filter(|r| r.is_ok()).count();
        let cycles = results
            .iter()
            .filter(|r| matches!(r, Err(GraphError::Cycle { .. })))
            .count();
        assert_eq!((created, cycles), (1, 1), "round {}: {:?}", round, results);
        assert_eq!(engine.store().all_edges().unwrap().len(), 1);
        assert!(!adjacency(&engine).has_cycle());
    }
}
