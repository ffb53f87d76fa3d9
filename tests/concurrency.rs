//! Concurrent insertion and querying under randomized scheduling

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use rand::seq::SliceRandom;
use rand::Rng;

use common::{items, known};
use schematree::tree::{ItemList, SchemaTree, TreeConfig};

const THREADS: usize = 8;
const SUBJECTS: usize = 4000;

fn ranked_tree(config: TreeConfig, iris: &[&str]) -> Arc<SchemaTree> {
    let tree = SchemaTree::with_config(config);
    // Fixed counts so "hot" and "warm" rank first and second.
    for (count, iri) in iris.iter().enumerate().map(|(i, iri)| (iris.len() * 10 - i, iri)) {
        let item = tree.intern(iri);
        for _ in 0..count {
            item.increment();
        }
    }
    tree.update_sort_order().unwrap();
    Arc::new(tree)
}

fn subjects(tree: &SchemaTree, rng: &mut impl Rng) -> Vec<ItemList> {
    (0..SUBJECTS)
        .map(|i| {
            let mut set = vec!["hot", "warm"];
            let tail = ["t0", "t1", "t2", "t3", "t4", "t5"];
            let extra = rng.gen_range(0..=tail.len());
            set.extend(tail.choose_multiple(rng, extra));
            // Shuffle the in-subject order too; insert sorts it.
            set.shuffle(rng);
            if i % 7 == 0 {
                set.push("hot");
            }
            items(tree, &set)
        })
        .collect()
}

fn insert_concurrently(tree: &Arc<SchemaTree>, mut work: Vec<ItemList>) {
    let mut rng = rand::thread_rng();
    work.shuffle(&mut rng);
    let chunk = work.len().div_ceil(THREADS);
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = work
        .chunks(chunk)
        .map(|part| {
            let part = part.to_vec();
            let tree = Arc::clone(tree);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut rng = rand::thread_rng();
                for set in part {
                    tree.insert(&set);
                    if rng.gen_ratio(1, 64) {
                        thread::yield_now();
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

const IRIS: &[&str] = &["hot", "warm", "t0", "t1", "t2", "t3", "t4", "t5"];

#[test]
fn test_shared_prefix_counts_equal_subject_count() {
    let tree = ranked_tree(TreeConfig::default(), IRIS);
    let work = subjects(&tree, &mut rand::thread_rng());
    insert_concurrently(&tree, work);

    assert_eq!(tree.root_support() as usize, SUBJECTS);
    let hot = tree.find_child(tree.root(), &known(&tree, &["hot"])[0]).unwrap();
    assert_eq!(hot.support() as usize, SUBJECTS);
    let warm = tree.find_child(&hot, &known(&tree, &["warm"])[0]).unwrap();
    assert_eq!(warm.support() as usize, SUBJECTS);
    assert_eq!(tree.children(tree.root()).len(), 1);
}

#[test]
fn test_concurrent_build_matches_sequential_build() {
    let mut rng = rand::thread_rng();
    let concurrent = ranked_tree(TreeConfig::default(), IRIS);
    let sequential = ranked_tree(TreeConfig::default(), IRIS);
    let work = subjects(&concurrent, &mut rng);

    for set in &work {
        sequential.insert(&known(&sequential, &set.iter().map(|i| i.iri()).collect::<Vec<_>>()));
    }
    insert_concurrently(&concurrent, work);

    assert_eq!(concurrent.stats().nodes, sequential.stats().nodes);
    for query in [&["t0"][..], &["t1", "t3"], &["hot", "t5"], &["t0", "t1", "t2", "t3", "t4", "t5"]] {
        assert_eq!(
            concurrent.support(&known(&concurrent, query)),
            sequential.support(&known(&sequential, query)),
            "{:?}",
            query
        );
    }

    // Every node appears exactly once in its item's chain.
    for iri in &IRIS[2..] {
        let item = known(&concurrent, &[*iri])[0].clone();
        let chain: Vec<u64> = concurrent.same_item_chain(&item).map(|n| n.id()).collect();
        let mut unique = chain.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(chain.len(), unique.len());
        let support: u64 = concurrent.same_item_chain(&item).map(|n| n.support() as u64).sum();
        assert_eq!(support, item_subjects(&sequential, iri));
    }
}

fn item_subjects(tree: &SchemaTree, iri: &str) -> u64 {
    tree.support(&known(tree, &[iri]))
}

#[test]
fn test_few_stripes_and_fibonacci_hash() {
    for config in [
        TreeConfig {
            lock_stripes: 1,
            ..TreeConfig::default()
        },
        TreeConfig {
            lock_stripes: 3,
            stripe_hash: schematree::tree::StripeHash::Fibonacci,
            ..TreeConfig::default()
        },
    ] {
        let tree = ranked_tree(config, IRIS);
        let work = subjects(&tree, &mut rand::thread_rng());
        insert_concurrently(&tree, work);
        assert_eq!(tree.support(&known(&tree, &["hot", "warm"])) as usize, SUBJECTS);
    }
}

#[test]
fn test_queries_during_ingestion() {
    let tree = ranked_tree(TreeConfig::default(), IRIS);
    let work = subjects(&tree, &mut rand::thread_rng());

    let reader = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            let input = known(&tree, &["warm"]);
            let mut last = 0;
            for _ in 0..200 {
                let recs = tree.recommend(&input);
                // Counts of an in-flight insert land node by node, so only
                // positivity is guaranteed mid-ingestion.
                for candidate in recs.iter() {
                    assert!(candidate.probability > 0.0 && candidate.probability.is_finite());
                }
                let support = tree.support(&input);
                assert!(support >= last);
                last = support;
            }
        })
    };

    insert_concurrently(&tree, work);
    reader.join().unwrap();
    assert_eq!(tree.root_support() as usize, SUBJECTS);
}
