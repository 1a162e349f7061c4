use std::time::Instant;

use dht_sim_core::chord::{self, ChordNetwork, ChordNode};
use dht_sim_core::hashing::hash_id;
use dht_sim_core::pastry::{self, PastryNetwork, PastryNode};
use dht_sim_core::rng::FastRng;

const CHORD_M: u32 = 24;
const CHORD_HASH_DIGITS: usize = (CHORD_M / 4) as usize;
const PASTRY_DIGITS: usize = 6;
const PASTRY_LEAF_SET_MAX: usize = 16;
const PASTRY_NEIGHBORHOOD_SET_MAX: usize = 32;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mode = args.get(1).map(|s| s.as_str()).unwrap_or("all");
    let node_count: usize = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(2_000);

    if mode == "help" || mode == "--help" {
        println!("Usage: dht-sim-bench [mode] [node_count]");
        println!();
        println!("Modes:");
        println!("  all     Run both protocols (default)");
        println!("  chord   Chord join + search throughput only");
        println!("  pastry  Pastry join + search throughput only");
        println!();
        println!("Default node_count: 2000");
        return;
    }

    println!("dht-sim-bench");
    println!("=============");
    println!();

    match mode {
        "chord" => bench_chord(node_count),
        "pastry" => bench_pastry(node_count),
        "all" => {
            bench_chord(node_count);
            println!();
            bench_pastry(node_count);
        }
        _ => {
            eprintln!("Unknown mode: {mode}. Use --help for options.");
        }
    }
}

fn bench_chord(node_count: usize) {
    println!("--- Chord ---");
    println!("Target: {node_count} nodes");

    let seed = 42;
    let t = Instant::now();
    let mut fabric: ChordNetwork = ChordNetwork::generate(node_count.max(1), seed);
    let fabric_gen_time = t.elapsed();

    let t = Instant::now();
    let mut ids = Vec::with_capacity(node_count);
    let mut ordinal = 0u64;
    while ids.len() < node_count {
        let id = hash_id(ordinal, CHORD_HASH_DIGITS);
        ordinal += 1;
        if fabric.add_node(id, ChordNode::new(id, CHORD_M)).is_ok() {
            chord::join(&fabric, id);
            ids.push(id);
        }
    }
    let join_time = t.elapsed();
    println!(
        "fabric gen {:.2}ms, {} joins in {:.2}ms ({:.1} joins/s)",
        fabric_gen_time.as_secs_f64() * 1000.0,
        ids.len(),
        join_time.as_secs_f64() * 1000.0,
        ids.len() as f64 / join_time.as_secs_f64().max(1e-9)
    );

    let mut rng = FastRng::new(seed);
    let key_count = (node_count * 2).max(1);
    let t = Instant::now();
    for i in 0..key_count {
        if let Some(&from) = rng.choose(&ids) {
            let key = hash_id(1_000_000 + i as u64, CHORD_HASH_DIGITS);
            let _ = chord::store_key(&fabric, from, key, i as i64);
        }
    }
    let store_time = t.elapsed();

    let query_count = 5_000.min(key_count * 4);
    let mut hops_sum = 0u64;
    let t = Instant::now();
    for i in 0..query_count {
        if let Some(&from) = rng.choose(&ids) {
            let key = hash_id(1_000_000 + (i % key_count) as u64, CHORD_HASH_DIGITS);
            let (hops, _) = chord::search(&fabric, from, key);
            hops_sum += hops as u64;
        }
    }
    let search_time = t.elapsed();
    println!(
        "{key_count} stores in {:.2}ms, {query_count} searches in {:.2}ms, avg hops {:.2}",
        store_time.as_secs_f64() * 1000.0,
        search_time.as_secs_f64() * 1000.0,
        hops_sum as f64 / query_count.max(1) as f64
    );
}

fn bench_pastry(node_count: usize) {
    println!("--- Pastry ---");
    println!("Target: {node_count} nodes");

    let seed = 42;
    let t = Instant::now();
    let mut fabric: PastryNetwork = PastryNetwork::generate(node_count.max(1), seed);
    let fabric_gen_time = t.elapsed();

    let t = Instant::now();
    let mut ids = Vec::with_capacity(node_count);
    let mut ordinal = 0u64;
    while ids.len() < node_count {
        let id = hash_id(ordinal, PASTRY_DIGITS);
        ordinal += 1;
        let node = PastryNode::new(id, PASTRY_DIGITS, PASTRY_LEAF_SET_MAX, PASTRY_NEIGHBORHOOD_SET_MAX);
        if fabric.add_node(id, node).is_ok() {
            pastry::join(&fabric, id);
            ids.push(id);
        }
    }
    let join_time = t.elapsed();
    println!(
        "fabric gen {:.2}ms, {} joins in {:.2}ms ({:.1} joins/s)",
        fabric_gen_time.as_secs_f64() * 1000.0,
        ids.len(),
        join_time.as_secs_f64() * 1000.0,
        ids.len() as f64 / join_time.as_secs_f64().max(1e-9)
    );

    // Pastry stores nothing beyond membership (spec §1); `search` here
    // looks up other live node ids instead of stored key/value pairs.
    let mut rng = FastRng::new(seed);
    let query_count = 5_000.min(node_count.max(1) * 4);
    let mut hops_sum = 0u64;
    let t = Instant::now();
    for _ in 0..query_count {
        if let (Some(&from), Some(&target)) = (rng.choose(&ids), rng.choose(&ids)) {
            let (hops, _) = pastry::search(&fabric, from, target);
            hops_sum += hops as u64;
        }
    }
    let search_time = t.elapsed();
    println!(
        "{query_count} searches in {:.2}ms, avg hops {:.2}",
        search_time.as_secs_f64() * 1000.0,
        hops_sum as f64 / query_count.max(1) as f64
    );
}
