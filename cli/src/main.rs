//! Experiment driver: build a network fabric, run a Chord scenario and a
//! Pastry scenario over it, and print hop-count histograms (spec §6, §8).

use clap::Parser;
use dht_sim_core::chord::{self, ChordNetwork, ChordNode};
use dht_sim_core::hashing::hash_id;
use dht_sim_core::pastry::{self, PastryNetwork, PastryNode};
use dht_sim_core::rng::FastRng;
use log::info;

const CHORD_M: u32 = 24;
const CHORD_HASH_DIGITS: usize = (CHORD_M / 4) as usize;

const PASTRY_DIGITS: usize = 6;
const PASTRY_LEAF_SET_MAX: usize = 16;
const PASTRY_NEIGHBORHOOD_SET_MAX: usize = 32;

const LINKS_PATH: &str = "links.dat";

#[derive(Parser)]
#[command(
    name = "dht-sim",
    about = "Chord/Pastry DHT simulation over an abstract network fabric"
)]
struct Cli {
    /// Number of DHT nodes to place on the fabric.
    num_nodes: usize,
    /// 1 to read the switch adjacency from links.dat, 0 to generate fresh
    /// and write it out.
    read_from_file: u8,
    /// Seed for the deterministic random source driving fabric generation
    /// and experiment randomness.
    #[arg(long, default_value_t = 42)]
    seed: u64,
    /// Number of keys to store before running queries (Chord only — Pastry
    /// stores nothing beyond membership, spec §1).
    #[arg(long, default_value_t = 100)]
    keys: usize,
    /// Number of search queries to run per scenario.
    #[arg(long, default_value_t = 1000)]
    queries: usize,
}

fn main() {
    env_logger::init();

    // Legacy compatibility: `dht-sim <num_nodes>` alone (no read_from_file)
    // prints usage and exits cleanly rather than erroring on a missing
    // required argument.
    if std::env::args().len() == 2 {
        println!("usage: dht-sim <num_nodes> <read_from_file> [--seed N] [--keys N] [--queries N]");
        std::process::exit(0);
    }

    let cli = Cli::parse();
    info!(
        "starting run: num_nodes={} read_from_file={} seed={}",
        cli.num_nodes, cli.read_from_file, cli.seed
    );

    run_chord(&cli);
    run_pastry(&cli);
}

fn build_switches(num_switches: usize, read_from_file: u8, seed: u64) -> Vec<(usize, usize)> {
    if read_from_file == 1 {
        match dht_sim_core::fabric::Fabric::<()>::read_links(LINKS_PATH) {
            Ok(links) => return links,
            Err(err) => {
                log::warn!("couldn't read {LINKS_PATH} ({err}), generating instead");
            }
        }
    }
    let fabric = dht_sim_core::fabric::Fabric::<()>::generate(num_switches, seed);
    if let Err(err) = fabric.write_links(LINKS_PATH) {
        log::warn!("couldn't write {LINKS_PATH}: {err}");
    }
    dht_sim_core::fabric::Fabric::<()>::read_links(LINKS_PATH)
        .expect("just-written links.dat must be readable")
}

fn run_chord(cli: &Cli) {
    let num_switches = cli.num_nodes.max(1);
    let links = build_switches(num_switches, cli.read_from_file, cli.seed);
    let mut fabric: ChordNetwork = ChordNetwork::from_links(num_switches, &links, cli.seed);

    let mut rng = FastRng::new(cli.seed);
    let mut ids = Vec::with_capacity(cli.num_nodes);
    let mut ordinal = 0u64;
    while ids.len() < cli.num_nodes {
        let id = hash_id(ordinal, CHORD_HASH_DIGITS);
        ordinal += 1;
        if fabric.add_node(id, ChordNode::new(id, CHORD_M)).is_ok() {
            chord::join(&fabric, id);
            ids.push(id);
        }
    }
    println!("chord: {} nodes joined", ids.len());

    for i in 0..cli.keys {
        let Some(&from) = rng.choose(&ids) else { break };
        let key = hash_id(1_000_000 + i as u64, CHORD_HASH_DIGITS);
        let _ = chord::store_key(&fabric, from, key, i as i64);
    }

    let mut hops = Vec::with_capacity(cli.queries);
    for i in 0..cli.queries {
        let Some(&from) = rng.choose(&ids) else { break };
        let key = hash_id(1_000_000 + (i % cli.keys.max(1)) as u64, CHORD_HASH_DIGITS);
        let (hop_count, _value) = chord::search(&fabric, from, key);
        hops.push(hop_count);
    }
    print_histogram("chord (steady state)", &hops, 12);

    let churn = ids.len() / 2;
    for &victim in ids.iter().take(churn) {
        chord::depart(&mut fabric, victim);
    }
    ids.retain(|id| fabric.is_alive(*id));
    info!("chord: departed {churn} nodes, {} remain", ids.len());

    let mut hops_after_churn = Vec::with_capacity(cli.queries);
    for i in 0..cli.queries {
        let Some(&from) = rng.choose(&ids) else { break };
        let key = hash_id(1_000_000 + (i % cli.keys.max(1)) as u64, CHORD_HASH_DIGITS);
        let (hop_count, _value) = chord::search(&fabric, from, key);
        hops_after_churn.push(hop_count);
    }
    print_histogram("chord (after churn)", &hops_after_churn, 12);
}

fn run_pastry(cli: &Cli) {
    let num_switches = cli.num_nodes.max(1);
    let links = build_switches(num_switches, cli.read_from_file, cli.seed.wrapping_add(1));
    let mut fabric: PastryNetwork =
        PastryNetwork::from_links(num_switches, &links, cli.seed.wrapping_add(1));

    let mut rng = FastRng::new(cli.seed.wrapping_add(1));
    let mut ids = Vec::with_capacity(cli.num_nodes);
    let mut ordinal = 0u64;
    while ids.len() < cli.num_nodes {
        let id = hash_id(ordinal, PASTRY_DIGITS);
        ordinal += 1;
        let node = PastryNode::new(id, PASTRY_DIGITS, PASTRY_LEAF_SET_MAX, PASTRY_NEIGHBORHOOD_SET_MAX);
        if fabric.add_node(id, node).is_ok() {
            pastry::join(&fabric, id);
            ids.push(id);
        }
    }
    println!("pastry: {} nodes joined", ids.len());

    // Pastry stores nothing beyond membership (spec §1): `search` here
    // looks up other live node ids rather than stored key/value pairs.
    let mut hops = Vec::with_capacity(cli.queries);
    for _ in 0..cli.queries {
        let (Some(&from), Some(&target)) = (rng.choose(&ids), rng.choose(&ids)) else {
            break;
        };
        let (hop_count, _found) = pastry::search(&fabric, from, target);
        hops.push(hop_count);
    }
    print_histogram("pastry (steady state)", &hops, 10);

    let churn = ids.len() / 2;
    for &victim in ids.iter().take(churn) {
        pastry::depart(&mut fabric, victim);
    }
    ids.retain(|id| fabric.is_alive(*id));
    info!("pastry: departed {churn} nodes, {} remain", ids.len());

    let mut hops_after_churn = Vec::with_capacity(cli.queries);
    for _ in 0..cli.queries {
        let (Some(&from), Some(&target)) = (rng.choose(&ids), rng.choose(&ids)) else {
            break;
        };
        let (hop_count, _found) = pastry::search(&fabric, from, target);
        hops_after_churn.push(hop_count);
    }
    print_histogram("pastry (after churn)", &hops_after_churn, 10);
}

/// Print a fixed-width histogram of hop counts, clamping anything at or
/// above `max_bin` into the final bin (spec §6).
fn print_histogram(label: &str, hops: &[u32], max_bin: u32) {
    let mut bins = vec![0usize; max_bin as usize + 1];
    for &h in hops {
        let bin = h.min(max_bin) as usize;
        bins[bin] += 1;
    }
    println!("-- {label} --");
    for (bin, count) in bins.iter().enumerate() {
        let label = if bin as u32 == max_bin {
            format!("{bin}+")
        } else {
            bin.to_string()
        };
        println!("{label:>4}: {}", "#".repeat(*count));
    }
}
