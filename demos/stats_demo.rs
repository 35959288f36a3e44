use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;

use chop_hash::HopscotchTable;
use chop_hash::KeyEq;
use chop_hash::TableConfig;
use chop_hash::TableError;
use clap::Parser;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short = 'n', long = "entries", default_value_t = 10_000)]
    entries: usize,
    #[arg(short = 's', long = "segments", default_value_t = 16)]
    segments: usize,
    #[arg(short = 'b', long = "buckets_per_segment", default_value_t = 1024)]
    buckets_per_segment: usize,
    #[arg(long = "hop_range", default_value_t = 32)]
    hop_range: usize,
    #[arg(long = "add_range", default_value_t = 512)]
    add_range: usize,
    /// Report capacity exhaustion instead of growing the table.
    #[arg(long = "no_resize")]
    no_resize: bool,
}

fn hash_u64(value: &u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn main() {
    let args = Args::parse();

    let config = TableConfig::default()
        .with_segments(args.segments)
        .with_buckets_per_segment(args.buckets_per_segment)
        .with_hop_range(args.hop_range)
        .with_add_range(args.add_range)
        .with_auto_resize(!args.no_resize);

    let keys: Vec<u64> = (0..args.entries as u64).collect();
    let table = match HopscotchTable::new(config, hash_u64, KeyEq) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    println!(
        "Created table: {} segments x {} buckets ({} total)",
        table.segment_count(),
        table.buckets_per_segment(),
        table.capacity()
    );
    println!("Inserting {} u64 keys...", keys.len());

    let mut num_failures = 0;
    for key in &keys {
        match table.put(key, key) {
            Ok(()) => {}
            Err(TableError::DuplicateKey) => panic!("Key already exists in table: {}", key),
            Err(_) => num_failures += 1,
        }
    }

    println!("Inserted {} keys into table", table.len());
    println!(
        "Final geometry: {} segments x {} buckets",
        table.segment_count(),
        table.buckets_per_segment()
    );

    table.print_probe_histogram();
    table.debug_stats().print();
    println!(
        "Number of failed puts: {} ({:.02}%)",
        num_failures,
        num_failures as f64 / keys.len().max(1) as f64 * 100.0
    );

    match table.verify_layout() {
        Ok(()) => println!("Layout verified"),
        Err(e) => println!("Layout check failed: {}", e),
    }
}
