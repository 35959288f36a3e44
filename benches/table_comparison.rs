use alloc::format;
use core::hash::BuildHasher;
use core::hint::black_box;
use std::thread;

use chop_hash::BuildKeyHasher;
use chop_hash::HopscotchTable;
use chop_hash::KeyEq;
use chop_hash::TableConfig;
use criterion::AxisScale;
use criterion::BatchSize;
use criterion::Criterion;
use criterion::PlotConfiguration;
use criterion::Throughput;
use criterion::criterion_group;
use criterion::criterion_main;
use hashbrown::HashMap as HashbrownMap;
use parking_lot::Mutex;
use rand::Rng;
use rand::SeedableRng;
use rand::TryRngCore;
use rand::distr;
use rand::rngs::OsRng;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand_distr::Zipf;
use siphasher::sip::SipHasher13;

extern crate alloc;

#[derive(Clone, Copy)]
struct SipState {
    k0: u64,
    k1: u64,
}

impl SipState {
    fn random() -> Self {
        Self {
            k0: OsRng.try_next_u64().unwrap(),
            k1: OsRng.try_next_u64().unwrap(),
        }
    }
}

impl BuildHasher for SipState {
    type Hasher = SipHasher13;

    fn build_hasher(&self) -> SipHasher13 {
        SipHasher13::new_with_keys(self.k0, self.k1)
    }
}

type ChopTable<'a> = HopscotchTable<'a, u64, u64, BuildKeyHasher<SipState>, KeyEq>;
type LockedMap = Mutex<HashbrownMap<u64, u64, SipState>>;

const SIZES: &[usize] = &[
    (1 << 10),
    (1 << 12),
    (1 << 14),
    (1 << 16),
    (1 << 18),
];

const THREADS: &[usize] = &[1, 2, 4, 8];

/// Geometry that holds `size` entries at roughly half load.
fn config_for(size: usize) -> TableConfig {
    let buckets = (size * 2).next_power_of_two();
    let n_segments = 16.min(buckets / 64).max(1);
    TableConfig::default()
        .with_segments(n_segments)
        .with_buckets_per_segment(buckets / n_segments)
}

fn chop_table<'a>(size: usize, state: SipState) -> ChopTable<'a> {
    HopscotchTable::new(config_for(size), BuildKeyHasher(state), KeyEq).unwrap()
}

fn locked_map(size: usize, state: SipState) -> LockedMap {
    Mutex::new(HashbrownMap::with_capacity_and_hasher(size, state))
}

fn random_keys(count: usize) -> Vec<u64> {
    let mut rng = OsRng;
    (0..count).map(|_| rng.try_next_u64().unwrap()).collect()
}

fn bench_insert_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert_random");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES {
        let keys = random_keys(size);
        let state = SipState::random();
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("chop_hash/{size}"), |b| {
            b.iter_batched(
                || {
                    let mut keys = keys.clone();
                    keys.shuffle(&mut SmallRng::from_os_rng());
                    keys
                },
                |keys| {
                    let table = chop_table(size, state);
                    for key in &keys {
                        black_box(table.put(key, key).is_ok());
                    }
                    black_box(table.count())
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("mutex_hashbrown/{size}"), |b| {
            b.iter_batched(
                || {
                    let mut keys = keys.clone();
                    keys.shuffle(&mut SmallRng::from_os_rng());
                    keys
                },
                |keys| {
                    let map = locked_map(size, state);
                    for &key in &keys {
                        black_box(map.lock().insert(key, key));
                    }
                    black_box(map)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_find_hit_miss(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_hit_miss");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    for &size in SIZES {
        let keys = random_keys(size * 2);
        let (present, absent) = keys.split_at(size);
        let state = SipState::random();

        let table = chop_table(size, state);
        let map = locked_map(size, state);
        for key in present {
            table.put(key, key).unwrap();
            map.lock().insert(*key, *key);
        }

        let mut probes: Vec<u64> = present.iter().zip(absent).flat_map(|(a, b)| [*a, *b]).collect();
        probes.shuffle(&mut SmallRng::from_os_rng());

        group.throughput(Throughput::Elements(probes.len() as u64));
        group.bench_function(format!("chop_hash/{size}"), |b| {
            b.iter(|| {
                for key in &probes {
                    black_box(table.get(key));
                }
            })
        });

        group.bench_function(format!("mutex_hashbrown/{size}"), |b| {
            b.iter(|| {
                for key in &probes {
                    black_box(map.lock().get(key).copied());
                }
            })
        });
    }

    group.finish();
}

#[derive(Clone, Copy)]
enum Operation {
    Find,
    Insert,
    Remove,
}

fn operations(count: usize, rng: &mut SmallRng) -> Vec<Operation> {
    (0..count)
        .map(|_| {
            let op_choice: f64 = rng.sample(distr::Uniform::new(0.0, 1.0).unwrap());
            if op_choice < 0.8 {
                Operation::Find
            } else if op_choice < 0.9 {
                Operation::Insert
            } else {
                Operation::Remove
            }
        })
        .collect()
}

/// Each thread runs its own shuffled operation stream over a shared,
/// Zipf-skewed key space.
fn bench_concurrent_mixed_zipf(c: &mut Criterion) {
    const SIZE: usize = 1 << 16;
    const OPS_PER_THREAD: usize = 1 << 15;

    for exponent in [1.0f64, 1.3] {
        let mut group = c.benchmark_group(format!("concurrent_mixed_zipf_{:.01}", exponent));

        let keys = random_keys(SIZE);
        let state = SipState::random();
        let key_distr = Zipf::new((SIZE - 1) as f64, exponent).unwrap();

        for &threads in THREADS {
            let streams: Vec<Vec<(Operation, usize)>> = (0..threads)
                .map(|_| {
                    let mut rng = SmallRng::from_os_rng();
                    operations(OPS_PER_THREAD, &mut rng)
                        .into_iter()
                        .map(|op| (op, rng.sample(key_distr) as usize))
                        .collect()
                })
                .collect();

            group.throughput(Throughput::Elements((threads * OPS_PER_THREAD) as u64));
            group.bench_function(format!("chop_hash/{threads}"), |b| {
                b.iter_batched(
                    || {
                        let table = chop_table(SIZE, state);
                        for key in keys.iter().step_by(2) {
                            let _ = table.put(key, key);
                        }
                        table
                    },
                    |table| {
                        thread::scope(|s| {
                            for stream in &streams {
                                let (table, keys) = (&table, &keys);
                                s.spawn(move || {
                                    for &(op, index) in stream {
                                        let key = &keys[index];
                                        match op {
                                            Operation::Find => {
                                                black_box(table.get(key));
                                            }
                                            Operation::Insert => {
                                                black_box(table.put(key, key).is_ok());
                                            }
                                            Operation::Remove => {
                                                black_box(table.remove(key));
                                            }
                                        }
                                    }
                                });
                            }
                        });
                        black_box(table)
                    },
                    BatchSize::LargeInput,
                )
            });

            group.bench_function(format!("mutex_hashbrown/{threads}"), |b| {
                b.iter_batched(
                    || {
                        let map = locked_map(SIZE, state);
                        for &key in keys.iter().step_by(2) {
                            map.lock().insert(key, key);
                        }
                        map
                    },
                    |map| {
                        thread::scope(|s| {
                            for stream in &streams {
                                let (map, keys) = (&map, &keys);
                                s.spawn(move || {
                                    for &(op, index) in stream {
                                        let key = keys[index];
                                        match op {
                                            Operation::Find => {
                                                black_box(map.lock().get(&key).copied());
                                            }
                                            Operation::Insert => {
                                                black_box(map.lock().insert(key, key));
                                            }
                                            Operation::Remove => {
                                                black_box(map.lock().remove(&key));
                                            }
                                        }
                                    }
                                });
                            }
                        });
                        black_box(map)
                    },
                    BatchSize::LargeInput,
                )
            });
        }

        group.finish();
    }
}

criterion_group!(
    benches,
    bench_insert_random,
    bench_find_hit_miss,
    bench_concurrent_mixed_zipf,
);

criterion_main!(benches);
