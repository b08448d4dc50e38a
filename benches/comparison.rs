//! Benchmark comparison: LessDB memtable vs Sled vs LevelDB, plus block lookups.
//!
//! Run with: cargo bench
//! Results will be in target/criterion/

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use lessdb_core::coding::{put_fixed32, put_varint32};
use lessdb_core::lsm::{
    Block, BytewiseComparator, InternalKeyComparator, LookupResult, MAX_SEQUENCE, MemTable, MemTableConfig,
    SeqNum,
};
use rand::Rng;
use tempfile::TempDir;

// ============================================================================
// Store Wrappers
// ============================================================================

trait KVStore {
    fn put(&mut self, key: &[u8], value: &[u8]);
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
}

// --- LessDB memtable ---
struct MemTableWrapper {
    mem: MemTable,
    next_seq: SeqNum,
}

impl MemTableWrapper {
    fn new() -> Self {
        let config = MemTableConfig {
            seed: Some(7),
            ..MemTableConfig::default()
        };
        Self {
            mem: MemTable::with_config(InternalKeyComparator::new(BytewiseComparator), config),
            next_seq: 1,
        }
    }
}

impl KVStore for MemTableWrapper {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.mem.put(self.next_seq, key, value);
        self.next_seq += 1;
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.mem.get(key, MAX_SEQUENCE)? {
            LookupResult::Value(value) => Some(value.to_vec()),
            LookupResult::Deleted => None,
        }
    }
}

// --- Sled ---
struct SledWrapper {
    db: sled::Db,
    #[allow(dead_code)]
    dir: TempDir,
}

impl SledWrapper {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db = sled::open(dir.path()).unwrap();
        Self { db, dir }
    }
}

impl KVStore for SledWrapper {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.db.insert(key, value).unwrap();
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.db.get(key).unwrap().map(|v| v.to_vec())
    }
}

// --- LevelDB (rusty-leveldb) ---
struct LevelDBWrapper {
    db: std::sync::Mutex<rusty_leveldb::DB>,
    #[allow(dead_code)]
    dir: TempDir,
}

impl LevelDBWrapper {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let opts = rusty_leveldb::Options::default();
        let db = rusty_leveldb::DB::open(dir.path(), opts).unwrap();
        Self {
            db: std::sync::Mutex::new(db),
            dir,
        }
    }
}

impl KVStore for LevelDBWrapper {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.db.lock().unwrap().put(key, value).unwrap();
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.db.lock().unwrap().get(key)
    }
}

// ============================================================================
// Benchmark Helpers
// ============================================================================

fn generate_key(i: u64) -> Vec<u8> {
    format!("key_{:016}", i).into_bytes()
}

fn generate_value(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.r#gen::<u8>()).collect()
}

fn generate_random_key(max: u64) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    generate_key(rng.gen_range(0..max))
}

/// Encodes sorted keys into a block with prefix compression, restarting
/// every `interval` entries.
fn encode_block(count: u64, interval: usize, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut restarts = Vec::new();
    let mut last_key: Vec<u8> = Vec::new();
    for i in 0..count {
        let key = generate_key(i);
        let shared = if i as usize % interval == 0 {
            restarts.push(buf.len() as u32);
            0
        } else {
            last_key.iter().zip(&key).take_while(|(a, b)| a == b).count()
        };
        put_varint32(&mut buf, shared as u32);
        put_varint32(&mut buf, (key.len() - shared) as u32);
        put_varint32(&mut buf, value.len() as u32);
        buf.extend_from_slice(&key[shared..]);
        buf.extend_from_slice(value);
        last_key = key;
    }
    for restart in &restarts {
        put_fixed32(&mut buf, *restart);
    }
    put_fixed32(&mut buf, restarts.len() as u32);
    buf
}

// ============================================================================
// Benchmarks
// ============================================================================

fn bench_sequential_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_write");
    group.throughput(Throughput::Elements(1));

    macro_rules! bench_writes {
        ($name:expr, $wrapper:ident, $count:expr) => {
            group.bench_with_input(BenchmarkId::new($name, $count), $count, |b, &count| {
                b.iter_with_setup($wrapper::new, |mut db| {
                    for i in 0..count {
                        db.put(&generate_key(i), &generate_value(100));
                    }
                });
            });
        };
    }

    for count in [1000u64, 10000].iter() {
        bench_writes!("MemTable", MemTableWrapper, count);
        bench_writes!("Sled", SledWrapper, count);
        bench_writes!("LevelDB", LevelDBWrapper, count);
    }

    group.finish();
}

fn bench_random_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_read");
    group.throughput(Throughput::Elements(1));

    let count = 10000u64;

    // Pre-populate stores
    macro_rules! setup_db {
        ($wrapper:ident) => {{
            let mut db = $wrapper::new();
            for i in 0..count {
                db.put(&generate_key(i), &generate_value(100));
            }
            db
        }};
    }

    group.bench_function("MemTable", |b| {
        let db = setup_db!(MemTableWrapper);
        b.iter(|| {
            let key = generate_random_key(count);
            black_box(db.get(&key));
        });
    });

    group.bench_function("Sled", |b| {
        let db = setup_db!(SledWrapper);
        b.iter(|| {
            let key = generate_random_key(count);
            black_box(db.get(&key));
        });
    });

    group.bench_function("LevelDB", |b| {
        let db = setup_db!(LevelDBWrapper);
        b.iter(|| {
            let key = generate_random_key(count);
            black_box(db.get(&key));
        });
    });

    group.finish();
}

fn bench_concurrent_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("memtable_concurrent_read");

    let count = 10000u64;
    let mut db = MemTableWrapper::new();
    for i in 0..count {
        db.put(&generate_key(i), &generate_value(100));
    }

    for threads in [1usize, 4].iter() {
        group.throughput(Throughput::Elements(*threads as u64 * 1000));
        group.bench_with_input(BenchmarkId::from_parameter(threads), threads, |b, &threads| {
            b.iter(|| {
                std::thread::scope(|s| {
                    for _ in 0..threads {
                        let reader = db.mem.reader();
                        s.spawn(move || {
                            for _ in 0..1000 {
                                let key = generate_random_key(count);
                                black_box(reader.get(&key, MAX_SEQUENCE));
                            }
                        });
                    }
                });
            });
        });
    }

    group.finish();
}

fn bench_block_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_lookup");
    group.throughput(Throughput::Elements(1));

    let count = 1000u64;
    let value = generate_value(32);

    for interval in [1usize, 16].iter() {
        let raw = encode_block(count, *interval, &value);
        let block = Block::new(&raw, BytewiseComparator).unwrap();

        group.bench_with_input(BenchmarkId::new("find", interval), interval, |b, _| {
            b.iter(|| {
                let key = generate_random_key(count);
                let it = block.find(&key);
                black_box(it.value().ok());
            });
        });

        group.bench_with_input(BenchmarkId::new("scan", interval), interval, |b, _| {
            b.iter(|| black_box(block.iter().filter_map(|entry| entry.ok()).count()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_sequential_write,
    bench_random_read,
    bench_concurrent_read,
    bench_block_lookup,
);

criterion_main!(benches);
