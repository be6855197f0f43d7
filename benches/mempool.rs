use dpdkpcap::mempool::{Mempool, PoolFlags, PoolOptions};
use dpdkpcap::Mbuf;

use criterion::{criterion_group, criterion_main, Criterion};

const NUM: usize = 10000;

fn getput(pool: &Mempool, bufs: &mut Vec<Mbuf>) {
    let _r = pool.alloc_bulk(bufs, NUM);
    bufs.clear();
}

fn fill(pool: &Mempool, payload: &[u8]) {
    if let Some(mut mbuf) = pool.alloc() {
        let _r = mbuf.append(payload);
    }
}

fn test(c: &mut Criterion) {
    let options = PoolOptions {
        name: "BENCH_POOL".to_string(),
        capacity: NUM,
        data_room: 2048,
        cache_size: 32,
        flags: PoolFlags::SPSC,
        huge_tlb: false,
    };

    let pool = match Mempool::new(options) {
        Ok(pool) => pool,
        Err(err) => panic!("{:?}", err),
    };

    let mut bufs = Vec::with_capacity(NUM);
    let payload = [0xa5u8; 1514];

    c.bench_function("getput", |b| b.iter(|| getput(&pool, &mut bufs)));
    c.bench_function("fill", |b| b.iter(|| fill(&pool, &payload)));
}

criterion_group!(benches, test);
criterion_main!(benches);
