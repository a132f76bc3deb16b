use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use halo_decomp::algs::communicator::LocalUniverse;
use halo_decomp::algs::exchange::{ExchangeBuffer, HaloExchange};
use halo_decomp::topology::{Axis, NeighborTable, ProcessGrid};

fn bench_self_exchange(c: &mut Criterion) {
    let mut group = c.benchmark_group("halo_self_exchange");
    let universe = LocalUniverse::new(1);
    let comm = universe.comm(0);
    let grid = ProcessGrid::new(1, [1, 1, 1], [true; 3], 0).expect("1x1x1 grid");
    let nbrs = NeighborTable::from_grid(&grid);
    let engine = HaloExchange::new(&comm, &nbrs);

    for &count in &[64usize, 4096, 65536] {
        let mut x = vec![1.0f64; 4 * count];
        let mut y = vec![2.0f64; 4 * count];
        let mut z = vec![3.0f64; 4 * count];

        group.bench_with_input(BenchmarkId::new("directional", count), &count, |b, &n| {
            b.iter(|| {
                let buf = ExchangeBuffer::from_elems(&mut x, n).expect("buffer");
                black_box(engine.begin_directional(Axis::X, buf).wait().expect("exchange"));
            });
        });

        group.bench_with_input(BenchmarkId::new("all_axes", count), &count, |b, &n| {
            b.iter(|| {
                let pending = engine.begin_all(
                    ExchangeBuffer::from_elems(&mut x, n).expect("buffer"),
                    ExchangeBuffer::from_elems(&mut y, n).expect("buffer"),
                    ExchangeBuffer::from_elems(&mut z, n).expect("buffer"),
                );
                black_box(pending.wait().expect("exchange"));
            });
        });
    }
    group.finish();
}

fn bench_rank_mapping(c: &mut Criterion) {
    let grid = ProcessGrid::new(512, [8, 8, 8], [true, false, true], 0).expect("8x8x8 grid");
    c.bench_function("rank_coord_roundtrip_512", |b| {
        b.iter(|| {
            let mut acc = 0usize;
            for r in 0..grid.process_count() {
                if let Some(c) = grid.rank_to_coord(black_box(r)) {
                    acc += grid.coord_to_rank(c).unwrap_or(0);
                }
            }
            black_box(acc)
        });
    });
}

criterion_group!(benches, bench_self_exchange, bench_rank_mapping);
criterion_main!(benches);
