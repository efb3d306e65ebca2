use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dts_tree::MemoryFiles;

pub fn parse(c: &mut Criterion) {
    let source = include_str!("overlay.dts");
    let mut mem = MemoryFiles::new();
    mem.insert("overlay.dts", source);

    c.bench_function("load overlay.dts", |b| {
        b.iter(|| dts_tree::load(black_box(&mem), "overlay.dts").unwrap())
    });
}

criterion_group!(benches, parse);
criterion_main!(benches);
