
use criterion::{criterion_group, criterion_main};

criterion_group!(benches, parser::criterion_benchmark);

criterion_main!(benches);
