use criterion::{black_box, criterion_group, criterion_main, Criterion};

const COUNTER: &str = include_str!("../../../specs/counter.lift");
const MUTEX: &str = include_str!("../../../specs/mutex.lift");
const SHOPPING_CART: &str = include_str!("../../../specs/shopping_cart.lift");

fn bench_parse_counter(c: &mut Criterion) {
    c.bench_function("parse_counter", |b| {
        b.iter(|| lifter_dsl::parse(black_box(COUNTER), "counter.lift").unwrap())
    });
}

fn bench_parse_mutex(c: &mut Criterion) {
    c.bench_function("parse_mutex", |b| {
        b.iter(|| lifter_dsl::parse(black_box(MUTEX), "mutex.lift").unwrap())
    });
}

fn bench_parse_shopping_cart(c: &mut Criterion) {
    c.bench_function("parse_shopping_cart", |b| {
        b.iter(|| lifter_dsl::parse(black_box(SHOPPING_CART), "shopping_cart.lift").unwrap())
    });
}

criterion_group!(
    benches,
    bench_parse_counter,
    bench_parse_mutex,
    bench_parse_shopping_cart
);
criterion_main!(benches);
