//! # Script and Frame Benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use comms_if::eqpt::arm::{Arm, ArmFrame, Axis};
use util::script;

fn script_benchmark(c: &mut Criterion) {
    // ---- Build a dummy palletizing script ----

    // One layer of a pallet is a pick, a lift and a place per box
    let mut text = String::new();
    for i in 1..=50 {
        text.push_str(&format!(
            "X({i},{x},800),Y({i},{y},800),T({i},90,500) NEXT \
             Z({i},120,400),G({i},0,300) NEXT \
             Z({j},0,400) NEXT\n",
            i = i,
            j = i + 50,
            x = 100 + 10 * i,
            y = 200 + 5 * i,
        ));
    }

    c.bench_function("script::parse", |b| {
        b.iter(|| script::parse(black_box(&text)).unwrap())
    });

    // ---- Frame codec ----

    let frame = ArmFrame::move_axis(Arm::Left, Axis::Z, 42, 1250, 800);
    let encoded = frame.encode();

    c.bench_function("ArmFrame::encode", |b| b.iter(|| black_box(&frame).encode()));
    c.bench_function("ArmFrame::decode", |b| {
        b.iter(|| ArmFrame::decode(black_box(encoded.as_bytes())).unwrap())
    });
}

criterion_group!(benches, script_benchmark);
criterion_main!(benches);
