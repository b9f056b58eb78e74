use criterion::{Criterion, criterion_group, criterion_main};
use fxvm::pipeline::kernels;
use fxvm::*;
use std::hint::black_box;
use std::sync::Arc;

const SOURCE: &str = "sin(rate * 0.5) * 10 + min(count, 3) > 2.5 ? 1 : 0";

fn criterion_benchmark(c: &mut Criterion) {
    let document = Document::new().with("rate", 1.25f32).with("count", 7i32);

    c.bench_function("expression (compile)", |b| {
        b.iter(|| black_box(compile(black_box(SOURCE), &document)));
    });

    c.bench_function("expression (play)", |b| {
        let program = compile(SOURCE, &document).expect("expression compiles");
        let mut f = as_native_function(Arc::new(program));
        b.iter(|| black_box(f()));
    });

    c.bench_function("particles (update 4096)", |b| {
        let desc = EmitterDesc::reference("bench", 4096, kernels::particle()).expect("kernels assemble");
        let mut emitter = Emitter::build(desc).expect("emitter sets up");
        emitter.reset().expect("reset");
        emitter.emit(4000).expect("emit");

        // short steps keep every particle alive
        b.iter(|| emitter.update([(ELAPSED_TIME, Native::Float(1e-6))]));
    });

    c.bench_function("particles (reset + emit 1024)", |b| {
        let desc = EmitterDesc::reference("bench", 1024, kernels::particle()).expect("kernels assemble");
        let mut emitter = Emitter::build(desc).expect("emitter sets up");

        b.iter(|| {
            emitter.reset().expect("reset");
            black_box(emitter.emit(1023))
        });
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
