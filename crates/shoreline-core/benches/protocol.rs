use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shoreline_core::protocol::DEFAULT_GARBAGE_LIMIT;
use shoreline_core::{Canvas, PixelMode, ProtocolEngine, RingBuffer, Size};

const SIZE: Size = Size::new(1024, 768);

fn commands(count: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..count {
        let x = (i * 7) % SIZE.width as usize;
        let y = (i * 13) % SIZE.height as usize;
        out.extend_from_slice(format!("PX {} {} {:06x}\n", x, y, i & 0xff_ffff).as_bytes());
    }
    out
}

/// Parse + apply throughput for pixel set commands
fn bench_set_pixels(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_pixels");
    let canonical = Canvas::new(SIZE, 0).unwrap();
    let shard = Canvas::new(SIZE, 0).unwrap();

    for count in &[64usize, 512, 2048] {
        let input = commands(*count);
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
            let mut ring = RingBuffer::with_capacity(input.len() + 1).unwrap();
            let mut engine = ProtocolEngine::new(PixelMode::Overwrite, DEFAULT_GARBAGE_LIMIT);
            let mut replies = Vec::new();
            b.iter(|| {
                ring.write(black_box(input)).unwrap();
                let canonical = canonical.read();
                let shard = shard.read();
                engine.process(&mut ring, &shard, &canonical, &mut replies).unwrap();
            });
        });
    }

    group.finish();
}

/// Input split at an awkward boundary, so every pass rewinds once
fn bench_split_commands(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_commands");
    let canonical = Canvas::new(SIZE, 0).unwrap();
    let shard = Canvas::new(SIZE, 0).unwrap();
    let input = commands(256);
    let cut = input.len() / 2 + 3;

    group.bench_function("halves", |b| {
        let mut ring = RingBuffer::with_capacity(input.len() + 1).unwrap();
        let mut engine = ProtocolEngine::new(PixelMode::Overwrite, DEFAULT_GARBAGE_LIMIT);
        let mut replies = Vec::new();
        b.iter(|| {
            for part in [&input[..cut], &input[cut..]] {
                ring.write(black_box(part)).unwrap();
                let canonical = canonical.read();
                let shard = shard.read();
                engine.process(&mut ring, &shard, &canonical, &mut replies).unwrap();
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_set_pixels, bench_split_commands);
criterion_main!(benches);
