use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use kuba_exec::query::aggregate::{AggregateCall, CallKind, StreamAggregator};
use kuba_exec::query::chunk::{Chunk, ChunkTags};
use kuba_exec::query::options::{Interval, ProcessorOptions};
use kuba_exec::query::schema::{DataType, Field, RowDataType, ValueRef};
use kuba_exec::query::QuerySchema;
use rand::Rng;
use std::sync::Arc;

const POINTS_PER_WINDOW: i64 = 60;

fn source() -> Arc<RowDataType> {
    RowDataType::shared(vec![Field::new("usage", DataType::Float)])
}

/// `chunks` chunks of `chunk_size` rows, series laid out one after the other
/// and windows of `POINTS_PER_WINDOW` rows inside each series
fn create_chunks(chunks: usize, chunk_size: usize, series: usize) -> Vec<Chunk> {
    let mut rng = rand::rng();
    let total = chunks * chunk_size;
    let per_series = (total / series.max(1)).max(1);

    let mut out = Vec::with_capacity(chunks);
    let mut current = Chunk::new("cpu", source());
    let mut last_window = None;
    for row in 0..total {
        let s = (row / per_series).min(series - 1);
        let t = (row % per_series) as i64;
        if current.open_tag_group(&ChunkTags::parse(&format!("host=h{:04}", s))) {
            last_window = None;
        }
        let window = t / POINTS_PER_WINDOW;
        if last_window.is_some_and(|w| w != window) {
            current.open_window();
        }
        last_window = Some(window);
        current.append_row(t, &[Some(ValueRef::Float(rng.random_range(0.0..100.0)))]);

        if current.len() == chunk_size {
            out.push(std::mem::replace(&mut current, Chunk::new("cpu", source())));
            last_window = None;
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn schema(calls: Vec<AggregateCall>) -> QuerySchema {
    let options = ProcessorOptions::new("cpu")
        .with_dimensions(["host"])
        .with_interval(Interval::from_nanos(POINTS_PER_WINDOW, 0))
        .with_chunk_size(1024);
    QuerySchema::aggregate(options, source(), calls, Vec::new()).unwrap()
}

fn aggregate(schema: &QuerySchema, input: &[Chunk]) -> usize {
    let mut agg = StreamAggregator::new(schema).unwrap();
    for chunk in input {
        agg.push(chunk).unwrap();
    }
    agg.finish().unwrap();
    agg.flush();
    let mut rows = 0;
    while let Some(chunk) = agg.pop_ready() {
        rows += chunk.len();
    }
    rows
}

fn bench_chunk_shapes(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_aggregate/shape");
    let mean = schema(vec![AggregateCall::new(CallKind::Mean, "usage")]);

    let shapes = [(64, 1024, 1), (64, 1024, 64), (1024, 64, 64), (16, 4096, 256)];
    for (chunks, chunk_size, series) in shapes {
        let input = create_chunks(chunks, chunk_size, series);
        group.throughput(Throughput::Elements((chunks * chunk_size) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}/{}series", chunks, chunk_size, series)),
            &input,
            |b, input| b.iter(|| black_box(aggregate(&mean, input))),
        );
    }

    group.finish();
}

fn bench_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream_aggregate/calls");
    let input = create_chunks(64, 1024, 16);
    group.throughput(Throughput::Elements(64 * 1024));

    let cases = [
        ("count", vec![AggregateCall::new(CallKind::Count, "usage")]),
        (
            "min_max_sum",
            vec![
                AggregateCall::new(CallKind::Min, "usage"),
                AggregateCall::new(CallKind::Max, "usage"),
                AggregateCall::new(CallKind::Sum, "usage"),
            ],
        ),
        ("percentile", vec![AggregateCall::new(CallKind::Percentile(95.0), "usage")]),
        ("mode", vec![AggregateCall::new(CallKind::Mode, "usage")]),
    ];
    for (name, calls) in cases {
        let schema = schema(calls);
        group.bench_with_input(BenchmarkId::from_parameter(name), &input, |b, input| {
            b.iter(|| black_box(aggregate(&schema, input)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_chunk_shapes, bench_calls);
criterion_main!(benches);
