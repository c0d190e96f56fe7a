//! Cursor hierarchy integration tests
//!
//! Writes through `MemoryShard`, flushes some of the data into immutable
//! files and reads it back through the executor and the raw cursors.

use std::sync::Arc;

use kuba_exec::config::StorageConfig;
use kuba_exec::query::aggregate::{AggregateCall, CallKind};
use kuba_exec::query::chunk::{Chunk, ChunkTags};
use kuba_exec::query::condition::{CompareOp, Condition};
use kuba_exec::query::executor::{ExecutorConfig, QueryExecutor};
use kuba_exec::query::options::Interval;
use kuba_exec::query::schema::{DataType, Field, RowDataType, Value, ValueRef};
use kuba_exec::query::QuerySchema;
use kuba_exec::storage::{CursorContext, MemoryShard, ShardReader};

// ============================================================================
// Helpers
// ============================================================================

fn usage() -> Arc<RowDataType> {
    RowDataType::shared(vec![Field::new("usage", DataType::Float)])
}

fn rows(times: &[i64]) -> Chunk {
    let mut c = Chunk::new("cpu", usage());
    for t in times {
        c.append_row(*t, &[Some(ValueRef::Float(*t as f64))]);
    }
    c
}

fn write(shard: &MemoryShard, tags: &str, times: &[i64]) {
    shard
        .write("cpu", &ChunkTags::parse(tags), &rows(times))
        .expect("write failed");
}

/// One series spread over two overlapping files and the mutable table
fn layered_shard() -> MemoryShard {
    let shard = MemoryShard::new(1, &StorageConfig::default());
    write(&shard, "host=a", &[1, 5]);
    shard.flush();
    write(&shard, "host=a", &[3, 4]);
    shard.flush();
    write(&shard, "host=a", &[2, 6]);
    shard
}

fn executor() -> QueryExecutor {
    QueryExecutor::with_config(ExecutorConfig::new().with_parallelism(1).with_chunk_size(4))
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_files_and_memtable_merge_ascending() {
    let shard = layered_shard();
    let exec = executor();
    let schema = QuerySchema::raw(exec.options("cpu"), usage()).unwrap();
    let out = exec.execute(&shard, schema).await.unwrap();
    assert_eq!(out.times(), vec![1, 2, 3, 4, 5, 6]);
    for chunk in &out.chunks {
        chunk.validate().unwrap();
        assert!(chunk.len() <= 4);
    }
}

#[tokio::test]
async fn test_files_and_memtable_merge_descending() {
    let shard = layered_shard();
    let exec = executor();
    let schema = QuerySchema::raw(exec.options("cpu").with_ascending(false), usage()).unwrap();
    let out = exec.execute(&shard, schema).await.unwrap();
    assert_eq!(out.times(), vec![6, 5, 4, 3, 2, 1]);
}

#[tokio::test]
async fn test_time_range_is_half_open() {
    let shard = layered_shard();
    let exec = executor();
    let schema = QuerySchema::raw(exec.options("cpu").with_time_range(2, 5), usage()).unwrap();
    let out = exec.execute(&shard, schema).await.unwrap();
    assert_eq!(out.times(), vec![2, 3, 4]);
}

// ============================================================================
// Filtering and limits
// ============================================================================

#[tokio::test]
async fn test_field_condition_filters_rows() {
    let shard = layered_shard();
    let exec = executor();
    let options = exec
        .options("cpu")
        .with_condition(Condition::field("usage", CompareOp::Gt, Value::Float(3.0)));
    let schema = QuerySchema::raw(options, usage()).unwrap();
    let out = exec.execute(&shard, schema).await.unwrap();
    assert_eq!(out.times(), vec![4, 5, 6]);
}

#[tokio::test]
async fn test_limit_and_offset_apply_per_series() {
    let shard = MemoryShard::new(1, &StorageConfig::default());
    write(&shard, "host=a", &[0, 1, 2, 3]);
    write(&shard, "host=b", &[10, 11, 12, 13]);
    shard.flush();

    let exec = executor();
    let options = exec
        .options("cpu")
        .with_dimensions(["host"])
        .with_limit(2, 1);
    let schema = QuerySchema::raw(options, usage()).unwrap();
    let out = exec.execute(&shard, schema).await.unwrap();
    assert_eq!(out.times(), vec![1, 2, 11, 12]);

    let groups: Vec<String> = out
        .chunks
        .iter()
        .flat_map(|c| c.tags().iter().map(ChunkTags::key).collect::<Vec<_>>())
        .collect();
    assert_eq!(groups, vec!["host=a".to_string(), "host=b".to_string()]);
}

// ============================================================================
// Grouping
// ============================================================================

#[tokio::test]
async fn test_region_groups_land_in_partition_order() {
    let shard = MemoryShard::new(1, &StorageConfig::default());
    for (host, region) in [("a", "eu"), ("b", "eu"), ("c", "us"), ("d", "us")] {
        write(&shard, &format!("host={},region={}", host, region), &[0, 1, 2, 3, 4]);
    }
    shard.flush();

    let exec = QueryExecutor::with_config(
        ExecutorConfig::new()
            .with_parallelism(2)
            .with_pipeline_aggregation(true),
    );
    let options = exec
        .options("cpu")
        .with_dimensions(["region"])
        .with_interval(Interval::from_nanos(10, 0));
    let schema = QuerySchema::aggregate(
        options,
        usage(),
        vec![AggregateCall::new(CallKind::Count, "usage")],
        Vec::new(),
    )
    .unwrap();
    let out = exec.execute(&shard, schema).await.unwrap();
    assert_eq!(out.stats.partitions, 2);

    let mut seen = Vec::new();
    for chunk in &out.chunks {
        for (tags, range) in chunk.tag_spans() {
            for row in range {
                let count = chunk.column(0).value(row).map(|v| v.to_owned_value());
                seen.push((tags.key(), count));
            }
        }
    }
    assert_eq!(
        seen,
        vec![
            ("region=eu".to_string(), Some(Value::Integer(10))),
            ("region=us".to_string(), Some(Value::Integer(10))),
        ]
    );
}

// ============================================================================
// File handles
// ============================================================================

#[test]
fn test_cursors_pin_files_until_dropped() {
    let shard = layered_shard();
    let files = shard.files_ref("cpu", true);
    assert_eq!(files.len(), 2);
    let baseline: Vec<usize> = files.iter().map(|f| f.ref_count()).collect();

    let schema = QuerySchema::raw(executor().options("cpu"), usage()).unwrap();
    let mut cursors = shard
        .create_cursors(&schema, &CursorContext::default())
        .unwrap();
    for (file, before) in files.iter().zip(&baseline) {
        assert!(file.ref_count() > *before);
    }

    for cursor in &mut cursors {
        cursor.close();
    }
    drop(cursors);
    let after: Vec<usize> = files.iter().map(|f| f.ref_count()).collect();
    assert_eq!(after, baseline);
}
