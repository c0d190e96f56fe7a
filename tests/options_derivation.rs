//! Options derived from statements, checked against real executions
//!
//! Derives top-level and subquery options, then runs them through the
//! executor to make sure the derived bounds are the ones applied.

use std::sync::Arc;

use kuba_exec::config::StorageConfig;
use kuba_exec::query::chunk::{Chunk, ChunkTags};
use kuba_exec::query::executor::{ExecutorConfig, QueryExecutor};
use kuba_exec::query::options::{FillOption, Interval, SelectStatement, TimeCondition};
use kuba_exec::query::schema::{DataType, Field, RowDataType, ValueRef};
use kuba_exec::query::{ProcessorOptions, QuerySchema};
use kuba_exec::storage::MemoryShard;
use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

fn usage() -> Arc<RowDataType> {
    RowDataType::shared(vec![Field::new("usage", DataType::Float)])
}

fn shard() -> MemoryShard {
    let shard = MemoryShard::new(1, &StorageConfig::default());
    for host in ["a", "b", "c"] {
        let mut rows = Chunk::new("cpu", usage());
        for t in 0..20 {
            rows.append_row(t, &[Some(ValueRef::Float(t as f64))]);
        }
        shard
            .write("cpu", &ChunkTags::parse(&format!("host={}", host)), &rows)
            .unwrap();
    }
    shard.flush();
    shard
}

fn parent_statement() -> SelectStatement {
    let mut stmt = SelectStatement::new("cpu");
    stmt.time_condition = TimeCondition {
        min: Some(5),
        max: Some(10),
    };
    stmt.dimensions = vec!["host".to_string()];
    stmt.slimit = 1;
    stmt.soffset = 0;
    stmt.is_raw = false;
    stmt
}

// ============================================================================
// Derivation applied by the executor
// ============================================================================

#[tokio::test]
async fn test_subquery_never_reads_outside_parent_range() {
    let parent = ProcessorOptions::from_statement(&parent_statement(), 8, CancellationToken::new());

    let mut child = SelectStatement::new("cpu");
    child.time_condition = TimeCondition {
        min: Some(0),
        max: Some(100),
    };
    let sub = ProcessorOptions::derive_subquery(&parent, &child, 1_000);
    assert_eq!((sub.start_time, sub.end_time), (5, 10));
    assert_eq!(sub.dimensions, vec!["host".to_string()]);
    assert_eq!(sub.chunk_size, 8);

    let executor = QueryExecutor::with_config(ExecutorConfig::new().with_parallelism(1));
    let out = executor
        .execute(&shard(), QuerySchema::raw(sub, usage()).unwrap())
        .await
        .unwrap();
    // slimit 1 keeps host=a only
    assert_eq!(out.times(), vec![5, 6, 7, 8, 9]);
    for chunk in &out.chunks {
        assert!(chunk.len() <= 8);
        assert!(chunk.tags().iter().all(|t| t.get("host") == Some("a")));
    }
}

#[test]
fn test_subquery_shares_the_abort_token() {
    let abort = CancellationToken::new();
    let parent = ProcessorOptions::from_statement(&parent_statement(), 8, abort.clone());
    let sub = ProcessorOptions::derive_subquery(&parent, &SelectStatement::new("cpu"), 1_000);
    assert!(!sub.abort.is_cancelled());
    abort.cancel();
    assert!(sub.abort.is_cancelled());
}

#[test]
fn test_aggregate_subquery_fill_and_interval() {
    let mut parent_stmt = parent_statement();
    parent_stmt.interval = Some(Interval::from_nanos(5, 0));
    let parent = ProcessorOptions::from_statement(&parent_stmt, 8, CancellationToken::new());

    let mut child = SelectStatement::new("cpu");
    child.is_raw = false;
    child.fill = FillOption::Null;
    let sub = ProcessorOptions::derive_subquery(&parent, &child, 1_000);
    assert_eq!(sub.fill, FillOption::None);
    assert_eq!(sub.interval, parent.interval);
    assert!(sub.validate().is_ok());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn test_derived_range_is_inside_parent(
        parent_min in -1_000i64..1_000,
        parent_len in 0i64..1_000,
        child_min in proptest::option::of(-2_000i64..2_000),
        child_max in proptest::option::of(-2_000i64..2_000),
        parent_slimit in 0usize..10,
        child_slimit in 0usize..10,
    ) {
        let mut stmt = SelectStatement::new("cpu");
        stmt.time_condition = TimeCondition {
            min: Some(parent_min),
            max: Some(parent_min + parent_len),
        };
        stmt.slimit = parent_slimit;
        let parent = ProcessorOptions::from_statement(&stmt, 16, CancellationToken::new());

        let mut child = SelectStatement::new("cpu");
        child.time_condition = TimeCondition { min: child_min, max: child_max };
        child.slimit = child_slimit;
        let sub = ProcessorOptions::derive_subquery(&parent, &child, 0);

        prop_assert!(sub.start_time >= parent.start_time);
        prop_assert!(sub.end_time <= parent.end_time);
        prop_assert!(sub.start_time <= sub.end_time);
        prop_assert_eq!(sub.slimit, parent_slimit + child_slimit);
    }
}
