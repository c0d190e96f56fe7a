//! Property Tests for Chunk Indexes
//!
//! Uses property-based testing (proptest) to check that chunks built
//! group by group keep their tag and window indexes consistent, and that
//! slicing and cloning preserve them.

use std::sync::Arc;

use kuba_exec::query::chunk::{Chunk, ChunkTags};
use kuba_exec::query::schema::{DataType, Field, RowDataType, ValueRef};
use proptest::prelude::*;

// =============================================================================
// Test Data Strategies
// =============================================================================

/// Window sizes of one tag group
fn windows() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..6, 1..5)
}

/// Tag groups, each a list of window sizes
fn groups() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(windows(), 1..6)
}

/// Null pattern for the integer column
fn nulls() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec(any::<bool>(), 200)
}

fn schema() -> Arc<RowDataType> {
    RowDataType::shared(vec![
        Field::new("count", DataType::Integer),
        Field::new("usage", DataType::Float),
    ])
}

fn build(groups: &[Vec<usize>], nulls: &[bool]) -> Chunk {
    let mut chunk = Chunk::new("cpu", schema());
    let mut row = 0usize;
    for (g, windows) in groups.iter().enumerate() {
        chunk.open_tag_group(&ChunkTags::parse(&format!("host=h{:02}", g)));
        for (w, size) in windows.iter().enumerate() {
            if w > 0 {
                chunk.open_window();
            }
            for _ in 0..*size {
                let count = (!nulls[row % nulls.len()]).then_some(ValueRef::Integer(row as i64));
                let half = Some(ValueRef::Float(row as f64 / 2.0));
                chunk.append_row(row as i64 * 10, &[count, half]);
                row += 1;
            }
        }
    }
    chunk
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_built_chunk_is_valid(groups in groups(), nulls in nulls()) {
        let chunk = build(&groups, &nulls);
        prop_assert!(chunk.validate().is_ok());

        let rows: usize = groups.iter().flatten().sum();
        let windows: usize = groups.iter().map(Vec::len).sum();
        prop_assert_eq!(chunk.len(), rows);
        prop_assert_eq!(chunk.tags().len(), groups.len());
        prop_assert_eq!(chunk.interval_index().len(), windows);

        // tag spans tile the chunk
        let mut next = 0;
        for (_, range) in chunk.tag_spans() {
            prop_assert_eq!(range.start, next);
            next = range.end;
        }
        prop_assert_eq!(next, rows);
    }

    #[test]
    fn test_window_spans_follow_interval_index(groups in groups(), nulls in nulls()) {
        let chunk = build(&groups, &nulls);
        for (i, (_, range)) in chunk.tag_spans().enumerate() {
            let sizes: Vec<usize> = chunk.window_spans(range).iter().map(|r| r.len()).collect();
            prop_assert_eq!(&sizes, &groups[i]);
        }
    }

    #[test]
    fn test_clone_is_equal(groups in groups(), nulls in nulls()) {
        let chunk = build(&groups, &nulls);
        let copy = chunk.clone();
        prop_assert_eq!(&copy, &chunk);
        prop_assert_eq!(copy.column(0).nil_count(), chunk.column(0).nil_count());
    }

    #[test]
    fn test_slice_rows_keeps_indexes_valid(
        groups in groups(),
        nulls in nulls(),
        a in 0usize..200,
        b in 0usize..200,
    ) {
        let chunk = build(&groups, &nulls);
        let (start, end) = (a.min(b) % (chunk.len() + 1), a.max(b) % (chunk.len() + 1));
        let (start, end) = (start.min(end), start.max(end));
        let slice = chunk.slice_rows(start, end);

        prop_assert!(slice.validate().is_ok());
        prop_assert_eq!(slice.len(), end - start);
        prop_assert_eq!(slice.time(), &chunk.time()[start..end]);
        for row in 0..slice.len() {
            prop_assert_eq!(slice.column(0).value(row), chunk.column(0).value(start + row));
        }
        if !slice.is_empty() {
            // the first sliced row belongs to the tag group covering `start`
            let owner = chunk
                .tag_spans()
                .find(|(_, r)| r.contains(&start))
                .map(|(tags, _)| tags.clone());
            prop_assert_eq!(Some(slice.tags()[0].clone()), owner);
        }
    }
}
