//! In-process storage collaborator
//!
//! A shard made of a mutable table and immutable in-memory files, enough to
//! drive the whole cursor tree without a disk format:
//!
//! - [`MemTable`]: per-series time-sorted rows accepting writes
//! - [`MemoryFile`]: immutable per-measurement file produced by a flush
//! - [`MemoryShard`]: catalog, series index and the [`ShardReader`] entry
//!   point building cursors
//!
//! Lock order is catalog, then files, then memtable. No lock is taken while
//! a later one in that order is held.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{CursorContext, FileRef, ShardReader, TableFile};
use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::index::SeriesIndexCache;
use crate::query::chunk::{Chunk, ChunkTags};
use crate::query::cursor::{
    AggregateCursor, FileLoopCursor, GroupCursor, KeyCursor, SeriesCursor, SeriesInfo,
    TagSetCursor,
};
use crate::query::error::QueryError;
use crate::query::query_schema::QuerySchema;
use crate::query::schema::{Field, RowDataType};
use crate::types::{series_key, SeriesId, TimeRange};

// ============================================================================
// Projection
// ============================================================================

/// Rows of time-sorted `src` inside `range`
fn row_span(src: &Chunk, range: &TimeRange) -> Range<usize> {
    let times = src.time();
    let start = times.partition_point(|&t| t < range.start);
    let end = times.partition_point(|&t| t < range.end).max(start);
    start..end
}

/// Copy `rows` of `src` onto `schema`, matching columns by name
///
/// Columns missing from `src` read as NULL.
fn project_rows(
    src: &Chunk,
    rows: Range<usize>,
    schema: &Arc<RowDataType>,
) -> Result<Chunk, StorageError> {
    let mut out = Chunk::new(src.name().to_string(), schema.clone());
    out.append_time(&src.time()[rows.clone()]);
    for (i, field) in schema.fields().iter().enumerate() {
        match src.schema().index_of(&field.name) {
            Some(j) => {
                let stored = src.column(j).data_type();
                if stored != field.data_type {
                    return Err(StorageError::SchemaMismatch(format!(
                        "column '{}' is stored as {}, requested as {}",
                        field.name, stored, field.data_type
                    )));
                }
                out.column_mut(i).append_rows_from(src.column(j), rows.clone());
            }
            None => out.column_mut(i).append_many_nil(rows.len()),
        }
    }
    Ok(out)
}

/// Rows of `src` inside `range`, projected onto `schema`
fn project(
    src: &Chunk,
    range: &TimeRange,
    schema: &Arc<RowDataType>,
) -> Result<Option<Chunk>, StorageError> {
    let rows = row_span(src, range);
    if rows.is_empty() {
        return Ok(None);
    }
    project_rows(src, rows, schema).map(Some)
}

/// Union of `current` and `incoming`; a column may not change type
fn merge_schema(
    current: Option<&Arc<RowDataType>>,
    incoming: &RowDataType,
) -> Result<Arc<RowDataType>, StorageError> {
    let Some(current) = current else {
        return Ok(Arc::new(incoming.clone()));
    };
    let mut fields: Vec<Field> = current.fields().to_vec();
    let mut grown = false;
    for field in incoming.fields() {
        match current.index_of(&field.name) {
            Some(i) if fields[i].data_type != field.data_type => {
                return Err(StorageError::SchemaMismatch(format!(
                    "column '{}' is {}, write has {}",
                    field.name, fields[i].data_type, field.data_type
                )));
            }
            Some(_) => {}
            None => {
                fields.push(field.clone());
                grown = true;
            }
        }
    }
    if grown {
        Ok(RowDataType::shared(fields))
    } else {
        Ok(current.clone())
    }
}

// ============================================================================
// Mutable Table
// ============================================================================

/// Per-series rows accepting writes, kept sorted by time
///
/// Rows with equal timestamps keep their write order.
#[derive(Debug, Default)]
pub struct MemTable {
    series: BTreeMap<SeriesId, Chunk>,
    rows: usize,
}

impl MemTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `rows` to series `id`, stored with `schema`
    ///
    /// `schema` must contain every column of `rows` and of the rows already
    /// held for the series.
    pub fn insert(
        &mut self,
        id: SeriesId,
        rows: &Chunk,
        schema: &Arc<RowDataType>,
    ) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }
        let incoming = project_rows(rows, 0..rows.len(), schema)?;
        let merged = match self.series.remove(&id) {
            None => sort_stable(incoming),
            Some(existing) => {
                let mut existing = if existing.schema() == schema {
                    existing
                } else {
                    project_rows(&existing, 0..existing.len(), schema)?
                };
                let sorted = existing
                    .time()
                    .last()
                    .zip(incoming.time().first())
                    .map_or(true, |(last, first)| last <= first);
                for row in 0..incoming.len() {
                    existing.append_row_from(&incoming, row);
                }
                if sorted && is_sorted(incoming.time()) {
                    existing
                } else {
                    sort_stable(existing)
                }
            }
        };
        self.rows += rows.len();
        self.series.insert(id, merged);
        Ok(())
    }

    /// Rows of `id` inside `range` projected onto `schema`
    pub fn read_series(
        &self,
        id: SeriesId,
        range: &TimeRange,
        schema: &Arc<RowDataType>,
    ) -> Result<Option<Chunk>, StorageError> {
        match self.series.get(&id) {
            Some(rows) => project(rows, range, schema),
            None => Ok(None),
        }
    }

    /// Total rows held
    pub fn len(&self) -> usize {
        self.rows
    }

    /// True when no row is held
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Number of series with rows
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Move every row out, leaving the table empty
    pub fn take(&mut self) -> BTreeMap<SeriesId, Chunk> {
        self.rows = 0;
        std::mem::take(&mut self.series)
    }
}

fn is_sorted(times: &[i64]) -> bool {
    times.windows(2).all(|w| w[0] <= w[1])
}

fn sort_stable(chunk: Chunk) -> Chunk {
    if is_sorted(chunk.time()) {
        return chunk;
    }
    let mut order: Vec<usize> = (0..chunk.len()).collect();
    order.sort_by_key(|&row| chunk.time()[row]);
    let mut out = Chunk::new(chunk.name().to_string(), chunk.schema().clone());
    for row in order {
        out.append_row_from(&chunk, row);
    }
    out
}

// ============================================================================
// Immutable File
// ============================================================================

/// Immutable in-memory file holding time-sorted rows per series
#[derive(Debug)]
pub struct MemoryFile {
    path: String,
    measurement: String,
    min_time: i64,
    max_time: i64,
    series: BTreeMap<SeriesId, Chunk>,
}

impl MemoryFile {
    /// File holding `series`; each chunk must be sorted by time
    pub fn new(
        path: impl Into<String>,
        measurement: impl Into<String>,
        series: Vec<(SeriesId, Chunk)>,
    ) -> Self {
        let mut min_time = i64::MAX;
        let mut max_time = i64::MIN;
        for (_, rows) in &series {
            debug_assert!(is_sorted(rows.time()), "file rows must be time-sorted");
            if let (Some(first), Some(last)) = (rows.time().first(), rows.time().last()) {
                min_time = min_time.min(*first);
                max_time = max_time.max(*last);
            }
        }
        Self {
            path: path.into(),
            measurement: measurement.into(),
            min_time,
            max_time,
            series: series
                .into_iter()
                .filter(|(_, rows)| !rows.is_empty())
                .collect(),
        }
    }

    /// Number of series in the file
    pub fn series_count(&self) -> usize {
        self.series.len()
    }
}

impl TableFile for MemoryFile {
    fn path(&self) -> &str {
        &self.path
    }

    fn measurement(&self) -> &str {
        &self.measurement
    }

    fn min_time(&self) -> i64 {
        self.min_time
    }

    fn max_time(&self) -> i64 {
        self.max_time
    }

    fn contains_series(&self, id: SeriesId) -> bool {
        self.series.contains_key(&id)
    }

    fn read_series(
        &self,
        id: SeriesId,
        range: &TimeRange,
        schema: &Arc<RowDataType>,
    ) -> Result<Option<Chunk>, StorageError> {
        match self.series.get(&id) {
            Some(rows) => project(rows, range, schema),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Shard
// ============================================================================

#[derive(Debug, Clone)]
struct SeriesMeta {
    measurement: String,
    key: Vec<u8>,
    tags: ChunkTags,
}

#[derive(Debug, Default)]
struct Catalog {
    schemas: HashMap<String, Arc<RowDataType>>,
    keys: HashMap<Vec<u8>, SeriesId>,
    series: BTreeMap<SeriesId, SeriesMeta>,
    next_series: SeriesId,
}

/// In-memory shard: catalog, series index, mutable table and files
pub struct MemoryShard {
    id: u64,
    catalog: RwLock<Catalog>,
    index: SeriesIndexCache,
    files: RwLock<Vec<FileRef>>,
    memtable: RwLock<MemTable>,
    next_file: AtomicU64,
}

impl MemoryShard {
    /// Empty shard
    pub fn new(id: u64, config: &StorageConfig) -> Self {
        Self {
            id,
            catalog: RwLock::new(Catalog::default()),
            index: SeriesIndexCache::new(config.series_cache_capacity),
            files: RwLock::new(Vec::new()),
            memtable: RwLock::new(MemTable::new()),
            next_file: AtomicU64::new(1),
        }
    }

    /// Shard id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Series index cache
    pub fn index(&self) -> &SeriesIndexCache {
        &self.index
    }

    /// Stored schema of `measurement`
    pub fn schema(&self, measurement: &str) -> Option<Arc<RowDataType>> {
        self.catalog.read().schemas.get(measurement).cloned()
    }

    /// Rows still in the mutable table
    pub fn memtable_rows(&self) -> usize {
        self.memtable.read().len()
    }

    /// Number of immutable files
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Write `rows` to the series `measurement` + `tags`
    ///
    /// The series is created on first write. New columns widen the
    /// measurement schema; a column changing type is rejected.
    pub fn write(
        &self,
        measurement: &str,
        tags: &ChunkTags,
        rows: &Chunk,
    ) -> Result<SeriesId, StorageError> {
        let key = series_key(measurement, tags.pairs());
        let (id, schema) = {
            let mut guard = self.catalog.write();
            let catalog = &mut *guard;
            let schema = merge_schema(catalog.schemas.get(measurement), rows.schema())?;
            catalog
                .schemas
                .insert(measurement.to_string(), schema.clone());

            let known = self
                .index
                .get_id(&key)
                .or_else(|| catalog.keys.get(&key).copied());
            let id = match known {
                Some(id) => id,
                None => {
                    catalog.next_series += 1;
                    let id = catalog.next_series;
                    catalog.keys.insert(key.clone(), id);
                    catalog.series.insert(
                        id,
                        SeriesMeta {
                            measurement: measurement.to_string(),
                            key: key.clone(),
                            tags: tags.clone(),
                        },
                    );
                    tracing::debug!(shard = self.id, series = id, measurement, "Series created");
                    id
                }
            };
            (id, schema)
        };
        self.index.insert(key, id);
        self.memtable.write().insert(id, rows, &schema)?;
        Ok(id)
    }

    /// Move the mutable table into one immutable file per measurement
    pub fn flush(&self) -> Vec<FileRef> {
        let catalog = self.catalog.read();
        let mut files = self.files.write();
        let taken = self.memtable.write().take();
        if taken.is_empty() {
            return Vec::new();
        }

        let mut by_measurement: BTreeMap<&str, Vec<(SeriesId, Chunk)>> = BTreeMap::new();
        for (id, rows) in taken {
            if let Some(meta) = catalog.series.get(&id) {
                by_measurement
                    .entry(meta.measurement.as_str())
                    .or_default()
                    .push((id, rows));
            }
        }

        let mut created = Vec::with_capacity(by_measurement.len());
        for (measurement, series) in by_measurement {
            let seq = self.next_file.fetch_add(1, Ordering::Relaxed);
            let path = format!("shard-{}/{}-{:06}", self.id, measurement, seq);
            let file = MemoryFile::new(path, measurement, series);
            tracing::debug!(
                shard = self.id,
                file = file.path(),
                series = file.series_count(),
                min_time = file.min_time(),
                max_time = file.max_time(),
                "Memtable flushed"
            );
            let file = FileRef::new(Arc::new(file));
            files.push(file.clone());
            created.push(file);
        }
        created
    }
}

/// Files of `measurement`: ascending by min time or descending by max time
fn ordered_files(files: &[FileRef], measurement: &str, ascending: bool) -> Vec<FileRef> {
    let mut out: Vec<FileRef> = files
        .iter()
        .filter(|f| f.measurement() == measurement)
        .cloned()
        .collect();
    if ascending {
        out.sort_by_key(|f| f.min_time());
    } else {
        out.sort_by_key(|f| std::cmp::Reverse(f.max_time()));
    }
    out
}

/// Split ordered `files` into runs of mutually non-overlapping files
///
/// Each run stays ordered in the query direction, so one file loop cursor
/// can walk it without merging.
fn file_runs(files: Vec<FileRef>, ascending: bool) -> Vec<Vec<FileRef>> {
    let mut runs: Vec<Vec<FileRef>> = Vec::new();
    for file in files {
        let slot = runs.iter_mut().find(|run| {
            run.last().map_or(true, |last| {
                if ascending {
                    last.max_time() < file.min_time()
                } else {
                    last.min_time() > file.max_time()
                }
            })
        });
        match slot {
            Some(run) => run.push(file),
            None => runs.push(vec![file]),
        }
    }
    runs
}

impl ShardReader for MemoryShard {
    fn create_cursors(
        &self,
        schema: &QuerySchema,
        ctx: &CursorContext,
    ) -> Result<Vec<Box<dyn KeyCursor>>, QueryError> {
        let options = schema.options();
        let measurement = options.name.as_str();
        let source = schema.source();
        let range = TimeRange::new_unchecked(options.start_time, options.end_time);

        let catalog = self.catalog.read();
        let Some(stored) = catalog.schemas.get(measurement) else {
            return Ok(Vec::new());
        };
        for field in source.fields() {
            if let Some(i) = stored.index_of(&field.name) {
                let stored_type = stored.fields()[i].data_type;
                if stored_type != field.data_type {
                    return Err(QueryError::validation(format!(
                        "field '{}' is {}, query reads it as {}",
                        field.name, stored_type, field.data_type
                    )));
                }
            }
        }

        // series -> grouping key
        let selected: Vec<(SeriesId, &SeriesMeta)> = catalog
            .series
            .iter()
            .filter(|(_, meta)| meta.measurement == measurement)
            .filter(|(_, meta)| {
                options
                    .condition
                    .as_ref()
                    .map_or(true, |c| c.matches_tags(&meta.tags))
            })
            .map(|(id, meta)| (*id, meta))
            .collect();
        let mut tag_keys: Vec<String> = selected
            .iter()
            .flat_map(|(_, meta)| meta.tags.pairs().iter().map(|(k, _)| k.clone()))
            .collect();
        tag_keys.sort();
        tag_keys.dedup();
        let dimensions = options.effective_dimensions(&tag_keys);

        let mut groups: BTreeMap<String, (ChunkTags, Vec<(SeriesId, &SeriesMeta)>)> =
            BTreeMap::new();
        for (id, meta) in selected {
            let group = meta.tags.subset(&dimensions);
            groups
                .entry(group.key())
                .or_insert_with(|| (group, Vec::new()))
                .1
                .push((id, meta));
        }
        let total_groups = groups.len();
        let take = if options.slimit > 0 { options.slimit } else { usize::MAX };
        let groups: Vec<_> = groups
            .into_values()
            .skip(options.soffset)
            .take(take)
            .collect();

        let files = self.files.read();
        let runs = file_runs(
            ordered_files(&files, measurement, options.ascending)
                .into_iter()
                .filter(|f| f.overlaps(&range))
                .collect(),
            options.ascending,
        );
        let memtable = self.memtable.read();

        let aggregate_here = ctx.with_aggregation && schema.has_calls();

        let mut series_count = 0usize;
        let mut built: Vec<(ChunkTags, Vec<Box<dyn KeyCursor>>)> = Vec::with_capacity(groups.len());
        for (group, members) in groups {
            let mut children: Vec<Box<dyn KeyCursor>> = Vec::with_capacity(members.len());
            for (id, meta) in members {
                let info = SeriesInfo {
                    id,
                    key: meta.key.clone(),
                    tags: meta.tags.clone(),
                };
                let mut leaves: Vec<Box<dyn KeyCursor>> = Vec::new();
                for run in &runs {
                    let run_files: Vec<FileRef> = run
                        .iter()
                        .filter(|f| f.contains_series(id))
                        .cloned()
                        .collect();
                    if !run_files.is_empty() {
                        leaves.push(Box::new(FileLoopCursor::new(
                            run_files,
                            info.clone(),
                            source.clone(),
                            options.clone(),
                        )));
                    }
                }
                if let Some(snapshot) = memtable.read_series(id, &range, source)? {
                    leaves.push(Box::new(SeriesCursor::new(
                        snapshot,
                        info.clone(),
                        options.clone(),
                    )));
                }
                if leaves.is_empty() {
                    continue;
                }

                children.push(Box::new(TagSetCursor::new(
                    leaves,
                    info,
                    group.clone(),
                    source.clone(),
                    options.clone(),
                    !schema.has_calls(),
                )));
                series_count += 1;
            }
            if !children.is_empty() {
                built.push((group, children));
            }
        }

        let partitions = ctx.partitions.max(1);
        let per_partition = built.len().div_ceil(partitions).max(1);
        let mut cursors: Vec<Box<dyn KeyCursor>> = Vec::with_capacity(partitions);
        let mut built = built.into_iter().peekable();
        while built.peek().is_some() {
            let part: Vec<_> = built.by_ref().take(per_partition).collect();
            let merged = Box::new(GroupCursor::new(part, source.clone(), options.clone()));
            // reducers see every series of a group merged into one stream
            if aggregate_here {
                cursors.push(Box::new(AggregateCursor::new(merged, schema)?));
            } else {
                cursors.push(merged);
            }
        }

        tracing::debug!(
            shard = self.id,
            measurement,
            series = series_count,
            groups = total_groups,
            file_runs = runs.len(),
            partitions = cursors.len(),
            aggregate = aggregate_here,
            "Cursors created"
        );
        Ok(cursors)
    }

    fn files_ref(&self, measurement: &str, ascending: bool) -> Vec<FileRef> {
        ordered_files(&self.files.read(), measurement, ascending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::aggregate::{AggregateCall, CallKind};
    use crate::query::condition::{CompareOp, Condition};
    use crate::query::options::{Interval, ProcessorOptions};
    use crate::query::schema::{DataType, Value, ValueRef};

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

    fn shard() -> MemoryShard {
        MemoryShard::new(7, &StorageConfig::default())
    }

    fn drain(cursor: &mut Box<dyn KeyCursor>) -> Vec<Chunk> {
        let mut out = Vec::new();
        while let Some((chunk, _)) = cursor.next_chunk().unwrap() {
            chunk.validate().unwrap();
            out.push(chunk);
        }
        out
    }

    #[test]
    fn test_memtable_keeps_time_order() {
        let mut table = MemTable::new();
        table.insert(1, &rows(&[5, 9]), &usage()).unwrap();
        table.insert(1, &rows(&[1, 9, 7]), &usage()).unwrap();
        assert_eq!(table.len(), 5);
        let all = table
            .read_series(1, &TimeRange::unbounded(), &usage())
            .unwrap()
            .unwrap();
        assert_eq!(all.time(), &[1, 5, 7, 9, 9]);
        let part = table
            .read_series(1, &TimeRange::new_unchecked(5, 9), &usage())
            .unwrap()
            .unwrap();
        assert_eq!(part.time(), &[5, 7]);
        assert!(table.read_series(2, &TimeRange::unbounded(), &usage()).unwrap().is_none());
        assert_eq!(table.take().len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_projection_fills_missing_columns() {
        let file = MemoryFile::new("f", "cpu", vec![(1, rows(&[1, 2]))]);
        let wide = RowDataType::shared(vec![
            Field::new("idle", DataType::Integer),
            Field::new("usage", DataType::Float),
        ]);
        let chunk = file
            .read_series(1, &TimeRange::unbounded(), &wide)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.column(0).nil_count(), 2);
        assert_eq!(chunk.column(1).value(1), Some(ValueRef::Float(2.0)));

        let wrong = RowDataType::shared(vec![Field::new("usage", DataType::Integer)]);
        assert!(matches!(
            file.read_series(1, &TimeRange::unbounded(), &wrong),
            Err(StorageError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_write_rejects_type_change() {
        let shard = shard();
        shard.write("cpu", &ChunkTags::parse("host=a"), &rows(&[1])).unwrap();
        let mut ints = Chunk::new(
            "cpu",
            RowDataType::shared(vec![Field::new("usage", DataType::Integer)]),
        );
        ints.append_row(2, &[Some(ValueRef::Integer(2))]);
        let err = shard.write("cpu", &ChunkTags::parse("host=a"), &ints).unwrap_err();
        assert!(matches!(err, StorageError::SchemaMismatch(_)));
    }

    #[test]
    fn test_series_ids_are_stable() {
        let shard = shard();
        let a = shard.write("cpu", &ChunkTags::parse("host=a"), &rows(&[1])).unwrap();
        let b = shard.write("cpu", &ChunkTags::parse("host=b"), &rows(&[1])).unwrap();
        let again = shard.write("cpu", &ChunkTags::parse("host=a"), &rows(&[2])).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, again);
        assert!(shard.index().stats().requests >= 3);
    }

    #[test]
    fn test_flush_and_file_order() {
        let shard = shard();
        shard.write("cpu", &ChunkTags::parse("host=a"), &rows(&[10, 20])).unwrap();
        assert_eq!(shard.flush().len(), 1);
        shard.write("cpu", &ChunkTags::parse("host=a"), &rows(&[1, 30])).unwrap();
        shard.flush();
        assert!(shard.flush().is_empty());
        assert_eq!(shard.memtable_rows(), 0);

        let asc = shard.files_ref("cpu", true);
        assert_eq!(asc.iter().map(|f| f.min_time()).collect::<Vec<_>>(), vec![1, 10]);
        let desc = shard.files_ref("cpu", false);
        assert_eq!(desc.iter().map(|f| f.max_time()).collect::<Vec<_>>(), vec![30, 20]);
        assert!(shard.files_ref("mem", true).is_empty());
    }

    #[test]
    fn test_file_runs_do_not_overlap() {
        let f = |name: &str, t: &[i64]| {
            FileRef::new(Arc::new(MemoryFile::new(name, "cpu", vec![(1, rows(t))])))
        };
        let runs = file_runs(vec![f("a", &[1, 5]), f("b", &[3, 4]), f("c", &[6, 8])], true);
        let names: Vec<Vec<&str>> = runs
            .iter()
            .map(|run| run.iter().map(|f| f.path()).collect())
            .collect();
        assert_eq!(names, vec![vec!["a", "c"], vec!["b"]]);
    }

    #[test]
    fn test_cursors_merge_files_and_memtable() {
        let shard = shard();
        let tags = ChunkTags::parse("host=a,region=eu");
        shard.write("cpu", &tags, &rows(&[1, 5])).unwrap();
        shard.flush();
        shard.write("cpu", &tags, &rows(&[3, 4])).unwrap();
        shard.flush();
        shard.write("cpu", &tags, &rows(&[2, 6])).unwrap();

        let schema = QuerySchema::raw(ProcessorOptions::new("cpu"), usage()).unwrap();
        let mut cursors = shard.create_cursors(&schema, &CursorContext::default()).unwrap();
        assert_eq!(cursors.len(), 1);
        let times: Vec<i64> = drain(&mut cursors[0])
            .iter()
            .flat_map(|c| c.time().to_vec())
            .collect();
        assert_eq!(times, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_cursors_group_and_partition() {
        let shard = shard();
        for (host, region) in [("a", "eu"), ("b", "eu"), ("c", "us"), ("d", "ap")] {
            let tags = ChunkTags::parse(&format!("host={},region={}", host, region));
            shard.write("cpu", &tags, &rows(&[1, 2])).unwrap();
        }
        let options = ProcessorOptions::new("cpu").with_dimensions(["region"]);
        let schema = QuerySchema::raw(options, usage()).unwrap();
        let ctx = CursorContext {
            partitions: 2,
            with_aggregation: true,
        };
        let mut cursors = shard.create_cursors(&schema, &ctx).unwrap();
        assert_eq!(cursors.len(), 2);

        let mut groups = Vec::new();
        for cursor in &mut cursors {
            for chunk in drain(cursor) {
                for (tags, range) in chunk.tag_spans() {
                    groups.push((tags.key(), range.len()));
                }
            }
        }
        assert_eq!(
            groups,
            vec![
                ("region=ap".to_string(), 2),
                ("region=eu".to_string(), 4),
                ("region=us".to_string(), 2)
            ]
        );
    }

    #[test]
    fn test_cursors_tag_filter_and_slimit() {
        let shard = shard();
        for host in ["a", "b", "c"] {
            shard
                .write("cpu", &ChunkTags::parse(&format!("host={}", host)), &rows(&[1]))
                .unwrap();
        }
        let options = ProcessorOptions::new("cpu")
            .with_group_by_all_dims(true)
            .with_condition(Condition::tag("host", CompareOp::NotEq, "a"))
            .with_slimit(1, 1);
        let schema = QuerySchema::raw(options, usage()).unwrap();
        let mut cursors = shard.create_cursors(&schema, &CursorContext::default()).unwrap();
        let chunks = drain(&mut cursors[0]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].tags(), &[ChunkTags::parse("host=c")]);
    }

    #[test]
    fn test_cursors_aggregate_per_window() {
        let shard = shard();
        shard.write("cpu", &ChunkTags::parse("host=a"), &rows(&[0, 1, 6])).unwrap();
        let options = ProcessorOptions::new("cpu").with_interval(Interval::from_nanos(5, 0));
        let schema = QuerySchema::aggregate(
            options,
            usage(),
            vec![AggregateCall::new(CallKind::Sum, "usage")],
            Vec::new(),
        )
        .unwrap();
        let mut cursors = shard.create_cursors(&schema, &CursorContext::default()).unwrap();
        assert_eq!(cursors[0].schema().as_ref(), schema.output().as_ref());
        let values: Vec<Option<Value>> = drain(&mut cursors[0])
            .iter()
            .flat_map(|c| {
                (0..c.len())
                    .map(|row| c.column(0).value(row).map(|v| v.to_owned_value()))
                    .collect::<Vec<_>>()
            })
            .collect();
        assert_eq!(values, vec![Some(Value::Float(1.0)), Some(Value::Float(6.0))]);
    }

    #[test]
    fn test_cursors_aggregate_whole_group() {
        let shard = shard();
        for host in ["a", "b", "c"] {
            shard
                .write("cpu", &ChunkTags::parse(&format!("host={}", host)), &rows(&[0, 1, 6]))
                .unwrap();
        }
        let options = ProcessorOptions::new("cpu").with_interval(Interval::from_nanos(5, 0));
        let schema = QuerySchema::aggregate(
            options,
            usage(),
            vec![AggregateCall::new(CallKind::Count, "usage")],
            Vec::new(),
        )
        .unwrap();
        let mut cursors = shard.create_cursors(&schema, &CursorContext::default()).unwrap();
        assert_eq!(cursors.len(), 1);
        let chunks = drain(&mut cursors[0]);
        let counts: Vec<Option<Value>> = chunks
            .iter()
            .flat_map(|c| {
                (0..c.len())
                    .map(|row| c.column(0).value(row).map(|v| v.to_owned_value()))
                    .collect::<Vec<_>>()
            })
            .collect();
        // one row per window for the single group, not one per host
        assert_eq!(counts, vec![Some(Value::Integer(6)), Some(Value::Integer(3))]);
        assert_eq!(chunks[0].tags(), &[ChunkTags::default()]);
    }

    #[test]
    fn test_unknown_measurement_has_no_cursor() {
        let schema = QuerySchema::raw(ProcessorOptions::new("disk"), usage()).unwrap();
        assert!(shard()
            .create_cursors(&schema, &CursorContext::default())
            .unwrap()
            .is_empty());
    }
}
