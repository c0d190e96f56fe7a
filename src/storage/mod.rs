//! Storage collaborators
//!
//! The execution core reads through two seams:
//!
//! - [`ShardReader`]: builds the cursor tree of a query and hands out
//!   reference-counted handles to its immutable files.
//! - [`TableFile`]: one immutable, time-sorted data file.
//!
//! [`memory::MemoryShard`] is the in-process implementation used by the
//! executor tests; [`reader::DiskFileReader`] is the bounds-checked file
//! reader with the runtime mmap toggle.

pub mod memory;
pub mod reader;

pub use memory::{MemTable, MemoryFile, MemoryShard};
pub use reader::DiskFileReader;

use std::fmt;
use std::sync::Arc;

use crate::error::StorageError;
use crate::query::chunk::Chunk;
use crate::query::cursor::KeyCursor;
use crate::query::error::QueryError;
use crate::query::query_schema::QuerySchema;
use crate::query::schema::RowDataType;
use crate::types::{SeriesId, TimeRange};

/// Immutable data file
pub trait TableFile: Send + Sync + fmt::Debug {
    /// File path or name
    fn path(&self) -> &str;

    /// Measurement stored in the file
    fn measurement(&self) -> &str;

    /// Smallest timestamp in the file
    fn min_time(&self) -> i64;

    /// Largest timestamp in the file
    fn max_time(&self) -> i64;

    /// True when the file holds rows of `id`
    fn contains_series(&self, id: SeriesId) -> bool;

    /// Time-sorted rows of `id` inside `range`, projected onto `schema`
    ///
    /// Columns missing from the file read as NULL. `None` when no row
    /// matches.
    fn read_series(
        &self,
        id: SeriesId,
        range: &TimeRange,
        schema: &Arc<RowDataType>,
    ) -> Result<Option<Chunk>, StorageError>;
}

/// Reference-counted handle on a [`TableFile`]
///
/// Cursors hold one per file they may read; the file cannot go away while
/// a handle is alive.
#[derive(Clone)]
pub struct FileRef(Arc<dyn TableFile>);

impl FileRef {
    /// Handle on `file`
    pub fn new(file: Arc<dyn TableFile>) -> Self {
        Self(file)
    }

    /// Live handles on the same file
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// True when the file may hold rows of `range`
    pub fn overlaps(&self, range: &TimeRange) -> bool {
        range.overlaps(self.0.min_time(), self.0.max_time())
    }
}

impl std::ops::Deref for FileRef {
    type Target = dyn TableFile;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRef")
            .field("path", &self.0.path())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// How the caller wants its cursors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorContext {
    /// Number of cursors to split the query into
    pub partitions: usize,
    /// Aggregate inside the cursors; otherwise raw rows are returned
    pub with_aggregation: bool,
}

impl Default for CursorContext {
    fn default() -> Self {
        Self {
            partitions: 1,
            with_aggregation: true,
        }
    }
}

/// Shard-level entry point of the storage collaborator
pub trait ShardReader: Send + Sync {
    /// One cursor per partition of the query, in partition order
    fn create_cursors(
        &self,
        schema: &QuerySchema,
        ctx: &CursorContext,
    ) -> Result<Vec<Box<dyn KeyCursor>>, QueryError>;

    /// Handles on the files of `measurement`, ordered by time in the
    /// requested direction
    fn files_ref(&self, measurement: &str, ascending: bool) -> Vec<FileRef>;
}
