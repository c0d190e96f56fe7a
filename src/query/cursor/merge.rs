//! K-way time merge over child cursors
//!
//! Rows come out in time order (ascending or descending). Equal timestamps
//! from different children are all kept, the child with the lower index
//! first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::KeyCursor;
use crate::query::chunk::Chunk;
use crate::query::error::QueryError;

#[derive(Debug, PartialEq, Eq)]
struct Head {
    time: i64,
    child: usize,
    ascending: bool,
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest element
        let by_time = if self.ascending {
            other.time.cmp(&self.time)
        } else {
            self.time.cmp(&other.time)
        };
        by_time.then_with(|| other.child.cmp(&self.child))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub(crate) struct Merger {
    children: Vec<Box<dyn KeyCursor>>,
    /// Current chunk and next row of every child
    buffers: Vec<Option<(Chunk, usize)>>,
    heap: BinaryHeap<Head>,
    ascending: bool,
    started: bool,
}

impl Merger {
    pub(crate) fn new(children: Vec<Box<dyn KeyCursor>>, ascending: bool) -> Self {
        let buffers = children.iter().map(|_| None).collect();
        Self {
            children,
            buffers,
            heap: BinaryHeap::new(),
            ascending,
            started: false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }

    /// Children with a buffered row
    pub(crate) fn pending(&self) -> usize {
        self.heap.len()
    }

    /// Pull the next non-empty chunk of `child` and queue its first row
    fn refill(&mut self, child: usize) -> Result<(), QueryError> {
        self.buffers[child] = None;
        while let Some((chunk, _)) = self.children[child].next_chunk()? {
            if chunk.is_empty() {
                continue;
            }
            self.heap.push(Head {
                time: chunk.time()[0],
                child,
                ascending: self.ascending,
            });
            self.buffers[child] = Some((chunk, 0));
            break;
        }
        Ok(())
    }

    /// Hand the next row in time order to `f`; false once every child is
    /// drained
    pub(crate) fn pop_into(
        &mut self,
        mut f: impl FnMut(&Chunk, usize),
    ) -> Result<bool, QueryError> {
        if !self.started {
            self.started = true;
            for child in 0..self.children.len() {
                self.refill(child)?;
            }
        }
        let Some(head) = self.heap.pop() else {
            return Ok(false);
        };

        let child = head.child;
        let next = match self.buffers[child].as_mut() {
            Some((chunk, row)) => {
                f(chunk, *row);
                *row += 1;
                (*row < chunk.len()).then(|| chunk.time()[*row])
            }
            None => return Err(QueryError::internal("merge head without a buffered chunk")),
        };
        match next {
            Some(time) => self.heap.push(Head {
                time,
                child,
                ascending: self.ascending,
            }),
            None => self.refill(child)?,
        }
        Ok(true)
    }

    pub(crate) fn close(&mut self) {
        for child in &mut self.children {
            child.close();
        }
        self.buffers.iter_mut().for_each(|b| *b = None);
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::cursor::{CursorItem, CursorState};
    use crate::query::schema::{DataType, Field, RowDataType, ValueRef};
    use std::sync::Arc;

    /// Cursor replaying fixed chunks
    struct Replay {
        schema: Arc<RowDataType>,
        chunks: Vec<Chunk>,
        state: CursorState,
    }

    impl KeyCursor for Replay {
        fn name(&self) -> &'static str {
            "replay"
        }
        fn schema(&self) -> &Arc<RowDataType> {
            &self.schema
        }
        fn next_chunk(&mut self) -> Result<Option<CursorItem>, QueryError> {
            self.state.begin_next("replay")?;
            Ok((!self.chunks.is_empty()).then(|| (self.chunks.remove(0), None)))
        }
        fn close(&mut self) {
            self.state.close();
        }
        fn state(&self) -> &CursorState {
            &self.state
        }
    }

    fn replay(parts: &[&[i64]], tag: i64) -> Box<dyn KeyCursor> {
        let schema = RowDataType::shared(vec![Field::new("v", DataType::Integer)]);
        let chunks = parts
            .iter()
            .map(|times| {
                let mut c = Chunk::new("m", schema.clone());
                for t in times.iter() {
                    c.append_row(*t, &[Some(ValueRef::Integer(tag))]);
                }
                c
            })
            .collect();
        Box::new(Replay {
            schema,
            chunks,
            state: CursorState::new(),
        })
    }

    fn drain(merger: &mut Merger) -> Vec<(i64, i64)> {
        let mut out = Vec::new();
        while merger
            .pop_into(|c, row| {
                let tag = match c.column(0).value(row) {
                    Some(ValueRef::Integer(v)) => v,
                    _ => -1,
                };
                out.push((c.time()[row], tag));
            })
            .unwrap()
        {}
        out
    }

    #[test]
    fn test_ascending_merge_keeps_duplicates() {
        let mut merger = Merger::new(
            vec![replay(&[&[1, 4], &[], &[6]], 0), replay(&[&[2, 4, 5]], 1)],
            true,
        );
        assert_eq!(
            drain(&mut merger),
            vec![(1, 0), (2, 1), (4, 0), (4, 1), (5, 1), (6, 0)]
        );
        assert_eq!(merger.pending(), 0);
    }

    #[test]
    fn test_descending_merge() {
        let mut merger = Merger::new(vec![replay(&[&[9, 3]], 0), replay(&[&[7, 3, 1]], 1)], false);
        assert_eq!(
            drain(&mut merger),
            vec![(9, 0), (7, 1), (3, 0), (3, 1), (1, 1)]
        );
        merger.close();
        assert_eq!(merger.len(), 2);
    }
}
