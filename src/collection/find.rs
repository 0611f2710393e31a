//! Lazy query results
//!
//! A `Find` is a reusable description of a query over one collection. Every
//! call to [`Find::iter`] takes a fresh snapshot of candidate ids from the
//! index; documents are then read and decrypted one per step, each step
//! under its own read lock. A document deleted after the snapshot is
//! skipped; one updated after it is returned in its newest state.

use std::sync::Arc;

use crate::error::{Result, SealError};

use super::collection::Collection;
use super::document::Document;
use super::query::{Query, ScanOrder};

/// Arbitrary document predicate for [`find_by`](crate::Database::find_by)
pub type DocumentPredicate = Arc<dyn Fn(&Document) -> bool + Send + Sync>;

/// Restartable, lazily evaluated query result
pub struct Find {
    collection: Arc<Collection>,
    query: Query,
    predicate: Option<DocumentPredicate>,
}

impl Find {
    pub(crate) fn new(collection: Arc<Collection>, query: Query) -> Self {
        Self {
            collection,
            query,
            predicate: None,
        }
    }

    pub(crate) fn with_predicate(
        collection: Arc<Collection>,
        query: Query,
        predicate: DocumentPredicate,
    ) -> Self {
        Self {
            collection,
            query,
            predicate: Some(predicate),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Start a pass over the current contents of the collection
    pub fn iter(&self) -> FindIter<'_> {
        match self.snapshot() {
            Ok(ids) => FindIter {
                find: self,
                candidates: ids.into_iter(),
                pending: None,
                skipped: 0,
                yielded: 0,
            },
            Err(e) => FindIter {
                find: self,
                candidates: Vec::new().into_iter(),
                pending: Some(e),
                skipped: 0,
                yielded: 0,
            },
        }
    }

    /// Collect one full pass, stopping at the first error
    pub fn to_vec(&self) -> Result<Vec<Document>> {
        self.iter().collect()
    }

    /// Number of matching documents (after skip and limit)
    pub fn count(&self) -> Result<usize> {
        self.iter().try_fold(0, |n, doc| doc.map(|_| n + 1))
    }

    pub fn first(&self) -> Result<Option<Document>> {
        self.iter().next().transpose()
    }

    /// Candidate ids in yield order
    fn snapshot(&self) -> Result<Vec<String>> {
        let state = self.collection.read_state()?;
        let candidates = state.index.range(self.query.id_range());

        let ids = match self.query.order {
            ScanOrder::Insertion => {
                let mut by_sequence: Vec<(u64, String)> = candidates
                    .map(|(id, loc)| (loc.sequence, id.clone()))
                    .collect();
                by_sequence.sort_unstable_by_key(|(sequence, _)| *sequence);
                by_sequence.into_iter().map(|(_, id)| id).collect()
            }
            ScanOrder::IdAscending => candidates.map(|(id, _)| id.clone()).collect(),
            ScanOrder::IdDescending => {
                let mut ids: Vec<String> = candidates.map(|(id, _)| id.clone()).collect();
                ids.reverse();
                ids
            }
        };
        Ok(ids)
    }

    fn matches(&self, document: &Document) -> bool {
        self.query.filter.matches(&document.fields)
            && self.predicate.as_ref().map_or(true, |p| p(document))
    }
}

impl std::fmt::Debug for Find {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Find")
            .field("collection", &self.collection.name())
            .field("query", &self.query)
            .field("custom_predicate", &self.predicate.is_some())
            .finish()
    }
}

impl<'a> IntoIterator for &'a Find {
    type Item = Result<Document>;
    type IntoIter = FindIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass over a [`Find`]
pub struct FindIter<'a> {
    find: &'a Find,
    candidates: std::vec::IntoIter<String>,
    pending: Option<SealError>,
    skipped: usize,
    yielded: usize,
}

impl FindIter<'_> {
    fn fail(&mut self, error: SealError) -> Option<Result<Document>> {
        self.candidates = Vec::new().into_iter();
        Some(Err(error))
    }
}

impl Iterator for FindIter<'_> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.pending.take() {
            return Some(Err(error));
        }
        let find = self.find;

        loop {
            if let Some(limit) = find.query.limit {
                if self.yielded >= limit {
                    return None;
                }
            }

            let id = self.candidates.next()?;
            let record = {
                let state = match find.collection.read_state() {
                    Ok(state) => state,
                    Err(e) => return self.fail(e),
                };
                let location = match state.index.get(&id) {
                    Some(location) => *location,
                    // Deleted since the snapshot
                    None => continue,
                };
                match state.store.read_record(&location) {
                    Ok(record) => record,
                    Err(e) => return self.fail(e),
                }
            };

            let document = match find.collection.decode_document(&id, record) {
                Ok(document) => document,
                Err(e) => return self.fail(e),
            };

            if !find.matches(&document) {
                continue;
            }
            if self.skipped < find.query.skip {
                self.skipped += 1;
                continue;
            }

            self.yielded += 1;
            return Some(Ok(document));
        }
    }
}
