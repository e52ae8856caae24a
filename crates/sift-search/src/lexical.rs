//! In-RAM BM25 index over a corpus snapshot.
//!
//! Rebuilt from the chunk store whenever the corpus changes; searches are
//! pure CPU work against the snapshot. Raw BM25 scores are returned
//! unnormalized — the hybrid merge normalizes each list by its own max.

use std::collections::HashMap;

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{STORED, STRING, Schema, TEXT, Value};
use tantivy::{Index, IndexReader, TantivyDocument, doc};

use sift_core::{Chunk, SearchHit};

use crate::error::Result;

pub struct LexicalIndex {
    index: Index,
    reader: IndexReader,
    id_field: tantivy::schema::Field,
    content_field: tantivy::schema::Field,
    by_id: HashMap<String, Chunk>,
}

impl std::fmt::Debug for LexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LexicalIndex")
            .field("chunks", &self.by_id.len())
            .finish_non_exhaustive()
    }
}

impl LexicalIndex {
    /// Build an index over `chunks`.
    ///
    /// # Errors
    ///
    /// Returns an error if index construction or the commit fails.
    pub fn build(chunks: &[Chunk]) -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer = index.writer(15_000_000)?;
        for chunk in chunks {
            writer.add_document(doc!(
                id_field => chunk.id.as_str(),
                content_field => chunk.content.as_str(),
            ))?;
        }
        writer.commit()?;

        let reader = index.reader()?;
        let by_id = chunks
            .iter()
            .map(|c| (c.id.as_str().to_owned(), c.clone()))
            .collect();

        Ok(Self {
            index,
            reader,
            id_field,
            content_field,
            by_id,
        })
    }

    /// Top-`k` BM25 hits for `query`. Query syntax errors are tolerated;
    /// whatever parses drives the search.
    ///
    /// # Errors
    ///
    /// Returns an error if the search itself fails.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.by_id.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let (parsed, _errors) = parser.parse_query_lenient(query);
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(k))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr)?;
            let Some(id) = doc.get_first(self.id_field).and_then(|v| v.as_str()) else {
                continue;
            };
            if let Some(chunk) = self.by_id.get(id) {
                hits.push(SearchHit {
                    chunk: chunk.clone(),
                    score,
                });
            }
        }
        Ok(hits)
    }

    /// Number of chunks in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
