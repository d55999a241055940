//! Word-window text chunker.
//!
//! Splits document text into whitespace-delimited words and emits windows
//! of `chunk_size` words. Each window starts `chunk_size - overlap` words
//! after the previous one, so adjacent chunks share exactly `overlap` words
//! (the last window may be shorter and share more of its tail).
//!
//! # Guarantees
//!
//! - Every chunk except possibly the last holds exactly `chunk_size` words.
//! - Ordinals are contiguous: `0, 1, 2, …, N-1`.
//! - Dropping the first `overlap` words of every chunk after the first and
//!   concatenating reproduces the document's word sequence.
//! - A document with at least one word but fewer than `chunk_size` words
//!   yields exactly one chunk; a document with no words yields none.
//!
//! `overlap < chunk_size` is enforced by [`Config::validate`](crate::config::Config::validate)
//! at start-up.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use repo_chat::chunk::split;
//! use repo_chat::models::{Document, DocumentKind, DocumentMetadata};
//!
//! let doc = Document {
//!     text: "one two three four five".to_string(),
//!     metadata: Arc::new(DocumentMetadata {
//!         path: "a.md".into(),
//!         file_type: "md".into(),
//!         kind: DocumentKind::Doc,
//!         is_implementation: false,
//!     }),
//! };
//! let chunks = split(&doc, 3, 1);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].text, "three four five");
//! ```

use std::sync::Arc;

use crate::models::{Chunk, Document};

/// Split a document into overlapping word windows.
pub fn split(doc: &Document, chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    debug_assert!(overlap < chunk_size, "overlap must be smaller than chunk_size");

    let words: Vec<&str> = doc.text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }

    let stride = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + chunk_size).min(words.len());
        chunks.push(Chunk {
            text: words[start..end].join(" "),
            document: Arc::clone(&doc.metadata),
            ordinal: chunks.len(),
        });
        if end == words.len() {
            break;
        }
        start += stride;
    }

    chunks
}

/// Chunk every document in order; ordinals restart at 0 per document.
pub fn split_all(docs: &[Document], chunk_size: usize, overlap: usize) -> Vec<Chunk> {
    docs.iter()
        .flat_map(|doc| split(doc, chunk_size, overlap))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentKind, DocumentMetadata};

    fn doc(text: &str) -> Document {
        Document {
            text: text.to_string(),
            metadata: Arc::new(DocumentMetadata {
                path: "src/lib.rs".to_string(),
                file_type: "rs".to_string(),
                kind: DocumentKind::Code,
                is_implementation: true,
            }),
        }
    }

    fn numbered(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    /// Rebuild the word sequence by dropping each later chunk's overlap.
    fn reassemble(chunks: &[Chunk], overlap: usize) -> Vec<String> {
        let mut words = Vec::new();
        for (i, c) in chunks.iter().enumerate() {
            let skip = if i == 0 { 0 } else { overlap };
            words.extend(c.text.split_whitespace().skip(skip).map(str::to_string));
        }
        words
    }

    #[test]
    fn test_short_document_single_chunk() {
        let chunks = split(&doc("fn main() { println!(\"hi\"); }"), 400, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].ordinal, 0);
        assert_eq!(chunks[0].text, "fn main() { println!(\"hi\"); }");
    }

    #[test]
    fn test_empty_document_yields_nothing() {
        assert!(split(&doc(""), 10, 2).is_empty());
        assert!(split(&doc("  \n\t  "), 10, 2).is_empty());
    }

    #[test]
    fn test_window_sizes_and_stride() {
        let chunks = split(&doc(&numbered(10)), 4, 1);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(
            texts,
            vec!["w0 w1 w2 w3", "w3 w4 w5 w6", "w6 w7 w8 w9"]
        );
    }

    #[test]
    fn test_last_window_may_be_short() {
        let chunks = split(&doc(&numbered(11)), 4, 1);
        assert_eq!(chunks.len(), 4);
        for c in &chunks[..chunks.len() - 1] {
            assert_eq!(c.text.split_whitespace().count(), 4);
        }
        assert_eq!(chunks.last().unwrap().text, "w9 w10");
    }

    #[test]
    fn test_zero_overlap() {
        let chunks = split(&doc(&numbered(6)), 3, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].text, "w3 w4 w5");
    }

    #[test]
    fn test_reassembly_reproduces_tokens() {
        let text = "alpha  beta\ngamma\tdelta epsilon zeta eta theta iota kappa lambda mu nu";
        let expected: Vec<String> = text.split_whitespace().map(str::to_string).collect();
        for (size, overlap) in [(1, 0), (2, 1), (3, 1), (5, 2), (5, 4), (13, 3), (20, 5)] {
            let chunks = split(&doc(text), size, overlap);
            assert_eq!(reassemble(&chunks, overlap), expected, "size={size} overlap={overlap}");
            for c in &chunks[..chunks.len() - 1] {
                assert_eq!(c.text.split_whitespace().count(), size);
            }
        }
    }

    #[test]
    fn test_ordinals_contiguous() {
        let chunks = split(&doc(&numbered(200)), 10, 3);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.ordinal, i, "Ordinal mismatch at position {}", i);
        }
    }

    #[test]
    fn test_metadata_shared_not_copied() {
        let d = doc(&numbered(30));
        let chunks = split(&d, 10, 2);
        for c in &chunks {
            assert!(Arc::ptr_eq(&c.document, &d.metadata));
        }
    }

    #[test]
    fn test_deterministic() {
        let d = doc(&numbered(57));
        let a = split(&d, 8, 3);
        let b = split(&d, 8, 3);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.ordinal, y.ordinal);
        }
    }

    #[test]
    fn test_split_all_restarts_ordinals() {
        let docs = vec![doc(&numbered(5)), doc(&numbered(5))];
        let chunks = split_all(&docs, 3, 1);
        let ordinals: Vec<usize> = chunks.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 0, 1]);
    }
}
