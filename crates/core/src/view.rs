use crate::document::{Document, DocumentMap, SharedDocuments};
use crate::state::SyncContext;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Documents of a context, ordered by id.
#[must_use]
pub fn project_documents(context: &SyncContext) -> Vec<Document> {
    context
        .documents
        .iter()
        .map(|(id, content)| Document {
            id: id.clone(),
            content: content.clone(),
        })
        .collect()
}

/// Stable 64-bit fingerprint of a document map's ids and contents.
#[must_use]
pub fn documents_fingerprint(documents: &DocumentMap) -> u64 {
    let mut hasher = Sha256::new();
    for (id, content) in documents {
        hasher.update((id.as_str().len() as u64).to_be_bytes());
        hasher.update(id.as_str().as_bytes());
        hasher.update((content.len() as u64).to_be_bytes());
        hasher.update(content.as_bytes());
    }
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Memoized [`project_documents`]: hands back the same `Arc` for as long as
/// the document map is content-equal to the one it was computed from.
#[derive(Debug, Default)]
pub struct DocumentView {
    cached: Option<CachedView>,
}

#[derive(Debug)]
struct CachedView {
    source: SharedDocuments,
    fingerprint: u64,
    documents: Arc<[Document]>,
}

impl DocumentView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&mut self, context: &SyncContext) -> Arc<[Document]> {
        if let Some(cached) = &mut self.cached {
            if Arc::ptr_eq(&cached.source, &context.documents) {
                return cached.documents.clone();
            }
            let fingerprint = documents_fingerprint(&context.documents);
            if fingerprint == cached.fingerprint && *cached.source == *context.documents {
                cached.source = context.documents.clone();
                return cached.documents.clone();
            }
        }

        let documents: Arc<[Document]> = project_documents(context).into();
        self.cached = Some(CachedView {
            source: context.documents.clone(),
            fingerprint: documents_fingerprint(&context.documents),
            documents: documents.clone(),
        });
        documents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentId;
    use pretty_assertions::assert_eq;

    fn context(entries: &[(&str, &str)]) -> SyncContext {
        SyncContext {
            documents: Arc::new(
                entries
                    .iter()
                    .map(|(id, body)| (DocumentId::from(*id), (*body).to_string()))
                    .collect(),
            ),
            ..SyncContext::default()
        }
    }

    #[test]
    fn projection_is_sorted_by_id() {
        let docs = project_documents(&context(&[("b", "2"), ("a", "1")]));
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(docs[0].content, "1");
    }

    #[test]
    fn equal_content_keeps_the_same_allocation() {
        let mut view = DocumentView::new();
        let first = view.documents(&context(&[("a", "1")]));
        let second = view.documents(&context(&[("a", "1")]));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn changed_content_recomputes() {
        let mut view = DocumentView::new();
        let first = view.documents(&context(&[("a", "1")]));
        let second = view.documents(&context(&[("a", "2")]));
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second[0].content, "2");
    }

    #[test]
    fn fingerprint_separates_id_and_content_boundaries() {
        let left = context(&[("ab", "c")]);
        let right = context(&[("a", "bc")]);
        assert_ne!(
            documents_fingerprint(&left.documents),
            documents_fingerprint(&right.documents)
        );
    }
}
