use crate::error::SearchError;
use serde::{Deserialize, Serialize};

pub type DocId = u32;

/// A movie record. Immutable once loaded; the docmap is its system of record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub title: String,
    pub description: String,
}

impl Document {
    /// Text that gets tokenized into the inverted index.
    pub fn indexed_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// A corpus entry as it appears on disk, before the id has been validated.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDocument {
    pub id: Option<DocId>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

impl TryFrom<RawDocument> for Document {
    type Error = SearchError;

    fn try_from(raw: RawDocument) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .ok_or_else(|| SearchError::Configuration(format!("document '{}' has no id", raw.title)))?;
        Ok(Document { id, title: raw.title, description: raw.description })
    }
}

impl From<Document> for RawDocument {
    fn from(doc: Document) -> Self {
        RawDocument { id: Some(doc.id), title: doc.title, description: doc.description }
    }
}
