//! Keyword-based document type classification.

use tracing::debug;

use crate::config::RuleSet;
use crate::schema::DocumentType;

/// Lower-cased keyword tables in priority order.
#[derive(Debug, Clone)]
pub struct Classifier {
    classes: Vec<(DocumentType, Vec<String>)>,
}

impl Classifier {
    pub fn new(rules: &RuleSet) -> Self {
        let classes = rules
            .classes
            .iter()
            .map(|c| {
                let keywords = c
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                (c.document_type, keywords)
            })
            .collect();
        Self { classes }
    }

    /// First class (in table order) with any keyword contained in the text wins.
    pub fn classify(&self, text: &str) -> DocumentType {
        if text.trim().is_empty() {
            return DocumentType::Unknown;
        }

        let lower = text.to_lowercase();
        for (doc_type, keywords) in &self.classes {
            if let Some(hit) = keywords.iter().find(|k| lower.contains(k.as_str())) {
                debug!("Classified as {} (keyword '{}')", doc_type, hit);
                return *doc_type;
            }
        }

        DocumentType::Unknown
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&RuleSet::default())
    }
}
