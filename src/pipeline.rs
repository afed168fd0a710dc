//! Document understanding pipeline orchestrator.
//!
//! Runs classification → field extraction → decision → explainability
//! overlay over one document and assembles the [`ResultRecord`]. No stage can
//! abort the run: missing data becomes `Missing` fields or the fallback
//! decision, and a failed overlay becomes an absent artifact.

use anyhow::Result;
use std::path::Path;
use tracing::{debug, info};

use crate::classifier::Classifier;
use crate::config::RuleSet;
use crate::decision;
use crate::extractor::FieldExtractor;
use crate::overlay::Overlay;
use crate::schema::ResultRecord;

/// Raw text for one document plus the original file used for the overlay.
#[derive(Debug, Clone, Copy)]
pub struct RawDocument<'a> {
    pub text: &'a str,
    pub source: Option<&'a Path>,
}

impl<'a> RawDocument<'a> {
    pub fn new(text: &'a str, source: Option<&'a Path>) -> Self {
        Self { text, source }
    }
}

pub struct Pipeline {
    classifier: Classifier,
    extractor: FieldExtractor,
    overlay: Overlay,
}

impl Pipeline {
    pub fn new(rules: &RuleSet, overlay: Overlay) -> Result<Self> {
        Ok(Self {
            classifier: Classifier::new(rules),
            extractor: FieldExtractor::new(rules)?,
            overlay,
        })
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    pub fn run(&self, document: &RawDocument<'_>) -> ResultRecord {
        let document_type = self.classifier.classify(document.text);
        let fields = self.extractor.extract(document_type, document.text);
        let decision = decision::decide(document_type, &fields);

        let explainability = match document.source {
            Some(source) => self.overlay.render(source, &fields),
            None => {
                debug!("No source image, skipping explainability overlay");
                None
            }
        };

        info!(
            "Processed document: type={}, fields={}/{}, decision={} ({:.2})",
            document_type,
            fields.found_count(),
            fields.len(),
            decision.label,
            decision.confidence
        );

        ResultRecord {
            document_type,
            fields,
            decision,
            explainability,
        }
    }
}
