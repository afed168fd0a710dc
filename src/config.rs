//! Runtime configuration and rule tables.
//!
//! `AppConfig` is read from the environment (after `.env` is loaded).
//! `RuleSet` holds the classifier keyword tables and the skill vocabulary;
//! the built-in tables can be replaced by a JSON file via `RULES_PATH`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::schema::DocumentType;

/// Settings for the Tesseract CLI used by the OCR text source.
#[derive(Debug, Clone)]
pub struct TesseractConfig {
    pub command: PathBuf,
    pub language: String,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            command: PathBuf::from("tesseract"),
            language: "eng".to_string(),
        }
    }
}

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub output_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub tesseract: TesseractConfig,
    pub overlay_font: Option<PathBuf>,
    /// PDFium library file; unset searches the system library paths.
    pub pdfium_library: Option<PathBuf>,
    pub rules_path: Option<PathBuf>,
    pub max_upload_bytes: usize,
    /// How long explainability images are kept; `None` keeps them forever.
    pub artifact_ttl: Option<Duration>,
}

impl AppConfig {
    /// Build the config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        let max_upload_mb: usize = match env::var("MAX_UPLOAD_MB") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("MAX_UPLOAD_MB is not a number: {:?}", v))?,
            Err(_) => 25,
        };

        let artifact_ttl_hours: u64 = match env::var("ARTIFACT_TTL_HOURS") {
            Ok(v) => v
                .parse()
                .with_context(|| format!("ARTIFACT_TTL_HOURS is not a number: {:?}", v))?,
            Err(_) => 24,
        };

        let defaults = TesseractConfig::default();
        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
            output_dir: env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("outputs")),
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
            tesseract: TesseractConfig {
                command: env::var("TESSERACT_CMD")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.command),
                language: env::var("TESSERACT_LANG").unwrap_or(defaults.language),
            },
            overlay_font: env::var("OVERLAY_FONT").ok().map(PathBuf::from),
            pdfium_library: env::var("PDFIUM_DYNAMIC_LIB_PATH").ok().map(PathBuf::from),
            rules_path: env::var("RULES_PATH").ok().map(PathBuf::from),
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            artifact_ttl: (artifact_ttl_hours > 0)
                .then(|| Duration::from_secs(artifact_ttl_hours.saturating_mul(3600))),
        })
    }

    /// Load the rule tables from `rules_path`, or the built-in tables.
    pub fn rules(&self) -> Result<RuleSet> {
        match &self.rules_path {
            Some(path) => RuleSet::load(path),
            None => Ok(RuleSet::default()),
        }
    }
}

/// Keywords that vote for one document type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassRule {
    pub document_type: DocumentType,
    pub keywords: Vec<String>,
}

/// Classification priority. Rule files may drop classes but never reorder them.
const CLASS_PRIORITY: [DocumentType; 3] =
    [DocumentType::Invoice, DocumentType::Resume, DocumentType::Report];

/// Ordered classification tables plus the resume skill vocabulary.
///
/// `classes` is evaluated top to bottom; the first class with a keyword hit wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub classes: Vec<ClassRule>,
    #[serde(default = "default_skills")]
    pub skills: Vec<String>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            classes: vec![
                class_rule(
                    DocumentType::Invoice,
                    &["invoice", "amount", "bill", "gst", "total due", "billed to", "tax"],
                ),
                class_rule(
                    DocumentType::Resume,
                    &[
                        "resume",
                        "curriculum vitae",
                        "experience",
                        "education",
                        "skills",
                        "objective",
                    ],
                ),
                class_rule(
                    DocumentType::Report,
                    &[
                        "report",
                        "summary",
                        "findings",
                        "analysis",
                        "project report",
                        "conclusion",
                    ],
                ),
            ],
            skills: default_skills(),
        }
    }
}

impl RuleSet {
    /// Load and validate rule tables from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rules: {:?}", path))?;

        let rules: RuleSet = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse rules: {:?}", path))?;

        rules.validate()?;
        info!(
            "Loaded rules from {:?}: {} classes, {} skills",
            path,
            rules.classes.len(),
            rules.skills.len()
        );
        Ok(rules)
    }

    fn validate(&self) -> Result<()> {
        let mut previous: Option<usize> = None;
        for class in &self.classes {
            let Some(rank) = CLASS_PRIORITY
                .iter()
                .position(|t| *t == class.document_type)
            else {
                anyhow::bail!("'unknown' is the fallback type and cannot have keywords");
            };
            if previous.is_some_and(|p| rank <= p) {
                anyhow::bail!(
                    "Class '{}' is duplicated or out of order; classes must follow invoice, resume, report",
                    class.document_type
                );
            }
            previous = Some(rank);

            if class.keywords.iter().all(|k| k.trim().is_empty()) {
                anyhow::bail!("Class '{}' has no keywords", class.document_type);
            }
        }
        if self.skills.iter().any(|s| s.trim().is_empty()) {
            anyhow::bail!("Skill vocabulary contains an empty entry");
        }
        Ok(())
    }
}

fn class_rule(document_type: DocumentType, keywords: &[&str]) -> ClassRule {
    ClassRule {
        document_type,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

fn default_skills() -> Vec<String> {
    [
        "Python",
        "Java",
        "C++",
        "AI",
        "Machine Learning",
        "Deep Learning",
        "Data Science",
        "NLP",
        "TensorFlow",
        "PyTorch",
        "SQL",
        "Flask",
        "Django",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_rules_priority_order() {
        let rules = RuleSet::default();
        let order: Vec<DocumentType> = rules.classes.iter().map(|c| c.document_type).collect();
        assert_eq!(order, CLASS_PRIORITY.to_vec());
        assert!(rules.validate().is_ok());
        assert_eq!(rules.skills.first().map(String::as_str), Some("Python"));
    }

    #[test]
    fn test_load_rules_from_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"classes": [{{"document_type": "report", "keywords": ["minutes"]}}]}}"#
        )
        .unwrap();

        let rules = RuleSet::load(file.path()).unwrap();
        assert_eq!(rules.classes.len(), 1);
        assert_eq!(rules.classes[0].keywords, vec!["minutes"]);
        // skills fall back to the built-in vocabulary
        assert_eq!(rules.skills, default_skills());
    }

    #[test]
    fn test_rules_reject_unknown_class() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"classes": [{{"document_type": "unknown", "keywords": ["x"]}}]}}"#
        )
        .unwrap();

        assert!(RuleSet::load(file.path()).is_err());
    }

    #[test]
    fn test_rules_reject_reordered_classes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"classes": [
                {{"document_type": "report", "keywords": ["summary"]}},
                {{"document_type": "invoice", "keywords": ["invoice"]}}
            ]}}"#
        )
        .unwrap();

        let err = RuleSet::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("out of order"));
    }

    #[test]
    fn test_rules_reject_duplicate_class() {
        let mut rules = RuleSet::default();
        rules.classes.push(class_rule(DocumentType::Invoice, &["bill"]));
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_rules_missing_file() {
        assert!(RuleSet::load(Path::new("/nonexistent/rules.json")).is_err());
    }
}
