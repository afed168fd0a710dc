//! Type-specific field extraction from OCR text.
//!
//! Pure functions over pre-compiled regex patterns. A pattern that does not
//! match yields `FieldValue::Missing`; nothing here returns an error for
//! absent data.

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

use crate::config::RuleSet;
use crate::schema::{DocumentType, FieldSet, FieldValue};

/// Note stored for documents with no extraction schema.
pub const UNKNOWN_NOTE: &str = "No structured fields found for this document type.";

const INVOICE_NO: &str = r"(?i)\binvoice\s*(?:no\b\.?|number\b|num\b|#)[\s:#.\-]*([A-Z0-9][A-Z0-9\-/]*)";
const TOTAL_AMOUNT: &str = r"(?i)\b(?:grand\s+total|total(?:\s+(?:amount|due|payable))?|amount(?:\s+(?:due|payable))?|balance\s+due)\b[\s:=\-]*(?:[₹$€£]|rs\.?|inr|usd|eur)?\s*([0-9]{1,3}(?:,[0-9]{2,3})+(?:\.[0-9]{1,2})?|[0-9]+(?:\.[0-9]{1,2})?)";
const DATE: &str = r"\b(?:\d{2}[/-]\d{2}[/-]\d{4}|\d{4}-\d{2}-\d{2})\b";
const VENDOR_LABEL: &str = r"(?im)\b(?:vendor|seller|supplier|sold[ \t]+by|billed[ \t]+by)[ \t]*:[ \t]*([^\r\n]+)";
const VENDOR_SUFFIX: &str = r"(?m)^[ \t]*([A-Z][A-Za-z0-9&.,'\- ]*?\b(?:Pvt\.?[ \t]+Ltd|Private[ \t]+Limited|Ltd|Limited|LLP|LLC|Inc|Corporation|Corp|Solutions|Technologies)\.?)[ \t]*$";

const EMAIL: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
const PHONE: &str = r"(?:^|[^\d+])((?:\+\d{1,3}[\s-]?)?\d{10})(?:$|\D)";
/// Words joined by single spaces; a wider gap or a colon ends the name.
const NAME_LABEL: &str = r"(?m)\bName[ \t]*[:\-]?[ \t]*([A-Z][A-Za-z.'\-]*(?:[ \t][A-Za-z.'\-]+)*)";
const NAME_LINE: &str = r"^[A-Z][A-Za-z'\-]*(?:[ \t]+[A-Z][A-Za-z'\-]*){0,4}$";

const TITLE: &str = r"(?im)\b(?:report[ \t]+)?title[ \t]*[:\-][ \t]*([^\r\n]*)";
const SUMMARY: &str = r"(?im)\b(?:summary|abstract)[ \t]*[:\-][ \t]*([^\r\n]*)";

/// How many leading lines are scanned for an unlabelled candidate name.
const NAME_SCAN_LINES: usize = 5;
const NAME_MIN_CHARS: usize = 3;
const NAME_MAX_CHARS: usize = 25;

/// Short headings that look like names but never are.
const NON_NAME_LINES: &[&str] = &["cv", "profile", "contact", "summary", "personal details"];

struct SkillPattern {
    name: String,
    regex: Regex,
}

/// Compiled extraction rules for every document type.
pub struct FieldExtractor {
    invoice_no: Regex,
    total_amount: Regex,
    date: Regex,
    vendor_label: Regex,
    vendor_suffix: Regex,
    email: Regex,
    phone: Regex,
    name_label: Regex,
    name_line: Regex,
    title: Regex,
    summary: Regex,
    skills: Vec<SkillPattern>,
    /// Lower-cased resume keywords; a line containing one is a heading, not a name.
    headings: Vec<String>,
}

impl FieldExtractor {
    pub fn new(rules: &RuleSet) -> Result<Self> {
        let skills = rules
            .skills
            .iter()
            .map(|skill| {
                let regex = Regex::new(&skill_pattern(skill))
                    .with_context(|| format!("Invalid skill pattern for '{}'", skill))?;
                Ok(SkillPattern {
                    name: skill.clone(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let headings = rules
            .classes
            .iter()
            .filter(|c| c.document_type == DocumentType::Resume)
            .flat_map(|c| c.keywords.iter().map(|k| k.to_lowercase()))
            .collect();

        debug!("Compiled {} skill patterns", skills.len());

        Ok(Self {
            invoice_no: compile(INVOICE_NO)?,
            total_amount: compile(TOTAL_AMOUNT)?,
            date: compile(DATE)?,
            vendor_label: compile(VENDOR_LABEL)?,
            vendor_suffix: compile(VENDOR_SUFFIX)?,
            email: compile(EMAIL)?,
            phone: compile(PHONE)?,
            name_label: compile(NAME_LABEL)?,
            name_line: compile(NAME_LINE)?,
            title: compile(TITLE)?,
            summary: compile(SUMMARY)?,
            skills,
            headings,
        })
    }

    /// Extract the field schema for `doc_type` from `text`.
    pub fn extract(&self, doc_type: DocumentType, text: &str) -> FieldSet {
        let text = &normalize_newlines(text);
        let fields = match doc_type {
            DocumentType::Invoice => self.extract_invoice(text),
            DocumentType::Resume => self.extract_resume(text),
            DocumentType::Report => self.extract_report(text),
            DocumentType::Unknown => {
                let mut fields = FieldSet::new();
                fields.insert("note", FieldValue::text(UNKNOWN_NOTE));
                fields
            }
        };

        debug!(
            "Extracted {}/{} {} fields",
            fields.found_count(),
            fields.len(),
            doc_type
        );
        fields
    }

    fn extract_invoice(&self, text: &str) -> FieldSet {
        let flat = flatten_lines(text);

        let mut fields = FieldSet::new();
        fields.insert("invoice_no", first_capture(&self.invoice_no, &flat).into());
        fields.insert(
            "total_amount",
            first_capture(&self.total_amount, &flat).into(),
        );
        fields.insert("date", first_match(&self.date, &flat).into());

        if let Some(vendor) = self.find_vendor(text) {
            fields.insert("vendor", FieldValue::Text(vendor));
        }
        fields
    }

    fn find_vendor(&self, text: &str) -> Option<String> {
        first_capture(&self.vendor_label, text)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| first_capture(&self.vendor_suffix, text).map(|v| v.trim().to_string()))
    }

    fn extract_resume(&self, text: &str) -> FieldSet {
        let flat = flatten_lines(text);

        let email = first_match(&self.email, &flat).map(|e| e.to_lowercase());
        let phone = first_capture(&self.phone, &flat);
        let name = self.find_name(text);
        let skills: Vec<String> = self
            .skills
            .iter()
            .filter(|s| s.regex.is_match(text))
            .map(|s| s.name.clone())
            .collect();

        let mut fields = FieldSet::new();
        fields.insert("name", name.into());
        fields.insert("email", email.into());
        fields.insert("phone", phone.into());
        fields.insert("skills", FieldValue::List(skills));
        fields
    }

    /// Prefer an explicit `Name:` label, then a name-shaped line near the top.
    fn find_name(&self, text: &str) -> Option<String> {
        if let Some(labelled) = self.labelled_name(text) {
            return Some(labelled);
        }

        text.trim()
            .lines()
            .take(NAME_SCAN_LINES)
            .map(str::trim)
            .find(|line| self.looks_like_name(line))
            .map(str::to_string)
    }

    /// Value of a `Name:` label, without a trailing word that is itself
    /// the next label (`Name: Ravi Kumar Email: ...`).
    fn labelled_name(&self, text: &str) -> Option<String> {
        let capture = self.name_label.captures(text)?.get(1)?;
        let mut words: Vec<&str> = capture.as_str().split_whitespace().collect();
        if text[capture.end()..].starts_with(':') {
            words.pop();
        }

        let name = words.join(" ");
        let name = name.trim_end_matches('-').trim_end();
        (!name.is_empty()).then(|| name.to_string())
    }

    fn looks_like_name(&self, line: &str) -> bool {
        let len = line.chars().count();
        if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&len) || !self.name_line.is_match(line) {
            return false;
        }

        let lower = line.to_lowercase();
        !NON_NAME_LINES.contains(&lower.as_str())
            && !self.headings.iter().any(|h| lower.contains(h.as_str()))
    }

    fn extract_report(&self, text: &str) -> FieldSet {
        let mut fields = FieldSet::new();
        fields.insert(
            "title",
            first_capture(&self.title, text)
                .map(|t| t.trim().to_string())
                .into(),
        );
        fields.insert("date", first_match(&self.date, text).into());
        fields.insert(
            "summary",
            first_capture(&self.summary, text)
                .map(|s| s.trim().to_string())
                .into(),
        );
        fields
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Invalid field pattern: {}", pattern))
}

/// Whole-token, case-insensitive pattern for a vocabulary entry.
/// Inner whitespace matches any whitespace run so skills may wrap lines.
fn skill_pattern(skill: &str) -> String {
    let body = skill
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    format!(r"(?i)(?:^|[^A-Za-z0-9]){}(?:$|[^A-Za-z0-9])", body)
}

/// CRLF and lone CR line breaks become LF so `(?m)` anchors see every line.
fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn flatten_lines(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn first_capture(regex: &Regex, text: &str) -> Option<String> {
    regex
        .captures(text)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}

fn first_match(regex: &Regex, text: &str) -> Option<String> {
    regex.find(text).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> FieldExtractor {
        FieldExtractor::new(&RuleSet::default()).unwrap()
    }

    fn text_of<'a>(fields: &'a FieldSet, name: &str) -> Option<&'a str> {
        fields.get(name).and_then(FieldValue::as_text)
    }

    #[test]
    fn test_invoice_no_match_keeps_schema() {
        let fields = extractor().extract(DocumentType::Invoice, "no relevant content");
        assert_eq!(fields.keys(), vec!["invoice_no", "total_amount", "date"]);
        assert!(fields.iter().all(|(_, v)| v.is_missing()));
    }

    #[test]
    fn test_invoice_fields() {
        let text = "ACME Supplies Pvt Ltd\nInvoice No: INV-102\nDate: 12/03/2024\nTotal Due: ₹ 1,24,500.50\n";
        let fields = extractor().extract(DocumentType::Invoice, text);

        assert_eq!(text_of(&fields, "invoice_no"), Some("INV-102"));
        assert_eq!(text_of(&fields, "total_amount"), Some("1,24,500.50"));
        assert_eq!(text_of(&fields, "date"), Some("12/03/2024"));
        assert_eq!(text_of(&fields, "vendor"), Some("ACME Supplies Pvt Ltd"));
    }

    #[test]
    fn test_invoice_label_variants() {
        let ex = extractor();

        let fields = ex.extract(DocumentType::Invoice, "Invoice #: 7781 Amount Payable $980");
        assert_eq!(text_of(&fields, "invoice_no"), Some("7781"));
        assert_eq!(text_of(&fields, "total_amount"), Some("980"));

        let fields = ex.extract(
            DocumentType::Invoice,
            "Invoice Number\nA-55\nIssued 2024-01-31\nSubtotal: 10\nGrand Total: Rs. 12,000",
        );
        assert_eq!(text_of(&fields, "invoice_no"), Some("A-55"));
        assert_eq!(text_of(&fields, "date"), Some("2024-01-31"));
        assert_eq!(text_of(&fields, "total_amount"), Some("12,000"));
    }

    #[test]
    fn test_total_without_trailing_comma() {
        let fields = extractor().extract(
            DocumentType::Invoice,
            "Invoice No: INV-102, Total Due: 4500, thanks",
        );
        assert_eq!(text_of(&fields, "invoice_no"), Some("INV-102"));
        assert_eq!(text_of(&fields, "total_amount"), Some("4500"));
    }

    #[test]
    fn test_vendor_suffix_with_crlf() {
        let text = "Acme Technologies\r\nInvoice No: 1\r\nTotal: 250";
        let fields = extractor().extract(DocumentType::Invoice, text);
        assert_eq!(text_of(&fields, "vendor"), Some("Acme Technologies"));
        assert_eq!(text_of(&fields, "invoice_no"), Some("1"));
    }

    #[test]
    fn test_vendor_label_preferred() {
        let text = "Vendor: Blue River Traders\nGlobex Technologies\nTotal: 10";
        let fields = extractor().extract(DocumentType::Invoice, text);
        assert_eq!(text_of(&fields, "vendor"), Some("Blue River Traders"));
    }

    #[test]
    fn test_date_forms() {
        let ex = extractor();
        for (text, expected) in [
            ("bill dated 05-11-2023", "05-11-2023"),
            ("bill dated 2023-11-05", "2023-11-05"),
            ("bill dated 5/11/23", ""),
        ] {
            let fields = ex.extract(DocumentType::Invoice, text);
            let got = text_of(&fields, "date").unwrap_or("");
            assert_eq!(got, expected, "text: {}", text);
        }
    }

    #[test]
    fn test_resume_fields() {
        let text = "Priya Sharma\nSoftware Engineer\nEmail: Priya.Sharma@Example.COM\nPhone: +91 9876543210\nSkills: SQL, machine learning, Python, AI/ML\nExperience: 4 years";
        let fields = extractor().extract(DocumentType::Resume, text);

        assert_eq!(text_of(&fields, "name"), Some("Priya Sharma"));
        assert_eq!(text_of(&fields, "email"), Some("priya.sharma@example.com"));
        assert_eq!(text_of(&fields, "phone"), Some("+91 9876543210"));
        assert_eq!(
            fields.get("skills"),
            Some(&FieldValue::List(vec![
                "Python".to_string(),
                "AI".to_string(),
                "Machine Learning".to_string(),
                "SQL".to_string(),
            ]))
        );
    }

    #[test]
    fn test_resume_name_label_wins() {
        let text = "CURRICULUM VITAE\nJohn Smith\nName: Ravi Kumar\n";
        let fields = extractor().extract(DocumentType::Resume, text);
        assert_eq!(text_of(&fields, "name"), Some("Ravi Kumar"));
    }

    #[test]
    fn test_name_label_stops_at_next_label() {
        let extractor = extractor();

        let spaced = "Name: Ravi Kumar   Email: ravi@x.com   Phone: 9876543210";
        let fields = extractor.extract(DocumentType::Resume, spaced);
        assert_eq!(text_of(&fields, "name"), Some("Ravi Kumar"));
        assert_eq!(text_of(&fields, "email"), Some("ravi@x.com"));
        assert_eq!(text_of(&fields, "phone"), Some("9876543210"));

        let tight = "Name: Ravi Kumar Email: ravi@x.com";
        let fields = extractor.extract(DocumentType::Resume, tight);
        assert_eq!(text_of(&fields, "name"), Some("Ravi Kumar"));
    }

    #[test]
    fn test_name_label_without_value_falls_back() {
        let text = "Meera Iyer\nName: Email: meera@x.com";
        let fields = extractor().extract(DocumentType::Resume, text);
        assert_eq!(text_of(&fields, "name"), Some("Meera Iyer"));
    }

    #[test]
    fn test_resume_skips_heading_lines() {
        let text = "RESUME\nObjective\nAnna Lee\nanna@lee.dev";
        let fields = extractor().extract(DocumentType::Resume, text);
        assert_eq!(text_of(&fields, "name"), Some("Anna Lee"));
    }

    #[test]
    fn test_resume_nothing_found() {
        let text = "experience 2019 2020 2021";
        let fields = extractor().extract(DocumentType::Resume, text);
        assert_eq!(fields.keys(), vec!["name", "email", "phone", "skills"]);
        assert!(fields.get("name").unwrap().is_missing());
        assert!(fields.get("email").unwrap().is_missing());
        assert!(fields.get("phone").unwrap().is_missing());
        assert_eq!(fields.get("skills"), Some(&FieldValue::List(Vec::new())));
    }

    #[test]
    fn test_phone_rejects_longer_digit_runs() {
        let fields = extractor().extract(DocumentType::Resume, "Account 123456789012 skills");
        assert!(fields.get("phone").unwrap().is_missing());

        let fields = extractor().extract(DocumentType::Resume, "call 9876543210.");
        assert_eq!(text_of(&fields, "phone"), Some("9876543210"));
    }

    #[test]
    fn test_skills_are_whole_tokens() {
        let text = "Maintained JavaScript tooling; email triage";
        let fields = extractor().extract(DocumentType::Resume, text);
        assert_eq!(fields.get("skills"), Some(&FieldValue::List(Vec::new())));

        let fields = extractor().extract(DocumentType::Resume, "Languages: C++ and Java");
        assert_eq!(
            fields.get("skills"),
            Some(&FieldValue::List(vec!["Java".to_string(), "C++".to_string()]))
        );
    }

    #[test]
    fn test_report_fields() {
        let text = "Report Title: Q3 Network Audit\nDate: 2024-10-01\nSummary: Latency improved by 12%.\nFindings follow.";
        let fields = extractor().extract(DocumentType::Report, text);

        assert_eq!(text_of(&fields, "title"), Some("Q3 Network Audit"));
        assert_eq!(text_of(&fields, "date"), Some("2024-10-01"));
        assert_eq!(text_of(&fields, "summary"), Some("Latency improved by 12%."));
    }

    #[test]
    fn test_report_empty_label_is_not_missing() {
        let text = "Title:\nAbstract: short";
        let fields = extractor().extract(DocumentType::Report, text);
        assert_eq!(fields.get("title"), Some(&FieldValue::text("")));
        assert_eq!(text_of(&fields, "summary"), Some("short"));
        assert!(fields.get("date").unwrap().is_missing());
    }

    #[test]
    fn test_unknown_note() {
        let fields = extractor().extract(DocumentType::Unknown, "");
        assert_eq!(fields.keys(), vec!["note"]);
        assert_eq!(text_of(&fields, "note"), Some(UNKNOWN_NOTE));
    }

    #[test]
    fn test_skill_pattern_escapes() {
        assert_eq!(
            skill_pattern("C++"),
            r"(?i)(?:^|[^A-Za-z0-9])C\+\+(?:$|[^A-Za-z0-9])"
        );
        assert_eq!(
            skill_pattern("Machine Learning"),
            r"(?i)(?:^|[^A-Za-z0-9])Machine\s+Learning(?:$|[^A-Za-z0-9])"
        );
    }
}
