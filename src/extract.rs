//! Lightweight metadata extraction from document text.
//!
//! The OCR/PDF pipeline upstream hands over plain text and whatever metadata
//! it already knows. This module fills the gaps: email headers, a title,
//! page count, redaction markers and a document type.

use crate::error::{DedupError, Result};
use crate::hasher::PAGE_BREAK;
use crate::models::Document;

pub const TYPE_EMAIL: &str = "email";
pub const TYPE_COURT_FILING: &str = "court_filing";
pub const TYPE_DOCUMENT: &str = "document";
pub const TYPE_UNKNOWN: &str = "unknown";

/// Only the first lines are inspected for headers.
const HEADER_SCAN_LINES: usize = 40;
const MAX_TITLE_CHARS: usize = 200;

const REDACTION_MARKERS: &[&str] = &["[redacted]", "<redacted>", "redacted by", "█"];

const CASE_MARKERS: &[&str] = &[
    "case no.",
    "case no:",
    "case number",
    "civil action no",
    "docket no",
    "in the united states district court",
];

/// Fields derived for one document, caller-supplied values taking precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub document_type: String,
    pub title: Option<String>,
    pub date: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub page_count: i64,
    pub has_redactions: bool,
}

impl Extracted {
    /// Fails with `MissingRequiredField` when a type or title could not be
    /// determined. The record is still storable, flagged incomplete.
    pub fn check_required(&self, document: &str) -> Result<()> {
        let missing = if self.document_type == TYPE_UNKNOWN {
            Some("document_type")
        } else if self.title.is_none() {
            Some("title")
        } else {
            None
        };
        match missing {
            Some(field) => Err(DedupError::MissingRequiredField {
                document: document.to_string(),
                field,
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Default)]
struct Headers {
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    date: Option<String>,
}

fn parse_headers(text: &str) -> Headers {
    let mut headers = Headers::default();
    for line in text.lines().take(HEADER_SCAN_LINES) {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let slot = match name.trim().to_ascii_lowercase().as_str() {
            "from" => &mut headers.from,
            "to" => &mut headers.to,
            "subject" | "re" => &mut headers.subject,
            "date" | "sent" => &mut headers.date,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value.to_string());
        }
    }
    headers
}

fn is_header_line(line: &str) -> bool {
    match line.split_once(':') {
        Some((name, _)) => matches!(
            name.trim().to_ascii_lowercase().as_str(),
            "from" | "to" | "cc" | "bcc" | "subject" | "re" | "date" | "sent"
        ),
        None => false,
    }
}

/// First meaningful line of the text, skipping header lines.
fn first_line_title(text: &str) -> Option<String> {
    text.lines()
        .map(|l| l.trim_matches(|c: char| c.is_whitespace() || c == PAGE_BREAK))
        .filter(|l| !l.is_empty() && !is_header_line(l))
        .find(|l| l.chars().any(char::is_alphanumeric))
        .map(|l| l.chars().take(MAX_TITLE_CHARS).collect())
}

/// Number of pages, counting form feeds as page breaks. A trailing form
/// feed does not open an extra page.
pub fn page_count(text: &str) -> i64 {
    let breaks = text.matches(PAGE_BREAK).count() as i64;
    if text.trim_end_matches(|c: char| c.is_whitespace() && c != PAGE_BREAK).ends_with(PAGE_BREAK) {
        breaks.max(1)
    } else {
        breaks + 1
    }
}

/// Whether the text carries a redaction marker, including FOIA exemption
/// codes such as `(b)(6)`.
pub fn has_redactions(text: &str) -> bool {
    let lower = text.to_lowercase();
    if REDACTION_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    lower.match_indices("(b)(").any(|(i, m)| {
        let rest = &lower[i + m.len()..];
        let mut chars = rest.chars();
        matches!(
            (chars.next(), chars.next()),
            (Some(d), Some(')')) if ('1'..='9').contains(&d)
        )
    })
}

fn looks_like_docket_number(token: &str) -> bool {
    let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    ["-cv-", "-cr-", "-mc-"].iter().any(|kind| {
        token.split_once(kind).is_some_and(|(head, tail)| {
            head.chars().last().is_some_and(|c| c.is_ascii_digit())
                && tail.chars().next().is_some_and(|c| c.is_ascii_digit())
        })
    })
}

/// Infer a document type from headers and content markers.
pub fn infer_document_type(text: &str) -> &'static str {
    if text.trim().is_empty() {
        return TYPE_UNKNOWN;
    }
    let headers = parse_headers(text);
    if headers.from.is_some() && headers.subject.is_some() {
        return TYPE_EMAIL;
    }
    let head: String = text.lines().take(HEADER_SCAN_LINES).collect::<Vec<_>>().join("\n");
    let lower = head.to_lowercase();
    if CASE_MARKERS.iter().any(|m| lower.contains(m))
        || lower.split_whitespace().any(looks_like_docket_number)
    {
        return TYPE_COURT_FILING;
    }
    TYPE_DOCUMENT
}

/// Combine caller-supplied metadata with what the text reveals.
pub fn enrich(doc: &Document) -> Extracted {
    let text = &doc.extracted_text;
    let known = &doc.metadata;
    let headers = parse_headers(text);

    let document_type = doc
        .document_type
        .clone()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| infer_document_type(text).to_string());

    let subject = known.subject.clone().or(headers.subject);
    let title = known
        .title
        .clone()
        .or_else(|| subject.clone())
        .or_else(|| first_line_title(text));

    Extracted {
        document_type,
        title,
        date: known.date.clone().or(headers.date),
        from: known.from.clone().or(headers.from),
        to: known.to.clone().or(headers.to),
        subject,
        page_count: known.page_count.unwrap_or_else(|| page_count(text)),
        has_redactions: known.has_redactions.unwrap_or_else(|| has_redactions(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMAIL: &str = "From: jeffrey@example.com\nTo: ghislaine@example.com\n\
                         Date: Mon, 3 Jun 2002 10:14:00\nSubject: Flight schedule\n\n\
                         Please confirm the manifest for Tuesday.";

    #[test]
    fn email_headers_are_parsed() {
        let doc = Document::new("d1", "/in/a.txt", EMAIL, "vol1");
        let ex = enrich(&doc);
        assert_eq!(ex.document_type, TYPE_EMAIL);
        assert_eq!(ex.from.as_deref(), Some("jeffrey@example.com"));
        assert_eq!(ex.to.as_deref(), Some("ghislaine@example.com"));
        assert_eq!(ex.subject.as_deref(), Some("Flight schedule"));
        assert_eq!(ex.title.as_deref(), Some("Flight schedule"));
        assert_eq!(ex.date.as_deref(), Some("Mon, 3 Jun 2002 10:14:00"));
        assert_eq!(ex.page_count, 1);
        assert!(ex.check_required("d1").is_ok());
    }

    #[test]
    fn caller_metadata_wins() {
        let mut doc = Document::new("d1", "/in/a.txt", EMAIL, "vol1").with_type("memo");
        doc.metadata.title = Some("Manifest".into());
        doc.metadata.page_count = Some(7);
        let ex = enrich(&doc);
        assert_eq!(ex.document_type, "memo");
        assert_eq!(ex.title.as_deref(), Some("Manifest"));
        assert_eq!(ex.page_count, 7);
    }

    #[test]
    fn court_filing_detected() {
        let text = "UNITED STATES DISTRICT COURT\nSOUTHERN DISTRICT OF NEW YORK\n\
                    Case 1:15-cv-07433-LAP Document 1320\n\nORDER";
        assert_eq!(infer_document_type(text), TYPE_COURT_FILING);
        assert_eq!(infer_document_type("Case No. 08-80736"), TYPE_COURT_FILING);
        assert_eq!(infer_document_type("Quarterly report\nRevenue grew."), TYPE_DOCUMENT);
    }

    #[test]
    fn title_skips_blank_and_header_lines() {
        let doc = Document::new("d1", "/in/a.txt", "\n\n  \x0CCc: someone\nMeeting notes\nbody", "v");
        assert_eq!(enrich(&doc).title.as_deref(), Some("Meeting notes"));
    }

    #[test]
    fn pages_counted_by_form_feed() {
        assert_eq!(page_count("one"), 1);
        assert_eq!(page_count("one\x0Ctwo\x0Cthree"), 3);
        assert_eq!(page_count("one\x0Ctwo\x0C\n"), 2);
    }

    #[test]
    fn redaction_markers() {
        assert!(has_redactions("Name: [REDACTED]"));
        assert!(has_redactions("Name: ████████"));
        assert!(has_redactions("withheld under (b)(6) and (b)(7)(C)"));
        assert!(!has_redactions("see section (b)(x) of the rules"));
        assert!(!has_redactions("nothing hidden here"));
    }

    #[test]
    fn blank_text_is_incomplete() {
        let doc = Document::new("d9", "/in/blank.txt", "   \n", "vol1");
        let ex = enrich(&doc);
        assert_eq!(ex.document_type, TYPE_UNKNOWN);
        let err = ex.check_required("d9").unwrap_err();
        assert!(matches!(
            err,
            DedupError::MissingRequiredField { field: "document_type", .. }
        ));
    }
}
