//! Judgment row parser
//!
//! This module extracts structured fields from one search-result row:
//! - The artifact path from the row's `open_pdf(...)` button
//! - Case type, number, year and title from the button heading
//! - The judge from the first `<strong>` element
//! - Labelled case details from `strong.caseDetailsTD`
//!
//! All extracted text is normalised: whitespace collapsed, lower-cased.

use scraper::{Html, Selector};
use std::collections::BTreeMap;

/// Fields that must be present for a row to count as complete
const REQUIRED_FIELDS: [&str; 5] = ["url", "title", "case_type", "case_number", "year"];

/// Extracted information from a judgment row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedRow {
    /// Portal path of the judgment file, if the row links one
    pub artifact_path: Option<String>,

    /// Normalised fields keyed by name (`title`, `case_type`, `judge`, ...)
    pub fields: BTreeMap<String, String>,
}

impl ParsedRow {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Whether url, title, case type, case number and year were all found
    pub fn is_complete(&self) -> bool {
        REQUIRED_FIELDS.iter().all(|f| self.fields.contains_key(*f))
    }
}

/// Parses one search-result row
///
/// Parsing never fails; fields that cannot be found are simply absent.
///
/// # Example
///
/// ```
/// use judgments_harvester::harvest::parse_judgment_row;
///
/// let html = r#"<button onclick="open_pdf('1','','court/2020/a.pdf')">WP/12/2020 of A vs B</button>"#;
/// let row = parse_judgment_row(html);
/// assert_eq!(row.artifact_path.as_deref(), Some("court/2020/a.pdf"));
/// assert_eq!(row.get("case_type"), Some("wp"));
/// ```
pub fn parse_judgment_row(html: &str) -> ParsedRow {
    let document = Html::parse_fragment(html);
    let mut row = ParsedRow::default();

    if let Some(path) = extract_artifact_path(html) {
        let path = path.replace("&search=%20", "");
        row.fields.insert("url".to_string(), path.clone());
        row.artifact_path = Some(path);
    }

    if let Some(heading) = first_text(&document, "button") {
        parse_heading(&heading, &mut row.fields);
    }

    if let Some(judge) = first_text(&document, "strong") {
        let judge = normalize_text(&strip_judge_prefix(&judge));
        if !judge.is_empty() {
            row.fields.insert("judge".to_string(), judge);
        }
    }

    extract_case_details(&document, &mut row.fields);

    tracing::trace!("Parsed row with {} fields", row.fields.len());
    row
}

/// Collapses whitespace and lower-cases
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>())
}

/// Finds the artifact path inside an `open_pdf(...)` call
///
/// Prefers the third argument; otherwise any argument naming a `.pdf`.
fn extract_artifact_path(html: &str) -> Option<String> {
    let call_start = html.find("open_pdf")?;
    let rest = &html[call_start..];
    let open = rest.find('(')?;
    let args = split_call_args(&rest[open + 1..]);

    if let Some(path) = args.get(2).filter(|arg| !arg.is_empty()) {
        return Some(path.clone());
    }

    args.into_iter()
        .find(|arg| arg.to_ascii_lowercase().contains(".pdf"))
}

/// Splits call arguments up to the closing parenthesis, unquoting each
fn split_call_args(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => quote = Some(c),
                ',' => args.push(std::mem::take(&mut current).trim().to_string()),
                ')' => break,
                _ => current.push(c),
            },
        }
    }
    args.push(current.trim().to_string());
    args
}

/// Parses `"TYPE/NUMBER/YEAR of TITLE"`
fn parse_heading(heading: &str, fields: &mut BTreeMap<String, String>) {
    let Some((details, title)) = heading.split_once(" of ") else {
        let raw = normalize_text(heading);
        if !raw.is_empty() {
            fields.insert("raw_heading".to_string(), raw);
        }
        return;
    };

    let title = normalize_text(title);
    if !title.is_empty() {
        fields.insert("title".to_string(), title);
    }

    let details = details.trim();
    if details.is_empty() {
        return;
    }

    let parts: Vec<&str> = details.split('/').collect();
    match parts.len() {
        n if n >= 3 => {
            fields.insert("case_type".to_string(), normalize_text(parts[0]));
            fields.insert("case_number".to_string(), normalize_text(parts[1]));
            fields.insert("year".to_string(), normalize_text(parts[2]));
        }
        2 => {
            fields.insert("case_type".to_string(), normalize_text(parts[0]));
            let number_year = parts[1].trim();
            match find_year(number_year) {
                Some(start) => {
                    fields.insert(
                        "year".to_string(),
                        number_year[start..start + 4].to_string(),
                    );
                    fields.insert(
                        "case_number".to_string(),
                        normalize_text(&number_year[..start]),
                    );
                }
                None => {
                    fields.insert("case_number".to_string(), normalize_text(number_year));
                }
            }
        }
        _ => match parse_free_form(details) {
            Some((case_type, number, year)) => {
                fields.insert("case_type".to_string(), case_type);
                fields.insert("case_number".to_string(), number);
                fields.insert("year".to_string(), year);
            }
            None => {
                fields.insert("raw_details".to_string(), normalize_text(details));
            }
        },
    }
}

/// Byte offset of the first run of four ASCII digits
fn find_year(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    (0..bytes.len().saturating_sub(3)).find(|&i| bytes[i..i + 4].iter().all(u8::is_ascii_digit))
}

/// Parses `"TYPE NUMBER YEAR"` or `"TYPE NUMBER of YEAR"`
fn parse_free_form(details: &str) -> Option<(String, String, String)> {
    let tokens: Vec<&str> = details.split_whitespace().collect();
    let (year, rest) = tokens.split_last()?;
    if year.len() != 4 || !year.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let rest = match rest.split_last() {
        Some((last, head)) if last.eq_ignore_ascii_case("of") => head,
        _ => rest,
    };
    let (number, type_tokens) = rest.split_last()?;
    if !number.chars().all(|c| c.is_ascii_digit()) || type_tokens.is_empty() {
        return None;
    }
    if !type_tokens
        .iter()
        .all(|t| t.chars().all(|c| c.is_ascii_alphabetic()))
    {
        return None;
    }

    Some((
        normalize_text(&type_tokens.join(" ")),
        number.to_string(),
        year.to_string(),
    ))
}

/// Removes `Judge :`, `Hon'ble` or `Justice` prefixes
fn strip_judge_prefix(text: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let keyword_end = ["judge", "hon'ble", "justice"]
        .iter()
        .filter_map(|keyword| lower.find(keyword).map(|i| (i, i + keyword.len())))
        .min_by_key(|(start, _)| *start)
        .map(|(_, end)| end);

    let Some(end) = keyword_end else {
        return text.to_string();
    };

    let after = &text[end..];
    let name = after.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
    if name.len() == after.len() {
        // keyword not followed by a separator, e.g. "Judgeship"
        return text.to_string();
    }
    name.split(':').next().unwrap_or_default().to_string()
}

/// Reads `strong.caseDetailsTD` label/value pairs
fn extract_case_details(document: &Html, fields: &mut BTreeMap<String, String>) {
    let (Ok(container), Ok(span), Ok(font)) = (
        Selector::parse("strong.caseDetailsTD"),
        Selector::parse("span"),
        Selector::parse("font"),
    ) else {
        return;
    };

    let Some(details) = document.select(&container).next() else {
        return;
    };

    let labels: Vec<String> = details
        .select(&span)
        .map(|e| e.text().collect())
        .collect();
    let values: Vec<String> = details
        .select(&font)
        .map(|e| e.text().collect())
        .collect();

    if labels.is_empty() || values.is_empty() {
        let raw: String = details.text().collect();
        fields.insert("raw_case_details".to_string(), normalize_text(&raw));
        for pair in raw.split('|') {
            if let Some((label, value)) = pair.split_once(':') {
                let label = normalize_text(label);
                if !label.is_empty() {
                    fields.insert(label, normalize_text(value));
                }
            }
        }
        return;
    }

    for (label, value) in labels.iter().zip(values.iter()) {
        let label = normalize_text(&label.replace(['|', ':'], ""));
        if !label.is_empty() {
            fields.insert(label, normalize_text(value));
        }
    }
}
