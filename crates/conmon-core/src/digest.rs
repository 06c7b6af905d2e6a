//! Per-batch notification payload.

use std::fmt::Write;

use crate::models::Record;

/// New records of one source.
#[derive(Debug, Clone)]
pub struct DigestSection {
    pub source_id: String,
    pub records: Vec<Record>,
}

/// All records emitted in one batch, grouped by source in processing order.
#[derive(Debug, Clone, Default)]
pub struct Digest {
    sections: Vec<DigestSection>,
}

impl Digest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a section. Empty record lists are ignored.
    pub fn push(&mut self, source_id: impl Into<String>, records: Vec<Record>) {
        if records.is_empty() {
            return;
        }
        self.sections.push(DigestSection {
            source_id: source_id.into(),
            records,
        });
    }

    pub fn sections(&self) -> &[DigestSection] {
        &self.sections
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Total number of records across all sections.
    pub fn total(&self) -> usize {
        self.sections.iter().map(|s| s.records.len()).sum()
    }

    pub fn subject(&self) -> String {
        format!("Content monitor digest [{}]", self.total())
    }

    /// HTML body: one table per source, one row per record.
    ///
    /// Titles and urls are escaped; `content` is already HTML and is embedded
    /// as-is.
    pub fn render_html(&self) -> String {
        let mut body = String::new();
        for section in &self.sections {
            body.push_str(
                "<table border=1 style='border-collapse: collapse; font-size: 12pt;'>",
            );
            let _ = write!(
                body,
                "<tr style='background-color:#eee;text-align:left;'><th style='text-align:left;line-height:1.5'>{}[{}]</th></tr>",
                escape_html(&section.source_id),
                section.records.len()
            );
            for record in &section.records {
                let published = record
                    .pub_time
                    .map(|t| format!(" [{}]", t.format("%Y-%m-%d")))
                    .unwrap_or_default();
                let _ = write!(
                    body,
                    "<tr><td><a href='{}'>{}</a>{}<div>{}</div></td></tr>",
                    escape_html(&record.url),
                    escape_html(&record.title),
                    published,
                    record.content
                );
            }
            body.push_str("</table>");
        }
        body
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
