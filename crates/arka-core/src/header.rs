//! # Receipt Header
//!
//! Builds the canonical header printed at the top of every fiscal receipt.
//!
//! ```text
//!   line 1   company name
//!   line 2   address
//!   line 3   (blank separator)
//!   line 4   NUI: 810000000  NF: 600000000  TVSH: 330000000
//! ```
//!
//! The fingerprint lets the fiscal service skip device writes when nothing
//! changed since the last push.

use sha2::{Digest, Sha256};

use crate::types::CompanySettings;
use crate::HEADER_LINES_IN_USE;

/// The four header lines, trimmed and truncated to the device line width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHeader {
    lines: [String; HEADER_LINES_IN_USE],
}

impl ReceiptHeader {
    /// Builds the header from company settings.
    ///
    /// ## Arguments
    /// * `settings` - Current company record
    /// * `line_width` - Device header line width in characters
    pub fn from_company(settings: &CompanySettings, line_width: usize) -> Self {
        let fit = |text: &str| truncate_chars(text.trim(), line_width);

        ReceiptHeader {
            lines: [
                fit(&settings.name),
                fit(&settings.address),
                String::new(),
                fit(&tax_id_line(settings)),
            ],
        }
    }

    /// Header lines in device order (line 1 first).
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Hex SHA-256 over the lines joined with `\n`.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.lines.join("\n").as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// `"NUI: ..  NF: ..  TVSH: .."` with only the identifiers that are present.
pub fn tax_id_line(settings: &CompanySettings) -> String {
    let labelled = [
        ("NUI", &settings.business_number),
        ("NF", &settings.fiscal_number),
        ("TVSH", &settings.vat_number),
    ];

    labelled
        .iter()
        .filter_map(|(label, value)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| format!("{}: {}", label, v))
        })
        .collect::<Vec<_>>()
        .join("  ")
}

/// Truncates to at most `max` characters (not bytes).
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company() -> CompanySettings {
        CompanySettings {
            name: "  Arka Market  ".to_string(),
            address: "Rr. Nena Tereze 12, Prishtine".to_string(),
            business_number: Some("810123456".to_string()),
            fiscal_number: Some("600111222".to_string()),
            vat_number: Some("330999888".to_string()),
        }
    }

    #[test]
    fn test_header_layout() {
        let header = ReceiptHeader::from_company(&company(), 32);
        let lines = header.lines();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Arka Market");
        assert_eq!(lines[1], "Rr. Nena Tereze 12, Prishtine");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "NUI: 810123456  NF: 600111222  T");
    }

    #[test]
    fn test_tax_line_skips_missing_ids() {
        let mut settings = company();
        settings.fiscal_number = None;
        settings.vat_number = Some("  ".to_string());
        assert_eq!(tax_id_line(&settings), "NUI: 810123456");
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = ReceiptHeader::from_company(&company(), 48);
        let b = ReceiptHeader::from_company(&company(), 48);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        let mut changed = company();
        changed.address = "Rr. Agim Ramadani 3".to_string();
        let c = ReceiptHeader::from_company(&changed, 48);
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate_chars("Çaj më limon", 5), "Çaj m");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
