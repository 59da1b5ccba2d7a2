use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::OnceLock;

use boleta_core::{Money, Rut};
use chrono::NaiveDate;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{field, DocumentType, ExtractedField, ParsedReceipt};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Receipt text is empty")]
    EmptyInput,
}

/// How the total is chosen among the amounts found on a receipt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AmountPolicy {
    /// Replace the current best only when the candidate is larger *and* at
    /// least as confident. An unlabelled large number seen before the total
    /// line therefore wins over it.
    #[default]
    LargestWithConfidence,
    /// Largest amount on a keyword line if any exists, else the largest amount.
    PreferKeyword,
}

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// CLP amounts: $15.000, 15000, $ 15000
re!(re_amount, r"\$?\s*(\d{1,3}(?:\.\d{3})+|\d+)");

// Day must not continue a longer number (keeps ISO dates out); the year may
// run straight into the next word, as in "01/10/2024HORA".
re!(re_date_numeric, r"(?:^|\D)(\d{1,2})[/-](\d{1,2})[/-](\d{2,4})");
re!(re_date_spanish,
    r"(\d{1,2})\s+de\s+(enero|febrero|marzo|abril|mayo|junio|julio|agosto|septiembre|octubre|noviembre|diciembre)\s+de\s+(\d{4})");
re!(re_date_iso, r"\b(\d{4})[/-](\d{1,2})[/-](\d{1,2})\b");

re!(re_rut, r"\d{1,2}\.?\d{3}\.?\d{3}-[\dkK]");

re!(re_merchant, r"^[A-ZÁÉÍÓÚÑ][A-ZÁÉÍÓÚÑa-záéíóúñ\s.]+");
re!(re_numeric_line, r"^\d+$");

const AMOUNT_KEYWORDS: &[&str] = &["total", "total a pagar", "total $", "monto total", "importe"];

/// Checked in order; the first keyword present decides the document type.
const DOCUMENT_TYPES: &[(&str, DocumentType, f32)] = &[
    ("factura", DocumentType::Factura, 0.95),
    ("boleta", DocumentType::Boleta, 0.95),
    ("ticket", DocumentType::Ticket, 0.80),
    ("comprobante", DocumentType::Comprobante, 0.70),
];

const FIELD_WEIGHTS: &[(&str, f32)] = &[
    (field::AMOUNT, 0.35),
    (field::DATE, 0.20),
    (field::RUT, 0.20),
    (field::MERCHANT, 0.15),
    (field::DOCUMENT_TYPE, 0.10),
];

const MERCHANT_SCAN_LINES: usize = 5;

// ── Public extraction API ─────────────────────────────────────────────────────

/// Extracts amount, date, RUT, merchant and document type from the OCR text
/// of a Chilean receipt. Each field is scored independently; missing fields
/// are simply absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiptParser {
    amount_policy: AmountPolicy,
}

impl ReceiptParser {
    pub fn new(amount_policy: AmountPolicy) -> Self {
        Self { amount_policy }
    }

    pub fn amount_policy(&self) -> AmountPolicy {
        self.amount_policy
    }

    pub fn parse(&self, text: &str) -> Result<ParsedReceipt, ParseError> {
        if text.trim().is_empty() {
            return Err(ParseError::EmptyInput);
        }

        let mut receipt = ParsedReceipt::empty(text);
        let fc = &mut receipt.field_confidence;

        if let Some(f) = self.extract_amount(text) {
            receipt.amount = f.value;
            fc.insert(field::AMOUNT.to_string(), f.confidence);
        }
        if let Some(f) = Self::extract_date(text) {
            receipt.date = Some(f.value);
            fc.insert(field::DATE.to_string(), f.confidence);
        }
        if let Some(f) = Self::extract_rut(text) {
            receipt.merchant_rut = Some(f.value);
            fc.insert(field::RUT.to_string(), f.confidence);
        }
        if let Some(f) = Self::extract_merchant(text) {
            receipt.merchant_name = Some(f.value);
            fc.insert(field::MERCHANT.to_string(), f.confidence);
        }
        if let Some(f) = Self::detect_document_type(text) {
            receipt.document_type = f.value;
            fc.insert(field::DOCUMENT_TYPE.to_string(), f.confidence);
        }

        receipt.confidence = Self::aggregate_confidence(&receipt.field_confidence);
        Ok(receipt)
    }

    // ── Amount ────────────────────────────────────────────────────────────────

    pub fn extract_amount(&self, text: &str) -> Option<ExtractedField<Money>> {
        let candidates = amount_candidates(text);
        let (amount, confidence) = match self.amount_policy {
            AmountPolicy::LargestWithConfidence => {
                let mut best = (Decimal::ZERO, 0.0f32);
                for (amount, conf) in candidates {
                    if amount > best.0 && conf >= best.1 {
                        best = (amount, conf);
                    }
                }
                best
            }
            AmountPolicy::PreferKeyword => {
                let max_of = |min_conf: f32| {
                    candidates
                        .iter()
                        .filter(|(_, c)| *c >= min_conf)
                        .max_by(|a, b| a.0.cmp(&b.0))
                        .copied()
                };
                max_of(0.9).or_else(|| max_of(0.0))?
            }
        };

        if amount <= Decimal::ZERO {
            return None;
        }
        Some(ExtractedField::new(Money::from_decimal(amount), confidence))
    }

    // ── Date ─────────────────────────────────────────────────────────────────

    /// Patterns are tried most-common first against the lower-cased text.
    pub fn extract_date(text: &str) -> Option<ExtractedField<NaiveDate>> {
        let lower = text.to_lowercase();
        if let Some(d) = try_date_numeric(&lower) {
            return Some(ExtractedField::new(d, 0.8));
        }
        if let Some(d) = try_date_spanish(&lower) {
            return Some(ExtractedField::new(d, 0.6));
        }
        if let Some(d) = try_date_iso(&lower) {
            return Some(ExtractedField::new(d, 0.4));
        }
        None
    }

    // ── RUT ──────────────────────────────────────────────────────────────────

    /// First candidate with a valid Módulo-11 check character.
    pub fn extract_rut(text: &str) -> Option<ExtractedField<Rut>> {
        re_rut()
            .find_iter(text)
            .find_map(|m| Rut::parse(m.as_str()).ok())
            .map(|rut| ExtractedField::new(rut, 0.9))
    }

    // ── Merchant ─────────────────────────────────────────────────────────────

    pub fn extract_merchant(text: &str) -> Option<ExtractedField<String>> {
        text.lines()
            .take(MERCHANT_SCAN_LINES)
            .enumerate()
            .map(|(i, l)| (i, l.trim()))
            .filter(|(_, l)| l.chars().count() >= 3 && !re_numeric_line().is_match(l))
            .find_map(|(i, l)| {
                let name = re_merchant().find(l)?.as_str().trim();
                let confidence = if i == 0 { 0.9 } else { 0.7 };
                Some(ExtractedField::new(name.to_string(), confidence))
            })
    }

    // ── Document type ────────────────────────────────────────────────────────

    pub fn detect_document_type(text: &str) -> Option<ExtractedField<DocumentType>> {
        let lower = text.to_lowercase();
        DOCUMENT_TYPES
            .iter()
            .find(|(kw, _, _)| lower.contains(kw))
            .map(|(_, t, c)| ExtractedField::new(*t, *c))
    }

    // ── Confidence ────────────────────────────────────────────────────────────

    /// Weighted mean over the fields present, normalised by the weights used.
    pub fn aggregate_confidence(fields: &BTreeMap<String, f32>) -> f32 {
        let (score, weight) = FIELD_WEIGHTS.iter().fold((0.0f32, 0.0f32), |(s, w), (key, fw)| {
            match fields.get(*key) {
                Some(conf) if *conf > 0.0 => (s + conf * fw, w + fw),
                _ => (s, w),
            }
        });
        if weight > 0.0 {
            (score / weight).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

// ── Amount helpers ────────────────────────────────────────────────────────────

/// Every amount on every line, in reading order, with its line-level confidence.
fn amount_candidates(text: &str) -> Vec<(Decimal, f32)> {
    let mut out = Vec::new();
    for line in text.split('\n') {
        let lower = line.to_lowercase();
        let confidence = if AMOUNT_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            0.9
        } else {
            0.5
        };
        for c in re_amount().captures_iter(line) {
            let Some(m) = c.get(1) else { continue };
            if let Some(amount) = parse_amount_str(m.as_str()) {
                out.push((amount, confidence));
            }
        }
    }
    out
}

fn parse_amount_str(s: &str) -> Option<Decimal> {
    Decimal::from_str(&s.replace('.', "")).ok()
}

// ── Date helpers ──────────────────────────────────────────────────────────────

fn try_date_numeric(text: &str) -> Option<NaiveDate> {
    let c = re_date_numeric().captures(text)?;
    let day: u32 = c.get(1)?.as_str().parse().ok()?;
    let month: u32 = c.get(2)?.as_str().parse().ok()?;
    let year = expand_year(c.get(3)?.as_str().parse().ok()?);
    NaiveDate::from_ymd_opt(year, month, day)
}

fn try_date_spanish(text: &str) -> Option<NaiveDate> {
    let c = re_date_spanish().captures(text)?;
    let day: u32 = c.get(1)?.as_str().parse().ok()?;
    let month = spanish_month_to_num(c.get(2)?.as_str())?;
    let year: i32 = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn try_date_iso(text: &str) -> Option<NaiveDate> {
    let c = re_date_iso().captures(text)?;
    let year: i32 = c.get(1)?.as_str().parse().ok()?;
    let month: u32 = c.get(2)?.as_str().parse().ok()?;
    let day: u32 = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn expand_year(y: i32) -> i32 {
    if y < 100 { 2000 + y } else { y }
}

fn spanish_month_to_num(name: &str) -> Option<u32> {
    match name {
        "enero" => Some(1), "febrero" => Some(2), "marzo" => Some(3),
        "abril" => Some(4), "mayo" => Some(5), "junio" => Some(6),
        "julio" => Some(7), "agosto" => Some(8), "septiembre" => Some(9),
        "octubre" => Some(10), "noviembre" => Some(11), "diciembre" => Some(12),
        _ => None,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
