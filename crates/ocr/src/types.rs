use std::collections::BTreeMap;

use boleta_core::{Money, Rut};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Keys used in [`ParsedReceipt::field_confidence`].
pub mod field {
    pub const AMOUNT: &str = "amount_confidence";
    pub const DATE: &str = "date_confidence";
    pub const RUT: &str = "rut_confidence";
    pub const MERCHANT: &str = "merchant_confidence";
    pub const DOCUMENT_TYPE: &str = "document_type_confidence";
    pub const OCR: &str = "ocr_confidence";
}

/// A single extracted value with an associated confidence score (0.0–1.0).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractedField<T> {
    pub value: T,
    /// Confidence in this extraction (0.0 = guessed, 1.0 = certain).
    pub confidence: f32,
}

impl<T> ExtractedField<T> {
    pub fn new(value: T, confidence: f32) -> Self {
        Self { value, confidence: clamp_unit(confidence) }
    }
}

/// Clamp to [0, 1]; NaN becomes 0.
pub fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Chilean fiscal document kinds that can be recognised on a receipt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Boleta,
    Factura,
    Ticket,
    Comprobante,
    #[default]
    Unknown,
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentType::Boleta => write!(f, "boleta"),
            DocumentType::Factura => write!(f, "factura"),
            DocumentType::Ticket => write!(f, "ticket"),
            DocumentType::Comprobante => write!(f, "comprobante"),
            DocumentType::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "boleta" => Ok(DocumentType::Boleta),
            "factura" => Ok(DocumentType::Factura),
            "ticket" => Ok(DocumentType::Ticket),
            "comprobante" => Ok(DocumentType::Comprobante),
            "unknown" => Ok(DocumentType::Unknown),
            other => Err(format!("Unknown document type: '{other}'")),
        }
    }
}

/// Output of the external text-recognition service for one image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RecognitionResult {
    pub full_text: String,
    /// Mean block confidence reported by the recognizer (0.0–1.0).
    pub confidence: f32,
    pub language: Option<String>,
}

/// Structured fields extracted from one receipt.
///
/// Absent fields carry no entry in `field_confidence`, so the confidences
/// always describe exactly the data that is present.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedReceipt {
    /// Total amount; zero when none was found.
    pub amount: Money,
    pub date: Option<NaiveDate>,
    pub merchant_rut: Option<Rut>,
    pub merchant_name: Option<String>,
    pub document_type: DocumentType,
    /// Aggregate confidence (0.0–1.0).
    pub confidence: f32,
    pub raw_text: String,
    pub field_confidence: BTreeMap<String, f32>,
}

impl ParsedReceipt {
    /// A receipt with no fields and zero confidence.
    pub fn empty(raw_text: impl Into<String>) -> Self {
        Self {
            amount: Money::zero(),
            date: None,
            merchant_rut: None,
            merchant_name: None,
            document_type: DocumentType::Unknown,
            confidence: 0.0,
            raw_text: raw_text.into(),
            field_confidence: BTreeMap::new(),
        }
    }

    pub fn field(&self, key: &str) -> Option<f32> {
        self.field_confidence.get(key).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracted_field_clamps_confidence() {
        let f = ExtractedField::new("test", 1.5);
        assert_eq!(f.confidence, 1.0);
        let f = ExtractedField::new("test", -0.1);
        assert_eq!(f.confidence, 0.0);
        let f = ExtractedField::new("test", f32::NAN);
        assert_eq!(f.confidence, 0.0);
    }

    #[test]
    fn document_type_roundtrip() {
        use std::str::FromStr;
        for t in [
            DocumentType::Boleta,
            DocumentType::Factura,
            DocumentType::Ticket,
            DocumentType::Comprobante,
            DocumentType::Unknown,
        ] {
            assert_eq!(DocumentType::from_str(&t.to_string()).unwrap(), t);
        }
        assert!(DocumentType::from_str("recibo").is_err());
    }

    #[test]
    fn document_type_serializes_lowercase() {
        let json = serde_json::to_string(&DocumentType::Factura).unwrap();
        assert_eq!(json, "\"factura\"");
    }

    #[test]
    fn empty_receipt_has_no_confidences() {
        let r = ParsedReceipt::empty("");
        assert_eq!(r.confidence, 0.0);
        assert!(r.field_confidence.is_empty());
        assert!(r.amount.is_zero());
        assert_eq!(r.document_type, DocumentType::Unknown);
    }
}
