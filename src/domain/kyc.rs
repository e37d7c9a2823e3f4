use serde::{Deserialize, Serialize};

use crate::error::{Result, WalletError};

/// The KYC document attached to an account and exchanged during compliance
/// negotiation.
///
/// All fields are optional so partially filled documents stay representable;
/// validation happens where the document is used, not here.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KycData {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_entity_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
}

impl KycData {
    pub fn individual(given_name: &str, surname: &str) -> Self {
        Self {
            kind: Some("individual".to_string()),
            given_name: Some(given_name.to_string()),
            surname: Some(surname.to_string()),
            ..Self::default()
        }
    }

    /// Parses user supplied KYC data, rejecting anything that is not a JSON
    /// object with the known fields.
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|err| {
            WalletError::validation(format!("'kyc_data' must be a JSON-encoded KYC object: {err}"))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Field-wise comparison against a sample document.
    ///
    /// Empty or missing sample fields are wildcards; every populated sample
    /// field must match this document exactly.
    pub fn matches_sample(&self, sample: &KycData) -> bool {
        field_matches(&sample.kind, &self.kind)
            && field_matches(&sample.given_name, &self.given_name)
            && field_matches(&sample.surname, &self.surname)
            && field_matches(&sample.legal_entity_name, &self.legal_entity_name)
            && field_matches(&sample.dob, &self.dob)
    }
}

fn field_matches(sample: &Option<String>, value: &Option<String>) -> bool {
    match sample.as_deref() {
        None | Some("") => true,
        Some(expected) => value.as_deref() == Some(expected),
    }
}

/// Verdicts a wallet can hand out for a counterparty KYC document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Passes every check.
    Minimum,
    /// Rejected outright during evaluation.
    Reject,
    /// Flagged for manual clearing, then passes review.
    SoftMatch,
    /// Flagged for manual clearing, then rejected during review.
    SoftReject,
}

/// Per-wallet sample documents driving deterministic compliance outcomes.
///
/// A counterparty document is classified by matching it against these samples,
/// so tests and demos can force any negotiation outcome by copying the right
/// sample. The wallet name is baked in as the surname to keep samples of
/// different wallets from colliding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycSamples {
    pub minimum: KycData,
    pub reject: KycData,
    pub soft_match: KycData,
    pub soft_reject: KycData,
}

impl KycSamples {
    pub fn generate(wallet_name: &str) -> Self {
        Self {
            minimum: KycData::individual("Micro", wallet_name),
            reject: KycData::individual("Rock", wallet_name),
            soft_match: KycData::individual("Sand", wallet_name),
            soft_reject: KycData::individual("Salt", wallet_name),
        }
    }

    pub fn sample(&self, kind: SampleKind) -> &KycData {
        match kind {
            SampleKind::Minimum => &self.minimum,
            SampleKind::Reject => &self.reject,
            SampleKind::SoftMatch => &self.soft_match,
            SampleKind::SoftReject => &self.soft_reject,
        }
    }

    pub fn matches(&self, kind: SampleKind, data: &KycData) -> bool {
        data.matches_sample(self.sample(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(KycData::parse("{\"given_name\": \"Micro\"}").is_ok());
        assert!(KycData::parse("not json").is_err());
        assert!(KycData::parse("[1, 2]").is_err());
    }

    #[test]
    fn test_sample_matching_is_exact_on_populated_fields() {
        let samples = KycSamples::generate("wallet");
        let mut data = samples.reject.clone();
        assert!(samples.matches(SampleKind::Reject, &data));
        assert!(!samples.matches(SampleKind::Minimum, &data));

        data.given_name = Some("Someone".to_string());
        assert!(!samples.matches(SampleKind::Reject, &data));
    }

    #[test]
    fn test_empty_sample_fields_are_wildcards() {
        let samples = KycSamples::generate("wallet");
        let mut data = samples.soft_match.clone();
        data.legal_entity_name = Some("Acme Ltd".to_string());
        data.dob = Some("1980-01-01".to_string());
        assert!(samples.matches(SampleKind::SoftMatch, &data));
    }

    #[test]
    fn test_samples_differ_per_wallet() {
        let ours = KycSamples::generate("ours");
        let theirs = KycSamples::generate("theirs");
        assert!(!ours.matches(SampleKind::Minimum, &theirs.minimum));
    }

    #[test]
    fn test_json_roundtrip_skips_empty_fields() {
        let data = KycData::individual("Micro", "wallet");
        let raw = data.to_json().unwrap();
        assert!(!raw.contains("legal_entity_name"));
        assert_eq!(KycData::parse(&raw).unwrap(), data);
    }
}
