// PII detection

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Guardrail, GuardrailOutcome, GuardrailStage};

/// What to do when PII is found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiAction {
    Block,
    Warn,
    Redact,
}

/// Detected PII category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiKind {
    Email,
    Phone,
    Ssn,
    CreditCard,
}

impl PiiKind {
    fn label(self) -> &'static str {
        match self {
            PiiKind::Email => "email",
            PiiKind::Phone => "phone",
            PiiKind::Ssn => "ssn",
            PiiKind::CreditCard => "credit_card",
        }
    }

    fn token(self) -> &'static str {
        match self {
            PiiKind::Email => "[EMAIL_REDACTED]",
            PiiKind::Phone => "[PHONE_REDACTED]",
            PiiKind::Ssn => "[SSN_REDACTED]",
            PiiKind::CreditCard => "[CC_REDACTED]",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            PiiKind::Email => &EMAIL,
            PiiKind::Phone => &PHONE,
            PiiKind::Ssn => &SSN,
            PiiKind::CreditCard => &CREDIT_CARD,
        }
    }
}

// Patterns are literals; a failure here is a programming error caught by tests.
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap());
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").unwrap());
static SSN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());
static CREDIT_CARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){12,15}\d\b").unwrap());

// Reporting order
const DETECTION_ORDER: [PiiKind; 4] = [PiiKind::Email, PiiKind::Phone, PiiKind::Ssn, PiiKind::CreditCard];
// Redaction order: longer digit runs first so a card number is not split into a phone number
const REDACTION_ORDER: [PiiKind; 4] = [PiiKind::Email, PiiKind::CreditCard, PiiKind::Ssn, PiiKind::Phone];

/// Detects emails, phone numbers, SSNs and card numbers
#[derive(Debug, Clone)]
pub struct PiiDetection {
    id: String,
    action: PiiAction,
}

impl PiiDetection {
    pub fn new(action: PiiAction) -> Self {
        Self {
            id: "pii_detection".to_string(),
            action,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn detect(content: &str) -> Vec<PiiKind> {
        DETECTION_ORDER
            .into_iter()
            .filter(|kind| kind.pattern().is_match(content))
            .collect()
    }

    pub fn redact(content: &str) -> String {
        REDACTION_ORDER.into_iter().fold(content.to_string(), |text, kind| {
            kind.pattern().replace_all(&text, kind.token()).into_owned()
        })
    }
}

#[async_trait]
impl Guardrail for PiiDetection {
    fn id(&self) -> &str {
        &self.id
    }

    async fn check(&self, _stage: GuardrailStage, content: &str) -> GuardrailOutcome {
        let found = Self::detect(content);
        if found.is_empty() {
            return GuardrailOutcome::Pass;
        }

        let labels: Vec<&str> = found.iter().map(|k| k.label()).collect();
        let reason = format!("PII detected: {}", labels.join(", "));
        match self.action {
            PiiAction::Block => GuardrailOutcome::block(reason),
            PiiAction::Warn => GuardrailOutcome::warn(reason),
            PiiAction::Redact => GuardrailOutcome::Redact {
                content: Self::redact(content),
                reason,
            },
        }
    }
}
