use super::handler::HandlerError;

/// Substrings that point at transient infrastructure trouble.
pub const RETRYABLE_PATTERNS: &[&str] = &[
    "connection refused",
    "timeout",
    "temporary failure",
    "database is locked",
    "too many connections",
    "network unreachable",
];

/// Substrings that point at a malformed request or a permanent rejection.
pub const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "invalid",
    "malformed",
    "not found",
    "unauthorized",
    "forbidden",
    "unhandled event type",
    "failed to unmarshal",
    "event data is not of type",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Retryable,
    NotRetryable,
}

impl Verdict {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::NotRetryable => "not_retryable",
        }
    }
}

/// Decides whether a failed delivery is worth another attempt.
pub trait DeliveryClassifier: Send + Sync {
    fn classify(&self, error: &HandlerError) -> Verdict;
}

/// Classifies free-text errors against the default pattern sets.
pub fn classify(message: &str) -> Verdict {
    PatternClassifier::default().classify_message(message)
}

/// Case-insensitive substring classifier.
///
/// Retryable patterns are checked first and win over non-retryable ones.
/// A message matching neither set is treated as retryable, so unknown
/// failures are redelivered rather than dropped.
///
/// Handler errors that already carry a kind ([`HandlerError::Transient`],
/// [`HandlerError::Permanent`]) are not pattern matched.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    retryable: Vec<String>,
    non_retryable: Vec<String>,
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(RETRYABLE_PATTERNS, NON_RETRYABLE_PATTERNS)
    }
}

impl PatternClassifier {
    pub fn new<R, N>(retryable: R, non_retryable: N) -> Self
    where
        R: IntoIterator,
        R::Item: AsRef<str>,
        N: IntoIterator,
        N::Item: AsRef<str>,
    {
        Self {
            retryable: normalize(retryable),
            non_retryable: normalize(non_retryable),
        }
    }

    pub fn with_retryable_pattern(mut self, pattern: impl AsRef<str>) -> Self {
        self.retryable.push(pattern.as_ref().to_lowercase());
        self
    }

    pub fn with_non_retryable_pattern(mut self, pattern: impl AsRef<str>) -> Self {
        self.non_retryable.push(pattern.as_ref().to_lowercase());
        self
    }

    pub fn classify_message(&self, message: &str) -> Verdict {
        let message = message.to_lowercase();

        if self.retryable.iter().any(|p| message.contains(p.as_str())) {
            return Verdict::Retryable;
        }

        if self.non_retryable.iter().any(|p| message.contains(p.as_str())) {
            return Verdict::NotRetryable;
        }

        Verdict::Retryable
    }
}

impl DeliveryClassifier for PatternClassifier {
    fn classify(&self, error: &HandlerError) -> Verdict {
        match error {
            HandlerError::Transient(_) => Verdict::Retryable,
            HandlerError::Permanent(_) => Verdict::NotRetryable,
            HandlerError::Failed(message) => self.classify_message(message),
        }
    }
}

fn normalize<I>(patterns: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| p.as_ref().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect()
}
