use std::future::Future;

use anyhow::Result;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{error::ServiceOverload, DEFAULT_OVERLOAD_KEYWORDS};

lazy_static! {
    /// case-insensitive alternation over the default overload phrases
    static ref DEFAULT_PATTERN: Regex = keyword_pattern(&DEFAULT_OVERLOAD_KEYWORDS)
        .expect("default overload keywords form a valid pattern");
}

/// build a case-insensitive alternation from literal keywords
fn keyword_pattern(keywords: &[&str]) -> Result<Regex> {
    let escaped: Vec<String> = keywords.iter().map(|word| regex::escape(word)).collect();
    Ok(Regex::new(&format!("(?i){}", escaped.join("|")))?)
}

/// Guesses overload from the wording of an error.
///
/// The rendered error chain is matched against a case-insensitive pattern;
/// on a hit, the [`ServiceOverload`] sentinel is attached (original error
/// preserved in the chain). The default phrase list covers the usual
/// load-shedding vocabulary (`rate limit`, `too many requests`, `overload`,
/// `retry later`, ...).
///
/// String matching is inherently a guess, so the classifier can be
/// [`restrict`](Self::restrict)ed to a caller-chosen underlying error kind;
/// errors failing the restriction pass through without being inspected.
///
/// # Example
///
/// ```rust
/// use surgeguard::classify::KeywordClassifier;
/// use surgeguard::ServiceOverload;
/// use anyhow::anyhow;
///
/// let classifier = KeywordClassifier::new();
///
/// let translated = classifier.classify(anyhow!("429 Too Many Requests"));
/// assert!(translated.is::<ServiceOverload>());
///
/// let untouched = classifier.classify(anyhow!("connection refused"));
/// assert!(!untouched.is::<ServiceOverload>());
/// ```
pub struct KeywordClassifier {
    /// pattern matched against the rendered error chain
    pattern: Regex,

    /// optional gate limiting classification to certain underlying errors
    restriction: Option<Box<dyn Fn(&anyhow::Error) -> bool + Send + Sync>>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_PATTERN.clone(),
            restriction: None,
        }
    }
}

/// KeywordClassifier implementation
impl KeywordClassifier {
    /// classifier matching the default overload phrases
    pub fn new() -> Self {
        Self::default()
    }

    /// classifier matching the given literal keywords instead of the defaults
    ///
    /// # Errors
    ///
    /// Fails when the keywords cannot be assembled into a pattern (an empty
    /// list, or a pattern exceeding the regex size limit)
    pub fn with_keywords(keywords: &[&str]) -> Result<Self> {
        if keywords.is_empty() {
            anyhow::bail!("keyword classifier needs at least one keyword");
        }

        Ok(Self {
            pattern: keyword_pattern(keywords)?,
            restriction: None,
        })
    }

    /// classifier matching an arbitrary caller-supplied pattern
    pub fn with_pattern(pattern: Regex) -> Self {
        Self {
            pattern,
            restriction: None,
        }
    }

    /// limits classification to errors satisfying the predicate; everything
    /// else passes through uninspected
    pub fn restrict<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.restriction = Some(Box::new(predicate));
        self
    }

    /// limits classification to error chains containing the given kind
    pub fn restrict_kind<E>(self) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.restrict(|err| err.is::<E>())
    }

    /// One-shot translation of a failed operation's error.
    ///
    /// Attaches the [`ServiceOverload`] sentinel when the rendered chain
    /// matches the pattern (and the restriction, if any, holds); returns the
    /// error unchanged otherwise.
    pub fn classify(&self, err: anyhow::Error) -> anyhow::Error {
        if let Some(restriction) = &self.restriction {
            if !restriction(&err) {
                return err;
            }
        }

        let rendered = format!("{err:#}");

        if self.pattern.is_match(&rendered) {
            log::debug!("keyword classifier flagged overload: {}", rendered);
            err.context(ServiceOverload)
        } else {
            err
        }
    }

    /// Runs an operation and classifies its failure, if any.
    pub async fn run<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        operation.await.map_err(|err| self.classify(err))
    }
}
