//! Structured artifact extraction from free-form LLM output.
//!
//! A [`ResponseParser`] runs an ordered chain of [`ParsingStrategy`]s; the
//! first strategy that yields a value wins and the rest are skipped. A
//! strategy that errors is recorded and the chain moves on.
//!
//! Default order:
//! 1. `direct` - whole text, minus a known lead-in phrase
//! 2. `markdown_fence` - fenced code blocks, longest first
//! 3. `fuzzy_boundary` - first `{` through last `}`

use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

static FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[\w+.-]*[ \t]*\r?\n(.*?)\r?\n```").unwrap());

/// Lead-in phrases stripped by the direct strategy, in order.
const KNOWN_PREFIXES: &[&str] = &["Here is the JSON:", "Result:", "Output:", "Here is the result:"];

/// Strict JSON parse. A bare `null` counts as nothing found.
fn parse_json(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok().filter(|value: &Value| !value.is_null())
}

/// One extraction algorithm.
///
/// `Ok(None)` means "nothing here"; `Err` means the strategy itself broke.
pub trait ParsingStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn parse(&self, text: &str) -> Result<Option<Value>>;
}

pub struct DirectParseStrategy;

impl ParsingStrategy for DirectParseStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn parse(&self, text: &str) -> Result<Option<Value>> {
        let mut text = text.trim();
        for prefix in KNOWN_PREFIXES {
            if let Some(rest) = text.strip_prefix(prefix) {
                text = rest.trim();
            }
        }
        Ok(parse_json(text))
    }
}

pub struct MarkdownFenceStrategy;

impl ParsingStrategy for MarkdownFenceStrategy {
    fn name(&self) -> &'static str {
        "markdown_fence"
    }

    fn parse(&self, text: &str) -> Result<Option<Value>> {
        let mut blocks: Vec<&str> = FENCE_REGEX
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect();
        blocks.sort_by_key(|block| std::cmp::Reverse(block.len()));

        Ok(blocks
            .into_iter()
            .find_map(|block| parse_json(block.trim())))
    }
}

pub struct FuzzyBoundaryStrategy;

impl ParsingStrategy for FuzzyBoundaryStrategy {
    fn name(&self) -> &'static str {
        "fuzzy_boundary"
    }

    fn parse(&self, text: &str) -> Result<Option<Value>> {
        let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) else {
            return Ok(None);
        };
        if end < start {
            return Ok(None);
        }
        Ok(parse_json(&text[start..=end]))
    }
}

/// Outcome of a parse. `strategy_used` is set iff `success`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseResult {
    pub success: bool,
    pub data: Option<Value>,
    pub strategy_used: Option<&'static str>,
    pub error_messages: Vec<String>,
}

impl ParseResult {
    fn parsed(data: Value, strategy: &'static str) -> Self {
        Self {
            success: true,
            data: Some(data),
            strategy_used: Some(strategy),
            error_messages: Vec::new(),
        }
    }

    fn failed(error_messages: Vec<String>) -> Self {
        Self {
            success: false,
            data: None,
            strategy_used: None,
            error_messages,
        }
    }
}

/// Artifact extraction as seen by the orchestrator.
pub trait ArtifactParser: Send + Sync {
    fn parse(&self, text: &str) -> ParseResult;
}

pub struct ResponseParser {
    strategies: Vec<Box<dyn ParsingStrategy>>,
}

impl ResponseParser {
    /// Build a parser over an ordered strategy chain. The chain must not be empty.
    pub fn new(strategies: Vec<Box<dyn ParsingStrategy>>) -> Result<Self> {
        if strategies.is_empty() {
            anyhow::bail!("Parser requires at least one strategy");
        }
        debug!(count = strategies.len(), "Parser initialized");
        Ok(Self { strategies })
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Parse a response that may be absent; absence is reported as invalid input.
    pub fn parse_input(&self, text: Option<&str>) -> ParseResult {
        match text {
            Some(text) => self.parse(text),
            None => ParseResult::failed(vec!["Invalid input: expected string".to_string()]),
        }
    }

    pub fn parse(&self, text: &str) -> ParseResult {
        if text.trim().is_empty() {
            return ParseResult::failed(vec!["Empty response text".to_string()]);
        }

        let mut errors = Vec::new();
        for strategy in &self.strategies {
            let name = strategy.name();
            debug!(strategy = name, "Attempting parse");
            match strategy.parse(text) {
                Ok(Some(data)) => {
                    debug!(strategy = name, "Parse succeeded");
                    return ParseResult::parsed(data, name);
                }
                Ok(None) => debug!(strategy = name, "Strategy found nothing"),
                Err(e) => {
                    debug!(strategy = name, error = %e, "Strategy failed");
                    errors.push(format!("{}: {}", name, e));
                }
            }
        }

        if errors.is_empty() {
            errors.push("All strategies failed".to_string());
        }
        ParseResult::failed(errors)
    }
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(DirectParseStrategy),
                Box::new(MarkdownFenceStrategy),
                Box::new(FuzzyBoundaryStrategy),
            ],
        }
    }
}

impl ArtifactParser for ResponseParser {
    fn parse(&self, text: &str) -> ParseResult {
        ResponseParser::parse(self, text)
    }
}
