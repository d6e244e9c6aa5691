// src/selector.rs
//! Tool selection: map a free-text query to exactly one tool.
//!
//! The LLM selector asks the model for a numbered choice; the keyword
//! selector is a deterministic fuzzy token-overlap scorer used when no model
//! is configured or the model's answer is unusable.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::config::SelectorConfig;
use crate::error::SelectionError;
use crate::llm::DynLlmClient;
use crate::router::ToolDescriptor;

/// Jaro-Winkler similarity at which two tokens count as the same word.
pub const FUZZY_THRESHOLD: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Zero-based index into the candidate list.
    pub index: usize,
    pub reason: Option<String>,
}

#[async_trait]
pub trait Selector: Send + Sync {
    async fn select(
        &self,
        query: &str,
        candidates: &[ToolDescriptor],
    ) -> Result<Selection, SelectionError>;
    fn name(&self) -> &'static str;
}

/// LLM selector when a model is available (optionally backed by keywords),
/// keyword selector otherwise.
pub fn build_selector(llm: Option<DynLlmClient>, cfg: &SelectorConfig) -> Box<dyn Selector> {
    match llm {
        Some(llm) if cfg.keyword_fallback => Box::new(FallbackSelector::new(
            Box::new(LlmSelector::new(llm)),
            Box::new(KeywordSelector),
        )),
        Some(llm) => Box::new(LlmSelector::new(llm)),
        None => Box::new(KeywordSelector),
    }
}

// ------------------------------------------------------------
// LLM selector
// ------------------------------------------------------------

pub struct LlmSelector {
    llm: DynLlmClient,
}

impl LlmSelector {
    pub fn new(llm: DynLlmClient) -> Self {
        Self { llm }
    }
}

fn choice_prompt(query: &str, candidates: &[ToolDescriptor]) -> String {
    let mut choices = String::new();
    for (i, c) in candidates.iter().enumerate() {
        choices.push_str(&format!("({}) {}: {}\n", i + 1, c.name, c.description));
    }
    format!(
        "Some choices are given below. It is provided in a numbered list (1 to {n}), \
         where each item in the list corresponds to a summary.\n\
         ---------------------\n\
         {choices}\
         ---------------------\n\
         Using only the choices above and not prior knowledge, return the choice that is \
         most relevant to the question: '{query}'\n\
         Reply with JSON only, in the form {{\"choice\": <number>, \"reason\": \"<short reason>\"}}.",
        n = candidates.len()
    )
}

#[derive(Deserialize)]
struct ChoiceAnswer {
    choice: ChoiceNum,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChoiceNum {
    Int(usize),
    Text(String),
}

impl ChoiceNum {
    fn value(&self) -> Option<usize> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Parse the model's answer into a 1-based choice and optional reason.
pub fn parse_choice(answer: &str) -> Option<(usize, Option<String>)> {
    if let (Some(start), Some(end)) = (answer.find(['{', '[']), answer.rfind(['}', ']'])) {
        if start < end {
            let body = &answer[start..=end];
            let parsed = serde_json::from_str::<ChoiceAnswer>(body).ok().or_else(|| {
                serde_json::from_str::<Vec<ChoiceAnswer>>(body)
                    .ok()
                    .and_then(|v| v.into_iter().next())
            });
            if let Some(a) = parsed {
                if let Some(n) = a.choice.value() {
                    return Some((n, a.reason));
                }
            }
        }
    }

    static KEYED: OnceCell<Regex> = OnceCell::new();
    static LEADING: OnceCell<Regex> = OnceCell::new();
    let keyed = KEYED.get_or_init(|| {
        Regex::new(r#"(?i)"?choice"?\s*[:=]\s*"?(\d+)"#).expect("valid choice regex")
    });
    let leading = LEADING
        .get_or_init(|| Regex::new(r"^\s*\(?(\d+)(?:[).:\s]|$)").expect("valid choice regex"));
    keyed
        .captures(answer)
        .or_else(|| leading.captures(answer))
        .and_then(|c| c.get(1)?.as_str().parse().ok())
        .map(|n| (n, None))
}

#[async_trait]
impl Selector for LlmSelector {
    async fn select(
        &self,
        query: &str,
        candidates: &[ToolDescriptor],
    ) -> Result<Selection, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }
        let answer = self.llm.complete(&choice_prompt(query, candidates)).await?;
        let (choice, reason) =
            parse_choice(&answer).ok_or_else(|| SelectionError::Unparsable(truncate(&answer)))?;
        if choice == 0 || choice > candidates.len() {
            return Err(SelectionError::OutOfRange {
                choice,
                count: candidates.len(),
            });
        }
        Ok(Selection {
            index: choice - 1,
            reason,
        })
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(120).collect()
}

// ------------------------------------------------------------
// Keyword selector
// ------------------------------------------------------------

const STOPWORDS: &[&str] = &[
    "about", "all", "and", "any", "are", "did", "does", "for", "from", "give", "had", "has",
    "have", "how", "its", "list", "many", "much", "questions", "show", "tell", "the", "their",
    "there", "this", "use", "was", "were", "what", "when", "which", "who", "why", "with",
];

fn keyword_tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.len() >= 3)
        .filter(|t| !t.chars().all(|c| c.is_ascii_digit()))
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

fn fuzzy_hit(token: &str, pool: &HashSet<String>) -> bool {
    pool.contains(token)
        || pool
            .iter()
            .any(|p| strsim::jaro_winkler(token, p) >= FUZZY_THRESHOLD)
}

/// Score a candidate: name matches weigh 2, description matches 1.
pub fn keyword_score(query: &str, candidate: &ToolDescriptor) -> usize {
    let name: HashSet<String> = keyword_tokens(&candidate.name).into_iter().collect();
    let desc: HashSet<String> = keyword_tokens(&candidate.description).into_iter().collect();
    let mut seen = HashSet::new();
    keyword_tokens(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .map(|t| {
            if fuzzy_hit(&t, &name) {
                2
            } else if fuzzy_hit(&t, &desc) {
                1
            } else {
                0
            }
        })
        .sum()
}

/// Deterministic selector; ties go to the earlier tool.
pub struct KeywordSelector;

#[async_trait]
impl Selector for KeywordSelector {
    async fn select(
        &self,
        query: &str,
        candidates: &[ToolDescriptor],
    ) -> Result<Selection, SelectionError> {
        if candidates.is_empty() {
            return Err(SelectionError::NoCandidates);
        }
        let mut best: Option<(usize, usize)> = None;
        for (i, c) in candidates.iter().enumerate() {
            let score = keyword_score(query, c);
            debug!(tool = %c.name, score, "keyword score");
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        best.map(|(index, score)| Selection {
            index,
            reason: Some(format!("keyword overlap score {score}")),
        })
        .ok_or(SelectionError::NoMatch)
    }

    fn name(&self) -> &'static str {
        "keyword"
    }
}

// ------------------------------------------------------------
// Fallback
// ------------------------------------------------------------

pub struct FallbackSelector {
    primary: Box<dyn Selector>,
    fallback: Box<dyn Selector>,
}

impl FallbackSelector {
    pub fn new(primary: Box<dyn Selector>, fallback: Box<dyn Selector>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl Selector for FallbackSelector {
    async fn select(
        &self,
        query: &str,
        candidates: &[ToolDescriptor],
    ) -> Result<Selection, SelectionError> {
        match self.primary.select(query, candidates).await {
            Ok(s) => Ok(s),
            Err(SelectionError::NoCandidates) => Err(SelectionError::NoCandidates),
            Err(e) => {
                warn!(
                    error = %e,
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    "selector fallback"
                );
                self.fallback.select(query, candidates).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "fallback"
    }
}
