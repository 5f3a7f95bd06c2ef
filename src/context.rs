//! Grounding-context assembly and citation validation.
//!
//! [`build_context`] turns ranked retrieval results into a prompt block:
//! the current date first (the model must never guess "today"), a grounding
//! instruction, then one labeled source block per result. The token ceiling
//! drops whole lowest-ranked results, never truncating a block mid-content,
//! so a citation always refers to a complete chunk.
//!
//! [`extract_citations`] parses `[Source N]` labels back out of model
//! output and validates them against what was actually provided. A citation
//! to a source that was never in the context is logged and dropped, not
//! passed through to the caller.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::warn;

use crate::models::{Citation, RetrievalResult};
use crate::parser::CHARS_PER_TOKEN;

const EXCERPT_CHARS: usize = 200;

/// An assembled grounding context; `sources[i]` carries label `Source i+1`.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub text: String,
    pub sources: Vec<RetrievalResult>,
}

/// Assemble the grounding context from ranked results under a token budget.
pub fn build_context(
    results: &[RetrievalResult],
    now: DateTime<Utc>,
    max_tokens: usize,
) -> AssembledContext {
    let max_chars = max_tokens * CHARS_PER_TOKEN;

    let mut text = format!("Current date: {}.\n\n", now.format("%A %d %B %Y"));
    text.push_str(
        "Answer using only the sources below. Cite every fact with its \
         source label, e.g. [Source 1]. If the sources do not contain the \
         answer, say so instead of guessing.\n",
    );

    if results.is_empty() {
        text.push_str("\nNo relevant document content was found for this request.\n");
        return AssembledContext {
            text,
            sources: Vec::new(),
        };
    }

    let mut sources = Vec::new();
    for result in results {
        let label_no = sources.len() + 1;
        let header = match &result.temporal {
            Some(tc) => format!(
                "[Source {}: {}, {}; temporal: {}]",
                label_no,
                result.filename,
                result.locator.describe(),
                tc.summary()
            ),
            None => format!(
                "[Source {}: {}, {}]",
                label_no,
                result.filename,
                result.locator.describe()
            ),
        };
        let block = format!("\n{}\n{}\n", header, result.content.trim());

        // Results arrive ranked; once the budget is hit, everything after
        // is lower-ranked and dropped whole.
        if text.len() + block.len() > max_chars && !sources.is_empty() {
            break;
        }
        text.push_str(&block);
        sources.push(result.clone());
    }

    AssembledContext { text, sources }
}

/// Extract and validate `[Source N]` citations from model output.
///
/// Labels outside the provided range are integrity failures: logged via
/// `tracing::warn` and excluded from the returned set. Repeated citations
/// of the same source collapse to one entry.
pub fn extract_citations(output: &str, context: &AssembledContext) -> Vec<Citation> {
    static CITATION_RE: OnceLock<Regex> = OnceLock::new();
    let re = CITATION_RE.get_or_init(|| {
        Regex::new(r"\[Source (\d+)[^\]]*\]").expect("invalid citation regex")
    });

    let mut citations: Vec<Citation> = Vec::new();
    for caps in re.captures_iter(output) {
        let n: usize = match caps.get(1).and_then(|m| m.as_str().parse().ok()) {
            Some(n) => n,
            None => continue,
        };
        let Some(source) = n.checked_sub(1).and_then(|i| context.sources.get(i)) else {
            warn!(
                cited = n,
                provided = context.sources.len(),
                "model cited a source that was not in the context"
            );
            continue;
        };
        let label = format!("Source {}", n);
        if citations.iter().any(|c| c.label == label) {
            continue;
        }
        citations.push(Citation {
            label,
            filename: source.filename.clone(),
            locator: source.locator.clone(),
            excerpt: excerpt_of(&source.content),
        });
    }
    citations
}

fn excerpt_of(content: &str) -> String {
    if content.len() <= EXCERPT_CHARS {
        return content.to_string();
    }
    let mut end = EXCERPT_CHARS;
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    content[..end].to_string()
}
