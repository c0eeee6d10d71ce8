//! Prompts for judgment and summary calls.
//!
//! Prompts are laid out for cache efficiency:
//! 1. System prompt (rules, status vocabulary, response schema) - identical
//!    for every criterion of an evaluation, cached
//! 2. Criterion prompt (requirement plus retrieved passages) - not cached

use attest_core::{CriterionItem, Passage, ScoringMode, StatusScale};
use serde_json::Value as JsonValue;

/// Base rules shared by every judgment call.
pub const JUDGMENT_SYSTEM_PROMPT: &str = r#"
You are a compliance reviewer assessing documents against one requirement at a time.

## Rules
1. Judge ONLY the requirement you are given - do not invent criteria
2. Use ONLY the numbered passages provided - they are all you know about the documents
3. Every claim in your narrative must cite a passage by its passage_id
4. A quote, when given, must be copied exactly from the cited passage
5. If the requirement does not apply to these documents, answer with status "not_applicable"
6. If the passages are insufficient, say so in the narrative and lower your confidence

## Confidence
- 0.8-1.0: Several passages address the requirement directly
- 0.5-0.8: Evidence is present but partial or indirect
- < 0.5: Little or no evidence in the passages

Respond with a single JSON object and nothing else.
"#;

/// System prompt for document and overall summaries.
pub const SUMMARY_SYSTEM_PROMPT: &str = r#"
You summarize compliance documents for reviewers.
Write plain prose, at most five sentences, with no headings, lists or JSON.
Use only the material you are given.
"#;

/// Full system prompt for one evaluation: base rules, the status
/// vocabulary in force and the response schema.
pub fn judgment_system_prompt(scale: &StatusScale, schema: &JsonValue) -> String {
    let mut prompt = String::from(JUDGMENT_SYSTEM_PROMPT);

    prompt.push_str("\n## Status\n");
    match scale.mode() {
        ScoringMode::Numeric => {
            prompt.push_str(
                "Give a score from 0 to 100 for how fully the requirement is met. \
                 The status is derived from the score:\n",
            );
            for option in scale.options() {
                prompt.push_str(&format!("- {} (score >= {})\n", option.label, option.min_score));
            }
            prompt.push_str("Set \"status\" to the matching label.\n");
        }
        ScoringMode::Boolean | ScoringMode::Graded => {
            prompt.push_str("Set \"status\" to exactly one of these ids:\n");
            for option in scale.options() {
                prompt.push_str(&format!("- {} ({})\n", option.id, option.label));
            }
        }
    }

    prompt.push_str("\n## Response Schema\n");
    prompt.push_str(&serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string()));
    prompt.push('\n');
    prompt
}

/// User prompt for one criterion.
pub fn criterion_prompt(item: &CriterionItem, passages: &[Passage]) -> String {
    let mut prompt = format!("## Requirement {}\n{}\n", item.external_id, item.requirement);
    if let Some(description) = &item.description {
        prompt.push_str(&format!("\nGuidance: {}\n", description));
    }
    if let Some(category) = &item.category {
        prompt.push_str(&format!("Category: {}\n", category));
    }

    prompt.push_str("\n## Passages\n");
    if passages.is_empty() {
        prompt.push_str("(no passages were found for this requirement)\n");
    }
    push_passages(&mut prompt, passages);
    prompt
}

/// User prompt summarizing one document from its leading passages.
pub fn document_summary_prompt(position: usize, passages: &[Passage]) -> String {
    let mut prompt = format!("Summarize document {} from these excerpts.\n\n", position + 1);
    push_passages(&mut prompt, passages);
    prompt
}

/// User prompt combining per-document summaries.
pub fn combined_summary_prompt(summaries: &[String]) -> String {
    let mut prompt = String::from("These documents are evaluated together. Summarize them as one submission.\n\n");
    for (index, summary) in summaries.iter().enumerate() {
        prompt.push_str(&format!("Document {}: {}\n", index + 1, summary));
    }
    prompt
}

/// One line per criterion result for the overall summary.
#[derive(Debug, Clone)]
pub struct ResultLine<'a> {
    pub external_id: &'a str,
    pub status: &'a str,
    pub narrative: &'a str,
}

/// User prompt for the overall narrative.
pub fn overall_summary_prompt(
    criteria_set: &str,
    overall: Option<(f64, &str)>,
    results: &[ResultLine<'_>],
) -> String {
    let mut prompt = format!("Summarize the outcome of the \"{}\" review.\n", criteria_set);
    match overall {
        Some((score, label)) => prompt.push_str(&format!("Overall: {} ({:.1})\n", label, score)),
        None => prompt.push_str("Overall: no scorable results\n"),
    }
    prompt.push_str("\n## Results\n");
    for line in results {
        prompt.push_str(&format!("- {} [{}]: {}\n", line.external_id, line.status, line.narrative));
    }
    prompt
}

fn push_passages(prompt: &mut String, passages: &[Passage]) {
    for passage in passages {
        match &passage.location {
            Some(location) => prompt.push_str(&format!(
                "[passage_id: {}] ({})\n{}\n\n",
                passage.id, location, passage.text
            )),
            None => prompt.push_str(&format!("[passage_id: {}]\n{}\n\n", passage.id, passage.text)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::{CriterionItemId, DocumentId, StatusOption};

    fn item() -> CriterionItem {
        CriterionItem {
            id: CriterionItemId::new(),
            external_id: "AC-2".to_string(),
            requirement: "Access rights are reviewed at least quarterly.".to_string(),
            description: Some("Look for a review cadence.".to_string()),
            category: Some("Access control".to_string()),
            weight: None,
        }
    }

    #[test]
    fn test_system_prompt_lists_graded_ids_and_schema() {
        let scale = StatusScale::new(
            ScoringMode::Graded,
            vec![
                StatusOption::new("full", "Fully met", "green", 100.0, ScoringMode::Graded),
                StatusOption::new("none", "Not met", "red", 0.0, ScoringMode::Graded),
            ],
        )
        .unwrap();
        let schema = serde_json::json!({"required": ["narrative"]});
        let prompt = judgment_system_prompt(&scale, &schema);

        assert!(prompt.starts_with(JUDGMENT_SYSTEM_PROMPT));
        assert!(prompt.contains("- full (Fully met)"));
        assert!(prompt.contains("\"required\""));
    }

    #[test]
    fn test_system_prompt_lists_numeric_thresholds() {
        let scale = StatusScale::new(
            ScoringMode::Numeric,
            vec![
                StatusOption::new("ok", "Compliant", "green", 80.0, ScoringMode::Numeric),
                StatusOption::new("no", "Non-Compliant", "red", 0.0, ScoringMode::Numeric),
            ],
        )
        .unwrap();
        let prompt = judgment_system_prompt(&scale, &serde_json::json!({}));
        assert!(prompt.contains("Compliant (score >= 80)"));
    }

    #[test]
    fn test_criterion_prompt_carries_passage_ids() {
        let passage = Passage {
            id: "doc#3".to_string(),
            document_id: DocumentId::new(),
            text: "Reviews happen every quarter.".to_string(),
            relevance: 1.0,
            location: Some("page 2".to_string()),
        };
        let prompt = criterion_prompt(&item(), &[passage]);
        assert!(prompt.contains("## Requirement AC-2"));
        assert!(prompt.contains("[passage_id: doc#3] (page 2)"));
        assert!(prompt.contains("Guidance: Look for a review cadence."));
    }

    #[test]
    fn test_criterion_prompt_without_passages() {
        assert!(criterion_prompt(&item(), &[]).contains("no passages were found"));
    }

    #[test]
    fn test_overall_summary_prompt() {
        let prompt = overall_summary_prompt(
            "Baseline",
            Some((66.66, "Partial")),
            &[ResultLine {
                external_id: "S-1",
                status: "Compliant",
                narrative: "Reviews are quarterly.",
            }],
        );
        assert!(prompt.contains("Overall: Partial (66.7)"));
        assert!(prompt.contains("- S-1 [Compliant]: Reviews are quarterly."));
    }
}
