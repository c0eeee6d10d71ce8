//! Citation resolution against retrieved passages.
//!
//! Citations are referential claims into the passages handed to the
//! provider. A citation whose passage was never retrieved, or whose quote
//! does not appear in that passage, is stripped and flagged. Neither case
//! fails the judgment.

use std::collections::{BTreeSet, HashMap};

use super::CitationClaim;
use crate::types::{Citation, Passage, ResultFlag};

/// Citations that survived resolution plus a flag per stripped citation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedCitations {
    pub citations: Vec<Citation>,
    pub flags: Vec<ResultFlag>,
}

/// Resolves citation claims against one criterion's passages.
pub struct CitationResolver<'a> {
    passages: HashMap<&'a str, &'a Passage>,
}

impl<'a> CitationResolver<'a> {
    pub fn new(passages: &'a [Passage]) -> Self {
        Self {
            passages: passages.iter().map(|p| (p.id.as_str(), p)).collect(),
        }
    }

    /// Resolve claims in order. Duplicate flags for the same passage are
    /// collapsed.
    pub fn resolve(&self, claims: &[CitationClaim]) -> ResolvedCitations {
        let mut resolved = ResolvedCitations::default();
        let mut flagged = BTreeSet::new();

        for claim in claims {
            let passage_id = claim.passage_id.trim();
            let Some(passage) = self.passages.get(passage_id) else {
                tracing::warn!(passage_id, "Citation references a passage that was not retrieved");
                if flagged.insert(("unresolved", passage_id.to_string())) {
                    resolved.flags.push(ResultFlag::UnresolvedCitation {
                        passage_id: passage_id.to_string(),
                    });
                }
                continue;
            };

            let quote = claim
                .quote
                .as_deref()
                .map(str::trim)
                .filter(|q| !q.is_empty());
            if let Some(quote) = quote {
                if !quote_matches(&passage.text, quote) {
                    tracing::warn!(passage_id, "Citation quote not found in passage");
                    if flagged.insert(("mismatch", passage_id.to_string())) {
                        resolved.flags.push(ResultFlag::QuoteMismatch {
                            passage_id: passage_id.to_string(),
                        });
                    }
                    continue;
                }
            }

            resolved.citations.push(Citation {
                claim: claim.claim.trim().to_string(),
                passage_id: passage.id.clone(),
                document_id: passage.document_id,
                quote: quote.map(str::to_string),
                location: passage.location.clone(),
            });
        }

        resolved
    }
}

/// Quote containment with whitespace normalized on both sides.
fn quote_matches(text: &str, quote: &str) -> bool {
    normalize_whitespace(text).contains(&normalize_whitespace(quote))
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
