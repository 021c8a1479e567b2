//! "Simple" aggregation of token predictions into entity spans.

use crate::model::TokenPrediction;

/// Tag type that marks tokens outside any entity.
const OUTSIDE: &str = "O";

/// A merged run of tokens sharing one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpan {
    pub label: String,
    pub start: usize,
    pub end: usize,
    /// Mean of the member tokens' scores.
    pub score: f64,
}

/// Split a tag into its BIO prefix and entity type.
///
/// `B-X` and `I-X` give `("B", "X")` and `("I", "X")`; anything else is
/// treated as an inside tag whose type is the whole label.
fn split_tag(label: &str) -> (&str, &str) {
    if let Some(kind) = label.strip_prefix("B-") {
        ("B", kind)
    } else if let Some(kind) = label.strip_prefix("I-") {
        ("I", kind)
    } else {
        ("I", label)
    }
}

/// Merge consecutive tokens into entity spans.
///
/// A new span starts whenever the entity type changes or a token carries a
/// `B-` prefix. Spans of type `O` are dropped.
pub fn aggregate_simple(tokens: &[TokenPrediction]) -> Vec<EntitySpan> {
    let mut spans = Vec::new();
    let mut group: Vec<&TokenPrediction> = Vec::new();

    for token in tokens {
        if let Some(last) = group.last() {
            let (prefix, kind) = split_tag(&token.label);
            let (_, last_kind) = split_tag(&last.label);
            if kind != last_kind || prefix == "B" {
                spans.extend(close_group(&group));
                group.clear();
            }
        }
        group.push(token);
    }
    spans.extend(close_group(&group));

    spans
}

fn close_group(group: &[&TokenPrediction]) -> Option<EntitySpan> {
    let (first, last) = (group.first()?, group.last()?);
    let (_, kind) = split_tag(&first.label);
    if kind == OUTSIDE {
        return None;
    }

    let score = group.iter().map(|t| t.score).sum::<f64>() / group.len() as f64;
    Some(EntitySpan {
        label: kind.to_string(),
        start: first.start,
        end: last.end,
        score,
    })
}
