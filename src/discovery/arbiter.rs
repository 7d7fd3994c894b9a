//! Semantic arbitration at the LLM boundary.
//!
//! Each surviving candidate below the bypass confidence gets one
//! arbitration request carrying descriptive schema context. The prompt
//! bakes the false-positive heuristics in: the model is told outright that
//! small sequential integers overlapping many unrelated tables are
//! coincidence and that ordinal-named columns are not foreign keys.
//!
//! A malformed or off-schema reply is a recoverable parse failure: it
//! becomes a stage warning and the deterministic score decides.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::catalog::TableMeta;
use crate::classify::ColumnProfile;
use crate::config::DiscoverySettings;
use crate::llm::{LlmClient, LlmError};
use crate::pipeline::stage::CancelToken;

use super::candidate::RelationshipCandidate;

/// The JSON shape the collaborator is asked to return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterVerdict {
    /// Whether the relationship is semantically real.
    pub accept: bool,
    /// Collaborator confidence (0.0 to 1.0).
    pub confidence: f64,
    /// Short justification.
    #[serde(default)]
    pub reason: String,
}

/// Outcome of arbitrating one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationOutcome {
    /// The candidate that was arbitrated.
    pub candidate: RelationshipCandidate,
    /// The parsed verdict, if the reply was usable.
    pub verdict: Option<ArbiterVerdict>,
    /// Warning recorded when the reply was malformed.
    pub warning: Option<String>,
    /// Final decision after fallback.
    pub accepted: bool,
    /// Final confidence after fallback.
    pub confidence: f64,
    /// Whether arbitration was skipped by the bypass policy.
    pub bypassed: bool,
}

/// Hands surviving candidates to the LLM collaborator for semantic
/// arbitration.
pub struct RelationshipArbiter {
    llm: Arc<dyn LlmClient>,
    settings: DiscoverySettings,
    concurrency: usize,
}

impl RelationshipArbiter {
    pub fn new(llm: Arc<dyn LlmClient>, settings: DiscoverySettings, concurrency: usize) -> Self {
        Self {
            llm,
            settings,
            concurrency: concurrency.max(1),
        }
    }

    /// Build the arbitration prompt for one candidate.
    pub fn prompt_for(
        &self,
        candidate: &RelationshipCandidate,
        tables: &[TableMeta],
        profiles: &[ColumnProfile],
    ) -> String {
        let purposes: HashMap<String, &str> = profiles
            .iter()
            .map(|p| (p.column.to_string(), p.purpose.as_str()))
            .collect();

        let describe = |col: &crate::catalog::ColumnRef| -> String {
            let purpose = purposes.get(&col.to_string()).copied().unwrap_or("unknown");
            let columns = tables
                .iter()
                .find(|t| {
                    t.schema.eq_ignore_ascii_case(&col.schema)
                        && t.name.eq_ignore_ascii_case(&col.table)
                })
                .map(|t| {
                    t.columns
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                })
                .unwrap_or_default();
            format!(
                "{} (purpose: {}; table columns: {})",
                col, purpose, columns
            )
        };

        let stats = &candidate.stats;
        format!(
            "You are validating a hypothesized foreign-key relationship in a \
             relational schema.\n\
             \n\
             Source column: {source}\n\
             Target column: {target}\n\
             Proposed by: {method}\n\
             Join statistics: source has {sd} distinct values, target has {td} \
             distinct values, {fo} source values are absent from the target, \
             {ro} target values are never referenced by the source.\n\
             \n\
             Important cautions:\n\
             - A column holding a small set of sequential integers (like 1, 2, \
             3) will overlap the auto-increment primary key of almost any \
             table. If the statistics could be explained by that coincidence, \
             reject the relationship.\n\
             - Columns named like ordinals or counters (week_number, \
             step_offset, sort_position) are sequence positions, not foreign \
             keys. Reject them regardless of overlap.\n\
             \n\
             Respond with exactly one JSON object, no other text:\n\
             {{\"accept\": true|false, \"confidence\": 0.0-1.0, \"reason\": \"...\"}}",
            source = describe(&candidate.source),
            target = describe(&candidate.target),
            method = candidate.method,
            sd = stats.source_distinct,
            td = stats.target_distinct,
            fo = stats.forward_orphans,
            ro = stats.reverse_orphans,
        )
    }

    /// Parse a collaborator reply, tolerating surrounding prose.
    ///
    /// Finds the first balanced JSON object in the text and deserializes
    /// it; anything else is a parse failure.
    pub fn parse_verdict(text: &str) -> Result<ArbiterVerdict, String> {
        let candidate_json = extract_json_object(text)
            .ok_or_else(|| "no JSON object found in response".to_string())?;
        let verdict: ArbiterVerdict = serde_json::from_str(candidate_json)
            .map_err(|e| format!("response is not the expected shape: {}", e))?;
        if !(0.0..=1.0).contains(&verdict.confidence) {
            return Err(format!(
                "confidence {} outside [0.0, 1.0]",
                verdict.confidence
            ));
        }
        Ok(verdict)
    }

    /// Arbitrate one candidate, falling back to the deterministic score on
    /// malformed output.
    async fn arbitrate_one(
        &self,
        candidate: RelationshipCandidate,
        tables: &[TableMeta],
        profiles: &[ColumnProfile],
    ) -> Result<ArbitrationOutcome, LlmError> {
        if candidate.confidence >= self.settings.arbitration_bypass_confidence {
            let confidence = candidate.confidence;
            return Ok(ArbitrationOutcome {
                candidate,
                verdict: None,
                warning: None,
                accepted: true,
                confidence,
                bypassed: true,
            });
        }

        let prompt = self.prompt_for(&candidate, tables, profiles);
        let reply = self.llm.generate(&prompt).await?;

        match Self::parse_verdict(&reply) {
            Ok(verdict) => {
                let accepted = verdict.accept;
                let confidence = if accepted {
                    verdict.confidence.clamp(0.0, 1.0)
                } else {
                    candidate.confidence
                };
                Ok(ArbitrationOutcome {
                    candidate,
                    verdict: Some(verdict),
                    warning: None,
                    accepted,
                    confidence,
                    bypassed: false,
                })
            }
            Err(parse_error) => {
                let warning = format!(
                    "arbitration reply for {} -> {} unusable ({}); keeping deterministic score",
                    candidate.source, candidate.target, parse_error
                );
                warn!("{}", warning);
                let confidence = candidate.confidence;
                Ok(ArbitrationOutcome {
                    candidate,
                    verdict: None,
                    warning: Some(warning),
                    accepted: true,
                    confidence,
                    bypassed: false,
                })
            }
        }
    }

    /// Arbitrate a candidate list under the configured concurrency cap.
    ///
    /// Independent candidates in the same chunk run concurrently; the
    /// cancellation token is observed between chunks, so a cancelled run
    /// stops issuing new requests after the in-flight chunk completes.
    pub async fn arbitrate_all(
        &self,
        candidates: Vec<RelationshipCandidate>,
        tables: &[TableMeta],
        profiles: &[ColumnProfile],
        cancel: &CancelToken,
    ) -> Result<Vec<ArbitrationOutcome>, LlmError> {
        let mut outcomes = Vec::with_capacity(candidates.len());

        for chunk in candidates.chunks(self.concurrency) {
            if cancel.is_cancelled() {
                break;
            }
            let futures: Vec<_> = chunk
                .iter()
                .map(|c| self.arbitrate_one(c.clone(), tables, profiles))
                .collect();
            for result in join_all(futures).await {
                outcomes.push(result?);
            }
        }

        Ok(outcomes)
    }
}

/// Extract the first balanced `{ ... }` object from free text.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
