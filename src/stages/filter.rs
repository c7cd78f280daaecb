//! Document suitability filter.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::adapters::LlmBackend;
use crate::config::paths::DataPaths;
use crate::core::checkpoint::{CheckpointError, CheckpointStore};
use crate::domain::Item;
use crate::transcripts::TranscriptStore;

use super::{strip_code_fences, StageSettings};

/// Characters of transcript shown to the model
const EXCERPT_CHARS: usize = 800;

const SYSTEM_PROMPT: &str = r#"You screen video transcripts and decide whether a transcript can be turned into a readable document.

Not suitable:
1. Pure entertainment, comedy or pranks with no informational value
2. Content whose value is visual or auditory: travel footage, food tours, dance, music performance, ASMR, visual effects
3. Advertising, product placement or course sales with little information
4. Very low information density: filler words, repetition, no substance once written down
5. Plot recaps of films or series that make no sense without the picture

Suitable:
- Knowledge, tutorials and methods
- Experience reports and retrospectives
- In-depth analysis and industry insight
- Interviews and conversations with real substance
- Technical tutorials and tool introductions
- Thinking methods and psychology

Answer with JSON only, nothing else:
{"suitable": true, "reason": "one sentence explaining why"}

Rules:
1. Lean towards keeping: if unsure, answer true
2. Mixed content (a vlog with useful parts) is true
3. Judge only the transcript text itself"#;

/// Verdict for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suitability {
    pub suitable: bool,

    #[serde(default)]
    pub reason: String,

    /// Set when the model could not be reached and the item was kept
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub defaulted: bool,
}

impl Suitability {
    fn no_transcript() -> Self {
        Self {
            suitable: false,
            reason: "no transcript".to_string(),
            defaulted: false,
        }
    }

    /// Recorded without asking the model; re-judged once text shows up
    fn is_no_transcript(&self) -> bool {
        !self.suitable && !self.defaulted && self.reason == "no transcript"
    }

    fn kept_by_default() -> Self {
        Self {
            suitable: true,
            reason: "llm unavailable, kept by default".to_string(),
            defaulted: true,
        }
    }
}

/// `suitability.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuitabilityFile {
    pub meta: SuitabilityMeta,
    pub results: BTreeMap<String, Suitability>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuitabilityMeta {
    pub total: usize,
    pub suitable: usize,
    pub filtered_at: DateTime<Utc>,
    pub model: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterReport {
    pub judged: usize,
    pub suitable: usize,
    pub defaulted: usize,
    pub no_transcript: usize,
}

/// Load the verdicts written by the last filter run
pub fn load_suitability(paths: &DataPaths) -> Result<Option<SuitabilityFile>, CheckpointError> {
    CheckpointStore::new(paths.suitability()).load()
}

/// Decides which items are worth rewriting
pub struct SuitabilityFilter<'a, L: LlmBackend> {
    llm: &'a L,
    transcripts: &'a TranscriptStore,
    progress: CheckpointStore<HashMap<String, Suitability>>,
    output: CheckpointStore<SuitabilityFile>,
    settings: StageSettings,
}

impl<'a, L: LlmBackend> SuitabilityFilter<'a, L> {
    pub fn new(
        llm: &'a L,
        transcripts: &'a TranscriptStore,
        paths: &DataPaths,
        settings: StageSettings,
    ) -> Self {
        Self {
            llm,
            transcripts,
            progress: CheckpointStore::new(paths.suitability_progress()),
            output: CheckpointStore::new(paths.suitability()),
            settings,
        }
    }

    /// Judge every item that has no verdict yet, then rewrite the output file
    #[instrument(skip(self, items), fields(items = items.len(), model = %self.llm.model()))]
    pub async fn run(&self, items: &[Item]) -> Result<FilterReport> {
        let mut progress = self.progress.load_or_default()?;
        let remaining: Vec<&Item> = items
            .iter()
            .filter(|i| progress.get(&i.id).map_or(true, |v| v.is_no_transcript()))
            .collect();
        info!(done = progress.len(), remaining = remaining.len(), "Starting suitability filter");

        let mut report = FilterReport::default();
        let mut since_flush = 0;

        for item in remaining {
            let transcript = self
                .transcripts
                .get(&item.id)
                .with_context(|| format!("Failed to read transcript for {}", item.id))?;

            let verdict = match transcript {
                None if progress.contains_key(&item.id) => continue,
                None => {
                    report.no_transcript += 1;
                    Suitability::no_transcript()
                }
                Some(transcript) => {
                    let excerpt: String = transcript.text.chars().take(EXCERPT_CHARS).collect();
                    let verdict = self.judge(item, &excerpt).await;
                    tokio::time::sleep(self.settings.item_delay).await;
                    verdict
                }
            };

            report.judged += 1;
            if verdict.suitable {
                report.suitable += 1;
            }
            if verdict.defaulted {
                report.defaulted += 1;
            }
            info!(id = %item.id, suitable = verdict.suitable, reason = %verdict.reason, "Judged");

            progress.insert(item.id.clone(), verdict);
            since_flush += 1;
            if since_flush >= self.settings.checkpoint_every {
                self.progress.save(&progress)?;
                since_flush = 0;
            }
        }

        self.progress.save(&progress)?;
        self.write_output(items, &progress)?;

        info!(
            judged = report.judged,
            suitable = report.suitable,
            defaulted = report.defaulted,
            "Suitability filter finished"
        );
        Ok(report)
    }

    async fn judge(&self, item: &Item, excerpt: &str) -> Suitability {
        let user_prompt = format!(
            "Title: {}\nUploader: {}\nDescription: {}\n\nFirst {} characters of the transcript:\n{}",
            item.title, item.uploader, item.description, EXCERPT_CHARS, excerpt
        );

        let llm = self.llm;
        let result = self
            .settings
            .retry
            .run("suitability", || {
                let user_prompt = user_prompt.as_str();
                async move {
                    let raw = llm.complete(SYSTEM_PROMPT, user_prompt).await?;
                    parse_verdict(&raw)
                }
            })
            .await;

        match result {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(id = %item.id, error = %e, "Suitability check failed, keeping item");
                Suitability::kept_by_default()
            }
        }
    }

    /// Results restricted to the current collection, in id order
    fn write_output(
        &self,
        items: &[Item],
        progress: &HashMap<String, Suitability>,
    ) -> Result<(), CheckpointError> {
        let results: BTreeMap<String, Suitability> = items
            .iter()
            .filter_map(|item| progress.get(&item.id).map(|v| (item.id.clone(), v.clone())))
            .collect();

        let file = SuitabilityFile {
            meta: SuitabilityMeta {
                total: results.len(),
                suitable: results.values().filter(|v| v.suitable).count(),
                filtered_at: Utc::now(),
                model: self.llm.model().to_string(),
            },
            results,
        };

        self.output.save(&file)
    }
}

fn parse_verdict(raw: &str) -> Result<Suitability> {
    #[derive(Deserialize)]
    struct Verdict {
        suitable: bool,
        #[serde(default)]
        reason: String,
    }

    let verdict: Verdict = serde_json::from_str(strip_code_fences(raw))
        .with_context(|| format!("Model answer is not a verdict: {}", raw.chars().take(100).collect::<String>()))?;

    Ok(Suitability {
        suitable: verdict.suitable,
        reason: verdict.reason,
        defaulted: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verdict() {
        let v = parse_verdict(r#"{"suitable": false, "reason": "dance video"}"#).unwrap();
        assert!(!v.suitable);
        assert_eq!(v.reason, "dance video");

        let fenced = "```json\n{\"suitable\": true, \"reason\": \"tutorial\"}\n```";
        assert!(parse_verdict(fenced).unwrap().suitable);

        assert!(parse_verdict("I think it is suitable").is_err());
    }

    #[test]
    fn test_defaulted_flag_only_serialized_when_set() {
        let json = serde_json::to_value(Suitability::no_transcript()).unwrap();
        assert!(json.get("defaulted").is_none());

        let json = serde_json::to_value(Suitability::kept_by_default()).unwrap();
        assert_eq!(json["defaulted"], true);
        assert_eq!(json["suitable"], true);
    }
}
