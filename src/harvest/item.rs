//! Per-row judgment handling: parse, download, store

use crate::harvest::batch::{ItemError, ItemHandler};
use crate::harvest::parser::parse_judgment_row;
use crate::sink::{RecordOutcome, ResultRecord, Sink};
use crate::source::{RawRecord, SourceClient};
use async_trait::async_trait;
use chrono::Utc;

/// Handles one judgment row against a source and a sink
pub struct JudgmentHandler<'a, S: ?Sized, K: ?Sized> {
    source: &'a S,
    sink: &'a K,
    court: &'a str,
}

impl<'a, S, K> JudgmentHandler<'a, S, K>
where
    S: SourceClient + ?Sized,
    K: Sink + ?Sized,
{
    pub fn new(source: &'a S, sink: &'a K, court: &'a str) -> Self {
        Self {
            source,
            sink,
            court,
        }
    }
}

#[async_trait]
impl<'a, S, K> ItemHandler for JudgmentHandler<'a, S, K>
where
    S: SourceClient + ?Sized,
    K: Sink + ?Sized,
{
    async fn handle(&self, item: &RawRecord) -> Result<ResultRecord, ItemError> {
        let parsed = parse_judgment_row(&item.html);
        let natural_key =
            ResultRecord::natural_key_for(parsed.artifact_path.as_deref(), &item.html);
        let label = parsed
            .get("title")
            .map(str::to_string)
            .unwrap_or_else(|| format!("row {}", item.row));

        let (artifact_url, outcome) = match &parsed.artifact_path {
            None => {
                tracing::warn!("No artifact link found for {}", label);
                (
                    None,
                    RecordOutcome::MissingArtifact {
                        reason: "row has no artifact link".to_string(),
                    },
                )
            }
            Some(path) => match self.source.download(path).await? {
                Some(local) => {
                    let location = self.sink.upload_artifact(&local)?;
                    (Some(location), RecordOutcome::Complete)
                }
                None => {
                    tracing::warn!("Failed to download artifact for {}", label);
                    (
                        None,
                        RecordOutcome::MissingArtifact {
                            reason: "portal returned no file".to_string(),
                        },
                    )
                }
            },
        };

        Ok(ResultRecord {
            natural_key,
            court: self.court.to_string(),
            fields: parsed.fields,
            artifact_url,
            outcome,
            harvested_at: Utc::now(),
        })
    }

    fn natural_key(&self, item: &RawRecord) -> String {
        let parsed = parse_judgment_row(&item.html);
        ResultRecord::natural_key_for(parsed.artifact_path.as_deref(), &item.html)
    }
}
