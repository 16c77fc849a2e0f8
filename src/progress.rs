//! Per-run progress for `dedup ingest`.
//!
//! The engine reports each document's outcome together with the running
//! tally of the batch, so a long run shows how many copies are collapsing
//! into existing canonical records as it goes. Everything is written to
//! stderr; stdout carries only the final summary.

use std::io::Write;

use crate::dedup::{Outcome, RunSummary};

/// Human output prints a tally line every this many documents.
const HUMAN_EVERY: u64 = 100;

/// One progress event of a dedup run.
#[derive(Debug, Clone, Copy)]
pub enum RunEvent<'a> {
    /// The input directory has been walked.
    Discovered { collection: &'a str, documents: u64 },
    /// Document `n` of `total` has been decided. `outcome` is `None` when it
    /// failed; `tally` already includes it.
    Decided {
        collection: &'a str,
        n: u64,
        total: u64,
        outcome: Option<&'a Outcome>,
        tally: &'a RunSummary,
    },
}

/// Receives [`RunEvent`]s from [`Deduplicator::run`](crate::dedup::Deduplicator::run).
pub trait RunProgress: Send + Sync {
    fn report(&self, event: RunEvent<'_>);
}

fn tally_line(collection: &str, n: u64, total: u64, t: &RunSummary) -> String {
    format!(
        "dedup {}  {}/{}  new {}  merged {}  near-dup {}  errors {}",
        collection, n, total, t.new_canonical, t.merged_sources, t.near_duplicate_groups, t.errors
    )
}

/// The stderr line for `event`, if it gets one.
fn human_line(event: &RunEvent<'_>) -> Option<String> {
    match *event {
        RunEvent::Discovered {
            collection,
            documents,
        } => Some(format!("dedup {}  {} documents found", collection, documents)),
        RunEvent::Decided {
            collection,
            n,
            total,
            outcome,
            tally,
        } => {
            if outcome.is_none() || n % HUMAN_EVERY == 0 || n == total {
                Some(tally_line(collection, n, total, tally))
            } else {
                None
            }
        }
    }
}

fn json_value(event: &RunEvent<'_>) -> serde_json::Value {
    match *event {
        RunEvent::Discovered {
            collection,
            documents,
        } => serde_json::json!({
            "event": "discovered",
            "collection": collection,
            "documents": documents,
        }),
        RunEvent::Decided {
            collection,
            n,
            total,
            outcome,
            tally,
        } => serde_json::json!({
            "event": "decided",
            "collection": collection,
            "n": n,
            "total": total,
            "outcome": outcome.map_or("error", Outcome::as_str),
            "canonical_id": outcome.map(Outcome::canonical_id),
            "tally": tally,
        }),
    }
}

/// Tally lines on stderr, throttled to one per hundred documents plus every
/// failure and the final document.
pub struct StderrProgress;

impl RunProgress for StderrProgress {
    fn report(&self, event: RunEvent<'_>) {
        if let Some(line) = human_line(&event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
        }
    }
}

/// One JSON object per event on stderr.
pub struct JsonProgress;

impl RunProgress for JsonProgress {
    fn report(&self, event: RunEvent<'_>) {
        let _ = writeln!(std::io::stderr().lock(), "{}", json_value(&event));
    }
}

pub struct NoProgress;

impl RunProgress for NoProgress {
    fn report(&self, _event: RunEvent<'_>) {}
}

/// `--progress` values.
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a terminal, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn RunProgress> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally() -> RunSummary {
        RunSummary {
            processed: 150,
            new_canonical: 120,
            merged_sources: 28,
            near_duplicate_groups: 3,
            errors: 2,
            ..RunSummary::default()
        }
    }

    #[test]
    fn human_output_is_throttled_except_for_failures() {
        let t = tally();
        let outcome = Outcome::Unchanged {
            canonical_id: "doc_aaaaaaaaaaaa".into(),
        };
        let decided = |n, outcome| RunEvent::Decided {
            collection: "vol1",
            n,
            total: 150,
            outcome,
            tally: &t,
        };

        assert!(human_line(&decided(7, Some(&outcome))).is_none());
        assert!(human_line(&decided(7, None)).is_some());
        assert_eq!(
            human_line(&decided(100, Some(&outcome))).unwrap(),
            "dedup vol1  100/150  new 120  merged 28  near-dup 3  errors 2"
        );
        assert!(human_line(&decided(150, Some(&outcome))).is_some());
    }

    #[test]
    fn json_event_carries_outcome_and_tally() {
        let t = tally();
        let outcome = Outcome::MergedSource {
            canonical_id: "doc_aaaaaaaaaaaa".into(),
            promoted: true,
            exact_group: None,
        };
        let v = json_value(&RunEvent::Decided {
            collection: "vol1",
            n: 3,
            total: 150,
            outcome: Some(&outcome),
            tally: &t,
        });
        assert_eq!(v["outcome"], "merged_source");
        assert_eq!(v["canonical_id"], "doc_aaaaaaaaaaaa");
        assert_eq!(v["tally"]["merged_sources"], 28);

        let failed = json_value(&RunEvent::Decided {
            collection: "vol1",
            n: 4,
            total: 150,
            outcome: None,
            tally: &t,
        });
        assert_eq!(failed["outcome"], "error");
        assert!(failed["canonical_id"].is_null());
    }
}
