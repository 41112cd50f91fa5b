//! Text summary builder for the daemon log and one-shot output.

use crate::metrics::format_bytes;
use crate::model::{CycleResult, CycleStatus, ImageResult, Reason};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_text_summary(result: &CycleResult) -> TextSummary {
    let mut lines = Vec::new();
    let mode = if result.dry_run { " (dry run)" } else { "" };
    let status = match result.status {
        CycleStatus::Completed => "completed",
        CycleStatus::Cancelled => "cancelled",
        CycleStatus::Failed => "failed",
    };
    let elapsed = result.finished_at - result.started_at;
    lines.push(format!(
        "Cleanup cycle {status}{mode} in {:.1}s",
        elapsed.as_seconds_f64()
    ));
    if let Some(err) = result.error.as_deref() {
        lines.push(format!("Error: {err}"));
    }
    lines.push(format!(
        "Scanned: {} images ({}), kept {}, candidates {}",
        result.scanned,
        format_bytes(result.scanned_bytes),
        result.kept,
        result.candidates
    ));
    if result.dry_run {
        lines.push(format!(
            "Would delete: {} ({})",
            result.simulated,
            format_bytes(result.simulated_bytes)
        ));
    } else {
        lines.push(format!(
            "Deleted: {} ({} reclaimed), failed {}",
            result.deleted,
            format_bytes(result.reclaimed_bytes),
            result.failed
        ));
    }
    let protected: Vec<String> = [Reason::TooYoung, Reason::MatchedExclusion]
        .into_iter()
        .filter_map(|reason| {
            let n = result
                .outcomes
                .iter()
                .filter(|o| o.result == ImageResult::Kept && o.decision.reason == reason)
                .count();
            (n > 0).then(|| format!("{n} {}", reason.label()))
        })
        .collect();
    if !protected.is_empty() {
        lines.push(format!("Protected: {}", protected.join(", ")));
    }
    if result.skipped > 0 {
        lines.push(format!("Skipped: {}", result.skipped));
    }

    for o in &result.outcomes {
        let tags = if o.tags.is_empty() {
            "<none>".to_string()
        } else {
            o.tags.join(",")
        };
        let line = match &o.result {
            ImageResult::Deleted => format!("  deleted   {} {tags}", o.image_id),
            ImageResult::Simulated => format!("  would rm  {} {tags}", o.image_id),
            ImageResult::Failed { reason } => format!("  FAILED    {} {tags}: {reason}", o.image_id),
            ImageResult::Skipped => format!("  skipped   {} {tags}", o.image_id),
            ImageResult::Kept | ImageResult::NotSelected => continue,
        };
        lines.push(line);
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Decision, ImageOutcome, Reason};
    use time::OffsetDateTime;

    fn outcome(id: &str, result: ImageResult) -> ImageOutcome {
        let decision = if result == ImageResult::Kept {
            Decision::keep(Reason::TooYoung)
        } else {
            Decision::delete()
        };
        ImageOutcome {
            image_id: id.into(),
            tags: vec![],
            size_bytes: 2048,
            decision,
            result,
        }
    }

    #[test]
    fn live_summary_lists_acted_on_images() {
        let mut r = CycleResult::empty(OffsetDateTime::now_utc(), false);
        r.outcomes = vec![
            outcome("k", ImageResult::Kept),
            outcome("d", ImageResult::Deleted),
            outcome(
                "f",
                ImageResult::Failed {
                    reason: "in use".into(),
                },
            ),
        ];
        let r = r.finish(CycleStatus::Completed, None);
        let s = build_text_summary(&r);

        assert!(s.lines[0].starts_with("Cleanup cycle completed in"));
        assert!(s.lines.iter().any(|l| l == "Deleted: 1 (2.0 KiB reclaimed), failed 1"));
        assert!(s.lines.iter().any(|l| l.contains("FAILED    f <none>: in use")));
        assert!(!s.lines.iter().any(|l| l.contains(" k ")));
        assert!(s.lines.iter().any(|l| l == "Protected: 1 too-young"));
    }

    #[test]
    fn failed_cycle_shows_the_error() {
        let r = CycleResult::empty(OffsetDateTime::now_utc(), true)
            .finish(CycleStatus::Failed, Some("engine unavailable".into()));
        let s = build_text_summary(&r);
        assert!(s.lines[0].contains("failed (dry run)"));
        assert_eq!(s.lines[1], "Error: engine unavailable");
        assert!(s.lines.iter().any(|l| l.starts_with("Would delete: 0")));
    }
}
