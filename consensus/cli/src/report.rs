//! Plain-text rendering of run records

use std::fmt::Write as _;
use std::time::Duration;

use consensus_core::{RunRecord, RunSummary};

/// Format a duration as seconds, or minutes and seconds past one minute
pub fn format_time(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 60.0 {
        format!("{secs:.2} seconds")
    } else {
        let minutes = duration.as_secs() / 60;
        let rest = secs - (minutes * 60) as f64;
        format!("{minutes} min {rest:.2} sec")
    }
}

/// Every timed call of a run, fastest first
///
/// Failed calls are included; the consolidation call is listed as
/// `Final (<model>)`.
pub fn timing_rows(record: &RunRecord) -> Vec<(String, Duration)> {
    let mut rows: Vec<(String, Duration)> = record
        .results
        .iter()
        .map(|r| (r.model.to_string(), r.latency))
        .collect();

    if let Some(latency) = record.consolidation_latency {
        let model = record
            .consolidation_model
            .as_ref()
            .map_or_else(|| "consolidation".to_string(), ToString::to_string);
        rows.push((format!("Final ({model})"), latency));
    }

    rows.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    rows
}

fn banner(out: &mut String, title: &str) {
    let _ = writeln!(out, "\n=== {title} ===");
}

/// Full report of one run: input, per-model outputs, final output, timings
pub fn render_record(record: &RunRecord) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "Run {} ({})", record.id, record.created_at.to_rfc3339());
    if let Some(label) = &record.label {
        let _ = writeln!(out, "Section: {label}");
    }

    banner(&mut out, "Original Text");
    let _ = writeln!(out, "{}", record.input);

    for result in &record.results {
        banner(
            &mut out,
            &format!("Output from {} (took {})", result.model, format_time(result.latency)),
        );
        match (result.output(), result.error()) {
            (Some(text), _) => {
                let _ = writeln!(out, "{text}");
            }
            (None, Some(failure)) => {
                let _ = writeln!(out, "FAILED [{}] {}", failure.kind, failure.message);
            }
            (None, None) => {}
        }
    }

    let took = record
        .consolidation_latency
        .map(|d| format!(" (took {})", format_time(d)))
        .unwrap_or_default();
    banner(&mut out, &format!("Final Output{took}"));
    match (&record.consolidated, &record.consolidation_error) {
        (Some(text), _) => {
            let _ = writeln!(out, "{text}");
        }
        (None, Some(failure)) => {
            let _ = writeln!(out, "No final version [{}] {}", failure.kind, failure.message);
        }
        (None, None) => {}
    }

    let rows = timing_rows(record);
    banner(&mut out, "Performance Comparison");
    let width = rows.iter().map(|(name, _)| name.len()).max().unwrap_or(5).max(5);
    let _ = writeln!(out, "{:<width$}  Processing Time", "Model");
    for (name, latency) in &rows {
        let _ = writeln!(out, "{name:<width$}  {}", format_time(*latency));
    }

    if let (Some((fast, fast_time)), Some((slow, slow_time))) = (rows.first(), rows.last()) {
        let _ = writeln!(out, "\nFastest model: {fast} ({})", format_time(*fast_time));
        let _ = writeln!(out, "Slowest model: {slow} ({})", format_time(*slow_time));
    }

    out
}

/// One line per saved run, most recent first
pub fn render_summaries(summaries: &[RunSummary]) -> String {
    if summaries.is_empty() {
        return "No saved results found.\n".to_string();
    }

    let mut out = String::from("Saved Results:\n");
    for (i, summary) in summaries.iter().rev().enumerate() {
        let _ = writeln!(
            out,
            "  {}. {}  {}  {}/{} ok{}{}",
            i + 1,
            summary.id,
            summary.created_at.format("%Y-%m-%d %H:%M:%S"),
            summary.success_count,
            summary.model_count,
            if summary.consolidated { ", final" } else { "" },
            summary
                .label
                .as_ref()
                .map(|l| format!("  [{l}]"))
                .unwrap_or_default(),
        );
    }
    out.push_str("\nUse 'view <ID>' to see a saved run.\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use consensus_core::{Document, ErrorKind, Failure, ModelIdentity, ModelResult, RunId};
    use pretty_assertions::assert_eq;

    fn record() -> RunRecord {
        let id = |raw: &str| ModelIdentity::parse(raw).unwrap();
        RunRecord {
            id: RunId::from("run-1"),
            created_at: Utc::now(),
            label: Some("Revenue Model".into()),
            input: Document::new("raw"),
            results: vec![
                ModelResult::success(id("openai/gpt-4.1"), "a".into(), Duration::from_secs(12)),
                ModelResult::failure(
                    id("x-ai/grok-3-beta"),
                    Failure::new(ErrorKind::Timeout, "timed out after 300s"),
                    Duration::from_secs(300),
                ),
                ModelResult::success(id("meta-llama/llama-4-maverick"), "b".into(), Duration::from_secs(3)),
            ],
            consolidation_model: Some(id("anthropic/claude-3.7-sonnet:thinking")),
            consolidated: Some(Document::new("final")),
            consolidation_error: None,
            consolidation_latency: Some(Duration::from_secs(40)),
        }
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(Duration::from_millis(4250)), "4.25 seconds");
        assert_eq!(format_time(Duration::from_millis(61_500)), "1 min 1.50 sec");
        assert_eq!(format_time(Duration::from_secs(600)), "10 min 0.00 sec");
    }

    #[test]
    fn test_timing_rows_sorted() {
        let names: Vec<String> = timing_rows(&record()).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            [
                "meta-llama/llama-4-maverick",
                "openai/gpt-4.1",
                "Final (anthropic/claude-3.7-sonnet:thinking)",
                "x-ai/grok-3-beta",
            ]
        );
    }

    #[test]
    fn test_render_record() {
        let text = render_record(&record());
        assert!(text.contains("Section: Revenue Model"));
        assert!(text.contains("FAILED [timeout] timed out after 300s"));
        assert!(text.contains("Final Output (took 40.00 seconds)"));
        assert!(text.contains("Fastest model: meta-llama/llama-4-maverick (3.00 seconds)"));
        assert!(text.contains("Slowest model: x-ai/grok-3-beta (5 min 0.00 sec)"));
    }

    #[test]
    fn test_render_empty_listing() {
        assert_eq!(render_summaries(&[]), "No saved results found.\n");
    }
}
