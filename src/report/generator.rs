//! Markdown and JSON rendering of the run summary.

use crate::aggregate::{AggregationOutcome, AggregationReport};
use crate::builder::BuildReport;
use crate::cli::OutputFormat;
use crate::report::RunSummary;
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown summary.
pub fn generate_markdown_summary(summary: &RunSummary) -> String {
    let mut output = String::new();

    output.push_str("# Cohortwise Run Summary\n\n");
    output.push_str(&generate_metadata_section(summary));

    if let Some(ref build) = summary.build {
        output.push_str(&generate_build_section(build));
    }

    if let Some(ref aggregation) = summary.aggregation {
        output.push_str(&generate_aggregation_section(aggregation));
    }

    output.push_str(&generate_footer());

    output
}

fn generate_metadata_section(summary: &RunSummary) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!(
        "- **As Of:** {}\n",
        summary.as_of.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Period:** {}\n", summary.period));
    section.push_str(&format!(
        "- **Duration:** {:.1}s\n",
        summary.duration_seconds
    ));
    let status = if summary.has_failures() {
        "⚠️ Partial (failures logged)"
    } else {
        "✅ Success"
    };
    section.push_str(&format!("- **Status:** {}\n\n", status));

    section
}

fn generate_build_section(build: &BuildReport) -> String {
    let mut section = String::new();

    section.push_str("## Contributions\n\n");
    section.push_str("| Eligible | Written | Skipped (recent) | Skipped (empty) | Failed |\n");
    section.push_str("|:---:|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {} | {} |\n\n",
        build.eligible, build.written, build.skipped_recent, build.skipped_empty, build.failed_users
    ));

    if !build.domain_failures.is_empty() {
        section.push_str("### Domain Fetch Failures\n\n");
        section.push_str("| Domain | Users Affected |\n");
        section.push_str("|:---|:---:|\n");
        for (domain, count) in &build.domain_failures {
            section.push_str(&format!("| {} | {} |\n", domain, count));
        }
        section.push('\n');
    }

    section
}

fn generate_aggregation_section(aggregation: &AggregationReport) -> String {
    let mut section = String::new();

    section.push_str("## Trends\n\n");
    section.push_str(&format!(
        "- **Window:** {} days\n",
        aggregation.window_days
    ));
    section.push_str(&format!(
        "- **Contributions in Window:** {}\n",
        aggregation.contributions_in_window
    ));
    section.push_str(&format!(
        "- **Distinct Contributors:** {}\n\n",
        aggregation.distinct_contributors
    ));

    if aggregation.outcome == AggregationOutcome::InsufficientPopulation {
        section.push_str("_Insufficient population: nothing was published this period._\n\n");
        return section;
    }

    section.push_str("| Category | Written | Suppressed | Failed |\n");
    section.push_str("|:---|:---:|:---:|:---:|\n");
    for (category, counts) in &aggregation.categories {
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            category, counts.written, counts.suppressed, counts.failed
        ));
    }
    section.push_str(&format!(
        "| **Total** | **{}** | **{}** | |\n\n",
        aggregation.trends_written(),
        aggregation.trends_suppressed()
    ));

    section
}

fn generate_footer() -> String {
    format!(
        "---\n\n*Generated by cohortwise v{}*\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Generate a JSON summary.
pub fn generate_json_summary(summary: &RunSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("Failed to serialize run summary")
}

/// Render `summary` in `format` and write it to `path`.
pub fn write_summary(summary: &RunSummary, path: &Path, format: OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Json => generate_json_summary(summary)?,
        OutputFormat::Markdown => generate_markdown_summary(summary),
    };

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write summary to {}", path.display()))?;

    Ok(())
}
