use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Subcommand};

use mr_core::{DiffKind, DiffResult, Error, ProviderPreference, Report, Result};

use crate::manager::{ComparisonManager, ComparisonRequest};

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    /// Page to compare, absolute http(s) URL
    pub url: String,

    /// Earliest capture date to consider (YYYY-MM-DD)
    #[arg(long)]
    pub since: Option<NaiveDate>,

    /// Latest capture date to consider (YYYY-MM-DD)
    #[arg(long)]
    pub until: Option<NaiveDate>,

    /// Number of evenly spaced captures to compare
    #[arg(long, short = 'n')]
    pub snapshots: Option<usize>,

    /// Summary provider for this comparison
    #[arg(long, alias = "style", value_enum)]
    pub provider: Option<ProviderPreference>,

    /// Print the inline word diff for each capture
    #[arg(long)]
    pub show_diff: bool,

    /// Print the stored report as JSON
    #[arg(long)]
    pub json: bool,
}

impl CompareArgs {
    pub fn to_request(&self) -> Result<ComparisonRequest> {
        Ok(ComparisonRequest {
            url: self.url.clone(),
            since: self.since.map(start_of_day).transpose()?,
            until: self.until.map(end_of_day).transpose()?,
            snapshots: self.snapshots,
            provider: self.provider,
        })
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ReportCommands {
    /// Compare a live page against archived captures and store the report
    Compare(CompareArgs),
    /// Show a stored report
    Report {
        /// Report id printed by `compare`
        id: String,

        #[arg(long)]
        show_diff: bool,

        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_command(command: ReportCommands, manager: &ComparisonManager) -> Result<()> {
    match command {
        ReportCommands::Compare(args) => {
            let report = manager.compare(args.to_request()?).await?;
            print_report(&report, args.show_diff, args.json)
        }
        ReportCommands::Report { id, show_diff, json } => {
            let report = manager.get_report(&id).await?;
            print_report(&report, show_diff, json)
        }
    }
}

fn start_of_day(date: NaiveDate) -> Result<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::InvalidRequest(format!("invalid date {}", date)))
}

fn end_of_day(date: NaiveDate) -> Result<DateTime<Utc>> {
    date.and_hms_opt(23, 59, 59)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::InvalidRequest(format!("invalid date {}", date)))
}

fn print_report(report: &Report, show_diff: bool, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", render_report(report, show_diff));
    }
    Ok(())
}

pub fn render_report(report: &Report, show_diff: bool) -> String {
    let mut out = String::new();
    out.push_str(&format!("📄 Report {}\n", report.id));
    out.push_str(&format!("   URL: {}\n", report.url));
    out.push_str(&format!(
        "   Created: {}  (expires {})\n",
        report.created_at.format("%Y-%m-%d %H:%M UTC"),
        report.ttl_expires_at.format("%Y-%m-%d")
    ));
    if let Some(title) = &report.live_doc.title {
        out.push_str(&format!("   Title: {}\n", title));
    }
    out.push_str(&format!(
        "   Live page: {} words, {} captures compared\n",
        report.live_doc.word_count,
        report.snapshot_docs.len()
    ));

    for diff in report.diffs.iter().chain(report.historical_diff.iter()) {
        let stats = diff.stats();
        out.push_str(&format!(
            "\n🔀 {} vs {}: {:.1}% changed (+{} / -{} words){}\n",
            diff.base_label,
            diff.compare_label,
            stats.ratio * 100.0,
            diff.count(DiffKind::Insert),
            diff.count(DiffKind::Delete),
            if diff.truncated { " [truncated]" } else { "" }
        ));
        if show_diff {
            out.push_str(&render_inline(diff));
            out.push('\n');
        }
    }

    for failure in &report.failures {
        out.push_str(&format!(
            "\n⚠️ Capture {} failed: {}",
            failure.timestamp.to_rfc3339(),
            failure.error
        ));
    }
    if !report.failures.is_empty() {
        out.push('\n');
    }
    for notice in &report.notices {
        out.push_str(&format!("\nℹ️ {}", notice));
    }
    if !report.notices.is_empty() {
        out.push('\n');
    }

    let provider = if report.summary.degraded {
        format!("{}, degraded", report.summary.provider_used)
    } else {
        report.summary.provider_used.to_string()
    };
    out.push_str(&format!("\n📝 Summary ({}):\n{}\n", provider, report.summary.text));
    out
}

/// Word diff in `[-removed-]{+added+}` form.
pub fn render_inline(diff: &DiffResult) -> String {
    diff.ops
        .iter()
        .map(|op| {
            let words = op.words.join(" ");
            match op.kind {
                DiffKind::Equal => words,
                DiffKind::Delete => format!("[-{}-]", words),
                DiffKind::Insert => format!("{{+{}+}}", words),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
