//! BUSCO short summary discovery and parsing.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::domain::Metrics;

fn notation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"C:([\d.]+)%\[S:([\d.]+)%,D:([\d.]+)%\],F:([\d.]+)%,M:([\d.]+)%,n:(\d+)")
            .expect("notation regex is valid")
    })
}

fn lineage_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"lineage dataset is: (\S+)").expect("lineage regex is valid"))
}

/// Find the short summary BUSCO wrote under `dir`.
///
/// The lineage-specific summary wins over any generic one.
pub fn find_summary(dir: &Path) -> Result<PathBuf> {
    let base = glob::Pattern::escape(&dir.to_string_lossy());
    let mut found = Vec::new();
    for pattern in [
        format!("{}/short_summary.*.txt", base),
        format!("{}/**/short_summary.*.txt", base),
    ] {
        let paths = glob::glob(&pattern).with_context(|| format!("Invalid pattern {}", pattern))?;
        found.extend(paths.filter_map(|p| p.ok()));
        if !found.is_empty() {
            break;
        }
    }
    found.sort();

    found
        .iter()
        .find(|p| p.to_string_lossy().contains(".specific."))
        .or_else(|| found.first())
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("BUSCO summary file not found in {}", dir.display()))
}

/// Parse the metrics from a short summary.
///
/// `fallback_lineage` is reported when the summary does not name its
/// lineage dataset.
pub fn parse_summary(content: &str, fallback_lineage: &str) -> Result<Metrics> {
    let caps = notation_re()
        .captures(content)
        .context("No BUSCO notation line (C:..%[S:..%,D:..%],F:..%,M:..%,n:..) in summary")?;

    let pct = |i: usize| -> Result<f64> {
        caps[i]
            .parse::<f64>()
            .with_context(|| format!("Invalid percentage '{}' in BUSCO summary", &caps[i]))
    };

    let reference_lineage = lineage_re()
        .captures(content)
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| fallback_lineage.to_string());

    Ok(Metrics {
        reference_lineage,
        group_count: caps[6]
            .parse()
            .with_context(|| format!("Invalid group count '{}' in BUSCO summary", &caps[6]))?,
        complete_pct: pct(1)?,
        single_pct: pct(2)?,
        duplicated_pct: pct(3)?,
        fragmented_pct: pct(4)?,
        missing_pct: pct(5)?,
    })
}
