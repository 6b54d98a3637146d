use super::orchestrator::RunReport;
use crate::error::CueFailure;

const RULE: &str = "═══════════════════════════════════════════════════════════════";

/// Print a summary of a finished run.
pub fn print_summary(report: &RunReport) {
    println!();
    println!("{RULE}");
    if report.is_success() {
        println!("                        Dubsub Run Complete                     ");
    } else {
        println!("                         Dubsub Run Failed                      ");
    }
    println!("{RULE}");
    println!();
    println!("  Input:      {}", report.run.input_path().display());
    println!(
        "  Languages:  {} -> {}",
        report.source_language.as_deref().unwrap_or("?"),
        report.target_language
    );
    if let Some(ref path) = report.subtitles {
        println!("  Subtitles:  {}", path.display());
    }
    if let Some(ref path) = report.dub_track {
        println!("  Dub track:  {}", path.display());
    }
    if let Some(ref path) = report.background {
        println!("  Background: {}", path.display());
    }
    if let Some(ref path) = report.output {
        println!("  Output:     {}", path.display());
    }

    println!();
    println!("  Stages:");
    for (stage, status) in report.run.statuses() {
        println!("    {:<12} {}", stage.as_str(), status);
    }

    println!();
    println!(
        "  Cache:      {} entries, {} hits, {} misses",
        report.cache_stats.entry_count, report.cache_stats.hit_count, report.cache_stats.miss_count
    );
    if report.cues > 0 {
        println!(
            "  Cues:       {} ({} from cache, {} translator calls)",
            report.cues, report.cache_hits, report.api_calls
        );
    }
    if report.adjusted_clips > 0 {
        println!("  Dub fit:    {} clip(s) adjusted to their window", report.adjusted_clips);
    }
    println!("  Elapsed:    {:.2}s", report.elapsed.as_secs_f64());

    print_failures("Untranslated cues", &report.translation_failures);
    print_failures("Silent dub cues", &report.synthesis_failures);

    if !report.warnings.is_empty() {
        println!();
        println!("  Warnings:");
        for warning in &report.warnings {
            println!("    - {}", warning);
        }
    }

    if let Some(ref error) = report.error {
        println!();
        println!("  Error: {}", error);
    }
    println!();
    println!("{RULE}");
}

fn print_failures(title: &str, failures: &[CueFailure]) {
    if failures.is_empty() {
        return;
    }
    println!();
    println!("  {} ({}):", title, failures.len());
    for failure in failures {
        println!("    #{:<5} {}", failure.cue_index, failure.error);
    }
}
