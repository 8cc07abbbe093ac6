#![forbid(unsafe_code)]

use anyhow::{Result, bail};
use viewsync_sim::campaign::{CampaignConfig, run_campaign};

fn main() -> Result<()> {
    let report = run_campaign(&CampaignConfig::default())?;

    println!(
        "campaign complete: seeds={} passed={} interesting={}",
        report.seeds_run, report.seeds_passed, report.interesting_states_reached
    );

    if let Some(seed) = report.first_failure {
        for failure in &report.failures {
            for violation in &failure.violations {
                eprintln!("seed {}: {violation}", failure.seed);
            }
        }
        bail!("{} seeds failed; replay seed {seed} first", report.failures.len());
    }

    Ok(())
}
