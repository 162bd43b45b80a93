#![forbid(unsafe_code)]

use anyhow::Result;
use plait_sim::campaign::{CampaignConfig, run_campaign};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let result = run_campaign(&CampaignConfig::default())?;

    println!(
        "campaign complete: executed={} passed={} first_failing_seed={:?}",
        result.executed,
        result.all_passed(),
        result.first_failing_seed()
    );

    Ok(())
}
