//! Tier 2: stack canary, format-string leak.

use ladder_cli::{exit_with, init_logging, parse_or_usage, run_staged, StagedArgs};
use ladder_runtime::TIER2;

fn main() {
    init_logging();
    let args: StagedArgs = parse_or_usage(&TIER2);
    exit_with(run_staged(&TIER2, args));
}
