//! Tier 3: canary, NX stack, partial ASLR, gadget surface.

use ladder_cli::{exit_with, init_logging, parse_or_usage, run_staged, StagedArgs};
use ladder_runtime::TIER3;

fn main() {
    init_logging();
    let args: StagedArgs = parse_or_usage(&TIER3);
    exit_with(run_staged(&TIER3, args));
}
