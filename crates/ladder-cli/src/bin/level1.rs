//! Tier 1: no canary, executable stack, no ASLR.

use ladder_cli::{exit_with, init_logging, parse_or_usage, run_direct, DirectArgs};
use ladder_runtime::TIER1;

fn main() {
    init_logging();
    let args: DirectArgs = parse_or_usage(&TIER1);
    exit_with(run_direct(&TIER1, args));
}
