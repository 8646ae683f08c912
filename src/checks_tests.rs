use super::*;

fn rules(count: usize) -> Vec<String> {
    (0..count).map(|index| format!("group-rule{index}")).collect()
}

fn ceil_log2(n: usize) -> usize {
    let mut bits = 0;
    while (1usize << bits) < n {
        bits += 1;
    }
    bits
}

#[test]
fn bisection_finds_single_culprit_within_log_bound() {
    for count in [2usize, 3, 5, 8, 13, 64, 100] {
        for culprit_index in 0..count {
            let enabled = rules(count);
            let culprit = enabled[culprit_index].clone();
            let probe = |checks: &[String]| -> Result<bool> { Ok(checks.contains(&culprit)) };
            let isolation = CheckIsolator::new(probe)
                .isolate(&enabled, "Stack dump:\n0. Program arguments: clang-tidy\n")
                .expect("isolate");
            assert_eq!(
                isolation.outcome,
                IsolationOutcome::Isolated(vec![culprit.clone()]),
                "count {count} culprit {culprit_index}"
            );
            assert_eq!(isolation.method, IsolationMethod::Bisected);
            assert!(
                isolation.runs <= ceil_log2(count) + 1,
                "count {count} culprit {culprit_index} took {} runs",
                isolation.runs
            );
            assert_eq!(isolation.set.necessary(), vec![culprit.clone()]);
            assert!(isolation.set.undetermined().is_empty());
        }
    }
}

#[test]
fn interacting_rules_are_inconclusive() {
    let enabled = rules(6);
    let needed = [enabled[1].clone(), enabled[4].clone()];
    let probe =
        |checks: &[String]| -> Result<bool> { Ok(needed.iter().all(|rule| checks.contains(rule))) };
    let isolation = CheckIsolator::new(probe)
        .isolate(&enabled, "Segmentation fault")
        .expect("isolate");
    assert_eq!(isolation.outcome, IsolationOutcome::Inconclusive(enabled.clone()));
    assert_eq!(isolation.outcome.checks(), enabled.as_slice());
    assert!(isolation.runs <= ceil_log2(6) + 1);
}

#[test]
fn partitions_always_cover_the_enabled_set() {
    let enabled = rules(9);
    let culprit = enabled[7].clone();
    let probe = |checks: &[String]| -> Result<bool> { Ok(checks.contains(&culprit)) };
    let isolation = CheckIsolator::new(probe)
        .isolate(&enabled, "")
        .expect("isolate");
    let mut union = isolation.set.necessary();
    union.extend(isolation.set.unnecessary());
    union.extend(isolation.set.undetermined());
    union.sort();
    let mut expected = enabled.clone();
    expected.sort();
    assert_eq!(union, expected);
}

#[test]
fn check_name_in_crash_message_skips_bisection() {
    let enabled = vec![
        "bugprone-bar".to_string(),
        "bugprone-foo".to_string(),
        "modernize-use-auto".to_string(),
    ];
    let mut seen: Vec<Vec<String>> = Vec::new();
    let probe = |checks: &[String]| -> Result<bool> {
        seen.push(checks.to_vec());
        Ok(checks.iter().any(|check| check == "bugprone-foo"))
    };
    let isolation = CheckIsolator::new(probe)
        .isolate(&enabled, "PLEASE submit a bug report\ncheck-name: bugprone-foo\n")
        .expect("isolate");
    assert_eq!(
        isolation.outcome,
        IsolationOutcome::Isolated(vec!["bugprone-foo".to_string()])
    );
    assert_eq!(isolation.method, IsolationMethod::Extracted);
    assert_eq!(isolation.runs, 1);
    assert_eq!(seen, vec![vec!["bugprone-foo".to_string()]]);
}

#[test]
fn wrong_extraction_falls_back_to_bisection() {
    let enabled = rules(4);
    let culprit = enabled[2].clone();
    let probe = |checks: &[String]| -> Result<bool> { Ok(checks.contains(&culprit)) };
    let message = format!("ASTMatcher: Processing '{}' against:\n", enabled[0]);
    let isolation = CheckIsolator::new(probe)
        .isolate(&enabled, &message)
        .expect("isolate");
    assert_eq!(isolation.outcome, IsolationOutcome::Isolated(vec![culprit.clone()]));
    assert_eq!(isolation.method, IsolationMethod::Bisected);
    assert!(isolation.runs <= 1 + ceil_log2(4) + 1);
}

#[test]
fn single_rule_needs_no_probe() {
    let enabled = vec!["bugprone-foo".to_string()];
    let probe = |_: &[String]| -> Result<bool> { panic!("no probe expected") };
    let isolation = CheckIsolator::new(probe)
        .isolate(&enabled, "")
        .expect("isolate");
    assert_eq!(isolation.outcome, IsolationOutcome::Isolated(enabled.clone()));
    assert_eq!(isolation.runs, 0);
}

#[test]
fn probe_errors_propagate() {
    let enabled = rules(4);
    let probe = |_: &[String]| -> Result<bool> { Err(crate::error::ReduceError::Cancelled) };
    let err = CheckIsolator::new(probe)
        .isolate(&enabled, "")
        .expect_err("cancelled");
    assert!(matches!(err, crate::error::ReduceError::Cancelled));
}

#[test]
fn extraction_patterns() {
    let message = "\
ASTMatcher: Processing 'readability-container-size-empty' against:
main.cpp:3:7: warning: unused variable 'x' [-Wunused-variable]
main.cpp:4:1: warning: use auto [modernize-use-auto,-warnings-as-errors]
";
    assert_eq!(
        extract_rule_names(message),
        vec![
            "readability-container-size-empty".to_string(),
            "modernize-use-auto".to_string(),
        ]
    );
    assert_eq!(
        extract_rule_names("check-name: clang-analyzer-core.NullDereference"),
        vec!["clang-analyzer-core.NullDereference".to_string()]
    );
    assert!(extract_rule_names("Segmentation fault (core dumped)").is_empty());
}

#[test]
fn rule_names_are_group_dash_rule() {
    for name in ["bugprone-foo", "clang-analyzer-core.NullDereference", "cert-err58-cpp"] {
        assert!(is_rule_name(name), "{name}");
    }
    for name in ["-Wunused-variable", "misc", "", "warnings as-errors"] {
        assert!(!is_rule_name(name), "{name}");
    }
    // The compiled pattern is shared, so matching in a loop stays cheap.
    assert!(std::ptr::eq(&*RULE_NAME, &*RULE_NAME));
    assert!((0..10_000).all(|_| is_rule_name("modernize-use-auto")));
}

#[test]
fn list_checks_output_is_parsed() {
    let output = "\
Enabled checks:
    bugprone-foo
    clang-analyzer-core.NullDereference
    modernize-use-auto

";
    assert_eq!(
        parse_enabled_checks(output),
        vec![
            "bugprone-foo".to_string(),
            "clang-analyzer-core.NullDereference".to_string(),
            "modernize-use-auto".to_string(),
        ]
    );
    assert!(parse_enabled_checks("No checks enabled.\n").is_empty());
}

#[test]
fn checks_argument_disables_everything_else() {
    assert_eq!(
        checks_argument(&["bugprone-foo".to_string(), "misc-bar".to_string()]),
        "--checks=-*,bugprone-foo,misc-bar"
    );
}
