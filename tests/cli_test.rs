use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_demo_settles_every_payment_kind() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("demo");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("deposited 5000000 XUS to alice"))
        .stdout(predicate::str::contains("internal transfer completed"))
        .stdout(predicate::str::contains("below-threshold payment completed"))
        .stdout(predicate::str::contains("negotiated payment completed"))
        .stdout(predicate::str::contains("demo complete"));

    Ok(())
}

#[test]
fn test_help_lists_commands() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!());
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("demo"));

    Ok(())
}
