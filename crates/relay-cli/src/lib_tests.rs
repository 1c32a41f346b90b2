//! Tests for CLI argument parsing and command mapping.

use super::*;
use clap::Parser;
use serial_test::serial;

#[test]
fn test_parse_produce_with_overrides() {
    let cli = Cli::try_parse_from([
        "session-relay",
        "produce",
        "--session",
        "orders-17",
        "--iterations",
        "3",
    ])
    .unwrap();

    match cli.command {
        Commands::Produce {
            session,
            iterations,
            shutdown,
        } => {
            assert_eq!(session.as_deref(), Some("orders-17"));
            assert_eq!(iterations, Some(3));
            assert!(!shutdown);
        }
        other => panic!("expected Produce, got {other:?}"),
    }
}

#[test]
fn test_parse_consume_settlement() {
    let cli = Cli::try_parse_from([
        "session-relay",
        "consume",
        "--settlement",
        "dead-letter",
        "--max-idle-batches",
        "5",
    ])
    .unwrap();

    match cli.command {
        Commands::Consume {
            settlement,
            max_idle_batches,
            ..
        } => {
            assert_eq!(settlement, SettlementArg::DeadLetter);
            assert_eq!(max_idle_batches, Some(5));
        }
        other => panic!("expected Consume, got {other:?}"),
    }
}

#[test]
fn test_parse_shutdown_and_demo() {
    let cli = Cli::try_parse_from(["session-relay", "shutdown", "--session", "orders-1"]).unwrap();
    assert!(matches!(cli.command, Commands::Shutdown { .. }));

    let cli = Cli::try_parse_from(["session-relay", "demo", "--iterations", "2"]).unwrap();
    match cli.command {
        Commands::Demo { iterations } => assert_eq!(iterations, 2),
        other => panic!("expected Demo, got {other:?}"),
    }
}

#[test]
fn test_missing_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["session-relay"]).is_err());
}

#[test]
fn test_settlement_arg_mapping() {
    assert_eq!(
        SettlementArg::Complete.to_policy("unused"),
        SettlementPolicy::Complete
    );
    assert_eq!(
        SettlementArg::Abandon.to_policy("unused"),
        SettlementPolicy::Abandon
    );
    assert_eq!(
        SettlementArg::Defer.to_policy("unused"),
        SettlementPolicy::Defer
    );
    assert_eq!(
        SettlementArg::DeadLetter.to_policy("operator said so"),
        SettlementPolicy::DeadLetter {
            reason: "operator said so".to_string()
        }
    );
}

#[tokio::test]
#[serial]
async fn test_demo_command_runs_end_to_end() {
    let cli = Cli::try_parse_from(["session-relay", "demo", "--iterations", "1"]).unwrap();
    run(cli).await.expect("demo should succeed in-process");
}
