use clap::Parser;
use foreman::cli::commands::assignments::AssignmentsCommands;
use foreman::cli::{Cli, Commands};

#[test]
fn test_parse_assignments_list() {
    let cli = Cli::try_parse_from(["foreman", "assignments", "list", "--status", "dev-complete", "--all"]).unwrap();

    match cli.command {
        Commands::Assignments(args) => match args.command {
            AssignmentsCommands::List { status, all } => {
                assert_eq!(status.as_deref(), Some("dev-complete"));
                assert!(all);
            }
            _ => panic!("Wrong assignments command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_assignments_show() {
    let cli = Cli::try_parse_from(["foreman", "assignments", "show", "#42"]).unwrap();

    match cli.command {
        Commands::Assignments(args) => match args.command {
            AssignmentsCommands::Show { id } => assert_eq!(id, "#42"),
            _ => panic!("Wrong assignments command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_slots_with_json() {
    let cli = Cli::try_parse_from(["foreman", "-j", "slots", "-p", "codex"]).unwrap();

    assert!(cli.json);
    match cli.command {
        Commands::Slots(args) => assert_eq!(args.provider.as_deref(), Some("codex")),
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_dispatch_defaults() {
    let cli = Cli::try_parse_from(["foreman", "dispatch"]).unwrap();

    match cli.command {
        Commands::Dispatch(args) => {
            assert_eq!(args.provider, None);
            assert!(!args.watch);
            assert!(!args.merge);
            assert_eq!(args.interval, 10);
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_merge() {
    let cli = Cli::try_parse_from(["foreman", "merge", "--config", "ci.yaml"]).unwrap();
    assert!(matches!(cli.command, Commands::Merge(_)));
    assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("ci.yaml")));
}

#[test]
fn test_graph_path_needs_two_issues() {
    assert!(Cli::try_parse_from(["foreman", "graph", "--path", "3"]).is_err());
}

#[test]
fn test_invalid_command() {
    assert!(Cli::try_parse_from(["foreman", "invalid"]).is_err());
}

#[test]
fn test_missing_required_args() {
    assert!(Cli::try_parse_from(["foreman", "assignments", "show"]).is_err());
}
