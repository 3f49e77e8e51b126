use anyhow::Context;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use hotswap_cli::{check_files, init_tracing, run_simulation, SimulatorOptions, EXIT_INCOMPATIBLE};
use hotswap_core::PipelineConfig;
use std::path::PathBuf;
use std::process::ExitCode;

fn cli() -> Command {
    Command::new("hotswap")
        .version(hotswap_cli::VERSION)
        .about("Live code-unit redefinition pipeline")
        .subcommand_required(true)
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .subcommand(
            Command::new("check")
                .about("Check whether a change can be hot-swapped")
                .arg(
                    Arg::new("old")
                        .long("old")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Descriptor of the running version"),
                )
                .arg(
                    Arg::new("new")
                        .long("new")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Descriptor of the candidate version"),
                )
                .arg(
                    Arg::new("allow-private-methods")
                        .long("allow-private-methods")
                        .action(ArgAction::SetTrue)
                        .help("Accept added or removed private methods"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the verdict as JSON"),
                ),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a hot-swap against an in-memory runtime")
                .arg(
                    Arg::new("instances")
                        .long("instances")
                        .default_value("10")
                        .value_parser(value_parser!(usize))
                        .help("Live instances to register"),
                )
                .arg(
                    Arg::new("failing-hooks")
                        .long("failing-hooks")
                        .default_value("0")
                        .value_parser(value_parser!(usize))
                        .help("Instances whose post-update hook fails"),
                )
                .arg(
                    Arg::new("runtime-failures")
                        .long("runtime-failures")
                        .default_value("0")
                        .value_parser(value_parser!(usize))
                        .help("Transient runtime rejections before success"),
                )
                .arg(
                    Arg::new("config")
                        .long("config")
                        .value_parser(value_parser!(PathBuf))
                        .help("Pipeline configuration (TOML)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as JSON"),
                ),
        )
        .subcommand(Command::new("config").about("Print the default configuration as TOML"))
}

fn check(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let old = args.get_one::<PathBuf>("old").context("--old is required")?;
    let new = args.get_one::<PathBuf>("new").context("--new is required")?;
    let verdict = check_files(old, new, args.get_flag("allow-private-methods"))?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        println!("{}", verdict.summary());
        for violation in verdict.violations() {
            println!("  - {violation}");
        }
    }
    Ok(if verdict.is_compatible() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INCOMPATIBLE)
    })
}

async fn simulate(args: &ArgMatches) -> anyhow::Result<ExitCode> {
    let options = SimulatorOptions {
        instances: args.get_one::<usize>("instances").copied().unwrap_or(10),
        failing_hooks: args.get_one::<usize>("failing-hooks").copied().unwrap_or(0),
        runtime_failures: args.get_one::<usize>("runtime-failures").copied().unwrap_or(0),
    };
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    let report = run_simulation(options, config).await?;
    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("json-logs"), "warn");

    match matches.subcommand() {
        Some(("check", args)) => check(args),
        Some(("simulate", args)) => simulate(args).await,
        Some(("config", _)) => {
            print!("{}", PipelineConfig::default().to_toml_string()?);
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::FAILURE),
    }
}
