mod output;

use clap::{Arg, ArgAction, ArgMatches, Command};
use kiln_core::pipeline::{PanicStrategy, Pipeline};
use kiln_core::{Module, PassConfig, Source, generate_error_report, verify_module};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Command::new("kiln")
        .version("0.1.0")
        .about("Optimizes and lowers kiln IR modules for code generation");

    let cli = setup_cli(cli);
    let matches = cli.get_matches();
    match dispatch_commands(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{}", output::error_line(&report));
            ExitCode::from(1)
        }
    }
}

fn level_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("opt-level")
            .help("Optimization level")
            .short('O')
            .long("opt-level")
            .value_parser(clap::value_parser!(u8).range(0..=3))
            .value_name("N"),
    )
    .arg(
        Arg::new("size-level")
            .help("Size optimization level")
            .short('s')
            .long("size-level")
            .value_parser(clap::value_parser!(u8).range(0..=2))
            .value_name("N"),
    )
    .arg(
        Arg::new("inline-threshold")
            .help("Inliner threshold, 0 disables inlining")
            .long("inline-threshold")
            .value_parser(clap::value_parser!(u32))
            .value_name("N"),
    )
    .arg(
        Arg::new("panic")
            .help("Panic strategy")
            .long("panic")
            .value_parser(["trap", "print"])
            .value_name("STRATEGY"),
    )
    .arg(
        Arg::new("verify")
            .help("Verify the module before optimizing it")
            .long("verify")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("config")
            .help("JSON pass configuration; flags override it")
            .long("config")
            .value_parser(clap::value_parser!(PathBuf))
            .value_name("FILE"),
    )
}

/// Sets up the CLI with subcommands and arguments.
fn setup_cli(cli: Command) -> Command {
    cli.subcommand_required(true)
        .subcommand(
            level_args(
                Command::new("opt")
                    .about("Optimize and lower modules")
                    .arg(
                        Arg::new("files")
                            .help("Module files or glob patterns (.kir or .json)")
                            .required(true)
                            .num_args(1..)
                            .index(1),
                    )
                    .arg(
                        Arg::new("output")
                            .help("Write the lowered module to FILE")
                            .short('o')
                            .long("output")
                            .value_parser(clap::value_parser!(PathBuf))
                            .value_name("FILE"),
                    )
                    .arg(
                        Arg::new("report")
                            .help("Print a phase report to stderr")
                            .long("report")
                            .value_parser(["json", "table"])
                            .value_name("FORMAT"),
                    )
                    .arg(
                        Arg::new("emit")
                            .help("Output encoding of the lowered module")
                            .long("emit")
                            .value_parser(["kir", "json"])
                            .default_value("kir")
                            .value_name("FORMAT"),
                    ),
            ),
        )
        .subcommand(
            Command::new("verify").about("Verify modules without changing them").arg(
                Arg::new("files")
                    .help("Module files or glob patterns")
                    .required(true)
                    .num_args(1..)
                    .index(1),
            ),
        )
        .subcommand(level_args(Command::new("plan").about("Print the phases a configuration runs")))
}

fn config_from(matches: &ArgMatches) -> Result<PassConfig, String> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PassConfig::from_file(path).map_err(|e| generate_error_report(&e))?,
        None => PassConfig::new(),
    };
    if let Some(level) = matches.get_one::<u8>("opt-level") {
        config = config.with_opt_level(*level);
    }
    if let Some(level) = matches.get_one::<u8>("size-level") {
        config = config.with_size_level(*level);
    }
    if let Some(threshold) = matches.get_one::<u32>("inline-threshold") {
        config = config.with_inliner_threshold(*threshold);
    }
    if let Some(strategy) = matches.get_one::<String>("panic") {
        let strategy: PanicStrategy = strategy.parse().map_err(|e| generate_error_report(&e))?;
        config = config.with_panic_strategy(strategy);
    }
    if matches.get_flag("verify") {
        config = config.with_verify_ir(true);
    }
    Ok(config)
}

fn load_modules(matches: &ArgMatches) -> Result<Vec<Module>, String> {
    let mut modules = Vec::new();
    for pattern in matches.get_many::<String>("files").into_iter().flatten() {
        let sources = Source::from_glob(pattern).map_err(|e| generate_error_report(e.as_ref()))?;
        for source in sources {
            info!("loading {}", source);
            modules.push(source.parse_module().map_err(|e| generate_error_report(e.as_ref()))?);
        }
    }
    Ok(modules)
}

/// Dispatches the command based on the parsed arguments.
fn dispatch_commands(matches: &ArgMatches) -> Result<(), String> {
    match matches.subcommand() {
        Some(("opt", sub_m)) => run_opt(sub_m),
        Some(("verify", sub_m)) => {
            for module in load_modules(sub_m)? {
                verify_module(&module).map_err(|e| format!("{}\n{}", generate_error_report(&e), e))?;
                println!("{}", output::ok_line(&module.name));
            }
            Ok(())
        }
        Some(("plan", sub_m)) => {
            let config = config_from(sub_m)?;
            println!("{}", output::plan_table(&config));
            Ok(())
        }
        _ => Err("no valid subcommand was used, see --help".to_string()),
    }
}

fn run_opt(matches: &ArgMatches) -> Result<(), String> {
    let config = config_from(matches)?;
    let modules = load_modules(matches)?;
    let out = matches.get_one::<PathBuf>("output");
    if out.is_some() && modules.len() != 1 {
        return Err(format!("--output needs exactly one module, got {}", modules.len()));
    }
    let emit = matches.get_one::<String>("emit").map(String::as_str).unwrap_or("kir");

    for mut module in modules {
        let mut progress = output::PhaseProgress::new(kiln_core::plan(&config).len(), &module.name);
        let result = Pipeline::new(config.clone()).with_observer(&mut progress).run(&mut module);
        progress.finish();
        let report = result.map_err(|e| {
            let mut text = generate_error_report(&e);
            if let Some(source) = std::error::Error::source(&e) {
                text.push_str(&format!("\n  caused by: {}", source));
            }
            text
        })?;

        match matches.get_one::<String>("report").map(String::as_str) {
            Some("json") => eprintln!("{}", report.to_json().map_err(|e| e.to_string())?),
            Some(_) => eprintln!("{}", output::report_table(&report)),
            None => {}
        }
        eprintln!("{}", output::summary_line(&report));

        let text = match emit {
            "json" => module.to_json().map_err(|e| e.to_string())?,
            _ => module.to_string(),
        };
        match out {
            Some(path) => fs::write(path, text).map_err(|e| format!("cannot write {:?}: {}", path, e))?,
            None => print!("{}", text),
        }
    }
    Ok(())
}
