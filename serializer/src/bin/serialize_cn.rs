use clap::Parser;
use std::path::PathBuf;

use mapddl::errors::*;
use mapddl::parser::{parse_pddl_domain, parse_pddl_problem};
use mapddl::{Input, build_instance, build_network_domain};
use serializer::compile_network;

/// Reduces a multi-agent PDDL problem with a concurrency network to an
/// equivalent classical one.
///
/// The compiled domain goes to standard output and the compiled instance to
/// standard error.
#[derive(Debug, Parser)]
#[command(name = "serialize_cn", rename_all = "kebab-case")]
struct Args {
    /// Path to the multi-agent domain file.
    domain: PathBuf,
    /// Path to the task file.
    task: PathBuf,
}

fn main() {
    let args = Args::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(1);
    });
    if let Err(message) = run(&args) {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Res<()> {
    let parsed = parse_pddl_domain(Input::from_file(&args.domain)?)?;
    let domain = build_network_domain(&parsed)?;

    let parsed_task = parse_pddl_problem(Input::from_file(&args.task)?)?;
    let instance = build_instance(&parsed_task, &domain)?;

    let (compiled, compiled_instance) = compile_network(&domain, &instance)?;
    print!("{compiled}");
    eprint!("{}", compiled_instance.pddl(&compiled));

    Ok(())
}
