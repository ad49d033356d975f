use clap::Parser;
use std::path::PathBuf;

use mapddl::errors::*;
use mapddl::parser::{parse_pddl_domain, parse_pddl_problem};
use mapddl::{Input, build_concurrency_domain, build_instance};
use serializer::{SerialOptions, add_noop_action, compile_serial, compile_serial_instance, infer_agent_type};

/// Reduces a multi-agent PDDL problem with concurrency constraints to an
/// equivalent classical one.
///
/// The compiled domain goes to standard output and the compiled instance to
/// standard error.
#[derive(Debug, Parser)]
#[command(name = "serialize", rename_all = "kebab-case")]
struct Args {
    /// Maximum number of atomic actions per joint action.
    #[arg(short = 'j', long)]
    max_joint_action_size: Option<u32>,
    /// Agents do actions in a specific order.
    #[arg(short = 'o', long)]
    use_agent_order: bool,
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
    let options = SerialOptions {
        agent_order: args.use_agent_order,
        max_joint_action_size: args.max_joint_action_size,
    };

    let parsed = parse_pddl_domain(Input::from_file(&args.domain)?)?;
    let mut domain = build_concurrency_domain(&parsed)?;

    // some domains do not declare the AGENT type; derive it from the actions
    infer_agent_type(&mut domain);

    if options.agent_order {
        add_noop_action(&mut domain)?;
    }

    let parsed_task = parse_pddl_problem(Input::from_file(&args.task)?)?;
    let instance = build_instance(&parsed_task, &domain)?;

    let compiled = compile_serial(&domain, &options)?;
    print!("{compiled}");

    let compiled_instance = compile_serial_instance(&domain, &compiled, &instance, &options)?;
    eprint!("{}", compiled_instance.pddl(&compiled));

    Ok(())
}
