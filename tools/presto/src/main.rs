use std::fs::File;
use std::process::ExitCode;

use clap::Parser;
use clap::ValueEnum;
use log::LevelFilter;

use presto_pds::AutomatonDot;
use presto_pds::SearchDirection;
use presto_pds::SolverInstance;
use presto_pds::TraceMode;
use presto_pds::read_p_automaton;
use presto_pds::read_pda;
use presto_utilities::PrestoError;
use presto_utilities::Timing;

#[derive(clap::Parser, Debug)]
#[command(
    about = "A command line tool for pushdown system reachability",
    arg_required_else_help = true
)]
struct Cli {
    /// The PDA file.
    pda_file: String,

    /// Engine. 0=no verification, 1=post*, 2=pre*, 3=dual
    #[arg(short, long, default_value_t = 0)]
    engine: usize,

    /// Initial P-automaton file input.
    #[arg(short, long)]
    initial_automaton: Option<String>,

    /// Final P-automaton file input.
    #[arg(short, long)]
    final_automaton: Option<String>,

    /// The kind of witness trace to print when reachable.
    #[arg(long, value_enum, default_value_t = TraceArg::None)]
    trace: TraceArg,

    /// Print the saturated initial-side automaton in DOT format afterwards.
    #[arg(long)]
    dot: bool,

    /// Increase the log verbosity; may be repeated.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print wall clock timings of the individual phases.
    #[arg(long)]
    timings: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TraceArg {
    None,
    Any,
    Shortest,
}

fn main() -> Result<ExitCode, PrestoError> {
    let cli = Cli::parse();
    let timing = Timing::new();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .parse_default_env()
        .init();

    let mut time_read = timing.start("read_pda");
    let pda = read_pda(File::open(&cli.pda_file)?)?;
    time_read.finish();

    let direction = match cli.engine {
        0 => None,
        1 => Some(SearchDirection::Post),
        2 => Some(SearchDirection::Pre),
        3 => Some(SearchDirection::Dual),
        engine => {
            return Err(format!("unknown engine {engine}, expected 0, 1, 2 or 3").into());
        }
    };

    if let Some(direction) = direction {
        println!(
            "Using {}",
            match direction {
                SearchDirection::Post => "post*",
                SearchDirection::Pre => "pre*",
                SearchDirection::Dual => "dual*",
            }
        );

        let initial_file = cli
            .initial_automaton
            .ok_or("an initial P-automaton file is required (-i)")?;
        let final_file = cli
            .final_automaton
            .ok_or("a final P-automaton file is required (-f)")?;

        let mut time_read = timing.start("read_p_automaton");
        let initial = read_p_automaton(File::open(&initial_file)?, &pda)?;
        let target = read_p_automaton(File::open(&final_file)?, &pda)?;
        time_read.finish();

        let trace_mode = match cli.trace {
            TraceArg::None => TraceMode::None,
            TraceArg::Any => TraceMode::Any,
            TraceArg::Shortest => TraceMode::Shortest,
        };

        let mut instance = SolverInstance::new(&pda, initial, target)?;

        let mut time_solve = timing.start("solve");
        let result = instance.solve(direction, trace_mode)?;
        time_solve.finish();

        println!("{}", if result.reachable { "Reachable" } else { "Not reachable" });
        if let Some(trace) = &result.trace {
            for configuration in trace {
                println!("{}", configuration.display(pda.labels()));
            }
        }
        if result.reachable {
            if let Some(weight) = &result.weight {
                println!("Weight: {weight}");
            }
        }

        if cli.dot {
            print!("{}", AutomatonDot::new(instance.initial_automaton()));
        }
    }

    if cli.timings {
        timing.print();
    }

    Ok(ExitCode::SUCCESS)
}
