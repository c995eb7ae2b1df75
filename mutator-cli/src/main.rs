use clap::Parser;
use mutator_cli::{init_logging, run, summary_line, Args};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging();

    let report = run(&args)?;

    for (index, outcome) in report.outcomes.iter().enumerate() {
        print!("{}", outcome.request.to_raw());
        println!();
        eprintln!("{}", summary_line(index + 1, outcome));
    }

    eprintln!("{} activity log entries", report.log_entries);
    if let Some(path) = &report.csv {
        eprintln!("Activity log written to {}", path.display());
    }

    Ok(())
}
