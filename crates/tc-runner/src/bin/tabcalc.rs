#![forbid(unsafe_code)]

use std::path::PathBuf;

use tc_runner::{RunOptions, run};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut template: Option<PathBuf> = None;
    let mut outfile: Option<PathBuf> = None;
    let mut column_labels = true;
    let mut verbose = false;
    let mut inputs = Vec::new();

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--template" | "-t" => {
                let value = args.next().ok_or("--template requires a YAML file")?;
                template = Some(PathBuf::from(value));
            }
            "--outfile" | "-o" => {
                let value = args.next().ok_or("--outfile requires a path")?;
                outfile = Some(PathBuf::from(value));
            }
            "--no-column-labels" => {
                column_labels = false;
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other if other.starts_with('-') && other != "-" => {
                return Err(format!("unknown argument: {other}").into());
            }
            input => inputs.push(PathBuf::from(input)),
        }
    }

    let template = template.ok_or("--template is required (see --help)")?;
    let options = RunOptions {
        outfile,
        column_labels,
        ..RunOptions::new(template, inputs)
    };
    let report = run(&options)?;

    if verbose {
        for input in &report.inputs {
            eprintln!("read path={} rows={}", input.path.display(), input.rows);
        }
        eprintln!(
            "wrote rows={} columns={} outfile={}",
            report.rows,
            report.columns,
            options
                .outfile
                .as_ref()
                .map_or_else(|| "<stdout>".to_owned(), |path| path.display().to_string())
        );
        for path in &report.stimtimes {
            eprintln!("wrote stimtimes={}", path.display());
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        "tabcalc\n\
         Usage:\n\
         \ttabcalc --template FILE [--outfile FILE] [--no-column-labels] [--verbose] INPUT...\n\
         Options:\n\
         \t-t, --template <file>  YAML template of computed, copydown and counter columns\n\
         \t-o, --outfile <file>   Write here instead of standard output\n\
         \t--no-column-labels     Omit the header line\n\
         \t-v, --verbose          Report inputs read and rows written on stderr\n\
         \t-h, --help             Show this help"
    );
}
