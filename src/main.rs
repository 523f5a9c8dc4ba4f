//! equeue-sim: discrete-event simulator for dataflow graphs

use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;

use equeue_sim::config::Config;
use equeue_sim::demos;
use equeue_sim::ir::Graph;
use equeue_sim::sim::{simulate, SimStats};
use equeue_sim::trace::ChromeTraceWriter;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().collect();

    let mut trace_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;
    let mut demo: Option<String> = None;
    let mut list = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--trace" | "-t" => {
                i += 1;
                let path = args.get(i).context("--trace needs a file path")?;
                trace_path = Some(PathBuf::from(path));
            }
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).context("--config needs a file path")?;
                config_path = Some(PathBuf::from(path));
            }
            "--list" | "-l" => list = true,
            "--sample-config" => {
                print!("{}", Config::sample_config());
                return Ok(());
            }
            other if !other.starts_with('-') => demo = Some(other.to_string()),
            other => anyhow::bail!("unknown option `{}`", other),
        }
        i += 1;
    }

    if list {
        for name in demos::list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let Some(demo) = demo else {
        eprintln!("Usage: equeue-sim [--trace FILE] [--config FILE] <demo>");
        eprintln!("       equeue-sim --list");
        eprintln!("       equeue-sim --sample-config");
        eprintln!();
        eprintln!("Demos: {}", demos::list().join(", "));
        std::process::exit(1);
    };

    let graph =
        demos::build(&demo).with_context(|| format!("unknown demo `{}` (try --list)", demo))?;
    let config = Config::load(config_path.as_deref());

    println!("Running: {}", demo);
    let stats = match &trace_path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot create trace file {}", path.display()))?;
            let stats = run_traced(&graph, &config, BufWriter::new(file))?;
            println!("Trace written to {}", path.display());
            stats
        }
        None => run_traced(&graph, &config, io::stdout().lock())?,
    };

    println!();
    stats.print_summary();
    Ok(())
}

/// Frame the trace stream around the run. The array is closed even on
/// an aborted run, so the emitted prefix stays loadable.
fn run_traced<W: Write>(graph: &Graph, config: &Config, out: W) -> anyhow::Result<SimStats> {
    let mut writer = ChromeTraceWriter::new(out);
    writer.start()?;
    let result = simulate(graph, "graph", config, &mut writer);
    writer.finish()?;
    result.map_err(Into::into)
}
