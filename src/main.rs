use clap::Parser;
use color_eyre::eyre;
use console::style;
use gpuprobe::options::{Command, InspectOptions, Options, ProfileOptions, TraceOptions};
use gpuprobe::tracegen::{self, index, AccessLogReader, SessionCounter, TraceIndex};
use gpuprobe::{instrument, replay};

fn profile(options: ProfileOptions) -> eyre::Result<()> {
    let config = replay::Config::load(&options.module)?;
    let counters = replay::read_counters(&options.counters)?;
    let instrument_options = instrument::Options {
        kind: options.kind,
        kernel_name: options.kernel,
    };
    let instrumentor = match &options.output {
        Some(output) => {
            let mut writer = utils::fs::open_writable(output)?;
            replay::profile(&config, &counters, instrument_options, &mut writer)?
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            replay::profile(&config, &counters, instrument_options, &mut stdout)?
        }
    };
    if let Some(csv) = &options.csv {
        instrumentor.write_csv(utils::fs::open_writable(csv)?)?;
        eprintln!("wrote profile to {}", style(csv.display()).cyan());
    }
    Ok(())
}

fn trace(options: TraceOptions) -> eyre::Result<()> {
    let config = replay::Config::load(&options.module)?;
    let events = replay::read_events(&options.events)?;
    let num_events = events.len();
    let (entry, header) = replay::trace(
        &config,
        options.kernel.as_deref(),
        events,
        tracegen::Options {
            database: options.database,
            format: options.format,
            header_only: options.header_only,
        },
        SessionCounter::new(),
    )?;
    eprintln!(
        "traced {} instructions of {} to {}",
        num_events,
        style(&entry.name).bold(),
        style(entry.path.display()).cyan()
    );
    println!("{header}");
    Ok(())
}

fn inspect(options: InspectOptions) -> eyre::Result<()> {
    let trace_index = TraceIndex::new(&options.database);
    for entry in trace_index.entries()? {
        println!("{}", style(&entry).bold());
        let header = index::read_header(&entry.header)?;
        println!("  {header}");
        println!(
            "  touched {} of global memory",
            human_bytes::human_bytes(header.address_span() as f64)
        );
        if let Some(ratio) = header.accesses_per_segment() {
            println!("  {ratio:.2} accesses per segment");
        }
        if options.events {
            for event in AccessLogReader::open(&entry.path, entry.format)? {
                println!("  {}", event?);
            }
        }
    }
    Ok(())
}

fn main() -> eyre::Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let options = Options::parse();
    match options.command {
        Command::Profile(options) => profile(options),
        Command::Trace(options) => trace(options),
        Command::Inspect(options) => inspect(options),
    }
}
