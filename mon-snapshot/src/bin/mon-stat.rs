use std::path::PathBuf;

use clap::Parser;
use mon_dump::{Reader, Value};
use mon_segment::{OsLiveness, Owner, Segment, SegmentOptions};
use tracing_subscriber::EnvFilter;

fn main() {
    let StatCommand { dir, identity, collect } = StatCommand::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let path = Segment::path_for(&dir, &identity);
    if !path.exists() {
        eprintln!("No monitoring segment at {}", path.display());
        std::process::exit(1);
    }

    // Local id zero is never used by a database handle, we leave no element behind.
    let options = SegmentOptions::new(dir);
    let mut segment = Segment::open(&identity, Owner::current(0), &options)
        .expect("failed to map the monitoring segment");
    let mut guard = segment.acquire().expect("failed to lock the monitoring segment");

    if collect {
        let removed = guard.collect(&OsLiveness);
        println!("collected {removed} elements of dead processes");
    }

    let usage = guard.usage();
    println!(
        "{}: layout {:#x}, used {} of {} bytes",
        path.display(),
        Segment::LAYOUT,
        usage.used,
        usage.allocated,
    );

    for element in guard.elements() {
        println!(
            "element of {} at {:#x}, {} bytes",
            element.owner, element.offset, element.length
        );

        let payload = guard.payload(&element);
        for record in Reader::new(&payload) {
            let relation = record.relation();
            println!("  {}", relation.name());

            for field in record {
                let name = relation
                    .columns()
                    .get(usize::from(field.id))
                    .map_or("?", |column| column.name);

                match field.value {
                    Value::GlobalId(id) => {
                        println!("    {name} = {}:{}", id.process_id(), id.counter())
                    }
                    Value::Integer(value) => println!("    {name} = {value}"),
                    Value::Timestamp(ts) => println!("    {name} = @{}us", ts.as_micros()),
                    Value::String(bytes) => {
                        println!("    {name} = {:?}", String::from_utf8_lossy(bytes))
                    }
                }
            }
        }
    }
}

/// Print the contents of a monitoring segment.
#[derive(Parser)]
struct StatCommand {
    #[arg(help = "The directory holding the segment files")]
    dir: PathBuf,

    #[arg(help = "The identity of the database")]
    identity: String,

    /// Remove the elements of processes that no longer exist before printing.
    #[arg(long)]
    collect: bool,
}
