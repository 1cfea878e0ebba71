use std::path::PathBuf;
use std::sync::mpsc::sync_channel;
use std::thread;

use clap::{App, Arg, SubCommand};
use log::LevelFilter;

use netmd::{commands, group, send_track, NetMdError, Result, Transport, TransferEvent};

fn main() {
    let matches = App::new("netmd")
        .about("Host-side driver for Sony/Sharp NetMD MiniDisc recorders")
        .arg(
            Arg::with_name("index")
                .long("index")
                .takes_value(true)
                .default_value("0")
                .help("Which matching device to use, if more than one is attached"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Increase log verbosity (-v, -vv)"),
        )
        .subcommand(SubCommand::with_name("status").about("Print disc title, groups, and capacity"))
        .subcommand(
            SubCommand::with_name("send")
                .about("Upload a WAV file as a new track")
                .arg(Arg::with_name("title").required(true).help("Title for the new track"))
                .arg(Arg::with_name("file").required(true).help("Path to a PCM or ATRAC3 WAV file")),
        )
        .get_matches();

    let level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    if let Err(e) = run(&matches) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(matches: &clap::ArgMatches) -> Result<()> {
    let index: usize = matches
        .value_of("index")
        .unwrap_or("0")
        .parse()
        .map_err(|_| NetMdError::ProtocolMismatch("--index must be a number".into()))?;

    let context = rusb::Context::new()?;
    let mut transport = Transport::find(&context, index)?;

    match matches.subcommand() {
        ("send", Some(sub)) => {
            let title = sub.value_of("title").unwrap();
            let path = PathBuf::from(sub.value_of("file").unwrap());
            run_send(&mut transport, &path, title)
        }
        _ => run_status(&mut transport),
    }
}

fn run_status(transport: &mut Transport) -> Result<()> {
    let header = commands::request_disc_header(transport)?;
    let parsed = group::DiscHeader::parse(&header);
    let capacity = commands::request_disc_capacity(transport)?;
    let track_count = commands::request_track_count(transport)?;
    let params = commands::recording_parameters(transport)?;

    println!("Disc: {}", parsed.title);
    for g in &parsed.groups {
        println!("  group {}-{}: {}", g.start, g.end, g.title);
    }
    println!("Tracks: {}", track_count);
    println!(
        "Capacity: {}s recorded / {}s total / {}s available",
        capacity.recorded, capacity.total, capacity.available
    );
    println!(
        "Recording parameters: encoding={:#04x} channels={}",
        params.encoding, params.channels
    );
    Ok(())
}

fn run_send(transport: &mut Transport, path: &PathBuf, title: &str) -> Result<()> {
    let (tx, rx) = sync_channel(16);
    let handle = thread::spawn(move || {
        for event in rx {
            match event {
                TransferEvent::Setup => println!("negotiating secure session..."),
                TransferEvent::Send { transferred } => print!("\rsent {} bytes", transferred),
                TransferEvent::Poll => println!("\nwaiting for device to finish ingesting..."),
                TransferEvent::Track { track_number } => println!("assigned track {}", track_number),
            }
        }
    });

    let track_number = send_track(transport, path, title, Some(&tx))?;
    drop(tx);
    let _ = handle.join();

    println!("uploaded \"{}\" as track {}", title, track_number);
    Ok(())
}
