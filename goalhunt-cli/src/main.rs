mod commands;
mod location;
mod observer;

use std::sync::Arc;

use clap::Parser;
use goalhunt_logic::{Coordinate, SyncSettings, Synchronizer, prelude::*};
use goalhunt_transport::{
    DEFAULT_API_URL, DEFAULT_SOCKET_URL, FrameEncoding, HttpRequestClient, TransportSettings,
    WebSocketTransport,
};
use log::{LevelFilter, error, info};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    commands::{Command, parse_command},
    location::FixedLocation,
    observer::ConsoleObserver,
};

type Session = Synchronizer<FixedLocation, WebSocketTransport, HttpRequestClient, ConsoleObserver>;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// WebSocket endpoint of the goal server
    #[arg(long, default_value = DEFAULT_SOCKET_URL)]
    socket_url: String,

    /// Base URL of the goal server's request endpoints
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Latitude of the device
    #[arg(long, requires = "lng", allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Longitude of the device
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    lng: Option<f64>,

    /// Only rely on the server pushing goal-reached events
    #[arg(long)]
    no_pull_check: bool,

    /// Never fetch the first goal over HTTP, wait for the connection instead
    #[arg(long)]
    no_goal_fallback: bool,

    /// Send MessagePack binary frames instead of JSON
    #[arg(long)]
    msgpack: bool,

    /// More logging, repeat for even more
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = colog::default_builder();
    builder.filter(None, level);
    builder.init();
}

async fn print_status(sync: &Session) {
    let snapshot = sync.snapshot().await;
    let fmt = |c: Option<Coordinate>| c.map_or_else(|| "unknown".to_string(), |c| c.to_string());

    println!("Connection: {:?}", sync.connection().state());
    println!("Phase:      {:?}", snapshot.phase);
    println!("Position:   {}", fmt(snapshot.current));
    println!("Goal:       {}", fmt(snapshot.goal));
    if let (Some(current), Some(goal)) = (snapshot.current, snapshot.goal) {
        println!("Distance:   {:.0}m", current.distance_to(&goal));
    }
    println!("Reached:    {} time(s)", snapshot.goal_reached_count);
}

/// Read commands until the user quits, stdin closes or Ctrl-C
async fn input_loop(sync: &Session) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(why) => {
                error!("Failed to read stdin: {why}");
                break;
            }
        };

        match parse_command(&line) {
            Ok(Command::Move(position)) => sync.reposition(position),
            Ok(Command::Status) => print_status(sync).await,
            Ok(Command::Quit) => break,
            Ok(Command::Nothing) => {}
            Err(why) => println!("{why:#}"),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let device = match (cli.lat, cli.lng) {
        (Some(lat), Some(lng)) => {
            Some(Coordinate::new(lat, lng).context("Invalid device position")?)
        }
        _ => None,
    };

    let transport = Arc::new(WebSocketTransport::new(TransportSettings {
        encoding: if cli.msgpack {
            FrameEncoding::MessagePack
        } else {
            FrameEncoding::Json
        },
        ..Default::default()
    }));
    let requests = Arc::new(HttpRequestClient::new(&cli.api_url)?);
    let settings = SyncSettings {
        pull_check: !cli.no_pull_check,
        goal_fetch_fallback: !cli.no_goal_fallback,
    };

    info!("Starting goalhunt {}", env!("CARGO_PKG_VERSION"));

    let sync = Arc::new(Session::new(
        &cli.socket_url,
        settings,
        transport,
        FixedLocation::new(device),
        requests,
        ConsoleObserver,
    ));

    let main_loop = tokio::spawn({
        let sync = sync.clone();
        async move { sync.main_loop().await }
    });

    input_loop(&sync).await;

    sync.dispose();
    main_loop.await.context("Synchronizer loop panicked")?;

    Ok(())
}
