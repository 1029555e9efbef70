use std::path::PathBuf;
use std::process;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use scrabbledb::load;
use scrabbledb::query;
use scrabbledb::schema;
use scrabbledb::store::Store;

/// Batch loader and query tool for the cross-tables Scrabble corpus.
#[derive(Parser)]
#[command(name = "scrabbledb", version)]
struct Cli {
    /// Directory holding the store. Created on first use.
    store: PathBuf,

    /// One of CreateTable, LoadTable, Query1, Query2, Query3, CountRecords.
    /// Case-insensitive.
    action: String,

    /// Arguments of the chosen action.
    params: Vec<String>,
}

const EXIT_USAGE: i32 = -1;
const EXIT_MISSING_FOLDER: i32 = -2;

fn main() {
    init_tracing();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            process::exit(if err.use_stderr() { EXIT_USAGE } else { 0 });
        }
    };
    match run(&cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("error: {:#}", err);
            process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "scrabbledb=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn run(cli: &Cli) -> Result<i32> {
    let started = Instant::now();
    let store = Store::open(&cli.store)?;
    let params: Vec<&str> = cli.params.iter().map(|p| p.as_str()).collect();

    match (cli.action.to_uppercase().as_str(), params.as_slice()) {
        ("CREATETABLE", []) => {
            schema::create_or_replace_table(&store)?;
            println!("Created table {}.", schema::TABLE_NAME);
        }
        ("LOADTABLE", [folder]) => {
            let folder = PathBuf::from(*folder);
            if !folder.is_dir() {
                eprintln!("Error: folder {} does not exist.", folder.display());
                return Ok(EXIT_MISSING_FOLDER);
            }
            let mut table = store.table(schema::TABLE_NAME)?;
            let records = load::load_from_folder(&mut table, &folder)?;
            println!("Loaded {} records.", records);
        }
        ("QUERY1", [tourney, winner]) => {
            let tourney = parse_id("tourneyid", tourney)?;
            let table = store.table(schema::TABLE_NAME)?;
            let opponents = query::opponents_of_winner(&table, tourney, winner)?;
            println!(
                "{} opponents of winner {} in tourney {}:",
                opponents.len(),
                winner,
                tourney
            );
            for id in opponents {
                println!("{}", id);
            }
        }
        ("QUERY2", [first, last]) => {
            let first = parse_id("firsttourneyid", first)?;
            let last = parse_id("lasttourneyid", last)?;
            let table = store.table(schema::TABLE_NAME)?;
            let mut players: Vec<String> = query::repeat_players_in_span(&table, first, last)?
                .into_iter()
                .collect();
            players.sort();
            println!(
                "{} players in more than one game of every tourney in [{}, {}):",
                players.len(),
                first,
                last
            );
            for id in players {
                println!("{}", id);
            }
        }
        ("QUERY3", [tourney]) => {
            let tourney = parse_id("tourneyid", tourney)?;
            let table = store.table(schema::TABLE_NAME)?;
            let games = query::tied_games(&table, tourney)?;
            println!("{} tied games in tourney {}:", games.len(), tourney);
            for id in games {
                println!("{}", id);
            }
        }
        ("COUNTRECORDS", []) => {
            let table = store.table(schema::TABLE_NAME)?;
            println!("Total rows in table: {}", query::count_records(&table)?);
        }
        _ => {
            usage();
            return Ok(EXIT_USAGE);
        }
    }

    info!(action = %cli.action, elapsed = ?started.elapsed(), "done");
    Ok(0)
}

fn parse_id(what: &str, raw: &str) -> Result<u64> {
    raw.parse()
        .with_context(|| format!("{} {:?} is not a non-negative integer", what, raw))
}

fn usage() {
    eprintln!("Usage: scrabbledb <store> <action> [<param>...]");
    eprintln!("Actions:");
    eprintln!("  CreateTable");
    eprintln!("  LoadTable <folder>");
    eprintln!("  Query1 <tourneyid> <winnername>");
    eprintln!("  Query2 <firsttourneyid> <lasttourneyid>");
    eprintln!("  Query3 <tourneyid>");
    eprintln!("  CountRecords");
}
