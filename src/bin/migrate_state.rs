//! Copy file-backed bot state into the SQLite database.
//!
//! Usage: cargo run --bin migrate_state <askbot.json> [database.db]
//!
//! Reads `state_file` and `unlimited_chat_ids_file` from the config and writes
//! prompts, usage counters, histories, chat metadata and the unlimited list into
//! the database (`database.path` from the config unless given explicitly).
//! Prompts and messages are encrypted when `database.encryption_key` is set.

use std::path::PathBuf;

use askbot::assistant::{JsonFileBackend, SqliteBackend};
use askbot::config::Config;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <askbot.json> [database.db]", args[0]);
        eprintln!();
        eprintln!("Migrate the JSON state file and unlimited chat list into SQLite.");
        eprintln!("Existing rows for the same chats are overwritten.");
        std::process::exit(1);
    }

    let config = Config::load(&args[1]).unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(1);
    });

    let db_path: PathBuf = match args.get(2) {
        Some(path) => PathBuf::from(path),
        None => match &config.database {
            Some(db) => db.path.clone(),
            None => {
                eprintln!("ERROR: no database configured. Set use_database or pass a path.");
                std::process::exit(1);
            }
        },
    };

    println!("Reading state from {:?}...", config.state_file);
    println!("Reading unlimited chats from {:?}...", config.unlimited_chat_ids_file);
    let files = JsonFileBackend::open(
        &config.state_file,
        &config.unlimited_chat_ids_file,
        config.system_prompt.clone(),
    )
    .unwrap_or_else(|e| {
        eprintln!("Failed to read file state: {e}");
        std::process::exit(1);
    });
    let (state, whitelist) = files.snapshot();

    println!("Prompts: {}", state.prompts.len());
    println!("Histories: {}", state.histories.len());
    println!("Unlimited chats: {}", whitelist.len());

    let codec = config.content_codec().unwrap_or_else(|e| {
        eprintln!("Failed to set up encryption: {e}");
        std::process::exit(1);
    });
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    println!("Writing to {:?}...", db_path);
    let db = SqliteBackend::open(&db_path, config.system_prompt.clone(), codec).unwrap_or_else(|e| {
        eprintln!("Failed to open database: {e}");
        std::process::exit(1);
    });

    match db.import_snapshot(&state, &whitelist) {
        Ok(report) => {
            println!();
            println!("Imported:");
            println!("  prompts:         {}", report.prompts);
            println!("  usage counters:  {}", report.counters);
            println!("  messages:        {}", report.messages);
            println!("  unlimited chats: {}", report.unlimited);
            println!();
            println!("Done. Set \"use_database\": true to switch the bot over.");
        }
        Err(e) => {
            eprintln!("Migration failed, nothing was written: {e}");
            std::process::exit(1);
        }
    }
}
