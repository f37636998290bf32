// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use clap::{Parser, ValueEnum};
use csv::{ReaderBuilder, StringRecord, Trim, Writer};
use library_ledger_rs::{
    BookId, CopyId, CustomerId, Engine, LibraryError, NewBook, NewCustomer, RequestContext,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

/// Library Ledger - Replay circulation command CSV files
///
/// Reads administrative and circulation commands from a CSV file, applies
/// them in order, and writes a report to stdout.
#[derive(Parser, Debug)]
#[command(name = "library-ledger-rs")]
#[command(about = "Replays library circulation commands from a CSV", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: op,a,b,c
    /// Example: cargo run -- commands.csv > copies.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Report written to stdout after the run
    #[arg(long, value_enum, default_value_t = Report::Copies)]
    report: Report,

    /// Staff member recorded on every command
    #[arg(long, default_value = "batch")]
    actor: String,

    /// Log filter, e.g. `info` or `library_ledger_rs=debug`
    #[arg(long, env = "LIBRARY_LOG", default_value = "warn")]
    log: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Report {
    /// One row per copy with its availability
    Copies,
    /// One row per ledger transaction
    Ledger,
}

fn main() {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the report.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log))
        .with_writer(std::io::stderr)
        .init();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = match process_commands(BufReader::new(file), &args.actor) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Error processing commands: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = engine.check_consistency() {
        eprintln!("Ledger inconsistent after run: {}", e);
        process::exit(1);
    }

    let written = match args.report {
        Report::Copies => write_copies(&engine, std::io::stdout()),
        Report::Ledger => write_ledger(&engine, std::io::stdout()),
    };
    if let Err(e) = written {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, a, b, c`. Argument meaning depends on `op`.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    #[serde(default)]
    a: Option<String>,
    #[serde(default)]
    b: Option<String>,
    #[serde(default)]
    c: Option<String>,
}

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    AddBook(NewBook),
    AddCopy(BookId),
    AddCustomer(NewCustomer),
    Checkout(CopyId, CustomerId),
    Return(CopyId, CustomerId),
    DeleteCopy(CopyId),
    DeleteBook(BookId),
    DeleteCustomer(CustomerId),
}

impl CsvRecord {
    /// Converts a CSV record to a command.
    ///
    /// Returns `None` for unknown operations, missing arguments, or ids that
    /// are not numbers.
    fn into_command(self) -> Option<Command> {
        fn id<T: From<u32>>(field: &Option<String>) -> Option<T> {
            field.as_deref()?.parse::<u32>().ok().map(T::from)
        }

        match self.op.to_lowercase().as_str() {
            "add_book" => Some(Command::AddBook(NewBook::new(self.a?, self.b?, self.c?))),
            "add_copy" => Some(Command::AddCopy(id(&self.a)?)),
            "add_customer" => Some(Command::AddCustomer(NewCustomer::new(
                self.a?, self.b?, self.c?,
            ))),
            "checkout" => Some(Command::Checkout(id(&self.a)?, id(&self.b)?)),
            "return" => Some(Command::Return(id(&self.a)?, id(&self.b)?)),
            "delete_copy" => Some(Command::DeleteCopy(id(&self.a)?)),
            "delete_book" => Some(Command::DeleteBook(id(&self.a)?)),
            "delete_customer" => Some(Command::DeleteCustomer(id(&self.a)?)),
            _ => None,
        }
    }
}

fn apply(engine: &Engine, ctx: &RequestContext, command: Command) -> Result<(), LibraryError> {
    match command {
        Command::AddBook(book) => engine.add_book(ctx, book).map(drop),
        Command::AddCopy(book) => engine.add_copy(ctx, book).map(drop),
        Command::AddCustomer(customer) => engine.add_customer(ctx, customer).map(drop),
        Command::Checkout(copy, customer) => engine.checkout(ctx, copy, customer).map(drop),
        Command::Return(copy, customer) => engine.return_book(ctx, copy, customer).map(drop),
        Command::DeleteCopy(copy) => engine.delete_copy(ctx, copy),
        Command::DeleteBook(book) => engine.delete_book(ctx, book),
        Command::DeleteCustomer(customer) => engine.delete_customer(ctx, customer),
    }
}

/// Process commands from a CSV reader.
///
/// Rows are streamed, so arbitrarily large files are fine. Ids are assigned
/// by the engine starting at 1, so later rows can refer to records created
/// by earlier ones. Malformed rows and rejected commands are logged and
/// skipped.
///
/// # CSV Format
///
/// | op | a | b | c |
/// |----|---|---|---|
/// | `add_book` | title | author | genre |
/// | `add_copy` | book | | |
/// | `add_customer` | first name | last name | email |
/// | `checkout` / `return` | copy | customer | |
/// | `delete_copy` / `delete_book` / `delete_customer` | id | | |
///
/// # Example
///
/// ```csv
/// op,a,b,c
/// add_book,Dune,Herbert,Sci-Fi
/// add_copy,1
/// add_customer,Ada,Lovelace,ada@example.org
/// checkout,1,1
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_commands<R: Read>(reader: R, actor: &str) -> Result<Engine, csv::Error> {
    let engine = Engine::new();

    let mut rdr = command_reader(reader);
    let headers = rdr.headers()?.clone();

    for result in rdr.records() {
        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                let line = e.position().map(|pos| pos.line());
                tracing::warn!(?line, error = %e, "skipping unreadable row");
                continue;
            }
        };
        let line = csv_line(&raw);

        let record = match raw.deserialize::<CsvRecord>(Some(&headers)) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line, error = %e, "skipping malformed row");
                continue;
            }
        };

        let Some(command) = record.into_command() else {
            tracing::warn!(line, "skipping invalid command");
            continue;
        };

        // Each row is its own request.
        let ctx = RequestContext::new(actor);
        if let Err(e) = apply(&engine, &ctx, command) {
            tracing::warn!(line, error = %e, "command rejected");
        }
    }

    Ok(engine)
}

fn command_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

/// 1-based line of the input where a record starts, for log messages.
fn csv_line(record: &StringRecord) -> u64 {
    record.position().map_or(0, |pos| pos.line())
}

#[derive(Debug, Serialize)]
struct CopyRow {
    copy: CopyId,
    book: BookId,
    title: String,
    sequence: u32,
    available: bool,
}

/// Write every copy with its availability.
///
/// # CSV Format
///
/// Columns: `copy, book, title, sequence, available`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_copies<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for copy in engine.catalog().copies() {
        let title = engine
            .book(copy.book_id)
            .map(|book| book.title)
            .unwrap_or_default();
        wtr.serialize(CopyRow {
            copy: copy.id,
            book: copy.book_id,
            title,
            sequence: copy.sequence,
            available: copy.available,
        })?;
    }

    wtr.flush()?;
    Ok(())
}

/// Write the ledger in insertion order.
///
/// # CSV Format
///
/// Columns: `id, copy_id, customer_id, checked_out_at, returned_at`
/// (`returned_at` is empty while a transaction is open)
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_ledger<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);

    for transaction in engine.ledger().all() {
        wtr.serialize(transaction)?;
    }

    wtr.flush()?;
    Ok(())
}
