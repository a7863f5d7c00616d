use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use keipydb::{
    transaction::Transaction, DbConfig, DbResult, IndexKind, KeiPyDB, PlannerKind, Scan,
};
use log::error;

/// An interactive SQL shell over a KeiPyDB directory
#[derive(Debug, Parser)]
#[command(name = "keipydb", version)]
struct Args {
    /// Database directory, created if it does not exist
    #[arg(default_value = "data")]
    dir: PathBuf,

    /// Size of every disk block in bytes
    #[arg(long, default_value_t = DbConfig::BLOCK_SIZE)]
    block_size: usize,

    /// Number of buffers in the pool
    #[arg(long, default_value_t = DbConfig::BUFFER_SIZE)]
    buffers: usize,

    /// Index structure used by CREATE INDEX (btree or hash)
    #[arg(long, default_value_t = IndexKind::BTree)]
    index: IndexKind,

    /// Query planner (heuristic or basic)
    #[arg(long, default_value_t = PlannerKind::Heuristic)]
    planner: PlannerKind,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = DbConfig::new(&args.dir)
        .with_block_size(args.block_size)
        .with_buffer_size(args.buffers)
        .with_index_kind(args.index)
        .with_planner_kind(args.planner);
    let db = match KeiPyDB::with_config(config) {
        Ok(db) => db,
        Err(e) => {
            error!("failed to open {:?}: {e}", args.dir);
            eprintln!("failed to open {}: {e}", args.dir.display());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = repl(&db) {
        eprintln!("{e}");
    }
    ExitCode::SUCCESS
}

fn repl(db: &KeiPyDB) -> io::Result<()> {
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("SQL> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else {
            println!();
            return Ok(());
        };
        let line = line?;
        let command = line.trim();
        match command.to_ascii_lowercase().as_str() {
            "" => continue,
            "exit" | "quit" => return Ok(()),
            _ => {}
        }
        match run(db, command) {
            Ok(output) => print!("{output}"),
            Err(e) => println!("error: {e}"),
        }
    }
}

/// Run one command in its own transaction, committed on success and rolled back on error
fn run(db: &KeiPyDB, command: &str) -> DbResult<String> {
    let tx = db.new_tx()?;
    let lowered = command.to_ascii_lowercase();
    let result = if lowered == "tables" {
        list_tables(db, &tx)
    } else if lowered.starts_with("select") {
        query(db, command, &tx)
    } else {
        db.planner()
            .execute_update(command, &tx)
            .map(|count| format!("{count} record(s) affected\n"))
    };
    match result {
        Ok(output) => {
            tx.commit()?;
            Ok(output)
        }
        Err(e) => {
            tx.rollback()?;
            Err(e)
        }
    }
}

fn list_tables(db: &KeiPyDB, tx: &Arc<Transaction>) -> DbResult<String> {
    let names = db.metadata_manager().table_names(tx)?;
    if names.is_empty() {
        return Ok("no tables\n".to_string());
    }
    Ok(names.iter().map(|name| format!("{name}\n")).collect())
}

/// Every row printed as `field = value, ...`
fn query(db: &KeiPyDB, sql: &str, tx: &Arc<Transaction>) -> DbResult<String> {
    let plan = db.planner().create_query_plan(sql, tx)?;
    let fields = plan.schema().fields().to_vec();
    let mut scan = plan.open()?;
    let mut output = String::new();
    let mut rows = 0;
    while scan.next()? {
        let mut row = Vec::with_capacity(fields.len());
        for field in &fields {
            row.push(format!("{field} = {}", scan.get_value(field)?.to_plain_string()));
        }
        output.push_str(&row.join(", "));
        output.push('\n');
        rows += 1;
    }
    scan.close();
    output.push_str(&format!("{rows} row(s)\n"));
    Ok(output)
}
