use std::path::PathBuf;

use clap::{Parser, Subcommand};

use silt::{Result, Store, Value};

#[derive(Parser)]
#[command(name = "silt", about = "Inspect and edit a silt store file")]
struct Cli {
    /// Path to the store file; created if it does not exist.
    file: PathBuf,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print the number of top-level entries.
    Len,
    /// Look up one key.
    Get { key: String },
    /// Set one key to a scalar value.
    Set { key: String, value: String },
    /// Delete one key.
    Del { key: String },
    /// Print every top-level key.
    Keys,
}

/// Command-line arguments parse to the narrowest scalar that accepts them;
/// anything else is a string.
fn parse_scalar(s: &str) -> Value {
    match s {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(b) = s.parse::<num_bigint::BigInt>() {
        return Value::Big(b);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Value::from(f);
    }
    Value::from(s)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = Store::open(&cli.file)?;
    match cli.cmd {
        Cmd::Len => println!("{}", store.len()?),
        Cmd::Get { key } => println!("{}", store.get(&parse_scalar(&key))?),
        Cmd::Set { key, value } => store.set(&parse_scalar(&key), &parse_scalar(&value))?,
        Cmd::Del { key } => store.delete(&parse_scalar(&key))?,
        Cmd::Keys => {
            for key in store.keys()? {
                println!("{key}");
            }
        }
    }
    Ok(())
}
