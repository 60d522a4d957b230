use dataplot::{
    buffer::PayloadBuffer,
    parse::{parse_table, ParseOptions, SourceHint},
    table::Table,
};
use std::{env, fs, path::Path, process::exit};

fn main() {
    // Expect a local file path and, optionally, a sheet name.
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <CSV_OR_XLSX_FILE> [SHEET]", program_name(&args));
        exit(1);
    }
    let options = ParseOptions {
        sheet: args.get(2).cloned(),
        ..ParseOptions::default()
    };
    if let Err(e) = inspect_payload(Path::new(&args[1]), &options) {
        eprintln!("Error: {}", e);
        exit(1);
    }
}

fn program_name(args: &[String]) -> &str {
    args.first().map_or("inspect_payload", String::as_str)
}

fn inspect_payload(path: &Path, options: &ParseOptions) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(path)?;
    let size = bytes.len();
    let buffer = PayloadBuffer::new(bytes);
    let hint = SourceHint {
        content_type: None,
        path: path.to_str(),
    };
    let table = parse_table(&buffer, &hint, options)?;

    println!("=== Payload: {} ===", path.display());
    println!("Size on disk:   {} bytes", size);
    println!("Rows:           {}", table.num_rows());
    println!("Columns:        {}", table.num_columns());
    println!();

    println!("=== Schema ===");
    for column in table.columns() {
        println!(
            "- {:<30} | {:<8} | nulls: {}",
            column.name(),
            column.data_type(),
            column.data().null_count()
        );
    }
    println!();

    print_preview(&table, 5);
    Ok(())
}

/// First `n` rows, one line each.
fn print_preview(table: &Table, n: usize) {
    println!("=== First {} rows ===", n.min(table.num_rows()));
    for row in 0..n.min(table.num_rows()) {
        let cells: Vec<String> = table
            .columns()
            .iter()
            .map(|c| c.value(row).to_string())
            .collect();
        println!("{}", cells.join(" | "));
    }
}
