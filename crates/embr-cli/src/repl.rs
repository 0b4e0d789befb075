//! The interactive shell: reads a line, checks it against the fixed
//! command table before evaluating it as a statement, and prints the
//! result unless it is `undefined`.

use std::io::{self, BufRead, Write};
use std::rc::Rc;

use anyhow::{anyhow, Result};
use embr_runtime::{Context, Runtime, RuntimeConfig, Value};

pub fn run() -> Result<()> {
    let runtime = Rc::new(Runtime::with_config(RuntimeConfig::from_env()));
    let mut ctx = Context::new(runtime).map_err(|e| anyhow!(e))?;

    println!("embr {} — type 'help' for commands, 'exit' to quit", env!("CARGO_PKG_VERSION"));

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("embr> ");
        let _ = stdout.flush();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(err) => {
                eprintln!("embr: error reading input: {err}");
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            "help" => print_help(),
            "clear" => clear_screen(),
            "exit" | "quit" => break,
            ".gc" => {
                let report = ctx.gc();
                println!(
                    "gc: reclaimed {} objects ({} bytes)",
                    report.reclaimed_count, report.reclaimed_bytes
                );
            }
            ".stats" => print_stats(&ctx),
            _ => eval_and_print(&mut ctx, line),
        }
    }

    Ok(())
}

fn eval_and_print(ctx: &mut Context, line: &str) {
    match ctx.eval(line, "<repl>") {
        Ok(Value::Undefined) => {}
        Ok(value) => println!("{}", value.to_rust_string()),
        Err(err) => eprintln!("{err}"),
    }
}

fn print_help() {
    println!(
        "commands:\n  help     show this message\n  clear    clear the screen\n  exit/quit leave the REPL\n  .gc      force a full collection\n  .stats   print memory usage"
    );
}

fn clear_screen() {
    print!("\x1B[2J\x1B[1;1H");
    let _ = io::stdout().flush();
}

fn print_stats(ctx: &Context) {
    let stats = ctx.runtime().stats();
    println!(
        "memory: {} bytes retained, {} collections, {} allocations, {} deallocations, peak {} bytes",
        ctx.memory_usage(),
        stats.collections,
        stats.allocations,
        stats.deallocations,
        stats.peak_usage
    );
}
