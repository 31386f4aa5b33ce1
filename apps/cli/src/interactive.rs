use std::path::Path;

use anyhow::Result;
use console::{Term, style};

use crate::session::{ExportTarget, Session};

const MENU: [&str; 5] = [
    "Search video",
    "Batch search",
    "Show statistics",
    "Clear cache",
    "Exit",
];

fn prompt(term: &Term, label: &str) -> Result<String> {
    term.write_str(&format!("{} ", style(format!("{}:", label)).cyan()))?;
    Ok(term.read_line()?.trim().to_string())
}

fn report(error: anyhow::Error) {
    eprintln!("{} {:#}", style("Error:").red().bold(), error);
}

pub async fn run(session: &Session, target: &ExportTarget) -> Result<()> {
    let term = Term::stdout();

    loop {
        println!("\n{}", style("Menu").bold());
        for (i, entry) in MENU.iter().enumerate() {
            println!("  {}. {}", style(i + 1).cyan(), entry);
        }

        match prompt(&term, "Choice")?.as_str() {
            "1" => {
                let input = prompt(&term, "Video ID or URL")?;
                if input.is_empty() {
                    continue;
                }
                if let Err(e) = session.search_video(&input, target).await {
                    report(e);
                }
            }
            "2" => {
                let input = prompt(&term, "Batch file")?;
                if input.is_empty() {
                    continue;
                }
                if let Err(e) = session.search_batch(Path::new(&input), target).await {
                    report(e);
                }
            }
            "3" => session.print_stats(),
            "4" => match session.clear_cache().await {
                Ok(removed) => println!(
                    "{} Removed {} cache entries",
                    style("✓").green().bold(),
                    removed
                ),
                Err(e) => report(e.into()),
            },
            "5" | "q" | "quit" | "exit" => return Ok(()),
            other => println!("{} Unknown choice '{}'", style("!").yellow(), other),
        }
    }
}
