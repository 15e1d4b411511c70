//! Interactive research loop.
//!
//! Reads operator lines from any async buffered reader and writes operator-facing text to a
//! plain writer, so the loop can be driven by a terminal or by a test script.

use std::io::Write;
use std::path::PathBuf;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use reagent_local::export;
use reagent_local::session::Orchestrator;

pub const SOURCE_PREVIEW_CHARS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct ReplOptions {
    pub save_csv: bool,
    pub csv_name: Option<String>,
    pub save_text: bool,
    pub export_dir: PathBuf,
    pub show_sources: bool,
}

impl Default for ReplOptions {
    fn default() -> Self {
        Self {
            save_csv: true,
            csv_name: None,
            save_text: false,
            export_dir: PathBuf::from("."),
            show_sources: false,
        }
    }
}

fn is_exit(line: &str) -> bool {
    line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
}

/// First `max` chars, with `...` when something was cut.
pub fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn display_path(p: PathBuf) -> String {
    std::fs::canonicalize(&p)
        .unwrap_or(p)
        .display()
        .to_string()
}

/// Run sessions until `exit`/`quit` or end of input.
pub async fn run<R, W>(
    orch: &Orchestrator,
    opts: &ReplOptions,
    input: R,
    out: &mut W,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    loop {
        write!(out, "\nEnter your research question (or type 'exit' to quit):\n> ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            writeln!(out)?;
            break;
        };
        let query = line.trim();
        if is_exit(query) {
            break;
        }
        if query.is_empty() {
            writeln!(out, "Please enter a valid question")?;
            continue;
        }
        if !research_once(orch, opts, query, &mut lines, out).await? {
            writeln!(out)?;
            break;
        }
    }
    Ok(())
}

/// One session. Returns `false` when input ended mid-session.
async fn research_once<R, W>(
    orch: &Orchestrator,
    opts: &ReplOptions,
    query: &str,
    lines: &mut tokio::io::Lines<R>,
    out: &mut W,
) -> anyhow::Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut session = match orch.discover(query).await {
        Ok(s) => s,
        Err(e) => {
            writeln!(out, "\nRESEARCH REPORT:\nError during research: {e}")?;
            return Ok(true);
        }
    };
    if session.results.is_empty() {
        writeln!(out, "\nRESEARCH REPORT:\nNo search results found for the query.")?;
        return Ok(true);
    }

    writeln!(out, "\nSEARCH RESULTS:")?;
    for (i, (url, title)) in session.results.iter().zip(&session.titles).enumerate() {
        writeln!(out, "{}. {title} - {url}", i + 1)?;
    }
    let max = orch.config().max_selection;
    writeln!(
        out,
        "\nSelect which URLs to scrape (enter numbers separated by spaces, e.g. '1 3 5')"
    )?;
    writeln!(out, "You can select up to {max} URLs.")?;

    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            return Ok(false);
        };
        match orch.select(&mut session, &line) {
            Ok(sel) => {
                if let Some(n) = sel.truncated_from {
                    writeln!(out, "Only the first {max} of {n} selected URLs will be used.")?;
                }
                break;
            }
            Err(e) => writeln!(out, "{e}")?,
        }
    }

    orch.extract_selected(&mut session, |i, n, url| {
        let _ = writeln!(out, "Analyzing source {i} of {n}: {url}");
        let _ = out.flush();
    })
    .await;

    if opts.save_csv {
        match export::write_csv(&opts.export_dir, opts.csv_name.as_deref(), &session.documents) {
            Ok(p) => writeln!(out, "\nData saved to {}", display_path(p))?,
            Err(e) => writeln!(out, "Error saving to CSV: {e}")?,
        }
    }

    let report = orch.synthesize(&mut session).await;
    writeln!(out, "\nRESEARCH REPORT:\n{report}")?;

    if opts.show_sources {
        writeln!(out, "\nSOURCES:")?;
        for (i, d) in session.documents.iter().enumerate() {
            writeln!(
                out,
                "\n[{}] {} ({})\n{}",
                i + 1,
                d.url,
                d.path.as_str(),
                preview(&d.text, SOURCE_PREVIEW_CHARS)
            )?;
        }
    }

    if opts.save_text {
        match export::write_text_bundle(&opts.export_dir, &session.documents) {
            Ok(p) => writeln!(out, "Research data saved to {}", display_path(p))?,
            Err(e) => writeln!(out, "Error saving research data: {e}")?,
        }
    }

    match orch.persist(&session) {
        Some(Ok(p)) => writeln!(out, "Research saved to history: {}", display_path(p))?,
        Some(Err(e)) => writeln!(out, "Error saving research history: {e}")?,
        None => {}
    }
    Ok(true)
}
