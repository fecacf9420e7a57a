//! Interactive document chat.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use filechat::config::Config;
use filechat::documents::{collect_files_from, read_and_concatenate};
use filechat::prompt::make_context;
use filechat::providers::{LexicalModel, ModelAdapter};
use filechat::session::ModelSession;

/// Load documents, prime the prompt cache and answer questions until `exit`.
pub(crate) async fn cmd_chat(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let filter = config.extension_filter()?;
    let files = collect_files_from(paths, &filter).with_context(|| "Failed to collect files")?;
    if files.is_empty() {
        println!(
            "No files matching {} found in provided input.",
            filter.describe()
        );
        return Ok(());
    }

    println!("Preparing documents…");
    let documents = read_and_concatenate(&files).await?;
    println!("Text preparation complete. Building model context…");
    let context = make_context(&documents);

    let started = Instant::now();
    let model = LexicalModel::new(&documents).with_chunk_window(config.chunk_window);
    println!("Loading model {} ({} backend)…", config.model_id, model.name());
    println!(
        "Model loaded in {:.2} seconds.",
        started.elapsed().as_secs_f64()
    );

    let session = ModelSession::new(Arc::new(model), config.store(), config.cache_precision);
    println!(
        "Priming model session (cache precision: {})…",
        config.cache_precision
    );
    let prefill = session
        .prefill_and_persist(&context)
        .await
        .with_context(|| "Failed to prime model session")?;
    println!("{}", prefill.summary());
    println!("Context ready. Ask questions about the documents. Type 'exit' to quit.");

    repl(&session).await
}

async fn repl(session: &ModelSession) -> Result<()> {
    let mut editor = DefaultEditor::new().with_context(|| "Failed to initialize line editor")?;
    loop {
        let line = match tokio::task::block_in_place(|| editor.readline("> ")) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).with_context(|| "Failed to read input"),
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" {
            break;
        }
        let _ = editor.add_history_entry(question);
        print_answer(session, question).await;
    }
    Ok(())
}

/// Stream one answer to stdout. Errors are reported and the session goes on.
async fn print_answer(session: &ModelSession, question: &str) {
    let mut stream = session.ask(question);
    let mut stdout = std::io::stdout();
    let mut emitted = false;
    while let Some(fragment) = stream.next_fragment().await {
        match fragment {
            Ok(text) => {
                emitted = true;
                print!("{text}");
                let _ = stdout.flush();
            }
            Err(e) => {
                eprintln!("\n[Error streaming response: {e}]");
                return;
            }
        }
    }
    if emitted {
        println!();
    }
}
