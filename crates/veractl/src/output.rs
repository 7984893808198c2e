//! Terminal rendering of answers, citations, and traces.

use anyhow::Result;
use owo_colors::OwoColorize;
use vera_common::{Answer, AnswerMode, Termination, ToolStatus, TraceEntry};

/// Print one answer: JSON when requested, otherwise a human-readable block.
pub fn print_answer(answer: &Answer, trace: bool, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(answer)?);
        return Ok(());
    }

    println!("{} {}", "[vera]".bright_cyan(), answer.question.dimmed());
    println!(
        "{} mode: {}",
        "[vera]".bright_cyan(),
        mode_label(answer.mode)
    );
    println!();
    if answer.is_refusal {
        println!("{}", answer.text.yellow());
    } else {
        println!("{}", answer.text);
    }

    if !answer.citations.is_empty() {
        println!();
        println!("{}", "Citations:".bold());
        for citation in &answer.citations {
            println!("  [step {}] {}", citation.step, citation.source);
        }
    }

    if trace {
        println!();
        print_trace(answer);
    }
    Ok(())
}

/// Side-by-side rendering of a grounded run and the prompt-only baseline.
pub fn print_comparison(
    grounded: &Answer,
    baseline: &Answer,
    trace: bool,
    json: bool,
) -> Result<()> {
    if json {
        let pair = serde_json::json!({
            "question": grounded.question,
            "grounded": grounded,
            "baseline": baseline,
        });
        println!("{}", serde_json::to_string_pretty(&pair)?);
        return Ok(());
    }

    println!("{} {}", "[vera]".bright_cyan(), grounded.question.dimmed());
    println!();
    println!("{}", "=== grounded ===".bold());
    if grounded.is_refusal {
        println!("{}", grounded.text.yellow());
    } else {
        println!("{}", grounded.text);
    }
    for citation in &grounded.citations {
        println!("  [step {}] {}", citation.step, citation.source);
    }
    println!();
    println!("{}", "=== baseline (no retrieval) ===".bold());
    if baseline.is_refusal {
        println!("{}", baseline.text.yellow());
    } else {
        println!("{}", baseline.text);
    }

    if trace {
        println!();
        print_trace(grounded);
    }
    Ok(())
}

fn print_trace(answer: &Answer) {
    println!(
        "{} {} ({} of {} steps, {})",
        "Trace".bold(),
        answer.trace.run_id.to_string().dimmed(),
        answer.trace.entries.len(),
        answer.trace.budget,
        termination_label(answer.trace.termination),
    );
    for entry in &answer.trace.entries {
        println!("  {}", format_entry(entry));
    }
}

fn mode_label(mode: AnswerMode) -> &'static str {
    match mode {
        AnswerMode::Grounded => "grounded",
        AnswerMode::Baseline => "baseline (no retrieval)",
    }
}

fn termination_label(termination: Termination) -> &'static str {
    match termination {
        Termination::Composed => "composed",
        Termination::BudgetExhausted => "budget exhausted",
        Termination::OracleFailure => "oracle failure",
    }
}

fn status_label(status: ToolStatus) -> &'static str {
    match status {
        ToolStatus::Ok => "ok",
        ToolStatus::Empty => "empty",
        ToolStatus::Rejected => "rejected",
        ToolStatus::Failed => "failed",
    }
}

/// "2. fetch_facts ok — 1 fact(s) for Q7251 (214ms)"
fn format_entry(entry: &TraceEntry) -> String {
    let tool = entry
        .request
        .as_ref()
        .map(|r| r.name())
        .unwrap_or("(no action)");
    format!(
        "{}. {} {} — {} ({}ms)",
        entry.step,
        tool,
        status_label(entry.status),
        entry.summary,
        entry.elapsed_ms
    )
}
