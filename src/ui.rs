use colored::Colorize;
use converge::{Action, ActionResult, ActionStatus, Facts, Plan, RunSummary};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

// ============================================================================
// Runs
// ============================================================================

/// Print the facts a run is planned against
pub fn facts(facts: &Facts) {
    header("Facts");
    let width = facts.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in facts.iter() {
        println!("  {}  {value}", format!("{key:<width$}").dimmed());
    }
}

/// Print the plan, one action per line
pub fn plan(plan: &Plan) {
    header(&format!("Plan ({} actions)", plan.len()));
    if plan.is_empty() {
        dim("Nothing to do");
        return;
    }
    for action in plan.actions() {
        println!("  {}", plan_line(action));
    }
}

fn plan_line(action: &Action) -> String {
    let critical = if action.critical {
        " [critical]".red().to_string()
    } else {
        String::new()
    };
    format!(
        "{} {:<28} {}{}",
        format!("{:>2}.", action.index + 1).dimmed(),
        format!("{}.{}", action.resource_type(), action.spec_id),
        action.description().dimmed(),
        critical
    )
}

/// Print one finished action
pub fn result(result: &ActionResult) {
    let symbol = match result.status {
        ActionStatus::Changed => "~".yellow(),
        ActionStatus::Unchanged => "✓".green(),
        ActionStatus::Failed => "✗".red(),
    };
    let id = format!("{}.{}", result.resource_type, result.spec_id);

    match (&result.status, &result.message, &result.error) {
        (ActionStatus::Failed, _, Some(err)) => {
            println!("  {symbol} {id:<28} {}", err.to_string().red());
            println!("      {}", err.category.advice().dimmed());
        }
        (_, Some(message), _) => println!("  {symbol} {id:<28} {message}"),
        _ => println!("  {symbol} {id:<28} {}", "ok".dimmed()),
    }

    if let Some(diff) = &result.diff {
        for line in diff.lines() {
            println!("      {}", diff_line(line));
        }
    }
}

fn diff_line(line: &str) -> colored::ColoredString {
    if line.starts_with("+++") || line.starts_with("---") {
        line.bold()
    } else if line.starts_with('+') {
        line.green()
    } else if line.starts_with('-') {
        line.red()
    } else if line.starts_with("@@") {
        line.cyan()
    } else {
        line.dimmed()
    }
}

/// Print final summary
pub fn summary(summary: &RunSummary) {
    println!();
    let took = match (summary.duration(), summary.finished_at) {
        (Some(d), Some(finished)) => format!(
            " in {:.1}s (finished {})",
            d.num_milliseconds() as f64 / 1000.0,
            finished.with_timezone(&chrono::Local).format("%H:%M:%S")
        ),
        _ => String::new(),
    };

    if summary.dry_run {
        println!("  {} Dry run - no changes made{took}", "ℹ".blue());
    } else if summary.is_success() {
        println!("  {} Host converged{took}", "✓".green().bold());
    } else if summary.halted {
        println!("  {} Run halted by a critical failure{took}", "✗".red().bold());
    } else {
        println!("  {} Run finished with errors{took}", "⚠".yellow().bold());
    }

    let verb = if summary.dry_run { "would change" } else { "changed" };
    println!("    • {} {verb}", summary.changed);
    println!("    • {} unchanged", summary.unchanged);
    if summary.failed > 0 {
        println!("    • {} {}", summary.failed, "failed".red());
    }
    if summary.not_run > 0 {
        println!("    • {} not run", summary.not_run);
    }
    if let Some(first) = &summary.first_failure {
        println!(
            "    • first failure: {}",
            format!("{}.{}", first.resource_type, first.spec_id).bold()
        );
    }
}
