//! Index command - index a folder and report the outcome of every job.

use crate::app::App;
use crate::OutputFormat;
use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use flint_core::{
    Action, Config, Index, IndexBatch, IndexJob, ListenerEvent, LocalIndexer, MemoryIndex,
    Priority,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options of the index command.
pub struct IndexOptions {
    pub root: PathBuf,
    pub name: Option<String>,
    pub threads: Option<usize>,
    pub single_thread: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub high_priority: bool,
    pub wait: u64,
    pub output: OutputFormat,
}

/// Outcome of one job, as reported by the pipeline.
#[derive(Debug, Default, Serialize)]
struct JobOutcome {
    path: String,
    action: Option<Action>,
    success: bool,
    warnings: Vec<String>,
    errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct IndexSummary {
    index: String,
    batch: u64,
    created: DateTime<Utc>,
    files: usize,
    failed: usize,
    documents: usize,
    elapsed_secs: f64,
    jobs: Vec<JobOutcome>,
}

/// Run the index command.
pub fn run(mut config: Config, options: IndexOptions) -> anyhow::Result<()> {
    if let Some(threads) = options.threads {
        config.indexing.threads = threads;
    }
    if options.single_thread {
        config.indexing.threads = 1;
    }
    if !options.include.is_empty() {
        config.local.include = options.include.clone();
    }
    if !options.exclude.is_empty() {
        config.local.exclude_dirs.extend(options.exclude.iter().cloned());
    }
    if options.high_priority {
        config.local.priority = Priority::High;
    }

    let name = match &options.name {
        Some(name) => name.clone(),
        None => options
            .root
            .canonicalize()
            .with_context(|| format!("Cannot open folder {}", options.root.display()))?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string()),
    };

    let app = App::new(config)?;
    let index = MemoryIndex::new(name.clone(), app.manager.open_indexes().clone());
    let indexer = LocalIndexer::new(index.clone())
        .with_include(app.config.local.include.clone())
        .with_exclude_dirs(app.config.local.exclude_dirs.clone())
        .with_follow_links(app.config.local.follow_links)
        .with_priority(app.config.local.priority);

    let start = Instant::now();
    let report = indexer.index_folder(&app.manager, &options.root, None)?;

    let mut outcomes: BTreeMap<String, JobOutcome> = report
        .actions
        .iter()
        .map(|(path, action)| {
            let path = path.to_string_lossy().into_owned();
            let outcome = JobOutcome {
                path: path.clone(),
                action: Some(*action),
                ..Default::default()
            };
            (path, outcome)
        })
        .collect();

    let waited = wait_for_batch(
        &app,
        &report.batch,
        &mut outcomes,
        Duration::from_secs(options.wait),
    );
    app.manager.stop();
    waited?;

    let elapsed = start.elapsed();
    let jobs: Vec<JobOutcome> = outcomes.into_values().collect();
    let summary = IndexSummary {
        index: index.index_id().to_string(),
        batch: report.batch.id(),
        created: report.batch.created(),
        files: jobs.len(),
        failed: jobs.iter().filter(|j| !j.success).count(),
        documents: index.len(),
        elapsed_secs: elapsed.as_secs_f64(),
        jobs,
    };

    match options.output {
        OutputFormat::Text => print_text(&summary),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }

    if summary.failed > 0 {
        bail!("{} of {} jobs failed", summary.failed, summary.files);
    }
    Ok(())
}

/// Collect job notifications until the batch ends.
fn wait_for_batch(
    app: &App,
    batch: &Arc<IndexBatch>,
    outcomes: &mut BTreeMap<String, JobOutcome>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = match app.events.recv_timeout(remaining) {
            Ok(event) => event,
            Err(_) => bail!(
                "Batch {} did not finish within {}s ({} of {} jobs done)",
                batch.id(),
                timeout.as_secs(),
                batch.current_count(),
                batch.total_count()
            ),
        };

        match event {
            ListenerEvent::EndJob(job) => outcome(outcomes, &job).success = job.was_successful(),
            ListenerEvent::Warn { job, message } => outcome(outcomes, &job).warnings.push(message),
            ListenerEvent::Error {
                job: Some(job),
                message,
                cause,
            } => {
                let text = match cause {
                    Some(cause) if cause.starts_with(&message) => cause,
                    Some(cause) => format!("{}: {}", message, cause),
                    None => message,
                };
                outcome(outcomes, &job).errors.push(text);
            }
            ListenerEvent::EndBatch(ended) if Arc::ptr_eq(&ended, batch) => return Ok(()),
            _ => {}
        }
    }
}

fn outcome<'a>(outcomes: &'a mut BTreeMap<String, JobOutcome>, job: &IndexJob) -> &'a mut JobOutcome {
    outcomes
        .entry(job.content_id().to_string())
        .or_insert_with(|| JobOutcome {
            path: job.content_id().to_string(),
            ..Default::default()
        })
}

fn print_text(summary: &IndexSummary) {
    for job in &summary.jobs {
        let mark = if job.success { "✓" } else { "✗" };
        let action = match job.action {
            Some(Action::Insert) => "insert",
            Some(Action::Update) => "update",
            Some(Action::Delete) => "delete",
            None => "-",
        };
        println!("{} {:<6} {}", mark, action, job.path);
        for warning in &job.warnings {
            println!("    ⚠ {}", warning);
        }
        for error in &job.errors {
            println!("    ✗ {}", error);
        }
    }

    println!();
    println!("Indexing complete!");
    println!("  Index:     {}", summary.index);
    println!(
        "  Batch:     #{} ({})",
        summary.batch,
        summary
            .created
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
    );
    println!("  Files:     {}", summary.files);
    println!("  Failed:    {}", summary.failed);
    println!("  Documents: {}", summary.documents);
    println!("  Time:      {:.2}s", summary.elapsed_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_json() {
        let summary = IndexSummary {
            index: "docs".to_string(),
            batch: 3,
            created: Utc::now(),
            files: 1,
            failed: 0,
            documents: 1,
            elapsed_secs: 0.5,
            jobs: vec![JobOutcome {
                path: "/data/a.xml".to_string(),
                action: Some(Action::Insert),
                success: true,
                ..Default::default()
            }],
        };

        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["index"], "docs");
        assert_eq!(value["jobs"][0]["action"], "insert");
        assert_eq!(value["jobs"][0]["success"], true);
    }
}
