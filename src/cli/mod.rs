use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::Path;

use tagsmith::contexts::{PipelineConfig, TaggingPipeline};
use tagsmith::data::{
    CompletionService, EmbeddingService, OutcomeStatus, PlanItem, RollbackReport, RunReport,
    ServiceError, SpecificationItem,
};
use tagsmith::registries::{CachedCompletion, OpenAiClient, PromptCache};

#[derive(Clone, Copy)]
pub struct Config {
    pub verbose: bool,
    pub dry_run: bool,
}

/// Stand-in completion service for commands that can run without
/// credentials. Any call means a stage needed the service after all, and
/// the error says how to fix it.
struct OfflineCompletion;

impl CompletionService for OfflineCompletion {
    fn complete(&self, _prompt: &str) -> Result<String, ServiceError> {
        Err(ServiceError::MissingCredentials(
            "OPENAI_API_KEY is not set".to_string(),
        ))
    }
}

/// `suggest`: match stage only, no edits. Works without credentials, just
/// without the semantic boost.
pub fn suggest(
    repo: &Path,
    items_path: &Path,
    out: Option<&Path>,
    no_embeddings: bool,
    config: &Config,
) -> Result<()> {
    let items = load_items(items_path)?;
    println!(
        "Matching {} specification item(s) against {}",
        items.len(),
        repo.display()
    );

    let mut pipeline_config = PipelineConfig::default();
    pipeline_config.use_embeddings = !no_embeddings;
    let offline = OfflineCompletion;

    let embedder = if no_embeddings {
        None
    } else {
        match OpenAiClient::from_env() {
            Ok(client) => Some(client),
            Err(err) => {
                if config.verbose {
                    println!("⊚ Semantic scoring disabled: {}", err);
                }
                None
            }
        }
    };

    let pipeline = TaggingPipeline::new(
        &offline,
        embedder.as_ref().map(|c| c as &dyn EmbeddingService),
        &pipeline_config,
    )
    .with_verbose(config.verbose);
    let suggestions = pipeline.suggest(repo, &items)?;

    let matched = suggestions.iter().filter(|s| !s.matches.is_empty()).count();
    for suggestion in &suggestions {
        match suggestion.top_match() {
            Some(top) => println!(
                "✓ Item {} ({}) -> {}:{} [{:.2}]",
                suggestion.item_index,
                suggestion.description,
                top.file,
                top.line,
                top.confidence
            ),
            None => println!(
                "✗ Item {} ({}) -> no match",
                suggestion.item_index, suggestion.description
            ),
        }
    }
    println!("{} of {} item(s) matched", matched, suggestions.len());

    if let Some(out) = out {
        write_json(out, &suggestions)?;
        println!("Suggestions written to {}", out.display());
    }
    Ok(())
}

/// `run`: the full match-guard-advise-plan-apply pipeline.
pub fn run(
    repo: &Path,
    items_path: &Path,
    out: Option<&Path>,
    no_embeddings: bool,
    no_skip: bool,
    config: &Config,
) -> Result<()> {
    let items = load_items(items_path)?;
    println!(
        "Processing {} specification item(s) against {}{}",
        items.len(),
        repo.display(),
        if config.dry_run { " (dry run)" } else { "" }
    );

    let (completion, embeddings) = online_services()?;
    let mut pipeline_config = PipelineConfig::default();
    pipeline_config.use_embeddings = !no_embeddings;
    pipeline_config.skip_if_tagged = !no_skip;
    let pipeline = TaggingPipeline::new(&completion, Some(&embeddings), &pipeline_config)
        .with_verbose(config.verbose);

    let report = pipeline.run(repo, &items, config.dry_run)?;
    print_run_summary(&report);

    if let Some(out) = out {
        write_json(out, &report)?;
        println!("Report written to {}", out.display());
    }
    if report.stats.failed > 0 {
        anyhow::bail!("{} item(s) failed", report.stats.failed);
    }
    Ok(())
}

/// `apply`: consume an externally authored plan instead of matching.
pub fn apply(
    repo: &Path,
    plan_path: &Path,
    out: Option<&Path>,
    no_skip: bool,
    config: &Config,
) -> Result<()> {
    let plan = load_plan(plan_path)?;
    println!(
        "Applying {} plan row(s) to {}{}",
        plan.len(),
        repo.display(),
        if config.dry_run { " (dry run)" } else { "" }
    );

    let (completion, embeddings) = online_services()?;
    let mut pipeline_config = PipelineConfig::default();
    pipeline_config.skip_if_tagged = !no_skip;
    let pipeline = TaggingPipeline::new(&completion, Some(&embeddings), &pipeline_config)
        .with_verbose(config.verbose);

    let report = pipeline.apply_plan(repo, &plan, config.dry_run)?;
    print_run_summary(&report);

    if let Some(out) = out {
        write_json(out, &report)?;
        println!("Report written to {}", out.display());
    }
    if report.stats.failed > 0 {
        anyhow::bail!("{} plan row(s) failed", report.stats.failed);
    }
    Ok(())
}

/// `rollback`: restore every backed-up file under the repository. Backups
/// are deleted after a successful restore unless `keep_backups` is set.
pub fn rollback(repo: &Path, keep_backups: bool, config: &Config) -> Result<()> {
    let pipeline_config = PipelineConfig::default();
    let offline = OfflineCompletion;
    let pipeline =
        TaggingPipeline::new(&offline, None, &pipeline_config).with_verbose(config.verbose);

    let report = pipeline.rollback(repo, !keep_backups)?;
    print_rollback_summary(&report);

    if !report.errors.is_empty() {
        anyhow::bail!("{} backup(s) could not be restored", report.errors.len());
    }
    Ok(())
}

/// Builds the real completion + embedding services, with the completion
/// side wrapped in the prompt cache.
fn online_services() -> Result<(CachedCompletion<OpenAiClient>, OpenAiClient)> {
    let client = OpenAiClient::from_env()
        .map_err(anyhow::Error::new)
        .context("this command needs a completion service")?;
    let cache = PromptCache::new(None, client.model());
    Ok((CachedCompletion::new(client.clone(), cache), client))
}

/// Reads specification items from a JSON file holding either a bare array
/// or an object with an `items` array. Item indices are assigned by
/// position so later stages can correlate outcomes.
fn load_items(path: &Path) -> Result<Vec<SpecificationItem>> {
    let rows = load_rows(path, "items")?;
    let mut items = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        let mut item: SpecificationItem = serde_json::from_value(row)
            .with_context(|| format!("invalid item {} in {}", index, path.display()))?;
        item.item_index = index;
        items.push(item);
    }
    Ok(items)
}

/// Reads plan rows from a JSON file holding a bare array or an object with
/// a `plan` (or `items`) array.
fn load_plan(path: &Path) -> Result<Vec<PlanItem>> {
    let rows = load_rows(path, "plan")?;
    let mut plan = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        let mut item: PlanItem = serde_json::from_value(row)
            .with_context(|| format!("invalid plan row {} in {}", index, path.display()))?;
        item.item.item_index = index;
        plan.push(item);
    }
    Ok(plan)
}

fn load_rows(path: &Path, key: &str) -> Result<Vec<Value>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;

    let rows = match value {
        Value::Array(rows) => rows,
        Value::Object(mut obj) => match obj.remove(key).or_else(|| obj.remove("items")) {
            Some(Value::Array(rows)) => rows,
            _ => anyhow::bail!(
                "{} must be a JSON array or an object with a `{}` array",
                path.display(),
                key
            ),
        },
        _ => anyhow::bail!(
            "{} must be a JSON array or an object with a `{}` array",
            path.display(),
            key
        ),
    };
    Ok(rows)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn print_run_summary(report: &RunReport) {
    let stats = &report.stats;
    println!("\n{}", "=".repeat(60));
    println!(
        "Run summary{}",
        if report.dry_run { " (dry run)" } else { "" }
    );
    println!("{}", "=".repeat(60));
    println!("Total items:            {}", stats.total_items);
    println!("Succeeded:              {}", stats.succeeded);
    println!("Skipped (tagged):       {}", stats.skipped_already_tagged);
    println!("No location:            {}", stats.no_location);
    println!("Failed:                 {}", stats.failed);
    println!("Imports added:          {}", stats.imports_added);
    println!("Hooks added:            {}", stats.hooks_added);
    println!("Tracking calls added:   {}", stats.tracking_calls_added);
    println!("{}", "=".repeat(60));

    for outcome in &report.outcomes {
        let glyph = match outcome.status {
            OutcomeStatus::Applied | OutcomeStatus::DryRun => "✓",
            OutcomeStatus::Failed => "✗",
            _ => "⊚",
        };
        println!(
            "{} item {} [{}]: {}",
            glyph,
            outcome.item_index,
            outcome.file.as_deref().unwrap_or("-"),
            outcome.reason
        );
    }
}

fn print_rollback_summary(report: &RollbackReport) {
    println!("\n{}", "=".repeat(60));
    println!("Rollback summary");
    println!("{}", "=".repeat(60));
    println!("Restored:   {}", report.restored);
    println!("Deleted:    {}", report.deleted);
    println!("Errors:     {}", report.errors.len());
    println!("{}", "=".repeat(60));

    for file in &report.restored_files {
        println!("✓ restored {}", file);
    }
    for error in &report.errors {
        eprintln!("✗ {}: {}", error.backup, error.message);
    }
}
