use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Datelike, Local, Utc};
use clap::{Args, Parser, Subcommand};
use lapidary_pipeline::{
    Configuration, ModelServer, ModelTrainer, PipelineTelemetry, RankedRow, Registries,
    TrainingOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::{self, json, Map, Number, Value};
use shared_event_bus::{EventPublisher, EventRecord, FileEventPublisher, InteractionRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::Runtime;
use uuid::Uuid;

const DEFAULT_MANIFEST: &str = "runs/index.jsonl";
const DEFAULT_LOG_DIR: &str = "runs/logs";

#[derive(Parser, Debug)]
#[command(name = "lpd", version, about = "Lapidary diamond price pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Prepares the dataset and trains, evaluates, and saves a model.
    Train(TrainArgs),
    /// Predicts the price of one observation.
    Predict(ServeArgs),
    /// Lists retained rows closest to one observation.
    Similar(ServeArgs),
    /// Inspects the run manifest.
    #[command(subcommand)]
    Runs(RunsCommand),
}

#[derive(Subcommand, Debug)]
enum RunsCommand {
    /// Lists the most recent runs.
    List {
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
    /// Shows one manifest entry.
    Status {
        job_id: String,
        #[arg(long, default_value = DEFAULT_MANIFEST)]
        manifest: PathBuf,
    },
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[arg(long, default_value = lapidary_pipeline::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,
    /// Writes the job log here instead of a dated file under `--log-dir`.
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(long, default_value = DEFAULT_MANIFEST)]
    manifest: PathBuf,
    #[arg(long)]
    event_log: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = lapidary_pipeline::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Serves this run directory instead of the one `deploy.model_name` selects.
    #[arg(long)]
    run_dir: Option<PathBuf>,
    /// Inline JSON object, or `@path` to read it from a file.
    #[arg(long)]
    payload: String,
    #[arg(long)]
    audit_log: Option<PathBuf>,
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct JobManifestEntry {
    job_id: String,
    submitted_at: DateTime<Utc>,
    config: PathBuf,
    log_path: PathBuf,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl JobManifestEntry {
    fn new(config: PathBuf, log_path: PathBuf) -> Self {
        Self {
            job_id: format!("job-{}", Uuid::new_v4()),
            submitted_at: Utc::now(),
            config,
            log_path,
            status: "pending".into(),
            run_id: None,
            run_dir: None,
            error: None,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Train(args) => handle_train(&args),
        Commands::Predict(args) => handle_serve(&args, ServeMode::Predict),
        Commands::Similar(args) => handle_serve(&args, ServeMode::Similar),
        Commands::Runs(RunsCommand::List { limit, manifest }) => {
            let entries = read_manifest(&manifest)?;
            for entry in entries.into_iter().rev().take(limit) {
                println!(
                    "{} | {} | {} | {}",
                    entry.job_id,
                    entry.status,
                    entry.submitted_at,
                    entry.run_id.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Commands::Runs(RunsCommand::Status { job_id, manifest }) => {
            let entries = read_manifest(&manifest)?;
            if let Some(entry) = entries.into_iter().find(|e| e.job_id == job_id) {
                println!("{}", serde_json::to_string_pretty(&entry)?);
            } else {
                println!("job {job_id} not found");
            }
            Ok(())
        }
    }
}

fn handle_train(args: &TrainArgs) -> Result<()> {
    let config = Configuration::load(&args.config)
        .with_context(|| format!("loading configuration {}", args.config.display()))?;
    let log_path = match &args.log_file {
        Some(path) => path.clone(),
        None => compute_log_path(&args.log_dir)?,
    };
    let loaded_from = config.origin().unwrap_or(args.config.as_path()).to_path_buf();
    let mut entry = JobManifestEntry::new(loaded_from, log_path);
    entry.status = "queued".into();
    append_manifest(&args.manifest, &entry)?;

    let event_sink = args.event_log.as_deref().map(EventSink::new).transpose()?;
    log_job_event(
        &entry.log_path,
        LogLevel::Info,
        "job queued",
        json!({ "job_id": entry.job_id, "config": entry.config }),
    )?;
    publish_job_event(
        event_sink.as_ref(),
        "training.job_submitted",
        &entry,
        json!({ "config": entry.config }),
    )?;

    update_status(&args.manifest, &entry.job_id, "running", |_| {})?;
    let telemetry = pipeline_telemetry(Some(&entry.log_path), event_sink.as_ref())?;
    let outcome = ModelTrainer::new(&config, Registries::global(), &telemetry)
        .and_then(|trainer| trainer.run())
        .context("training run");

    match outcome {
        Ok(outcome) => {
            let run = outcome.run().clone();
            let summary = match &outcome {
                TrainingOutcome::PreparedOnly(prepared) => json!({
                    "runId": run.run_id,
                    "runDir": run.output_dir,
                    "trained": false,
                    "trainRows": prepared.split.x_train.nrows(),
                    "testRows": prepared.split.x_test.nrows(),
                }),
                TrainingOutcome::Trained(report) => json!({
                    "runId": run.run_id,
                    "runDir": run.output_dir,
                    "trained": true,
                    "model": report.model_type,
                    "parameters": report.parameters,
                    "metrics": report.metrics,
                    "fitSeconds": report.fit_seconds,
                    "bundle": report.bundle_path,
                }),
            };
            update_status(&args.manifest, &entry.job_id, "completed", |entry| {
                entry.run_id = Some(run.run_id.clone());
                entry.run_dir = Some(run.output_dir.clone());
            })?;
            log_job_event(
                &entry.log_path,
                LogLevel::Info,
                "job completed",
                json!({ "job_id": entry.job_id, "run_id": run.run_id }),
            )?;
            publish_job_event(
                event_sink.as_ref(),
                "training.job_completed",
                &entry,
                json!({ "run_id": run.run_id }),
            )?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(err) => {
            let message = format!("{err:#}");
            update_status(&args.manifest, &entry.job_id, "failed", |entry| {
                entry.error = Some(message.clone());
            })?;
            log_job_event(
                &entry.log_path,
                LogLevel::Error,
                "job failed",
                json!({ "job_id": entry.job_id, "error": message }),
            )?;
            publish_job_event(
                event_sink.as_ref(),
                "training.job_failed",
                &entry,
                json!({ "error": message }),
            )?;
            Err(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServeMode {
    Predict,
    Similar,
}

impl ServeMode {
    const fn path(self) -> &'static str {
        match self {
            Self::Predict => "/predict",
            Self::Similar => "/similar",
        }
    }
}

fn handle_serve(args: &ServeArgs, mode: ServeMode) -> Result<()> {
    let payload = parse_payload(&args.payload)?;
    let audit = args.audit_log.as_deref().map(EventSink::new).transpose()?;
    let telemetry = pipeline_telemetry(args.log_file.as_deref(), None)?;

    let server = match &args.run_dir {
        Some(dir) => ModelServer::load(dir, &telemetry)
            .with_context(|| format!("loading run {}", dir.display()))?,
        None => {
            let config = Configuration::load(&args.config)
                .with_context(|| format!("loading configuration {}", args.config.display()))?;
            ModelServer::from_config(&config, Registries::global(), &telemetry)
                .context("selecting a model to serve")?
        }
    };

    let response = match mode {
        ServeMode::Predict => server.predict(&payload).map(Value::Object),
        ServeMode::Similar => server
            .similar(&payload)
            .map(|rows| Value::Array(rows.into_iter().map(ranked_row_json).collect())),
    };
    let (status, body) = match &response {
        Ok(body) => (200, body.clone()),
        Err(err) => (
            err.class().status_code(),
            json!({ "error": err.to_string(), "class": err.class() }),
        ),
    };
    if let Some(sink) = &audit {
        let record = interaction_record(mode, &payload, status, body, server.dir());
        sink.publish(record.into_event("lpd"))?;
    }

    let body = response.context(format!("{} request failed", mode.path()))?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// The CLI has no transport headers; both header maps stay empty.
fn interaction_record(
    mode: ServeMode,
    payload: &Map<String, Value>,
    status: u16,
    body: Value,
    run_dir: &Path,
) -> InteractionRecord {
    InteractionRecord {
        timestamp: Utc::now(),
        method: "POST".into(),
        path: mode.path().into(),
        request_headers: json!({}),
        request_body: Value::Object(payload.clone()),
        response_status: status,
        response_headers: json!({}),
        response_body: body,
        run_dir: Some(run_dir.display().to_string()),
    }
}

fn ranked_row_json(ranked: RankedRow) -> Value {
    let mut row = Map::new();
    row.insert(
        "similarity".into(),
        Number::from_f64(ranked.similarity).map_or(Value::Null, Value::Number),
    );
    row.extend(ranked.row);
    Value::Object(row)
}

fn parse_payload(raw: &str) -> Result<Map<String, Value>> {
    let text = match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path).with_context(|| format!("reading payload {path}"))?,
        None => raw.to_owned(),
    };
    match serde_json::from_str(&text).context("payload is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("payload must be a JSON object, got {other}")),
    }
}

fn pipeline_telemetry(log_path: Option<&Path>, sink: Option<&EventSink>) -> Result<PipelineTelemetry> {
    let mut builder = PipelineTelemetry::builder("lpd");
    builder = match log_path {
        Some(path) => builder.log_path(path),
        None => builder.stderr(true).min_level(LogLevel::Warn),
    };
    if let Some(sink) = sink {
        builder = builder.event_publisher(Arc::clone(&sink.publisher) as Arc<dyn EventPublisher>);
    }
    builder.build()
}

fn append_manifest(path: &Path, entry: &JobManifestEntry) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening manifest {}", path.display()))?;
    serde_json::to_writer(&mut file, entry)?;
    file.write_all(b"\n")?;
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Vec<JobManifestEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: JobManifestEntry = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: malformed manifest entry", path.display(), line_no + 1))?;
        entries.push(entry);
    }
    Ok(entries)
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!(
        "train-{}.log.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    )))
}

fn update_status(
    path: &Path,
    job_id: &str,
    status: &str,
    amend: impl Fn(&mut JobManifestEntry),
) -> Result<()> {
    let mut entries = read_manifest(path)?;
    let mut changed = false;
    for entry in &mut entries {
        if entry.job_id == job_id {
            entry.status = status.to_string();
            amend(entry);
            changed = true;
        }
    }
    if !changed {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = File::create(path)?;
    for entry in entries {
        serde_json::to_writer(&mut file, &entry)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

struct EventSink {
    runtime: Runtime,
    publisher: Arc<FileEventPublisher>,
}

impl EventSink {
    fn new(path: &Path) -> Result<Self> {
        let publisher = Arc::new(FileEventPublisher::new(path)?);
        let runtime = Runtime::new()?;
        Ok(Self { runtime, publisher })
    }

    fn publish(&self, event: EventRecord) -> Result<()> {
        self.runtime.block_on(self.publisher.publish(event))
    }
}

fn publish_job_event(
    sink: Option<&EventSink>,
    event_type: &str,
    entry: &JobManifestEntry,
    payload: Value,
) -> Result<()> {
    if let Some(sink) = sink {
        let payload = match payload {
            Value::Object(mut map) => {
                map.insert("job_id".into(), Value::String(entry.job_id.clone()));
                Value::Object(map)
            }
            other => json!({ "job_id": entry.job_id, "data": other }),
        };
        sink.publish(EventRecord::new("lpd", event_type, payload))?;
    }
    Ok(())
}

fn log_job_event(path: &Path, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
    let logger = JsonLogger::new(path)?;
    let record = LogRecord::new("lpd", level, message).with_metadata(metadata);
    logger.log(&record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn manifest_round_trips_and_updates_status() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("runs/index.jsonl");
        let first = JobManifestEntry::new("a.json".into(), dir.path().join("a.log"));
        let second = JobManifestEntry::new("b.json".into(), dir.path().join("b.log"));
        append_manifest(&manifest, &first).unwrap();
        append_manifest(&manifest, &second).unwrap();

        update_status(&manifest, &second.job_id, "completed", |entry| {
            entry.run_id = Some("diamonds_42".into());
        })
        .unwrap();

        let entries = read_manifest(&manifest).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, "pending");
        assert_eq!(entries[1].status, "completed");
        assert_eq!(entries[1].run_id.as_deref(), Some("diamonds_42"));
    }

    #[test]
    fn unknown_job_leaves_manifest_untouched() {
        let dir = tempdir().unwrap();
        let manifest = dir.path().join("index.jsonl");
        let entry = JobManifestEntry::new("a.json".into(), dir.path().join("a.log"));
        append_manifest(&manifest, &entry).unwrap();
        let before = fs::read_to_string(&manifest).unwrap();
        update_status(&manifest, "job-missing", "failed", |_| {}).unwrap();
        assert_eq!(fs::read_to_string(&manifest).unwrap(), before);
    }

    #[test]
    fn missing_manifest_reads_empty() {
        let dir = tempdir().unwrap();
        assert!(read_manifest(&dir.path().join("absent.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn payload_accepts_inline_and_file_objects() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("payload.json");
        fs::write(&path, r#"{"carat": 0.5, "cut": "Ideal"}"#).unwrap();

        let inline = parse_payload(r#"{"carat": 0.5}"#).unwrap();
        assert_eq!(inline["carat"], json!(0.5));
        let from_file = parse_payload(&format!("@{}", path.display())).unwrap();
        assert_eq!(from_file["cut"], json!("Ideal"));
        assert!(parse_payload("[1, 2]").is_err());
        assert!(parse_payload("{not json").is_err());
    }

    #[test]
    fn job_events_carry_the_job_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = EventSink::new(&path).unwrap();
        let entry = JobManifestEntry::new("a.json".into(), dir.path().join("a.log"));
        publish_job_event(Some(&sink), "training.job_submitted", &entry, json!({ "x": 1 })).unwrap();

        let line = fs::read_to_string(&path).unwrap();
        let event: EventRecord = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(event.event_type, "training.job_submitted");
        assert_eq!(event.payload["job_id"], json!(entry.job_id));
        assert_eq!(event.payload["x"], json!(1));
    }

    #[test]
    fn ranked_rows_lead_with_similarity() {
        let row = json!({ "carat": 1.0, "cut": "Ideal" }).as_object().unwrap().clone();
        let value = ranked_row_json(RankedRow { similarity: 0.05, row });
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["similarity", "carat", "cut"]);
    }

    #[test]
    fn audit_records_keep_the_run_dir_out_of_headers() {
        let payload = json!({ "carat": 0.5 }).as_object().unwrap().clone();
        let record = interaction_record(
            ServeMode::Similar,
            &payload,
            400,
            json!({ "error": "bad" }),
            Path::new("train/diamonds/1700000000_1"),
        );
        assert_eq!(record.path, "/similar");
        assert_eq!(record.request_headers, json!({}));
        assert_eq!(record.response_headers, json!({}));
        assert_eq!(record.run_dir.as_deref(), Some("train/diamonds/1700000000_1"));
        let event = record.into_event("lpd");
        assert_eq!(event.payload["response_status"], json!(400));
        assert_eq!(event.payload["request_body"]["carat"], json!(0.5));
    }

    #[test]
    fn job_log_is_json_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("job.log.jsonl");
        log_job_event(&path, LogLevel::Info, "job queued", json!({ "job_id": "job-1" })).unwrap();
        let line = fs::read_to_string(&path).unwrap();
        let record: Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(record["message"], json!("job queued"));
        assert_eq!(record["metadata"]["job_id"], json!("job-1"));
    }
}
