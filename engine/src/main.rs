use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::{fs, io::Read};

use anyhow::Context;
use chrono::{Duration, NaiveDate, SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand};
use courier_core::{
    parse_label_listing, resolve_shared_paths, AppConfig, ConfigStore, GoogleConfig, LabelStore,
    SharedPaths,
};
use courier_observability::{
    emit_event, init_process_logging, redact_text, AuditSink, ObservabilityEvent, ProcessKind,
    TracingAuditSink,
};
use courier_providers::ProviderRegistry;
use courier_server::{serve, AppState};
use courier_summarize::{condense_text, token_count, ProviderAnswerer, Summarizer};
use courier_tools::{
    GoogleCredentials, GoogleWorkspaceBackend, InMemoryBackend, ToolDispatcher, WorkspaceBackend,
};
use courier_types::{ToolRequest, ToolResponse};
use serde_json::{json, Value};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

const SUPPORTED_PROVIDER_IDS: [&str; 7] = [
    "openai",
    "openrouter",
    "anthropic",
    "ollama",
    "groq",
    "mistral",
    "local",
];

const DIGEST_QUESTION: &str =
    "Summarize the last week's emails with important highlights and stats.";

#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(about = "Ask questions about Gmail and Google Calendar")]
struct Cli {
    #[arg(long, global = true)]
    state_dir: Option<String>,
    #[arg(long, global = true)]
    config: Option<String>,
    #[arg(long, global = true)]
    api_key: Option<String>,
    #[arg(long, global = true)]
    provider: Option<String>,
    #[arg(long, global = true)]
    model: Option<String>,
    /// Serve mail and calendar data from a JSON fixtures file instead of Google.
    #[arg(long, global = true)]
    fixtures: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Default)]
struct SummaryArgs {
    /// Comma separated label ids. Defaults to the labels marked important.
    #[arg(long)]
    labels: Option<String>,
    #[arg(long, default_value_t = 10)]
    max_results: u32,
    /// Do not collapse repeated subjects.
    #[arg(long, default_value_t = false)]
    keep_repetitive: bool,
    #[arg(long)]
    chunk_tokens: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    Serve {
        #[arg(long, alias = "host")]
        hostname: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Answer a question about recent mail.
    Ask {
        #[arg(default_value = "Summarize these emails.")]
        question: String,
        #[arg(long, default_value = "newer_than:1d")]
        query: String,
        #[command(flatten)]
        summary: SummaryArgs,
    },
    /// Summarize the last seven days.
    Digest {
        #[arg(default_value = DIGEST_QUESTION)]
        question: String,
        #[command(flatten)]
        summary: SummaryArgs,
    },
    /// Summarize every message received on one day.
    ReviewDay {
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        question: Option<String>,
        #[command(flatten)]
        summary: SummaryArgs,
    },
    Count {
        /// Label id or name (default INBOX).
        #[arg(default_value = "")]
        label: String,
    },
    Labels,
    /// Refresh the stored label catalogue, keeping importance flags.
    LabelsSync {
        #[arg(long, value_delimiter = ',')]
        important: Vec<String>,
    },
    LabelsMark {
        label: String,
        #[arg(long, default_value_t = false)]
        unset: bool,
    },
    Events {
        #[arg(long, default_value_t = 7)]
        days: i64,
        #[arg(long, default_value_t = 20)]
        max_results: u32,
        #[arg(long)]
        calendar_id: Option<String>,
    },
    CreateEvent {
        #[arg(long)]
        summary: String,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, value_delimiter = ',')]
        attendees: Vec<String>,
        #[arg(long)]
        calendar_id: Option<String>,
    },
    Availability {
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
        #[arg(long)]
        utc_offset: Option<String>,
        #[arg(long)]
        calendar_id: Option<String>,
    },
    /// Call one tool with `{"name": .., "arguments": {..}}` given inline, as
    /// `@file` or `-` for stdin.
    Tool {
        #[arg(long)]
        json: String,
    },
    CheckCredentials,
}

struct Runtime {
    paths: SharedPaths,
    config: AppConfig,
    dispatcher: Arc<ToolDispatcher>,
    providers: ProviderRegistry,
    audit: Arc<dyn AuditSink>,
    _log_guard: Option<WorkerGuard>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let provider = normalize_and_validate_provider(cli.provider.clone())?;
    let overrides = build_cli_overrides(cli.api_key.clone(), provider, cli.model.clone())?;
    let process = match cli.command {
        Command::Serve { .. } => ProcessKind::Server,
        _ => ProcessKind::Cli,
    };
    let runtime = build_runtime(
        resolve_state_dir(cli.state_dir.clone()),
        cli.config.clone().map(PathBuf::from),
        overrides,
        cli.fixtures.as_deref(),
        process,
    )
    .await?;

    match cli.command {
        Command::Serve { hostname, port } => {
            let host = hostname.unwrap_or_else(|| runtime.config.server.host.clone());
            let port = port.unwrap_or(runtime.config.server.port);
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .context("invalid hostname or port")?;
            log_startup_paths(&runtime.paths, &addr);
            serve(addr, AppState::new(runtime.dispatcher.clone())).await?;
        }
        Command::Ask {
            question,
            query,
            summary,
        } => {
            let digest = summarize_mail(&runtime, &query, &question, &summary).await?;
            print_digest(&digest);
        }
        Command::Digest { question, summary } => {
            let digest = summarize_mail(&runtime, "newer_than:7d", &question, &summary).await?;
            print_digest(&digest);
        }
        Command::ReviewDay {
            date,
            question,
            summary,
        } => {
            let query = review_day_query(date)?;
            let question = question
                .unwrap_or_else(|| format!("Summarize all emails from {date} in detail."));
            let digest = summarize_mail(&runtime, &query, &question, &summary).await?;
            print_digest(&digest);
        }
        Command::Count { label } => {
            let label_id = resolve_label(&runtime, &label).await?;
            let response = call(
                &runtime,
                "count_emails_by_label",
                json!({ "label_id": label_id }),
            )
            .await?;
            println!("Total emails with label '{label_id}': {}", response.text);
        }
        Command::Labels => {
            let response = call(&runtime, "list_gmail_labels", json!({})).await?;
            println!("{}", response.text);
        }
        Command::LabelsSync { important } => {
            let store = sync_label_store(&runtime, &important).await?;
            println!(
                "Saved {} labels to {}",
                store.labels().len(),
                store.path().display()
            );
        }
        Command::LabelsMark { label, unset } => {
            let mut store = LabelStore::load(&runtime.paths.labels_path).await?;
            if store.labels().is_empty() {
                anyhow::bail!("no labels stored yet; run `courier labels-sync` first");
            }
            if !store.set_important(&label, !unset) {
                anyhow::bail!("Label not found: {label}");
            }
            store.save().await?;
            let state = if unset { "not important" } else { "important" };
            println!("Marked '{label}' as {state}.");
        }
        Command::Events {
            days,
            max_results,
            calendar_id,
        } => {
            let start = Utc::now();
            let end = start + Duration::days(days);
            let mut arguments = json!({
                "time_min": start.to_rfc3339_opts(SecondsFormat::Secs, true),
                "time_max": end.to_rfc3339_opts(SecondsFormat::Secs, true),
                "max_results": max_results,
            });
            if let Some(calendar_id) = calendar_id {
                arguments["calendar_id"] = Value::String(calendar_id);
            }
            let response = call(&runtime, "list_calendar_events", arguments).await?;
            println!("{}", response.text);
        }
        Command::CreateEvent {
            summary,
            start,
            end,
            attendees,
            calendar_id,
        } => {
            let attendees = attendees
                .into_iter()
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect::<Vec<_>>();
            let mut arguments = json!({
                "summary": summary,
                "start": start,
                "end": end,
                "attendees": attendees,
            });
            if let Some(calendar_id) = calendar_id {
                arguments["calendar_id"] = Value::String(calendar_id);
            }
            let response = call(&runtime, "create_calendar_event", arguments).await?;
            println!("{}", response.text);
        }
        Command::Availability {
            date,
            utc_offset,
            calendar_id,
        } => {
            let mut arguments = json!({ "date": date.format("%Y-%m-%d").to_string() });
            if let Some(offset) = utc_offset {
                arguments["utc_offset"] = Value::String(offset);
            }
            if let Some(calendar_id) = calendar_id {
                arguments["calendar_id"] = Value::String(calendar_id);
            }
            let response = call(&runtime, "check_day_availability", arguments).await?;
            println!("{}", response.text);
        }
        Command::Tool { json } => {
            let payload = read_tool_json(&json)?;
            let request = serde_json::from_value::<ToolRequest>(payload)
                .context("input json must look like {\"name\": .., \"arguments\": {..}}")?;
            if request.name.trim().is_empty() {
                anyhow::bail!("tool name is required in input json");
            }
            let response = runtime.dispatcher.dispatch(&request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if response.is_error() {
                anyhow::bail!("tool `{}` failed", request.name);
            }
        }
        Command::CheckCredentials => {
            let backend = GoogleWorkspaceBackend::new(google_credentials(&runtime.config.google));
            backend
                .refresh_credentials()
                .await
                .context("Credentials refresh failed")?;
            println!("Credentials refresh succeeded.");
        }
    }

    Ok(())
}

fn build_cli_overrides(
    api_key: Option<String>,
    provider: Option<String>,
    model: Option<String>,
) -> anyhow::Result<Option<Value>> {
    let provider = normalize_and_validate_provider(provider)?;

    if api_key.is_none() && provider.is_none() && model.is_none() {
        return Ok(None);
    }
    let mut root = serde_json::Map::new();

    if let Some(p) = &provider {
        root.insert("default_provider".to_string(), Value::String(p.clone()));
    }

    // api_key/model overrides land on the selected provider, or openai.
    let target_provider = provider.as_deref().unwrap_or("openai");

    if api_key.is_some() || model.is_some() {
        let mut provider_config = serde_json::Map::new();
        if let Some(k) = api_key {
            provider_config.insert("api_key".to_string(), Value::String(k));
        }
        if let Some(m) = model {
            provider_config.insert("default_model".to_string(), Value::String(m));
        }

        let mut providers = serde_json::Map::new();
        providers.insert(target_provider.to_string(), Value::Object(provider_config));
        root.insert("providers".to_string(), Value::Object(providers));
    }

    Ok(Some(Value::Object(root)))
}

fn normalize_and_validate_provider(provider: Option<String>) -> anyhow::Result<Option<String>> {
    let Some(provider) = provider else {
        return Ok(None);
    };
    let normalized = provider.trim().to_lowercase();
    if normalized.is_empty() {
        anyhow::bail!(
            "provider cannot be empty. supported providers: {}",
            SUPPORTED_PROVIDER_IDS.join(", ")
        );
    }
    if SUPPORTED_PROVIDER_IDS.contains(&normalized.as_str()) {
        return Ok(Some(normalized));
    }
    anyhow::bail!(
        "unsupported provider `{}`. supported providers: {}",
        provider,
        SUPPORTED_PROVIDER_IDS.join(", ")
    );
}

fn resolve_state_dir(flag: Option<String>) -> SharedPaths {
    if let Some(dir) = flag.filter(|d| !d.trim().is_empty()) {
        return SharedPaths::under(dir);
    }
    resolve_shared_paths().unwrap_or_else(|_| SharedPaths::under(".courier"))
}

fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| format!("invalid date `{raw}`, expected YYYY-MM-DD"))
}

/// Gmail search bounds for one calendar day.
fn review_day_query(date: NaiveDate) -> anyhow::Result<String> {
    let next = date
        .succ_opt()
        .ok_or_else(|| anyhow::anyhow!("no day follows {date}"))?;
    Ok(format!(
        "after:{} before:{}",
        date.format("%Y/%m/%d"),
        next.format("%Y/%m/%d")
    ))
}

fn split_labels(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_tool_json(input: &str) -> anyhow::Result<Value> {
    if input.trim() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(serde_json::from_str(&buf)?);
    }
    if let Some(path) = input.strip_prefix('@') {
        let raw = fs::read_to_string(path)?;
        return Ok(serde_json::from_str(&raw)?);
    }
    Ok(serde_json::from_str(input)?)
}

fn google_credentials(config: &GoogleConfig) -> GoogleCredentials {
    GoogleCredentials {
        access_token: config.access_token.clone(),
        refresh_token: config.refresh_token.clone(),
        client_id: config.client_id.clone(),
        client_secret: config.client_secret.clone(),
        token_uri: config.token_uri.clone(),
    }
}

fn build_backend(
    config: &AppConfig,
    fixtures: Option<&Path>,
) -> anyhow::Result<Arc<dyn WorkspaceBackend>> {
    if let Some(path) = fixtures {
        let backend = InMemoryBackend::from_json_file(path)
            .with_context(|| format!("failed to load fixtures from {}", path.display()))?;
        info!("using fixture backend from {}", path.display());
        return Ok(Arc::new(backend));
    }
    Ok(Arc::new(GoogleWorkspaceBackend::new(google_credentials(
        &config.google,
    ))))
}

fn log_startup_paths(paths: &SharedPaths, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting courier server on http://{addr}");
    info!(
        "startup paths: exe={} state_dir={} config_path={} logs_dir={}",
        exe.display(),
        paths.root.display(),
        paths.config_path.display(),
        paths.logs_dir.display()
    );
}

/// Configured secrets as `name=[redacted len=N hash=H]`, never the values.
fn credential_fingerprints(config: &AppConfig) -> Vec<String> {
    let google = &config.google;
    let mut lines = [
        ("google.access_token", &google.access_token),
        ("google.refresh_token", &google.refresh_token),
        ("google.client_secret", &google.client_secret),
    ]
    .into_iter()
    .filter_map(|(name, value)| {
        let value = value.as_deref().filter(|v| !v.trim().is_empty())?;
        Some(format!("{name}={}", redact_text(value)))
    })
    .collect::<Vec<_>>();

    let mut keys = config
        .providers
        .iter()
        .filter_map(|(id, cfg)| {
            let key = cfg.api_key.as_deref().filter(|v| !v.trim().is_empty())?;
            Some(format!("{id}.api_key={}", redact_text(key)))
        })
        .collect::<Vec<_>>();
    keys.sort();
    lines.extend(keys);
    lines
}

async fn build_runtime(
    paths: SharedPaths,
    override_config_path: Option<PathBuf>,
    cli_overrides: Option<Value>,
    fixtures: Option<&Path>,
    process: ProcessKind,
) -> anyhow::Result<Runtime> {
    paths.ensure_dirs()?;
    let config_path = override_config_path.unwrap_or_else(|| paths.config_path.clone());
    let store = ConfigStore::new(config_path, cli_overrides).await?;
    let config = store.get().await;

    let (log_guard, log_info) =
        init_process_logging(process, &paths.logs_dir, config.logging.retention_days)?;
    emit_event(
        tracing::Level::INFO,
        process,
        ObservabilityEvent {
            event: "logging.initialized",
            component: "engine.main",
            status: Some("ok"),
            detail: Some("courier jsonl logging initialized"),
            ..Default::default()
        },
    );
    info!("courier logging initialized: {:?}", log_info);
    let credentials = credential_fingerprints(&config);
    if !credentials.is_empty() {
        info!("credentials loaded: {}", credentials.join(" "));
    }

    let backend = build_backend(&config, fixtures)?;
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let dispatcher = ToolDispatcher::new(backend, audit.clone()).for_process(process);
    let providers = ProviderRegistry::new(config.clone().into());

    Ok(Runtime {
        paths,
        config,
        dispatcher: Arc::new(dispatcher),
        providers,
        audit,
        _log_guard: Some(log_guard),
    })
}

async fn call(runtime: &Runtime, name: &str, arguments: Value) -> anyhow::Result<ToolResponse> {
    Ok(runtime
        .dispatcher
        .execute(&ToolRequest::new(name, arguments))
        .await?)
}

async fn fetch_label_listing(runtime: &Runtime) -> anyhow::Result<Vec<(String, String)>> {
    let response = call(runtime, "list_gmail_labels", json!({})).await?;
    Ok(parse_label_listing(&response.text))
}

/// Maps a label id or case-insensitive name to its id against the live
/// catalogue. An empty answer selects INBOX.
async fn resolve_label(runtime: &Runtime, answer: &str) -> anyhow::Result<String> {
    let mut store = LabelStore::load(&runtime.paths.labels_path).await?;
    store.sync(fetch_label_listing(runtime).await?);
    store
        .resolve(answer)
        .ok_or_else(|| anyhow::anyhow!("Label not found: {}", answer.trim()))
}

async fn sync_label_store(runtime: &Runtime, important: &[String]) -> anyhow::Result<LabelStore> {
    let fetched = fetch_label_listing(runtime).await?;
    if fetched.is_empty() {
        anyhow::bail!("No labels found.");
    }
    let mut store = LabelStore::load(&runtime.paths.labels_path).await?;
    store.sync(fetched);
    for label in important {
        if !store.set_important(label, true) {
            tracing::warn!("cannot mark unknown label `{label}` as important");
        }
    }
    store.save().await?;
    Ok(store)
}

#[derive(Debug, PartialEq, Eq)]
enum MailDigest {
    Empty,
    Answered {
        count: u64,
        tokens: usize,
        answer: String,
    },
}

fn print_digest(digest: &MailDigest) {
    match digest {
        MailDigest::Empty => println!("No recent emails returned."),
        MailDigest::Answered {
            count,
            tokens,
            answer,
        } => {
            println!("Found {count} emails matching query.");
            println!("Fetched about {tokens} tokens from Gmail snippets.");
            println!("\nAnswer:\n");
            println!("{answer}");
        }
    }
}

async fn summarize_mail(
    runtime: &Runtime,
    query: &str,
    question: &str,
    options: &SummaryArgs,
) -> anyhow::Result<MailDigest> {
    let labels = match options.labels.as_deref() {
        Some(raw) => split_labels(raw),
        None => LabelStore::load(&runtime.paths.labels_path)
            .await?
            .important_ids(),
    };
    let mut arguments = json!({ "query": query, "max_results": options.max_results });
    if !labels.is_empty() {
        arguments["label_ids"] = json!(labels);
    }

    let response = call(runtime, "list_recent_emails", arguments).await?;
    let count = response
        .extra
        .get("count")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if count == 0 {
        return Ok(MailDigest::Empty);
    }

    let keep_repetitive = options.keep_repetitive || runtime.config.summarize.keep_repetitive;
    let corpus = if keep_repetitive {
        response.text
    } else {
        condense_text(&response.text)
    };
    let tokens = token_count(&corpus);
    let chunk_tokens = options
        .chunk_tokens
        .unwrap_or(runtime.config.summarize.chunk_tokens);

    let answerer = ProviderAnswerer::new(runtime.providers.clone(), runtime.audit.clone());
    let answer = Summarizer::new(Arc::new(answerer), chunk_tokens)
        .summarize(question, &corpus)
        .await?;

    Ok(MailDigest::Answered {
        count,
        tokens,
        answer,
    })
}
