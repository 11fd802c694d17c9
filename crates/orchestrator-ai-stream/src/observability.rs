use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_JSON_LOG_FILE: &str = "ai-stream.logs.jsonl";

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

fn observability_enabled(lookup: impl Fn(&str) -> Option<String>) -> bool {
    lookup("AI_STREAM_OBSERVABILITY_ENABLED")
        .map(|value| parse_bool_env(&value).unwrap_or(true))
        .unwrap_or(true)
}

fn resolve_env_filter(lookup: impl Fn(&str) -> Option<String>) -> tracing_subscriber::EnvFilter {
    if let Some(level) = lookup("AI_STREAM_LOG_LEVEL")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
    {
        return filter;
    }
    if let Some(directives) = lookup("RUST_LOG")
        && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(directives)
    {
        return filter;
    }
    tracing_subscriber::EnvFilter::new("info")
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `AI_STREAM_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `AI_STREAM_LOG_LEVEL`: optional level/filter override (`info`, `debug`, etc.).
/// - `AI_STREAM_JSON_LOG_PATH`: optional log file path. If set, logs are JSONL in that file.
///   If unset, logs are emitted to stdout in a compact console format.
/// - `RUST_LOG`: fallback filter when `AI_STREAM_LOG_LEVEL` is unset.
///
/// Per-event logs are emitted at `debug`; run completion at `info`.
pub fn init_observability() {
    INIT.get_or_init(|| {
        if !observability_enabled(env_lookup) {
            return;
        }

        let env_filter = resolve_env_filter(env_lookup);
        if let Some(path_raw) = env_lookup("AI_STREAM_JSON_LOG_PATH") {
            let path = std::path::PathBuf::from(path_raw);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_JSON_LOG_FILE);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        } else {
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stdout);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    });
}
