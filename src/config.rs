use crate::types::*;
use std::{env, fs, path::PathBuf};

pub fn repo_root() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn resolve_repo_path(raw: &str) -> PathBuf {
  let path = PathBuf::from(raw);
  if path.is_absolute() {
    path
  } else {
    repo_root().join(path)
  }
}

pub fn config_path() -> PathBuf {
  if let Some(raw) = env_default("BRACKET_CONFIG_PATH") {
    return resolve_repo_path(&raw);
  }
  repo_root().join("config.json")
}

pub fn logs_dir() -> PathBuf {
  repo_root().join("logs")
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

pub fn apply_env_defaults(mut config: AppConfig) -> AppConfig {
  // environment wins over config.json
  if let Some(value) = env_default("BRACKET_PORT") {
    match value.parse::<u16>() {
      Ok(port) => config.port = port,
      Err(_) => tracing::warn!("ignoring BRACKET_PORT={value}: not a port number"),
    }
  }
  if let Some(value) = env_default("BRACKET_STATIC_DIR") {
    config.static_dir = value;
  }
  if let Some(value) = env_default("BRACKET_THEME") {
    config.theme = value;
  }
  if config.theme.trim().is_empty() {
    config.theme = DEFAULT_THEME.to_string();
  }
  config
}

pub fn load_config_inner() -> Result<AppConfig, String> {
  let path = config_path();
  if !path.is_file() {
    return Ok(apply_env_defaults(AppConfig::default()));
  }
  let data = fs::read_to_string(&path).map_err(|e| format!("read config {}: {e}", path.display()))?;
  let config =
    serde_json::from_str::<AppConfig>(&data).map_err(|e| format!("parse config {}: {e}", path.display()))?;
  Ok(apply_env_defaults(config))
}

pub fn save_config_inner(config: AppConfig) -> Result<AppConfig, String> {
  let path = config_path();
  let payload = serde_json::to_string_pretty(&config).map_err(|e| e.to_string())?;
  fs::write(&path, payload).map_err(|e| format!("write config {}: {e}", path.display()))?;
  Ok(config)
}

pub fn static_dir_from_config(config: &AppConfig) -> Option<PathBuf> {
  let trimmed = config.static_dir.trim();
  if trimmed.is_empty() {
    return None;
  }
  Some(resolve_repo_path(trimmed))
}

pub fn load_env_file() {
  let env_path = repo_root().join(".env");
  if !env_path.is_file() {
    return;
  }
  let contents = match fs::read_to_string(&env_path) {
    Ok(data) => data,
    Err(_) => return,
  };
  for line in contents.lines() {
    if let Some((key, value)) = parse_env_line(line) {
      if env::var_os(&key).is_none() {
        env::set_var(key, value);
      }
    }
  }
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let trimmed = line.trim();
  if trimmed.is_empty() || trimmed.starts_with('#') {
    return None;
  }
  let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
  let (key, raw_value) = trimmed.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  let mut value = raw_value.trim();
  if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if let Some(idx) = value.find('#') {
    value = value[..idx].trim_end();
  }
  Some((key.to_string(), value.to_string()))
}

pub fn log_env_warnings(config: &AppConfig) {
  let mut warnings = Vec::new();

  match static_dir_from_config(config) {
    Some(dir) if !dir.is_dir() => {
      warnings.push(format!("static dir {} does not exist; only the JSON API will be served", dir.display()));
    }
    None => warnings.push("no static dir configured; only the JSON API will be served".to_string()),
    _ => {}
  }
  if crate::theme::lookup_theme(&config.theme).is_none() {
    warnings.push(format!("theme \"{}\" is unknown; exports fall back to {DEFAULT_THEME}", config.theme));
  }

  for msg in warnings {
    tracing::warn!("{}", msg);
  }
}
