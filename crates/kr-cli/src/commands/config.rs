//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{format_hosts, print_error, print_info, print_success, print_warning};
use kr_core::config::{self, ClientConfig};

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Load the client configuration, or defaults when there is no file yet
pub fn load_client_config(config_path: Option<&PathBuf>) -> Result<ClientConfig> {
    let path = resolve_path(config_path);

    if !path.exists() {
        tracing::debug!("No config at {:?}, using defaults", path);
        return Ok(ClientConfig::default());
    }

    let config: ClientConfig = config::load_config(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    Ok(config)
}

fn read_table(path: &Path) -> Result<toml::Table> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    toml::from_str(&content).with_context(|| "Failed to parse config file")
}

/// Get a config value by key
pub fn config_get(config_path: Option<&PathBuf>, key: &str) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_error(&format!("Config file not found: {:?}", path));
        print_info("Run 'kore config init' to create one");
        anyhow::bail!("No configuration file");
    }

    let table = read_table(&path)?;

    // Navigate through the key path (e.g., "backoff.initial")
    let mut current: &toml::Value = &toml::Value::Table(table);
    for part in key.split('.') {
        current = match current {
            toml::Value::Table(t) => match t.get(part) {
                Some(v) => v,
                None => anyhow::bail!("Key not found: {}", key),
            },
            // Index into arrays of tables, e.g. "hosts.0.address"
            toml::Value::Array(items) => match part.parse::<usize>().ok().and_then(|i| items.get(i)) {
                Some(v) => v,
                None => anyhow::bail!("Key not found: {}", key),
            },
            _ => anyhow::bail!("Key not found: {}", key),
        };
    }

    match current {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Integer(i) => println!("{}", i),
        toml::Value::Float(f) => println!("{}", f),
        toml::Value::Boolean(b) => println!("{}", b),
        toml::Value::Datetime(d) => println!("{}", d),
        toml::Value::Array(_) | toml::Value::Table(_) => {
            let mut wrapper = toml::Table::new();
            wrapper.insert(key.to_string(), current.clone());
            print!("{}", toml::to_string_pretty(&wrapper)?);
        }
    }

    Ok(())
}

fn parse_value(value: &str) -> toml::Value {
    if value == "true" {
        toml::Value::Boolean(true)
    } else if value == "false" {
        toml::Value::Boolean(false)
    } else if let Ok(i) = value.parse::<i64>() {
        toml::Value::Integer(i)
    } else if let Ok(f) = value.parse::<f64>() {
        toml::Value::Float(f)
    } else {
        toml::Value::String(value.to_string())
    }
}

/// Set a config value by key.
///
/// The edited file must still load as a valid client configuration, or
/// nothing is written.
pub fn config_set(config_path: Option<&PathBuf>, key: &str, value: &str) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_info("Creating default configuration...");
        config_init(config_path, false)?;
    }

    let mut table = read_table(&path)?;

    let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
    let (last_key, parents) = parts
        .split_last()
        .ok_or_else(|| anyhow::anyhow!("Invalid key: key path cannot be empty"))?;

    let mut current = &mut table;
    for part in parents {
        if !current.contains_key(*part) {
            current.insert(part.to_string(), toml::Value::Table(toml::Table::new()));
        }
        current = current
            .get_mut(*part)
            .and_then(|v| v.as_table_mut())
            .ok_or_else(|| anyhow::anyhow!("Cannot navigate to key: {}", key))?;
    }
    current.insert(last_key.to_string(), parse_value(value));

    let new_content = toml::to_string_pretty(&table)?;
    let parsed: ClientConfig =
        toml::from_str(&new_content).with_context(|| format!("Invalid value for {}", key))?;
    parsed
        .validate()
        .with_context(|| format!("Invalid value for {}", key))?;

    std::fs::write(&path, new_content)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Set {} = {}", key, value));
    Ok(())
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'kore config init' to create one");
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);

    Ok(())
}

/// List configured hosts
pub fn config_hosts(config_path: Option<&PathBuf>) -> Result<()> {
    let config = load_client_config(config_path)?;
    println!(
        "{}",
        format_hosts(&config.hosts, config.default_host.as_deref())
    );
    Ok(())
}

/// Initialize default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let config_file = resolve_path(config_path);

    if let Some(config_dir) = config_file.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !config_dir.exists() {
            std::fs::create_dir_all(config_dir)
                .with_context(|| format!("Failed to create config directory: {:?}", config_dir))?;
            print_success(&format!("Created config directory: {:?}", config_dir));
        }
    }

    if config_file.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", config_file));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    std::fs::write(&config_file, generate_default_config())
        .with_context(|| format!("Failed to write config file: {:?}", config_file))?;

    print_success(&format!("Created configuration file: {:?}", config_file));
    print_info("Edit the [[hosts]] entry to point at your media center");
    Ok(())
}

/// Open config in editor
pub fn config_edit(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_error(&format!("Config file not found: {:?}", path));
        print_info("Run 'kore config init' to create one");
        return Ok(());
    }

    let editor = std::env::var("EDITOR")
        .or_else(|_| std::env::var("VISUAL"))
        .unwrap_or_else(|_| {
            if cfg!(windows) {
                "notepad".to_string()
            } else {
                "vi".to_string()
            }
        });

    print_info(&format!("Opening config with: {}", editor));

    std::process::Command::new(&editor)
        .arg(&path)
        .status()
        .with_context(|| format!("Failed to open editor: {}", editor))?;

    Ok(())
}

/// Generate default configuration content
fn generate_default_config() -> String {
    r#"# Kore Remote configuration

# Host used when --host is not given
default_host = "living-room"

# Per-call timeout in milliseconds
call_timeout = 5000

# How often pending calls are checked for expiry, in milliseconds
timeout_sweep_interval = 100

# State query interval for polling-only hosts, in milliseconds
polling_interval = 1000

# Connect timeout in seconds
connect_timeout = 10

# Seconds a backgrounded client keeps its connection
background_grace_period = 30

[backoff]
# Initial reconnect delay in milliseconds
initial = 1000
# Maximum reconnect delay in milliseconds
max = 60000
# Backoff multiplier
multiplier = 2.0
# Jitter factor
jitter = 0.25

[event_server]
# Name shown by the host for this remote
device_name = "kore-remote"
# Keepalive interval in seconds
keepalive_interval = 45

[[hosts]]
name = "living-room"
address = "192.168.1.20"
# "push" uses the TCP port, "polling" the HTTP port
mode = "push"
tcp_port = 9090
http_port = 8080
event_server_port = 9777
# username = "kodi"
# password = "secret"
"#
    .to_string()
}
