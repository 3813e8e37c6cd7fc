//! vulcan CLI - load, check and resolve vulcan configurations
//!
//! Usage:
//!   vulcan check ./config
//!   vulcan vars ./config --format json
//!   vulcan dump ./config --var region=us-east-1 --strict

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use vulcan_core::{load_dir, Bindings, Config, Value};

/// vulcan - Declarative configuration with variable interpolation
#[derive(Parser)]
#[command(name = "vulcan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a config directory and validate it
    Check {
        /// Directory containing config files
        dir: PathBuf,
    },

    /// List declared variables
    Vars {
        /// Directory containing config files
        dir: PathBuf,

        /// Output format: text, json
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Resolve all interpolations and print the result
    Dump {
        /// Directory containing config files
        dir: PathBuf,

        /// Set a variable (value is parsed as YAML), may be repeated
        #[arg(long = "var", value_name = "NAME=VALUE")]
        vars: Vec<String>,

        /// Output format: yaml, json
        #[arg(short, long, default_value = "yaml", value_parser = ["yaml", "json"])]
        format: String,

        /// Fail if any value is left unresolved
        #[arg(long)]
        strict: bool,
    },
}

/// Run the CLI with the process arguments
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Check { dir } => cmd_check(&dir),
        Commands::Vars { dir, format } => cmd_vars(&dir, &format),
        Commands::Dump {
            dir,
            vars,
            format,
            strict,
        } => cmd_dump(&dir, &vars, &format, strict),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}

fn load_config(dir: &Path) -> Result<Config, String> {
    load_dir(dir).map_err(|e| format!("Failed to load {}: {}", dir.display(), e))
}

fn warn_unknown_keys(config: &Config) {
    for key in &config.unknown_keys {
        eprintln!(
            "{}: ignored top-level key '{}'",
            "warning".yellow(),
            key
        );
    }
}

fn cmd_check(dir: &Path) -> ExitCode {
    let mut config = match load_config(dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };
    warn_unknown_keys(&config);

    match config.validate() {
        Ok(()) => {
            println!("{} {} is valid", "✓".green(), dir.display());
            println!("{}", summary(&config));
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{} Validation failed\n", "✗".red());
            eprintln!("{}", e);
            ExitCode::from(1)
        }
    }
}

fn summary(config: &Config) -> String {
    let resources: usize = config.resources.values().map(Vec::len).sum();
    format!(
        "  {} files loaded, {} variables, {} file blocks, {} resources in {} kinds",
        config.sources.len(),
        config.variables.len(),
        config.files.len(),
        resources,
        config.resources.len()
    )
}

fn cmd_vars(dir: &Path, format: &str) -> ExitCode {
    let config = match load_config(dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };

    let output = match format {
        "json" => {
            let vars: Vec<serde_json::Value> = config
                .variables
                .iter()
                .map(|v| {
                    serde_json::json!({
                        "name": v.name,
                        "type": v.variable_type().printable(),
                        "default": v.default,
                        "description": v.description,
                    })
                })
                .collect();
            match serde_json::to_string_pretty(&vars) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    return ExitCode::from(1);
                }
            }
        }
        _ => config
            .variables
            .iter()
            .map(|v| {
                let mut line = format!("{} ({})", v.name.bold(), v.variable_type());
                match &v.default {
                    Some(default) => line.push_str(&format!(" = {}", default)),
                    None => line.push_str(&format!(" {}", "(required)".yellow())),
                }
                if let Some(description) = &v.description {
                    line.push_str(&format!("\n    {}", description.dimmed()));
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n"),
    };

    if !output.is_empty() {
        println!("{}", output);
    }
    ExitCode::SUCCESS
}

fn cmd_dump(dir: &Path, vars: &[String], format: &str, strict: bool) -> ExitCode {
    let config = match load_config(dir) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.red());
            return ExitCode::from(2);
        }
    };
    warn_unknown_keys(&config);

    let bindings = match build_bindings(&config, vars) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            return ExitCode::from(1);
        }
    };

    if let Err(e) = config.interpolate(&bindings) {
        eprintln!("{} Interpolation failed\n", "✗".red());
        eprintln!("{}", e);
        return ExitCode::from(1);
    }

    let unresolved = config.unresolved_keys();
    if !unresolved.is_empty() {
        let label = if strict { "error".red() } else { "warning".yellow() };
        for key in &unresolved {
            eprintln!("{}: unresolved value at {}", label, key);
        }
        if strict {
            return ExitCode::from(1);
        }
    }

    match render(&config.to_value(), format) {
        Ok(content) => {
            print!("{}", content);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            ExitCode::from(1)
        }
    }
}

/// Variable defaults overlaid with `NAME=VALUE` overrides
///
/// An override of a declared variable must match its declared type and is
/// normalized the same way a default is.
fn build_bindings(config: &Config, vars: &[String]) -> Result<Bindings, String> {
    let mut bindings = config.default_bindings();
    for var in vars {
        let (name, value) = parse_var(var)?;
        let value = match config.variable(&name) {
            Some(declared) => {
                let mut checked = declared.clone();
                checked.default = Some(value);
                checked
                    .validate_type_and_default()
                    .map_err(|e| format!("Invalid --var '{}': {}", var, e))?;
                checked.default.unwrap_or_default()
            }
            None => {
                log::warn!("setting undeclared variable '{}'", name);
                value
            }
        };
        bindings.insert(name, value);
    }
    Ok(bindings)
}

/// Parse `NAME=VALUE`, reading the value as YAML
fn parse_var(arg: &str) -> Result<(String, Value), String> {
    let (name, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("Invalid --var '{}': expected NAME=VALUE", arg))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("Invalid --var '{}': missing variable name", arg));
    }

    let value = match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Null) | Err(_) => Value::String(raw.to_string()),
        Ok(value) => value,
    };
    Ok((name.to_string(), value))
}

fn render(value: &Value, format: &str) -> Result<String, String> {
    match format {
        "json" => serde_json::to_string_pretty(value)
            .map(|s| s + "\n")
            .map_err(|e| e.to_string()),
        _ => serde_yaml::to_string(value).map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use vulcan_core::UNKNOWN_VARIABLE_VALUE;

    fn config_dir(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.yaml"), content).unwrap();
        dir
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_dump_args() {
        let cli = Cli::try_parse_from([
            "vulcan", "dump", "./cfg", "--var", "a=1", "--var", "b=x", "--format", "json",
            "--strict",
        ])
        .unwrap();
        match cli.command {
            Commands::Dump {
                dir,
                vars,
                format,
                strict,
            } => {
                assert_eq!(dir, PathBuf::from("./cfg"));
                assert_eq!(vars, vec!["a=1", "b=x"]);
                assert_eq!(format, "json");
                assert!(strict);
            }
            _ => panic!("expected dump"),
        }

        assert!(Cli::try_parse_from(["vulcan", "dump", "./cfg", "--format", "toml"]).is_err());
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(
            parse_var("region=us-east-1").unwrap(),
            ("region".to_string(), Value::from("us-east-1"))
        );
        assert_eq!(
            parse_var("ports=[80, 443]").unwrap(),
            ("ports".to_string(), Value::from(vec![80, 443]))
        );
        assert_eq!(
            parse_var("empty=").unwrap(),
            ("empty".to_string(), Value::from(""))
        );
        assert_eq!(
            parse_var("motd=a=b").unwrap().1,
            Value::from("a=b")
        );
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_build_bindings_overrides_defaults() {
        let dir = config_dir("variable:\n  region:\n    default: eu-west-1\n  ami: {}\n");
        let config = load_config(dir.path()).unwrap();

        let bindings = build_bindings(&config, &["region=us-east-1".to_string()]).unwrap();
        assert_eq!(bindings.get("region"), Some(&Value::from("us-east-1")));
        assert_eq!(bindings.get("ami"), Some(&Value::from(UNKNOWN_VARIABLE_VALUE)));
    }

    #[test]
    fn test_build_bindings_checks_declared_type() {
        let dir = config_dir("variable:\n  region:\n    type: string\n  port:\n    type: string\n");
        let config = load_config(dir.path()).unwrap();

        let err = build_bindings(&config, &["region=[a, b]".to_string()]).unwrap_err();
        assert!(err.contains("Invalid --var 'region=[a, b]'"));
        assert!(err.contains("string"));
        assert!(err.contains("list"));

        let bindings = build_bindings(&config, &["port=8080".to_string()]).unwrap();
        assert_eq!(bindings.get("port"), Some(&Value::from("8080")));

        let bindings = build_bindings(&config, &["extra=[a]".to_string()]).unwrap();
        assert_eq!(bindings.get("extra"), Some(&Value::from(vec!["a"])));
    }

    #[test]
    fn test_render_formats() {
        let dir = config_dir("package:\n  nginx:\n    version: '${var.v}'\nvariable:\n  v:\n    default: '1.25'\n");
        let config = load_config(dir.path()).unwrap();
        config.interpolate(&config.default_bindings()).unwrap();

        let yaml = render(&config.to_value(), "yaml").unwrap();
        assert!(yaml.contains("version: '1.25'"));

        let json = render(&config.to_value(), "json").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["package"]["nginx"]["version"], "1.25");
    }

    #[test]
    fn test_summary() {
        let dir = config_dir("variable:\n  a: {}\npackage:\n  x: {}\n  y: {}\nservice:\n  z: {}\n");
        let config = load_config(dir.path()).unwrap();
        assert_eq!(
            summary(&config),
            "  1 files loaded, 1 variables, 0 file blocks, 3 resources in 2 kinds"
        );
    }

    #[test]
    fn test_load_config_error() {
        let dir = TempDir::new().unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(err.contains("No config files found in"));
    }
}
