use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::{contains, is_empty};
use serde_json::{Value, json};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

const SCRUBBED_ENV: [&str; 16] = [
    "GEMLAB_MODEL",
    "GEMLAB_SYSTEM",
    "GEMLAB_TEMPERATURE",
    "GEMLAB_MAX_TOKENS",
    "GEMLAB_TIMEOUT",
    "GEMLAB_RETRIES",
    "GEMLAB_RETRY_DELAY",
    "GEMLAB_OUTPUT",
    "GEMLAB_CONFIG",
    "GEMLAB_LOG",
    "GEMLAB_API_BASE",
    "GEMLAB_DATABASE_URL",
    "GEMLAB_CHROMA_URL",
    "GEMLAB_TOP_K",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
];

fn scrubbed(mut cmd: Command) -> Command {
    for name in SCRUBBED_ENV {
        cmd.env_remove(name);
    }
    cmd
}

fn gemask_cmd() -> Command {
    scrubbed(Command::new(assert_cmd::cargo::cargo_bin!("gemask")))
}

fn gemlab_cmd() -> Command {
    scrubbed(Command::new(assert_cmd::cargo::cargo_bin!("gemlab")))
}

fn unique_temp_path(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir().join(format!("gemask-test-{label}-{nanos}"))
}

fn parse_stdout_json(output: &[u8]) -> Value {
    let text = String::from_utf8(output.to_vec()).expect("stdout should be utf-8");
    serde_json::from_str(text.trim()).expect("stdout should contain valid JSON")
}

#[test]
fn dry_run_succeeds_without_api_key() {
    let assert = gemask_cmd().args(["--dry-run", "2+2?"]).assert().success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["dry_run"], Value::Bool(true));
    assert_eq!(body["model"], Value::String("gemini-2.5-flash".to_string()));
    assert_eq!(body["body"]["contents"][0]["parts"][0]["text"], json!("2+2?"));
}

#[test]
fn dry_run_show_usage_prints_unavailable() {
    gemask_cmd()
        .args(["--dry-run", "--show-usage", "2+2?"])
        .assert()
        .success()
        .stderr(contains("usage: unavailable latency_ms=0 (dry-run)"));
}

#[test]
fn missing_prompt_returns_explicit_error() {
    gemask_cmd()
        .arg("--dry-run")
        .assert()
        .failure()
        .stderr(contains("No prompt provided."));
}

#[test]
fn missing_api_key_returns_explicit_error() {
    gemask_cmd()
        .arg("hello")
        .assert()
        .failure()
        .stderr(contains("GEMINI_API_KEY is not set in the environment"));
}

#[test]
fn invalid_temperature_from_env_returns_error() {
    gemask_cmd()
        .env("GEMLAB_TEMPERATURE", "hot")
        .args(["--dry-run", "hello"])
        .assert()
        .failure()
        .stderr(contains("Invalid GEMLAB_TEMPERATURE 'hot'"));
}

#[test]
fn invalid_output_from_env_returns_error() {
    gemask_cmd()
        .env("GEMLAB_OUTPUT", "yaml")
        .args(["--dry-run", "hello"])
        .assert()
        .failure()
        .stderr(contains(
            "Invalid GEMLAB_OUTPUT 'yaml'. Supported values: text, json.",
        ));
}

#[test]
fn argument_prompt_has_priority_over_stdin() {
    let assert = gemask_cmd()
        .args(["--dry-run", "argument prompt"])
        .write_stdin("stdin prompt")
        .assert()
        .success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    let messages = body["messages"]
        .as_array()
        .expect("messages should be an array");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], Value::String("user".to_string()));
    assert_eq!(
        messages[0]["content"],
        Value::String("argument prompt".to_string())
    );
}

#[test]
fn system_instruction_is_sent_separately() {
    let assert = gemask_cmd()
        .args(["--dry-run", "--system", "Be terse.", "hello"])
        .assert()
        .success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["messages"][0]["role"], json!("system"));
    assert_eq!(
        body["body"]["systemInstruction"]["parts"][0]["text"],
        json!("Be terse.")
    );
    assert_eq!(body["body"]["contents"].as_array().map(Vec::len), Some(1));
}

#[test]
fn json_flag_sets_json_output_mode() {
    let assert = gemask_cmd()
        .args(["--dry-run", "--json", "hello"])
        .assert()
        .success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["output"], Value::String("json".to_string()));
}

#[test]
fn json_flag_overrides_output_text() {
    let assert = gemask_cmd()
        .args(["--dry-run", "--output", "text", "--json", "hello"])
        .assert()
        .success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["output"], Value::String("json".to_string()));
}

#[test]
fn profile_loads_model_for_dry_run() {
    let config_path = unique_temp_path("config");
    fs::write(&config_path, "[profiles.pro]\nmodel = \"gemini-2.5-pro\"\n")
        .expect("config should be writable");

    let assert = gemask_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .args(["--profile", "pro", "--dry-run", "hello"])
        .assert()
        .success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["model"], Value::String("gemini-2.5-pro".to_string()));
}

#[test]
fn profile_is_not_implicit_when_not_passed() {
    let config_path = unique_temp_path("config-no-implicit");
    fs::write(&config_path, "[profiles.default]\nmodel = \"gemini-2.5-pro\"\n")
        .expect("config should be writable");

    let assert = gemask_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .args(["--dry-run", "hello"])
        .assert()
        .success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["model"], Value::String("gemini-2.5-flash".to_string()));
}

#[test]
fn save_writes_and_overwrites_output_file() {
    let output_path = unique_temp_path("save-output").join("nested").join("out.json");

    gemask_cmd()
        .args([
            "--dry-run",
            "--save",
            output_path.to_string_lossy().as_ref(),
            "first",
        ])
        .assert()
        .success();

    let first = fs::read_to_string(&output_path).expect("first output file should exist");
    assert!(first.contains("\"content\":\"first\""));

    gemask_cmd()
        .args([
            "--dry-run",
            "--save",
            output_path.to_string_lossy().as_ref(),
            "second",
        ])
        .assert()
        .success();

    let second = fs::read_to_string(&output_path).expect("second output file should exist");
    assert!(second.contains("\"content\":\"second\""));
    assert!(!second.contains("\"content\":\"first\""));
}

#[test]
fn save_with_invalid_parent_path_returns_explicit_error() {
    let parent_file = unique_temp_path("save-invalid-parent");
    fs::write(&parent_file, "not a directory").expect("parent marker file should be writable");
    let output_path = parent_file.join("sub").join("out.json");

    gemask_cmd()
        .args([
            "--dry-run",
            "--save",
            output_path.to_string_lossy().as_ref(),
            "hello",
        ])
        .assert()
        .failure()
        .stderr(contains("Failed to create output directory"));
}

#[test]
fn long_prompt_with_max_tokens_is_reflected_in_dry_run_request() {
    let prompt = "x".repeat(24_000);

    let assert = gemask_cmd()
        .args(["--dry-run", "--max-tokens", "128"])
        .write_stdin(prompt.clone())
        .assert()
        .success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    let messages = body["messages"]
        .as_array()
        .expect("messages should be an array");

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], Value::String(prompt));
    assert_eq!(body["request"]["max_tokens"], Value::from(128));
    assert_eq!(
        body["body"]["generationConfig"]["maxOutputTokens"],
        Value::from(128)
    );
}

#[test]
fn precedence_for_temperature_timeout_and_output_is_respected() {
    let config_path = unique_temp_path("precedence-more-options");
    fs::write(
        &config_path,
        "[profiles.flash]\nmodel = \"gemini-2.5-flash\"\ntemperature = 0.1\ntimeout = 7\noutput = \"json\"\n",
    )
    .expect("config should be writable");

    let env_over_profile = gemask_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .env("GEMLAB_TEMPERATURE", "0.5")
        .env("GEMLAB_TIMEOUT", "21")
        .args(["--profile", "flash", "--dry-run", "hello"])
        .assert()
        .success();

    let env_body = parse_stdout_json(&env_over_profile.get_output().stdout);
    assert_eq!(env_body["request"]["temperature"], json!(0.5));
    assert_eq!(env_body["request"]["timeout_secs"], Value::from(21));
    assert_eq!(env_body["output"], Value::String("json".to_string()));

    let cli_over_env = gemask_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .env("GEMLAB_TEMPERATURE", "0.5")
        .env("GEMLAB_TIMEOUT", "21")
        .args([
            "--profile",
            "flash",
            "--dry-run",
            "--temperature",
            "1.25",
            "--timeout",
            "33",
            "--output",
            "text",
            "hello",
        ])
        .assert()
        .success();

    let cli_body = parse_stdout_json(&cli_over_env.get_output().stdout);
    assert_eq!(cli_body["request"]["temperature"], json!(1.25));
    assert_eq!(cli_body["request"]["timeout_secs"], Value::from(33));
    assert_eq!(cli_body["output"], Value::String("text".to_string()));
}

#[test]
fn model_precedence_is_cli_then_env_then_profile() {
    let config_path = unique_temp_path("precedence");
    fs::write(&config_path, "[profiles.p]\nmodel = \"profile-model\"\n")
        .expect("config should be writable");

    let assert = gemask_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .env("GEMLAB_MODEL", "env-model")
        .args(["--profile", "p", "--dry-run", "hello"])
        .assert()
        .success();
    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["model"], Value::String("env-model".to_string()));

    let assert = gemask_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .env("GEMLAB_MODEL", "env-model")
        .args(["--profile", "p", "--model", "cli-model", "--dry-run", "hello"])
        .assert()
        .success();
    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["model"], Value::String("cli-model".to_string()));
}

#[test]
fn verbose_does_not_leak_api_key() {
    let secret = "gemini-secret-value";

    gemask_cmd()
        .env("GEMINI_API_KEY", secret)
        .args(["--dry-run", "--verbose", "hello"])
        .assert()
        .success()
        .stderr(contains("api_key_present=true").and(contains(secret).not()));
}

#[test]
fn profile_file_missing_returns_explicit_error() {
    let config_path = unique_temp_path("missing-config");

    gemask_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .args(["--profile", "p", "hello"])
        .assert()
        .failure()
        .stderr(contains("Failed to read config file"));
}

#[test]
fn invalid_profile_toml_returns_parse_error() {
    let config_path = unique_temp_path("invalid-toml");
    fs::write(&config_path, "[profiles.bad\nmodel = \"gemini-2.5-flash\"")
        .expect("config should be writable");

    gemask_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .args(["--profile", "bad", "hello"])
        .assert()
        .failure()
        .stderr(contains("Failed to parse config file"));
}

#[test]
fn profile_not_found_returns_error() {
    let config_path = unique_temp_path("profile-not-found");
    fs::write(&config_path, "[profiles.flash]\nmodel = \"gemini-2.5-flash\"\n")
        .expect("config should be writable");

    gemask_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .args(["--profile", "missing", "hello"])
        .assert()
        .failure()
        .stderr(contains("Profile 'missing' not found"));
}

#[test]
fn invalid_profile_output_returns_error() {
    let config_path = unique_temp_path("invalid-output");
    fs::write(&config_path, "[profiles.bad]\nmodel = \"m\"\noutput = \"yaml\"\n")
        .expect("config should be writable");

    gemask_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .args(["--profile", "bad", "hello"])
        .assert()
        .failure()
        .stderr(contains("Invalid profile output 'yaml'"));
}

#[test]
fn version_prints_build_metadata() {
    gemask_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("commit:").and(contains("built:")));
}

#[test]
fn gemlab_version_prints_build_metadata() {
    gemlab_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains("commit:").and(contains("built:")));
}

#[test]
fn gemlab_ask_dry_run_matches_gemask_output_shape() {
    let assert = gemlab_cmd()
        .args(["ask", "--dry-run", "hello"])
        .assert()
        .success();

    let body = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(body["model"], Value::String("gemini-2.5-flash".to_string()));
    assert_eq!(body["output"], Value::String("text".to_string()));
}

#[test]
fn gemlab_ask_version_prints_metadata() {
    gemlab_cmd()
        .args(["ask", "--version"])
        .assert()
        .success()
        .stdout(contains("commit:").and(contains("built:")));
}

#[test]
fn quiet_suppresses_show_usage_on_stderr() {
    gemask_cmd()
        .args(["--dry-run", "--show-usage", "--quiet", "hello"])
        .assert()
        .success()
        .stderr(is_empty());
}

#[test]
fn quiet_suppresses_verbose_logs_on_stderr() {
    gemask_cmd()
        .args(["--dry-run", "--verbose", "--quiet", "hello"])
        .assert()
        .success()
        .stderr(is_empty());
}

#[test]
fn quiet_keeps_fatal_errors_visible() {
    gemask_cmd()
        .args(["--quiet", "hello"])
        .assert()
        .failure()
        .stderr(contains("GEMINI_API_KEY is not set in the environment"));
}

#[test]
fn gemlab_ask_help_includes_examples() {
    gemlab_cmd()
        .args(["ask", "--help"])
        .assert()
        .success()
        .stdout(contains("Examples:").and(contains("--dry-run --json")));
}

#[test]
fn gemlab_help_mentions_completion_command() {
    gemlab_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("completion").and(contains("Generate shell completion script")));
}

#[test]
fn gemlab_completion_bash_outputs_script() {
    gemlab_cmd()
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(contains("_gemlab").and(contains("complete")));
}

#[test]
fn gemlab_completion_fish_outputs_script() {
    gemlab_cmd()
        .args(["completion", "fish"])
        .assert()
        .success()
        .stdout(contains("complete -c gemlab"));
}

#[test]
fn config_check_validates_every_profile() {
    let config_path = unique_temp_path("config-check");
    fs::write(
        &config_path,
        "[profiles.ok]\nmodel = \"gemini-2.5-flash\"\n\n[profiles.bad]\noutput = \"xml\"\n",
    )
    .expect("config should be writable");

    gemlab_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .args(["config", "check", "--profile", "ok"])
        .assert()
        .success()
        .stdout(contains("config OK"));

    gemlab_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .args(["config", "check"])
        .assert()
        .failure()
        .stderr(contains("Invalid profile output 'xml'"));
}

#[test]
fn config_path_honors_env_override() {
    let config_path = unique_temp_path("config-path");

    gemlab_cmd()
        .env("GEMLAB_CONFIG", &config_path)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(contains(config_path.to_string_lossy().as_ref()));
}

#[test]
fn agent_dry_run_reports_sql_schema() {
    let assert = gemlab_cmd()
        .args(["agent", "--dry-run"])
        .assert()
        .success();

    let plan = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(plan["context"], json!("sql"));
    assert_eq!(plan["database_url"], json!("sqlite::memory:"));
    assert_eq!(plan["tables"], json!(["employee_info"]));
    assert_eq!(plan["tools"], json!(["get_current_weather"]));
    let schema = plan["schema"].as_str().expect("schema should be a string");
    assert!(schema.starts_with("Table 'employee_info' has columns:"));
    assert!(schema.contains("salary"));
    assert_eq!(plan["questions"].as_array().map(Vec::len), Some(2));
}

#[test]
fn agent_dry_run_with_unknown_table_fails() {
    gemlab_cmd()
        .args(["agent", "--dry-run", "--table", "payroll"])
        .assert()
        .failure()
        .stderr(contains("table 'payroll' does not exist"));
}

#[test]
fn agent_dry_run_for_rag_lists_vector_store_settings() {
    let assert = gemlab_cmd()
        .args([
            "agent",
            "--context",
            "rag",
            "--collection",
            "handbook",
            "--dry-run",
            "How much is the mileage rate?",
        ])
        .assert()
        .success();

    let plan = parse_stdout_json(&assert.get_output().stdout);
    assert_eq!(plan["context"], json!("rag"));
    assert_eq!(plan["collection"], json!("handbook"));
    assert_eq!(plan["chroma_url"], json!("http://localhost:8000"));
    assert_eq!(plan["questions"], json!(["How much is the mileage rate?"]));
}

#[test]
fn describe_missing_image_is_explicit() {
    gemlab_cmd()
        .args(["describe", "/definitely/not/here/image1.jpg"])
        .assert()
        .failure()
        .stderr(contains("file not found"));
}

#[test]
fn upload_missing_file_is_explicit() {
    gemlab_cmd()
        .args(["upload", "/definitely/not/here/report.txt"])
        .assert()
        .failure()
        .stderr(contains("File not found."));
}
