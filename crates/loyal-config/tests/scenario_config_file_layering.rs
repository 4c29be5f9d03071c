use std::io::Write;
use std::time::Duration;

use loyal_config::{CliArgs, ServiceConfig};

/// A YAML file on disk feeds worker knobs; flags still win; unknown keys fail.

fn write_yaml(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("tempfile");
    f.write_all(contents.as_bytes()).expect("write yaml");
    f
}

fn args_with(path: &std::path::Path) -> CliArgs {
    CliArgs {
        database_uri: Some("postgres://loyal:pw@localhost/loyal".to_string()),
        accrual_address: Some("http://localhost:8081".to_string()),
        config: Some(path.to_path_buf()),
        ..CliArgs::default()
    }
}

#[test]
fn file_values_apply_under_flags() {
    let f = write_yaml(
        r#"
database:
  max_connections: 3
worker:
  resync_interval_secs: 0
  retry:
    rate_limit_cooldown_ms: 1500
    max_rate_limit_cooldown_ms: 20000
    max_attempts: 10
"#,
    );

    let args = CliArgs {
        max_attempts: Some(2),
        ..args_with(f.path())
    };
    let cfg = ServiceConfig::from_args(args).expect("config");

    assert_eq!(cfg.db_max_connections, 3);
    assert_eq!(cfg.worker.resync_interval, Duration::ZERO);
    assert_eq!(cfg.worker.rate_limit_cooldown, Duration::from_millis(1500));
    assert_eq!(cfg.worker.max_rate_limit_cooldown, Duration::from_secs(20));
    assert_eq!(cfg.worker.max_attempts, Some(2));
}

#[test]
fn unknown_file_key_fails_startup() {
    let f = write_yaml("worker:\n  threads: 8\n");
    let err = ServiceConfig::from_args(args_with(f.path()))
        .expect_err("must fail")
        .to_string();
    assert!(err.contains("CONFIG_UNUSED_KEYS"), "{err}");
    assert!(err.contains("/worker/threads"), "{err}");
}

#[test]
fn missing_file_fails_startup() {
    let args = args_with(std::path::Path::new("/definitely/not/here.yaml"));
    let err = format!("{:#}", ServiceConfig::from_args(args).expect_err("must fail"));
    assert!(err.contains("CONFIG_FILE_UNREADABLE"), "{err}");
}
