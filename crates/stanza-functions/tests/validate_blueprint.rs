//! Validation of blueprints against the built-in functions

use serde_json::json;
use stanza_core::validate::{validate, validate_global};
use stanza_core::{Blueprint, Error};
use stanza_functions::{default_registry, init};
use stanza_test_utils::{blueprint, phase, shell};

#[test]
fn test_kube_task_missing_command() {
    let registry = default_registry().unwrap();
    let bp = blueprint(
        "backup",
        vec![phase("dump", "KubeTask", &[("image", json!("mysql:8"))])],
    );

    let err = validate(&registry, &bp).unwrap_err();
    assert!(matches!(err, Error::MissingArgument(ref key) if key == "command"));
    assert_eq!(err.to_string(), "Required arg missing: command");
}

#[test]
fn test_kube_exec_with_all_args() {
    let registry = default_registry().unwrap();
    let bp = blueprint(
        "backup",
        vec![phase(
            "flush",
            "KubeExec",
            &[
                ("namespace", json!("db")),
                ("pod", json!("mysql-0")),
                ("command", shell("mysqladmin flush-logs")),
            ],
        )],
    );

    assert!(validate(&registry, &bp).is_ok());
}

#[test]
fn test_unregistered_function_is_named() {
    let registry = default_registry().unwrap();
    let bp = blueprint(
        "backup",
        vec![phase(
            "dump",
            "KubeTasks",
            &[("image", json!("mysql:8")), ("command", shell("true"))],
        )],
    );

    let err = validate(&registry, &bp).unwrap_err();
    assert!(err.is_blueprint_error());
    assert_eq!(err.to_string(), "Requested function {KubeTasks} has not been registered");
}

#[test]
fn test_prepare_data_args() {
    let registry = default_registry().unwrap();
    let complete = blueprint(
        "restore",
        vec![phase(
            "seed",
            "PrepareData",
            &[
                ("namespace", json!("db")),
                ("image", json!("busybox")),
                ("command", shell("cp -r /seed/* /data")),
            ],
        )],
    );
    assert!(validate(&registry, &complete).is_ok());

    let missing = blueprint(
        "restore",
        vec![phase(
            "seed",
            "PrepareData",
            &[("namespace", json!("db")), ("image", json!("busybox"))],
        )],
    );
    assert_eq!(
        validate(&registry, &missing).unwrap_err().to_string(),
        "Required arg missing: command"
    );
}

#[test]
fn test_first_failing_phase_is_reported() {
    let registry = default_registry().unwrap();
    let bp = blueprint(
        "backup",
        vec![
            phase("snap", "CreateCSISnapshot", &[("pvc", json!("data-0"))]),
            phase("dump", "Nope", &[]),
        ],
    );

    assert_eq!(
        validate(&registry, &bp).unwrap_err().to_string(),
        "Required arg missing: namespace"
    );
}

#[test]
fn test_yaml_blueprint_against_global_registry() {
    init().unwrap();
    let bp = Blueprint::from_yaml_str(
        r#"
name: mysql
actions:
  backup:
    phases:
      - name: dump
        func: KubeTask
        args:
          namespace: db
          image: mysql:8
          command: ["sh", "-c", "mysqldump --all-databases"]
      - name: store
        func: CreateContentSnapshot
        args:
          path: /backups/mysql/dump.sql
          data: "{{ .Phases.dump.Output.dump }}"
  restore:
    phases:
      - name: fetch
        func: RestoreContentSnapshot
        args:
          backupID: abc/dump.sql
"#,
    )
    .unwrap();

    let err = validate_global(&bp).unwrap_err();
    assert_eq!(err.to_string(), "Required arg missing: targetPath");
}
