//! Validation and execution share the process-wide registry
//!
//! Kept in its own test binary: it installs the global registry itself.

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use stanza_core::{registry, ArgMap, EngineConfig, ExecContext, Function, OutputMap, Result, TemplateParams, Value};
use stanza_ctl::{run_file, validate_file};
use std::fs;

struct Echo;

#[async_trait]
impl Function for Echo {
    fn name(&self) -> &'static str {
        "Echo"
    }

    fn required_args(&self) -> &'static [&'static str] {
        &["message"]
    }

    async fn exec(&self, _ctx: &ExecContext, _params: &TemplateParams, args: &ArgMap) -> Result<OutputMap> {
        Ok(OutputMap::from([(
            "echoed".to_string(),
            args.get("message").cloned().unwrap_or_default(),
        )]))
    }
}

#[tokio::test]
async fn test_validate_and_run_use_installed_registry() {
    let mut custom = stanza_functions::default_registry().unwrap();
    custom.register(Echo).unwrap();
    let installed = registry::install(custom).unwrap();
    assert!(std::ptr::eq(installed, stanza_functions::init().unwrap()));

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bp.yaml");
    fs::write(
        &file,
        r#"
actions:
  hello:
    phases:
      - name: greet
        func: Echo
        args:
          message: hi
"#,
    )
    .unwrap();

    validate_file(&file).unwrap();

    let config = EngineConfig::new().with_repository_config(dir.path().join("missing.config"));
    let outputs = run_file(&file, "hello", config, TemplateParams::default())
        .await
        .unwrap();
    assert_eq!(outputs["greet"]["echoed"], Value::from("hi"));
}
