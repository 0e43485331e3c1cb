//! Config files driving parser and runner behaviour.

use smithy_config::SmithyConfig;
use smithy_types::{ExitCodePolicy, MessageId};

use crate::common::{Sandbox, describe, stream};

const CONFIG: &str = r#"
[parser]
placeholder = "<{title}>"

[runner]
exit_code = "strict"

[ready]
patterns = ["BOOTED"]
include_defaults = false
"#;

fn load(dir: &tempfile::TempDir) -> SmithyConfig {
    let path = dir.path().join("config.toml");
    smithy_utils::atomic_write(&path, CONFIG.as_bytes()).unwrap();
    SmithyConfig::load_from(&path).unwrap().unwrap()
}

#[test]
fn config_file_resolves_settings() {
    let dir = tempfile::tempdir().unwrap();
    let config = load(&dir);

    assert_eq!(config.runner.exit_code, ExitCodePolicy::Strict);
    assert_eq!(config.parser.placeholder.as_deref(), Some("<{title}>"));
    assert_eq!(config.ready.patterns, vec!["BOOTED"]);
    assert!(!config.ready.include_defaults);
    assert_eq!(config.workspace_root, None);
}

#[cfg(unix)]
#[tokio::test]
async fn configured_policies_apply_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = load(&dir);
    let mut sandbox = Sandbox::with_ready(config.runner, &config.ready);
    let mut tracker = sandbox.tracker(config.parser.clone());

    let text = concat!(
        "Go: ",
        r#"<artifact id="svc" title="Service">"#,
        r#"<action type="shell">exit 3</action>"#,
        r#"<action type="shell">echo BOOTED; exec sleep 30</action>"#,
        "</artifact>",
        r#"<artifact id="web" title="Web">"#,
        r#"<action type="shell">echo 'Local: http://localhost:3000'</action>"#,
        "</artifact>"
    );
    let render = stream(&mut tracker, &MessageId::new("m1"), text, 4);
    assert_eq!(render, "Go: <Service><Web>");

    let events: Vec<String> = sandbox.settle().await.iter().filter_map(describe).collect();
    // Strict exit codes fail the first action; best effort still runs the
    // second, which completes on the configured pattern.
    assert!(events.contains(&"fail svc:0".to_string()));
    assert!(events.contains(&"ready svc:1".to_string()));
    // Default banners are disabled, so this one only completes on exit.
    assert!(events.contains(&"done web:0".to_string()));

    sandbox.handle.shutdown().await;
}
