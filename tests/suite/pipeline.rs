//! Streamed transcripts driving real commands in a temporary workspace.

use std::time::Duration;

use pretty_assertions::assert_eq;
use smithy_types::{
    ActionError, ActionStatus, ArtifactId, ArtifactKey, FailurePolicy, MessageId, OutputStream,
    ParserSettings, RunnerEvent, RunnerSettings,
};

use crate::common::{Sandbox, WAIT, describe, stream};

const TODO_APP: &str = concat!(
    "Here is your app.\n\n",
    r#"<artifact id="todo" title="Todo app">"#,
    "\n",
    r#"<action type="file" filePath="src/index.js">"#,
    "console.log(\"héllo\");\n",
    "</action>\n",
    r#"<action type="shell">"#,
    "\n  echo one > order.txt\n",
    "</action>\n",
    r#"<action type="shell">echo two >> order.txt; cat order.txt</action>"#,
    "\n</artifact>\n",
    "Done."
);

fn key(message: &str, artifact: &str) -> ArtifactKey {
    ArtifactKey::new(MessageId::new(message), ArtifactId::new(artifact))
}

#[tokio::test]
async fn streamed_artifact_writes_files_and_runs_commands_in_order() {
    let mut sandbox = Sandbox::new(RunnerSettings::default());
    let mut tracker = sandbox.tracker(ParserSettings::default());
    let message = MessageId::new("m1");

    let render = stream(&mut tracker, &message, TODO_APP, 7);
    let events = sandbox.settle().await;

    assert!(render.starts_with("Here is your app."));
    assert!(render.ends_with("Done."));
    assert!(!render.contains("echo"));

    assert_eq!(
        sandbox.read("src/index.js").as_deref(),
        Some("console.log(\"héllo\");\n")
    );
    assert_eq!(sandbox.read("order.txt").as_deref(), Some("one\ntwo\n"));

    let order: Vec<String> = events.iter().filter_map(describe).collect();
    assert_eq!(
        order,
        vec![
            "start todo:0",
            "done todo:0",
            "start todo:1",
            "done todo:1",
            "start todo:2",
            "done todo:2",
        ]
    );

    let output: String = events
        .iter()
        .filter_map(|event| match event {
            RunnerEvent::Output {
                stream: OutputStream::Stdout,
                chunk,
                ..
            } => Some(chunk.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(output, "one\ntwo\n");
}

#[tokio::test]
async fn char_by_char_delivery_matches_single_delivery() {
    let mut whole = Sandbox::new(RunnerSettings::default());
    let mut tracker = whole.tracker(ParserSettings::default());
    let whole_render = stream(&mut tracker, &MessageId::new("m1"), TODO_APP, TODO_APP.len());
    let whole_events: Vec<String> = whole.settle().await.iter().filter_map(describe).collect();

    let mut split = Sandbox::new(RunnerSettings::default());
    let mut tracker = split.tracker(ParserSettings::default());
    let split_render = stream(&mut tracker, &MessageId::new("m1"), TODO_APP, 1);
    let split_events: Vec<String> = split.settle().await.iter().filter_map(describe).collect();

    assert_eq!(split_render, whole_render);
    assert_eq!(split_events, whole_events);
    assert_eq!(split.read("order.txt"), whole.read("order.txt"));
}

#[tokio::test]
async fn escaping_write_fails_and_the_artifact_continues() {
    let mut sandbox = Sandbox::new(RunnerSettings::default());
    let mut tracker = sandbox.tracker(ParserSettings::default());
    let text = concat!(
        r#"<artifact id="a" title="">"#,
        r#"<action type="file" filePath="../outside.txt">nope</action>"#,
        r#"<action type="shell">echo still here > after.txt</action>"#,
        "</artifact>"
    );

    stream(&mut tracker, &MessageId::new("m1"), text, 5);
    let events = sandbox.settle().await;

    let failure = events.iter().find_map(|event| match event {
        RunnerEvent::ActionFailed { error, .. } => Some(error.clone()),
        _ => None,
    });
    assert!(matches!(failure, Some(ActionError::PathOutsideRoot { .. })));
    assert!(!sandbox.dir.path().join("outside.txt").exists());
    assert_eq!(sandbox.read("after.txt").as_deref(), Some("still here\n"));

    let statuses: Vec<ActionStatus> = sandbox
        .handle
        .snapshot(key("m1", "a"))
        .await
        .iter()
        .map(smithy_runner::QueuedAction::status)
        .collect();
    assert_eq!(statuses, vec![ActionStatus::Failed, ActionStatus::Complete]);
}

#[tokio::test]
async fn fail_fast_stops_the_artifact_but_not_its_neighbours() {
    let mut sandbox = Sandbox::new(RunnerSettings {
        failure: FailurePolicy::FailFast,
        ..RunnerSettings::default()
    });
    let mut tracker = sandbox.tracker(ParserSettings::default());
    let text = concat!(
        r#"<artifact id="broken" title="">"#,
        r#"<action type="file" filePath="/etc/passwd">x</action>"#,
        r#"<action type="shell">touch never.txt</action>"#,
        "</artifact>",
        r#"<artifact id="fine" title="">"#,
        r#"<action type="shell">touch fine.txt</action>"#,
        "</artifact>"
    );

    stream(&mut tracker, &MessageId::new("m1"), text, 11);
    let events: Vec<String> = sandbox.settle().await.iter().filter_map(describe).collect();

    assert!(events.contains(&"fail broken:0".to_string()));
    assert!(events.contains(&"skip broken:1".to_string()));
    assert!(events.contains(&"done fine:0".to_string()));
    assert_eq!(sandbox.read("never.txt"), None);
    assert_eq!(sandbox.read("fine.txt").as_deref(), Some(""));
}

#[tokio::test]
async fn dev_server_completes_on_ready_and_is_killed_on_abandon() {
    let mut sandbox = Sandbox::new(RunnerSettings::default());
    let mut tracker = sandbox.tracker(ParserSettings::default());
    let text = concat!(
        r#"<artifact id="dev" title="">"#,
        r#"<action type="shell">echo '  Local:   http://localhost:5173/'; exec sleep 30</action>"#,
        r#"<action type="shell">echo after</action>"#,
        "</artifact>"
    );

    stream(&mut tracker, &MessageId::new("m1"), text, text.len());
    let events: Vec<String> = sandbox.settle().await.iter().filter_map(describe).collect();
    assert_eq!(
        events,
        vec!["start dev:0", "ready dev:0", "start dev:1", "done dev:1"]
    );
    assert_eq!(sandbox.handle.live_processes().await.len(), 1);
    assert_eq!(sandbox.env.live_processes(), 1);

    sandbox.handle.abandon_message(MessageId::new("m1"));
    tokio::time::timeout(WAIT, async {
        while sandbox.env.live_processes() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("dev server was never killed");
    assert!(sandbox.handle.live_processes().await.is_empty());
}

#[tokio::test]
async fn placeholder_marks_where_the_artifact_was() {
    let sandbox = Sandbox::new(RunnerSettings::default());
    let mut tracker = sandbox.tracker(ParserSettings {
        placeholder: Some("[{title}]".into()),
    });

    let render = stream(
        &mut tracker,
        &MessageId::new("m1"),
        r#"Before <artifact id="x" title="Site"><action type="file" filePath="a.txt">a</action></artifact> after"#,
        3,
    );
    assert_eq!(render, "Before [Site] after");
}
