use std::path::{Path, PathBuf};
use std::time::Duration;
use workflow_replay::runtime::{FakeFileSystem, ProductionFileSystem};
use workflow_replay::types::{Point, Region};
use workflow_replay::workflow::{
    dry_run, list_workflows, Action, ConditionKind, TargetCandidate, Workflow,
};

fn fixture(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(path)
}

fn load(name: &str) -> Workflow {
    Workflow::load(
        &ProductionFileSystem,
        &fixture(&format!("workflows/{name}")),
        Path::new("/work"),
    )
    .expect("load fixture")
}

#[test]
fn legacy_recording_normalises_into_typed_steps() {
    let wf = load("legacy.json");
    let ids = wf.steps.iter().map(|s| s.id.as_str()).collect::<Vec<_>>();
    assert_eq!(ids, vec!["1", "2", "3", "4", "5"]);

    assert_eq!(
        wf.steps[0].action,
        Action::Click {
            clicks: 2,
            interval: Duration::from_millis(80)
        }
    );
    assert_eq!(
        wf.steps[0].target.candidates(),
        &[TargetCandidate::Absolute(Point::new(640, 360))]
    );
    assert_eq!(
        wf.steps[1].action,
        Action::KeyPress {
            key: Some("enter".to_string())
        }
    );
    assert_eq!(
        wf.steps[2].action,
        Action::KeyPress {
            key: Some("ctrl+s".to_string())
        }
    );
    assert_eq!(
        wf.steps[3].action,
        Action::TypeText {
            text: Some("notes.txt".to_string())
        }
    );
    assert_eq!(
        wf.steps[4].action,
        Action::Unsupported {
            name: "scroll".to_string()
        }
    );
}

#[test]
fn legacy_condition_tags_keep_their_payloads() {
    let wf = load("legacy.json");
    let saved = wf.steps[2].post_condition.as_ref().expect("post condition");
    assert_eq!(
        saved.kind,
        ConditionKind::TextContains {
            expected: vec!["Saved".to_string(), "saved".to_string()],
            region: Some(Region {
                left: 0,
                top: 0,
                width: 400,
                height: 40
            }),
        }
    );
    assert_eq!(saved.timeout, None);

    let unknown = wf.steps[4].post_condition.as_ref().expect("post condition");
    assert_eq!(
        unknown.kind,
        ConditionKind::Unrecognized {
            tag: "pixel_color".to_string()
        }
    );
    assert_eq!(unknown.fallback_sleep, Some(Duration::from_millis(100)));
}

#[test]
fn anchor_paths_resolve_against_the_base_dir() {
    let wf = load("notepad.json");
    assert_eq!(
        wf.steps[0].target.candidates(),
        &[
            TargetCandidate::Anchor(PathBuf::from("/work/anchors/new_file.png")),
            TargetCandidate::Fractional { fx: 0.125, fy: 0.5 },
            TargetCandidate::Absolute(Point::new(100, 100)),
        ]
    );
    let confirm = wf.steps[2].post_condition.as_ref().expect("post condition");
    assert_eq!(confirm.retries, Some(2));
    assert_eq!(confirm.retry_wait, Some(Duration::from_millis(500)));
}

#[test]
fn dry_run_is_identical_for_identical_input() {
    let first = load("notepad.json");
    let second = load("notepad.json");
    assert_eq!(first.digest, second.digest);
    assert_eq!(dry_run(&first), dry_run(&second));
    assert_eq!(dry_run(&first).lines().count(), 1 + first.steps.len() + 1);
}

#[test]
fn listing_only_returns_json_files_in_name_order() {
    let fs = FakeFileSystem::default();
    fs.insert("/flows/b.json", b"{}".to_vec());
    fs.insert("/flows/a.json", b"{}".to_vec());
    fs.insert("/flows/notes.txt", b"x".to_vec());
    let flows = list_workflows(&fs, Path::new("/flows")).expect("list");
    assert_eq!(
        flows,
        vec![PathBuf::from("/flows/a.json"), PathBuf::from("/flows/b.json")]
    );
}

#[test]
fn malformed_json_is_a_workflow_error() {
    let fs = FakeFileSystem::with_file("/flows/bad.json", "{\"steps\": [");
    let err = Workflow::load(&fs, Path::new("/flows/bad.json"), Path::new("/")).expect_err("bad");
    assert!(err.to_string().contains("/flows/bad.json"));
}
