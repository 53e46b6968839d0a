use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

fn temp_path(file_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("routines-{nanos}-{file_name}"))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

fn run(store_path: &PathBuf, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_routines"))
        .args(args)
        .env("ROUTINES_STORE_PATH", store_path)
        .env("ROUTINES_CONFIG_PATH", store_path.with_extension("config.json"))
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run routines")
}

fn json(output: &Output) -> serde_json::Value {
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

fn write_store(path: &PathBuf, routines: serde_json::Value, tasks: serde_json::Value) {
    let content = serde_json::json!({
        "schema_version": 1,
        "routines": routines,
        "tasks": tasks
    });
    std::fs::write(path, serde_json::to_string_pretty(&content).unwrap()).unwrap();
}

fn stored_routine(id: &str, frequency: &str, created_at: i64) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": "stretch",
        "frequency": frequency,
        "duration": "15m",
        "priority": 1,
        "completion_rate_overall": 100,
        "completion_rate_month": 100,
        "created_at": created_at,
        "updated_at": created_at
    })
}

#[test]
fn run_generates_five_daily_tasks_once() {
    let store_path = temp_path("cli-run-daily.json");

    json(&run(
        &store_path,
        &["--json", "add", "Stretch", "--frequency", "daily"],
    ));

    let first = json(&run(&store_path, &["--json", "run"]));
    let second = json(&run(&store_path, &["--json", "run"]));
    let tasks = json(&run(&store_path, &["--json", "list", "tasks"]));
    std::fs::remove_file(&store_path).ok();

    assert_eq!(first["routines_needing_generation"], 1);
    assert_eq!(first["routines_succeeded"], 1);
    assert_eq!(first["tasks_created"], 5);
    assert_eq!(first["tasks_linked"], 5);
    assert_eq!(second["routines_needing_generation"], 0);
    assert_eq!(second["tasks_created"], 0);

    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 5);
    for task in tasks {
        assert_eq!(task["status"], "pending");
        assert!(task["external_task_id"].as_str().unwrap().starts_with("local-"));
        assert!(task["due_date"].as_i64().unwrap() >= task["ready_date"].as_i64().unwrap());
    }
}

#[test]
fn run_marks_overdue_tasks_missed() {
    let store_path = temp_path("cli-run-missed.json");
    let now = now_millis();
    let ten_days_ago = now - 10 * DAY_MILLIS;

    write_store(
        &store_path,
        serde_json::json!([stored_routine("routine-1", "weekly", ten_days_ago)]),
        serde_json::json!([
            {
                "id": "task-old",
                "routine_id": "routine-1",
                "external_task_id": "ext-1",
                "ready_date": ten_days_ago,
                "due_date": ten_days_ago,
                "status": "pending",
                "created_at": ten_days_ago,
                "updated_at": ten_days_ago
            }
        ]),
    );

    let summary = json(&run(&store_path, &["--json", "run"]));
    let shown = json(&run(&store_path, &["--json", "show", "routine-1"]));
    std::fs::remove_file(&store_path).ok();

    assert_eq!(summary["missed"], 1);
    assert_eq!(summary["external_closed"], 1);
    assert_eq!(summary["rates_updated"], 1);
    // today plus the next weekly instance, which falls inside the window
    assert_eq!(summary["tasks_created"], 2);

    assert_eq!(shown["routine"]["completion_rate_overall"], 0);
    let tasks = shown["tasks"].as_array().unwrap();
    let old = tasks.iter().find(|task| task["id"] == "task-old").unwrap();
    assert_eq!(old["status"], "missed");
    assert!(
        tasks
            .iter()
            .any(|task| task["status"] == "pending" && task["ready_date"].as_i64().unwrap() >= now - DAY_MILLIS)
    );
}

#[test]
fn deferred_routine_is_left_alone() {
    let store_path = temp_path("cli-run-deferred.json");

    let added = json(&run(
        &store_path,
        &["--json", "add", "Stretch", "--frequency", "daily"],
    ));
    let id = added["id"].as_str().unwrap().to_string();
    json(&run(&store_path, &["--json", "run"]));
    json(&run(&store_path, &["--json", "defer", &id]));

    let summary = json(&run(&store_path, &["--json", "run"]));
    let deferred = json(&run(
        &store_path,
        &["--json", "list", "tasks", "--status", "deferred"],
    ));
    let pending = json(&run(
        &store_path,
        &["--json", "list", "tasks", "--status", "pending"],
    ));
    std::fs::remove_file(&store_path).ok();

    assert_eq!(summary["deferred"], 5);
    assert_eq!(summary["tasks_created"], 0);
    assert_eq!(deferred.as_array().unwrap().len(), 5);
    assert!(pending.as_array().unwrap().is_empty());
}

#[test]
fn skip_and_done_update_rates() {
    let store_path = temp_path("cli-skip-done.json");

    let added = json(&run(
        &store_path,
        &["--json", "add", "Stretch", "--frequency", "daily"],
    ));
    let id = added["id"].as_str().unwrap().to_string();
    json(&run(&store_path, &["--json", "run"]));
    let tasks = json(&run(&store_path, &["--json", "list", "tasks"]));
    let first = tasks[0]["id"].as_str().unwrap().to_string();
    let second = tasks[1]["id"].as_str().unwrap().to_string();
    let second_external = tasks[1]["external_task_id"].as_str().unwrap().to_string();

    let skipped = json(&run(&store_path, &["--json", "skip", &first]));
    let done = json(&run(
        &store_path,
        &["--json", "done", &second_external, "--external"],
    ));
    let repeat = run(&store_path, &["done", &second]);
    let shown = json(&run(&store_path, &["--json", "show", &id]));
    std::fs::remove_file(&store_path).ok();

    assert_eq!(skipped["task"]["status"], "skipped");
    assert_eq!(skipped["external_closed"], true);
    assert_eq!(done["id"], second.as_str());
    assert_eq!(done["status"], "completed");
    assert!(done["completed_date"].is_i64());
    assert_eq!(repeat.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&repeat.stderr).contains("invalid_input"));

    assert_eq!(shown["routine"]["completion_rate_overall"], 50);
    assert!(shown["routine"]["last_completed_date"].is_i64());
}

#[test]
fn external_service_without_token_is_rejected() {
    let store_path = temp_path("cli-external.json");

    json(&run(
        &store_path,
        &["--json", "add", "Stretch", "--frequency", "daily"],
    ));
    let output = run(
        &store_path,
        &[
            "--config-override",
            "external.base_url=http://127.0.0.1:9",
            "run",
        ],
    );
    std::fs::remove_file(&store_path).ok();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("external.api_token is required"));
}
