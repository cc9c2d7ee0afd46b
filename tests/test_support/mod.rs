#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_learnpathd");
    let mut child = Command::new(exe)
        .env_remove("LEARNPATHD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn learnpathd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn send_line(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, line: &str) -> serde_json::Value {
    writeln!(stdin, "{}", line).expect("write request");
    stdin.flush().expect("flush request");
    let mut out = String::new();
    reader.read_line(&mut out).expect("read response line");
    assert!(!out.trim().is_empty(), "empty response for {}", line);
    serde_json::from_str(out.trim()).expect("parse response json")
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    let value = send_line(stdin, reader, &payload.to_string());
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

/// Asserts the call failed and returns its error code.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

pub fn str_field(v: &serde_json::Value, pointer: &str) -> String {
    v.pointer(pointer)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", pointer, v))
        .to_string()
}

pub struct SeededTopic {
    pub class_id: String,
    pub subject_id: String,
    pub chapter_id: String,
    pub topic_id: String,
}

/// Selects `workspace` and builds Class -> Subject -> Chapter -> Topic.
pub fn seed_topic(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> SeededTopic {
    request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        stdin,
        reader,
        "seed-class",
        "classes.create",
        json!({ "name": "Grade 8" }),
    );
    let class_id = str_field(&class, "/class/id");
    let subject = request_ok(
        stdin,
        reader,
        "seed-subject",
        "subjects.create",
        json!({ "classId": class_id, "name": "Mathematics", "board": "CBSE" }),
    );
    let subject_id = str_field(&subject, "/subject/id");
    let chapter = request_ok(
        stdin,
        reader,
        "seed-chapter",
        "chapters.create",
        json!({ "subjectId": subject_id, "title": "Linear Equations" }),
    );
    let chapter_id = str_field(&chapter, "/chapter/id");
    let topic = request_ok(
        stdin,
        reader,
        "seed-topic",
        "topics.create",
        json!({ "chapterId": chapter_id, "title": "One Variable" }),
    );
    let topic_id = str_field(&topic, "/topic/id");
    SeededTopic {
        class_id,
        subject_id,
        chapter_id,
        topic_id,
    }
}

/// Registers and logs in a teacher account; returns the user id.
pub fn login_teacher(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> String {
    request_ok(
        stdin,
        reader,
        "seed-user",
        "users.create",
        json!({ "email": "teacher@school.org", "name": "Ms. Rao", "password": "secret1" }),
    );
    let login = request_ok(
        stdin,
        reader,
        "seed-login",
        "auth.login",
        json!({ "email": "teacher@school.org", "password": "secret1" }),
    );
    str_field(&login, "/user/id")
}

pub fn create_layer(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    name: &str,
) -> String {
    let layer = request_ok(
        stdin,
        reader,
        &format!("layer-{}", name),
        "layers.create",
        json!({ "name": name }),
    );
    str_field(&layer, "/layer/id")
}
