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
    let exe = env!("CARGO_BIN_EXE_examd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
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
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
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
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Returns the error code of a response that must have failed.
pub fn request_err_code(
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
        .expect("error.code")
        .to_string()
}

/// Opens a fresh workspace and loads a small L31 catalog for academic year 2024:
/// ANA1/GEO1 taught by rossi, FIS1 by bianchi (all first semester), CHI1 by
/// verdi in the second semester, rooms AULA3..AULA5 and the estiva and
/// autunnale windows of the generic curriculum.
pub fn seeded_workspace(
    prefix: &str,
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> PathBuf {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-courses",
        "catalog.courses.upsert",
        json!({ "courses": [
            { "code": "ANA1", "title": "Analisi I" },
            { "code": "FIS1", "title": "Fisica I" },
            { "code": "GEO1", "title": "Geometria" },
            { "code": "CHI1", "title": "Chimica" }
        ]}),
    );
    let offering = |code: &str, semester: i64| {
        json!({
            "courseCode": code,
            "cdsCode": "L31",
            "curriculumCode": "GEN",
            "academicYear": 2024,
            "yearOfStudy": 1,
            "semester": semester
        })
    };
    let _ = request_ok(
        stdin,
        reader,
        "seed-offerings",
        "catalog.offerings.upsert",
        json!({ "offerings": [
            offering("ANA1", 1),
            offering("FIS1", 1),
            offering("GEO1", 1),
            offering("CHI1", 2)
        ]}),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-teaching",
        "catalog.teaching.assign",
        json!({ "assignments": [
            { "courseCode": "ANA1", "teacher": "rossi", "academicYear": 2024 },
            { "courseCode": "GEO1", "teacher": "rossi", "academicYear": 2024 },
            { "courseCode": "FIS1", "teacher": "bianchi", "academicYear": 2024 },
            { "courseCode": "CHI1", "teacher": "verdi", "academicYear": 2024 }
        ]}),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-rooms",
        "catalog.rooms.upsert",
        json!({ "rooms": [
            { "code": "AULA3", "name": "Aula 3", "capacity": 120 },
            { "code": "AULA4", "name": "Aula 4", "capacity": 80 },
            { "code": "AULA5", "name": "Aula 5", "capacity": 40 }
        ]}),
    );
    let _ = request_ok(
        stdin,
        reader,
        "seed-sessions",
        "catalog.sessions.upsert",
        json!({ "sessions": [
            {
                "cdsCode": "L31", "curriculumCode": "GEN", "academicYear": 2024,
                "kind": "estiva", "startDate": "2025-05-26", "endDate": "2025-07-31"
            },
            {
                "cdsCode": "L31", "curriculumCode": "GEN", "academicYear": 2024,
                "kind": "autunnale", "startDate": "2025-09-01", "endDate": "2025-09-30"
            }
        ]}),
    );
    workspace
}

/// One submission from `teacher` for academic year 2024. Each sitting is
/// `(date, startTime, room)`.
pub fn submission(teacher: &str, courses: &[&str], sittings: &[(&str, &str, &str)]) -> serde_json::Value {
    json!({
        "teacher": teacher,
        "academicYear": 2024,
        "courseCodes": courses,
        "sittings": sittings
            .iter()
            .map(|(date, time, room)| json!({ "date": date, "startTime": time, "room": room }))
            .collect::<Vec<_>>(),
    })
}

pub fn codes(list: &serde_json::Value) -> Vec<String> {
    list.as_array()
        .expect("array")
        .iter()
        .map(|r| r.get("code").and_then(|v| v.as_str()).unwrap_or("").to_string())
        .collect()
}
