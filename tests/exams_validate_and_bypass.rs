mod test_support;

use serde_json::json;
use test_support::{codes, request_err_code, request_ok, seeded_workspace, spawn_sidecar, submission};

#[test]
fn dry_run_reports_verdicts_without_writing() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seeded_workspace("examd-dry-run", &mut stdin, &mut reader);

    let res = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.validate",
        json!({ "submission": submission(
            "rossi",
            &["ANA1", "NOPE"],
            &[("2025-06-16", "09:00", "AULA3"), ("2025-08-12", "09:00", "AULA3")]
        )}),
    );
    // 2025-08-12 lies between estiva and autunnale.
    assert_eq!(res["accepted"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(
        codes(&res["rejected"]),
        vec!["session_not_found", "offering_not_found", "offering_not_found"]
    );

    let listed = request_ok(&mut stdin, &mut reader, "2", "exams.list", json!({}));
    assert_eq!(listed["exams"], json!([]));

    // The room is still free for a real proposal.
    let proposed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exams.propose",
        json!({ "submission": submission("rossi", &["ANA1"], &[("2025-06-16", "09:00", "AULA3")]) }),
    );
    assert_eq!(proposed["status"], "complete");
}

#[test]
fn missing_mandatory_fields_are_fatal() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seeded_workspace("examd-malformed", &mut stdin, &mut reader);

    let mut no_room = submission("rossi", &["ANA1"], &[("2025-06-16", "09:00", "AULA3")]);
    no_room["sittings"][0]
        .as_object_mut()
        .expect("sitting")
        .remove("room");
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "1",
        "exams.propose",
        json!({ "submission": no_room }),
    );
    assert_eq!(code, "malformed_input");

    let unknown_room = submission("rossi", &["ANA1"], &[("2025-06-16", "09:00", "AULA99")]);
    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "2",
        "exams.validate",
        json!({ "submission": unknown_room }),
    );
    assert_eq!(code, "malformed_input");

    let code = request_err_code(&mut stdin, &mut reader, "3", "exams.propose", json!({}));
    assert_eq!(code, "malformed_input");
}

#[test]
fn office_room_never_conflicts() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seeded_workspace("examd-office", &mut stdin, &mut reader);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.propose",
        json!({ "submission": submission("rossi", &["ANA1"], &[("2025-06-16", "09:00", "studio")]) }),
    );
    assert_eq!(first["status"], "complete");
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.propose",
        json!({ "submission": submission("verdi", &["CHI1"], &[("2025-06-16", "09:00", "STUDIO")]) }),
    );
    assert_eq!(second["status"], "complete");
}

#[test]
fn bypass_skips_rules_but_not_the_booking_index() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seeded_workspace("examd-bypass", &mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.propose",
        json!({ "submission": submission("rossi", &["ANA1"], &[("2025-06-10", "09:00", "AULA3")]) }),
    );

    let mut sub = submission(
        "admin",
        &["FIS1"],
        &[("2025-06-10", "10:30", "AULA3"), ("2025-06-14", "09:00", "AULA4")],
    );
    sub["bypassValidation"] = json!(true);
    let res = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.propose",
        json!({ "submission": sub }),
    );
    assert_eq!(res["bypassed"], true);
    assert_eq!(res["rejected"], json!([]));
    assert_eq!(res["insertedTitles"], json!(["Fisica I 2025-06-14"]));
    assert_eq!(codes(&res["insertionErrors"]), vec!["persistence_failure"]);
    assert_eq!(res["status"], "partial");
}

#[test]
fn exhaustive_overlap_mode_lists_every_conflict() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = seeded_workspace("examd-overlap-all", &mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "exams.propose",
        json!({ "submission": submission("rossi", &["ANA1"], &[("2025-06-16", "09:00", "AULA3")]) }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "exams.propose",
        json!({ "submission": submission("rossi", &["GEO1"], &[("2025-06-16", "10:00", "AULA4")]) }),
    );

    let mut sub = submission("bianchi", &["FIS1"], &[("2025-06-16", "10:30", "AULA5")]);
    let first = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "exams.validate",
        json!({ "submission": sub.clone() }),
    );
    let reason = first["rejected"][0]["reason"].as_str().expect("reason");
    assert_eq!(reason.matches(" min)").count(), 1, "{}", reason);

    sub["overlapMode"] = json!("all");
    let all = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "exams.validate",
        json!({ "submission": sub }),
    );
    let reason = all["rejected"][0]["reason"].as_str().expect("reason");
    assert!(reason.contains("Analisi I"), "{}", reason);
    assert!(reason.contains("Geometria"), "{}", reason);
}
