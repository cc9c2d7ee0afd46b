mod test_support;

use serde_json::json;
use test_support::{
    create_layer, request, request_err, request_ok, seed_topic, spawn_sidecar, str_field, temp_dir,
};

#[test]
fn hierarchy_crud_and_nested_views() {
    let workspace = temp_dir("learnpath-hierarchy");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_topic(&mut stdin, &mut reader, &workspace);

    let classes = request_ok(&mut stdin, &mut reader, "1", "classes.list", json!({}));
    assert_eq!(classes["classes"][0]["name"], json!("Grade 8"));
    assert_eq!(classes["classes"][0]["subjects"][0]["board"], json!("CBSE"));

    let renamed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "classes.update",
        json!({ "classId": seeded.class_id, "patch": { "name": "Grade 8A" } }),
    );
    assert_eq!(renamed["class"]["name"], json!("Grade 8A"));
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "3",
            "classes.update",
            json!({ "classId": seeded.class_id, "patch": { "color": "red" } })
        ),
        "bad_params"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "4",
            "classes.update",
            json!({ "classId": seeded.class_id, "patch": { "name": "   " } })
        ),
        "bad_params"
    );

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "subjects.update",
        json!({ "subjectId": seeded.subject_id, "patch": { "board": null } }),
    );
    assert!(cleared["subject"]["board"].is_null());

    // Second chapter appends after the seeded one.
    let chapter = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "chapters.create",
        json!({ "subjectId": seeded.subject_id, "title": "Ratios" }),
    );
    assert_eq!(chapter["chapter"]["orderIndex"], json!(1));
    let ratios_id = str_field(&chapter, "/chapter/id");
    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "chapters.update",
        json!({ "chapterId": ratios_id, "patch": { "orderIndex": 0 } }),
    );
    assert_eq!(moved["chapter"]["orderIndex"], json!(0));
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "8",
            "chapters.update",
            json!({ "chapterId": ratios_id, "patch": { "orderIndex": -3 } })
        ),
        "bad_params"
    );

    let foundation = create_layer(&mut stdin, &mut reader, "Foundation");
    let sub = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "subtopics.create",
        json!({
            "topicId": seeded.topic_id,
            "title": "Transposition",
            "layerIds": [foundation]
        }),
    );
    let subtopic_id = str_field(&sub, "/subtopic/id");
    assert_eq!(sub["subtopic"]["requiredLayerIds"], json!([foundation]));
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "10",
            "subtopics.create",
            json!({ "topicId": seeded.topic_id, "title": "Broken", "layerIds": ["missing"] })
        ),
        "not_found"
    );
    // The failed create left nothing behind.
    let subs = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "subtopics.list",
        json!({ "topicId": seeded.topic_id }),
    );
    assert_eq!(subs["subtopics"].as_array().map(|a| a.len()), Some(1));

    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "subtopics.update",
        json!({ "subtopicId": subtopic_id, "patch": { "layerIds": [], "description": "Move terms" } }),
    );
    assert_eq!(cleared["subtopic"]["requiredLayerIds"], json!([]));
    assert_eq!(cleared["subtopic"]["description"], json!("Move terms"));
    request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "subtopics.update",
        json!({ "subtopicId": subtopic_id, "patch": { "layerIds": [foundation] } }),
    );

    let tree = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "classes.hierarchy",
        json!({ "classId": seeded.class_id }),
    );
    let chapters = &tree["class"]["subjects"][0]["chapters"];
    assert_eq!(chapters.as_array().map(|a| a.len()), Some(2));
    let linear = chapters
        .as_array()
        .and_then(|a| a.iter().find(|c| c["title"] == json!("Linear Equations")))
        .expect("seeded chapter");
    assert_eq!(
        linear["topics"][0]["subtopics"][0]["requiredLayerIds"],
        json!([foundation])
    );

    let details = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "subjects.details",
        json!({ "subjectId": seeded.subject_id }),
    );
    assert_eq!(details["subject"]["name"], json!("Mathematics"));
    assert_eq!(details["subject"]["chapters"].as_array().map(|a| a.len()), Some(2));

    // Delete guards report what still hangs off the row.
    let blocked = request(
        &mut stdin,
        &mut reader,
        "16",
        "topics.delete",
        json!({ "topicId": seeded.topic_id }),
    );
    assert_eq!(blocked["error"]["code"], json!("conflict"));
    assert_eq!(blocked["error"]["details"]["count"], json!(1));
    assert_eq!(blocked["error"]["details"]["dependents"]["subtopics"], json!(1));

    let blocked = request(
        &mut stdin,
        &mut reader,
        "17",
        "classes.delete",
        json!({ "classId": seeded.class_id }),
    );
    assert_eq!(blocked["error"]["code"], json!("conflict"));

    // Bottom-up deletion succeeds.
    request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "subtopics.delete",
        json!({ "subtopicId": subtopic_id }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "topics.delete",
        json!({ "topicId": seeded.topic_id }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "chapters.delete",
        json!({ "chapterId": seeded.chapter_id }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "chapters.delete",
        json!({ "chapterId": ratios_id }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "subjects.delete",
        json!({ "subjectId": seeded.subject_id }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "23",
        "classes.delete",
        json!({ "classId": seeded.class_id }),
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "24",
            "classes.delete",
            json!({ "classId": seeded.class_id })
        ),
        "not_found"
    );
    let classes = request_ok(&mut stdin, &mut reader, "25", "classes.list", json!({}));
    assert_eq!(classes["classes"], json!([]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn children_of_missing_parents_are_rejected() {
    let workspace = temp_dir("learnpath-hierarchy-parents");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    for (i, (method, params)) in [
        ("subjects.create", json!({ "classId": "nope", "name": "Science" })),
        ("chapters.create", json!({ "subjectId": "nope", "title": "Cells" })),
        ("topics.create", json!({ "chapterId": "nope", "title": "Mitosis" })),
        ("subtopics.create", json!({ "topicId": "nope", "title": "Prophase" })),
        ("chapters.list", json!({ "subjectId": "nope" })),
    ]
    .into_iter()
    .enumerate()
    {
        assert_eq!(
            request_err(&mut stdin, &mut reader, &format!("p{}", i), method, params),
            "not_found",
            "{}",
            method
        );
    }
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "blank",
            "classes.create",
            json!({ "name": "" })
        ),
        "bad_params"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
