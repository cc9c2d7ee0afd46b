mod test_support;

use serde_json::json;
use std::time::Duration;
use test_support::{
    create_layer, login_teacher, request_err, request_ok, seed_topic, spawn_sidecar, str_field,
    temp_dir,
};

fn ids(group: &serde_json::Value) -> Vec<String> {
    group["resources"]
        .as_array()
        .expect("resources array")
        .iter()
        .map(|r| r["id"].as_str().expect("id").to_string())
        .collect()
}

fn order_indexes(group: &serde_json::Value) -> Vec<i64> {
    group["resources"]
        .as_array()
        .expect("resources array")
        .iter()
        .map(|r| r["orderIndex"].as_i64().expect("orderIndex"))
        .collect()
}

fn group_named<'a>(path: &'a serde_json::Value, name: &str) -> &'a serde_json::Value {
    path["groups"]
        .as_array()
        .expect("groups")
        .iter()
        .find(|g| g["layerName"] == json!(name))
        .unwrap_or_else(|| panic!("no group {} in {}", name, path))
}

#[test]
fn reorder_within_layer_swaps_and_renumbers() {
    let workspace = temp_dir("learnpath-path-reorder");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_topic(&mut stdin, &mut reader, &workspace);
    login_teacher(&mut stdin, &mut reader);
    let foundation = create_layer(&mut stdin, &mut reader, "Foundation");

    let mut create = |id: &str, title: &str, ty: &str, order_index: i64| -> String {
        let mut params = json!({
            "title": title,
            "type": ty,
            "topicId": seeded.topic_id,
            "layerId": foundation,
            "orderIndex": order_index,
        });
        if ty == "QUIZ" {
            params["content"] = json!({ "quiz": [{
                "question": "Solve x + 2 = 5",
                "answerOptions": [
                    { "text": "3", "isCorrect": true },
                    { "text": "7", "isCorrect": false }
                ]
            }] });
        }
        let created = request_ok(&mut stdin, &mut reader, id, "resources.create", params);
        std::thread::sleep(Duration::from_millis(5));
        str_field(&created, "/resource/id")
    };
    let r1 = create("c1", "R1", "QUIZ", 0);
    let r2 = create("c2", "R2", "VIDEO", 0);
    let r3 = create("c3", "R3", "PRINTABLE", 5);

    let path = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "learningPath.get",
        json!({ "topicId": seeded.topic_id }),
    );
    assert_eq!(path["displayOrder"], json!(["Foundation"]));
    let group = group_named(&path, "Foundation");
    assert_eq!(ids(group), vec![r2.clone(), r1.clone(), r3.clone()]);

    let moved = request_ok(
        &mut stdin,
        &mut reader,
        "m1",
        "learningPath.reorder",
        json!({ "topicId": seeded.topic_id, "resourceId": r3, "direction": "up" }),
    );
    assert_eq!(moved["changed"], json!(true));
    assert_eq!(ids(&moved["group"]), vec![r2.clone(), r3.clone(), r1.clone()]);
    assert_eq!(order_indexes(&moved["group"]), vec![0, 1, 2]);

    // The persisted order survives a fresh fetch.
    let path = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "learningPath.get",
        json!({ "topicId": seeded.topic_id }),
    );
    let group = group_named(&path, "Foundation");
    assert_eq!(ids(group), vec![r2.clone(), r3.clone(), r1.clone()]);
    assert_eq!(order_indexes(group), vec![0, 1, 2]);

    // Boundary moves change nothing.
    let first_up = request_ok(
        &mut stdin,
        &mut reader,
        "m2",
        "learningPath.reorder",
        json!({ "topicId": seeded.topic_id, "resourceId": r2, "direction": "up" }),
    );
    assert_eq!(first_up["changed"], json!(false));
    let last_down = request_ok(
        &mut stdin,
        &mut reader,
        "m3",
        "learningPath.reorder",
        json!({ "topicId": seeded.topic_id, "resourceId": r1, "direction": "down" }),
    );
    assert_eq!(last_down["changed"], json!(false));

    // A caller-supplied cached order is the one that gets swapped.
    let cached = request_ok(
        &mut stdin,
        &mut reader,
        "m4",
        "learningPath.reorder",
        json!({
            "topicId": seeded.topic_id,
            "resourceId": r2,
            "direction": "down",
            "orderedResourceIds": [r3, r2, r1]
        }),
    );
    assert_eq!(ids(&cached["group"]), vec![r3.clone(), r1.clone(), r2.clone()]);
    assert_eq!(order_indexes(&cached["group"]), vec![0, 1, 2]);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "m5",
            "learningPath.reorder",
            json!({ "topicId": seeded.topic_id, "resourceId": "nope", "direction": "up" })
        ),
        "not_found"
    );
    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "m6",
            "learningPath.reorder",
            json!({ "topicId": seeded.topic_id, "resourceId": r1, "direction": "sideways" })
        ),
        "bad_params"
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn topic_and_subtopic_scopes_stay_separate() {
    let workspace = temp_dir("learnpath-path-scope");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_topic(&mut stdin, &mut reader, &workspace);
    login_teacher(&mut stdin, &mut reader);
    let foundation = create_layer(&mut stdin, &mut reader, "Foundation");
    let diagnostic = create_layer(&mut stdin, &mut reader, "Diagnostic");
    let sub = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "subtopics.create",
        json!({ "topicId": seeded.topic_id, "title": "Transposition" }),
    );
    let subtopic_id = str_field(&sub, "/subtopic/id");

    let topic_level = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "resources.create",
        json!({ "title": "Intro video", "type": "VIDEO", "topicId": seeded.topic_id, "layerId": foundation }),
    );
    let topic_level = str_field(&topic_level, "/resource/id");
    let sub_level = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "resources.create",
        json!({
            "title": "Warm-up sheet",
            "type": "PRINTABLE",
            "topicId": seeded.topic_id,
            "subtopicId": subtopic_id,
            "layerId": diagnostic
        }),
    );
    let sub_level = str_field(&sub_level, "/resource/id");

    let path = request_ok(
        &mut stdin,
        &mut reader,
        "g1",
        "learningPath.get",
        json!({ "topicId": seeded.topic_id }),
    );
    assert_eq!(path["resourceCount"], json!(1));
    assert_eq!(ids(group_named(&path, "Foundation")), vec![topic_level]);

    let path = request_ok(
        &mut stdin,
        &mut reader,
        "g2",
        "learningPath.get",
        json!({ "topicId": seeded.topic_id, "subtopicId": subtopic_id }),
    );
    assert_eq!(path["resourceCount"], json!(1));
    assert_eq!(path["displayOrder"], json!(["Diagnostic"]));
    assert_eq!(ids(group_named(&path, "Diagnostic")), vec![sub_level]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subtopic_reorder_is_all_or_nothing() {
    let workspace = temp_dir("learnpath-subtopic-reorder");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let seeded = seed_topic(&mut stdin, &mut reader, &workspace);

    let mut subtopic = |id: &str, topic_id: &str, title: &str| -> String {
        let s = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "subtopics.create",
            json!({ "topicId": topic_id, "title": title }),
        );
        str_field(&s, "/subtopic/id")
    };
    let a = subtopic("a", &seeded.topic_id, "A");
    let b = subtopic("b", &seeded.topic_id, "B");

    let other_topic = request_ok(
        &mut stdin,
        &mut reader,
        "t2",
        "topics.create",
        json!({ "chapterId": seeded.chapter_id, "title": "Two Variables" }),
    );
    let other_topic = str_field(&other_topic, "/topic/id");
    let mut stray = |id: &str| -> String {
        let s = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "subtopics.create",
            json!({ "topicId": other_topic, "title": "Elsewhere" }),
        );
        str_field(&s, "/subtopic/id")
    };
    let foreign = stray("c");

    request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "subtopics.reorder",
        json!({ "topicId": seeded.topic_id, "items": [
            { "id": b, "orderIndex": 0 },
            { "id": a, "orderIndex": 1 }
        ] }),
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l1",
        "subtopics.list",
        json!({ "topicId": seeded.topic_id }),
    );
    let titles: Vec<&str> = listed["subtopics"]
        .as_array()
        .expect("subtopics")
        .iter()
        .map(|s| s["title"].as_str().expect("title"))
        .collect();
    assert_eq!(titles, vec!["B", "A"]);

    assert_eq!(
        request_err(
            &mut stdin,
            &mut reader,
            "r2",
            "subtopics.reorder",
            json!({ "topicId": seeded.topic_id, "items": [
                { "id": a, "orderIndex": 0 },
                { "id": foreign, "orderIndex": 1 }
            ] })
        ),
        "not_found"
    );
    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "subtopics.list",
        json!({ "topicId": seeded.topic_id }),
    );
    let order: Vec<(String, i64)> = listed["subtopics"]
        .as_array()
        .expect("subtopics")
        .iter()
        .map(|s| {
            (
                s["title"].as_str().expect("title").to_string(),
                s["orderIndex"].as_i64().expect("orderIndex"),
            )
        })
        .collect();
    assert_eq!(order, vec![("B".to_string(), 0), ("A".to_string(), 1)]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
