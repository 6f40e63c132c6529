use super::*;
use serde_json::json;

#[test]
fn test_text_aligns_object_keys() {
    let value = json!({"id": "R1", "status": "failed", "attempts": 3});

    let text = render(&value, &OutputFormat::Text).unwrap();

    assert_eq!(text, "attempts  3\nid        R1\nstatus    failed");
}

#[test]
fn test_text_separates_array_items() {
    let value = json!([{"id": "A"}, {"id": "B"}]);

    let text = render(&value, &OutputFormat::Text).unwrap();

    assert_eq!(text, "id  A\n\nid  B");
}

#[test]
fn test_text_marks_empty_list_and_nulls() {
    assert_eq!(render(&json!([]), &OutputFormat::Text).unwrap(), "(none)");
    assert_eq!(
        render(&json!({"owner": null}), &OutputFormat::Text).unwrap(),
        "owner  -"
    );
}

#[test]
fn test_json_is_pretty_printed() {
    let text = render(&json!({"ok": true}), &OutputFormat::Json).unwrap();

    assert_eq!(text, "{\n  \"ok\": true\n}");
}

#[test]
fn test_yaml_output() {
    let text = render(&json!({"status": "healthy"}), &OutputFormat::Yaml).unwrap();

    assert_eq!(text.trim(), "status: healthy");
}
