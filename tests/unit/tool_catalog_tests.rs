//! Unit tests for the tool catalog and name-based behavior classes.

use openperouter_mcp::mcp::tools::{
    all_tools, ToolKind, EXTRACT_LEAF_CONFIGS, START_TRAFFIC_CAPTURE, STOP_TRAFFIC_CAPTURE,
};

#[test]
fn catalog_lists_three_tools_in_order() {
    let names: Vec<String> = all_tools().iter().map(|tool| tool.name.to_string()).collect();
    assert_eq!(
        names,
        [EXTRACT_LEAF_CONFIGS, START_TRAFFIC_CAPTURE, STOP_TRAFFIC_CAPTURE]
    );
}

#[test]
fn every_tool_has_object_schema_and_description() {
    for tool in all_tools() {
        assert_eq!(
            tool.input_schema.get("type").and_then(|v| v.as_str()),
            Some("object"),
            "{} schema must be an object",
            tool.name
        );
        assert!(tool.description.is_some(), "{} needs a description", tool.name);
    }
}

#[test]
fn start_tool_declares_optional_arguments() {
    let tools = all_tools();
    let start = tools
        .iter()
        .find(|tool| tool.name == START_TRAFFIC_CAPTURE)
        .expect("start tool listed");
    let properties = start
        .input_schema
        .get("properties")
        .and_then(|v| v.as_object())
        .expect("properties object");

    assert!(properties.contains_key("output_dir"));
    assert!(properties.contains_key("capture_filter"));
    assert_eq!(
        start.input_schema.get("required"),
        Some(&serde_json::json!([]))
    );
}

#[test]
fn names_resolve_to_behavior_classes() {
    assert_eq!(
        ToolKind::from_name(EXTRACT_LEAF_CONFIGS),
        Some(ToolKind::Synchronous)
    );
    assert_eq!(
        ToolKind::from_name(START_TRAFFIC_CAPTURE),
        Some(ToolKind::AsyncStart)
    );
    assert_eq!(
        ToolKind::from_name(STOP_TRAFFIC_CAPTURE),
        Some(ToolKind::AsyncStop)
    );
    assert_eq!(ToolKind::from_name("capture_traffic"), None);
}
