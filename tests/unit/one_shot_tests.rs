//! Unit tests for one-shot answer extraction.

use agent_relay::config::OutputFormat;
use agent_relay::orchestrator::one_shot::extract_answer;

#[test]
fn text_answer_is_trimmed_output() {
    assert_eq!(
        extract_answer(b"line one\r\nline two\r\n\n", OutputFormat::Text),
        "line one\nline two"
    );
}

#[test]
fn json_answer_is_result_field() {
    let out = br#"{"type":"result","subtype":"success","result":"42","is_error":false}"#;
    assert_eq!(extract_answer(out, OutputFormat::Json), "42");
}

#[test]
fn json_answer_without_result_is_empty() {
    assert_eq!(extract_answer(b"{\"type\":\"result\"}", OutputFormat::Json), "");
    assert_eq!(extract_answer(b"garbage", OutputFormat::Json), "");
}

#[test]
fn stream_answer_prefers_terminal_result() {
    let out = concat!(
        "{\"type\":\"system\",\"subtype\":\"init\"}\n",
        "{\"type\":\"assistant\",\"message\":{\"content\":[{\"text\":\"draft\"}]}}\n",
        "{\"type\":\"result\",\"result\":\"final\"}\n",
        "{\"type\":\"result\",\"result\":\"ignored\"}\n",
    );
    assert_eq!(extract_answer(out.as_bytes(), OutputFormat::StreamJson), "final");
}

#[test]
fn stream_answer_falls_back_to_streamed_text() {
    let out = concat!(
        "banner text\n",
        "{\"type\":\"assistant\",\"message\":{\"content\":[{\"text\":\"Hel\"}]}}\n",
        "{\"type\":\"assistant\",\"message\":{\"content\":[{\"text\":\"lo\"}]}}",
    );
    assert_eq!(extract_answer(out.as_bytes(), OutputFormat::StreamJson), "Hello");
}

#[test]
fn empty_output_is_empty_answer() {
    for format in [OutputFormat::Text, OutputFormat::Json, OutputFormat::StreamJson] {
        assert_eq!(extract_answer(b"", format), "", "{format:?}");
    }
}
