//! Unit tests for `BufferSink` and `BufferSinkFactory`.

use agent_relay::sink::{BufferSink, BufferSinkFactory, OutputSink, SinkFactory};

#[test]
fn placeholder_is_initial_content() {
    let sink = BufferSink::with_placeholder("job-1", "working…");
    assert_eq!(sink.contents(), "working…\n");
    assert_eq!(sink.title(), "job-1");
    assert!(sink.is_read_only());
}

#[test]
fn empty_placeholder_leaves_sink_empty() {
    let sink = BufferSink::with_placeholder("job-1", "");
    assert_eq!(sink.contents(), "");
}

#[test]
fn append_inserts_verbatim() {
    let sink = BufferSink::new("s");
    sink.append("Hel");
    sink.append("lo\nworld");
    assert_eq!(sink.contents(), "Hello\nworld");
    assert!(sink.is_read_only(), "sink re-locks after every edit");
}

#[test]
fn replace_discards_and_terminates_each_line() {
    let sink = BufferSink::with_placeholder("s", "working…");
    sink.append("streamed");
    sink.replace(&["final".to_owned(), "answer".to_owned()]);
    assert_eq!(sink.contents(), "final\nanswer\n");

    sink.replace(&[]);
    assert_eq!(sink.contents(), "");
}

#[test]
fn closed_sink_ignores_writes() {
    let sink = BufferSink::new("s");
    sink.append("kept\n");
    sink.close();
    sink.append("lost");
    sink.replace(&["lost".to_owned()]);
    assert!(sink.is_closed());
    assert_eq!(sink.contents(), "kept\n");
}

#[test]
fn clones_share_content() {
    let sink = BufferSink::new("s");
    let other = sink.clone();
    other.append("shared");
    assert_eq!(sink.contents(), "shared");
}

// ── Viewport ──────────────────────────────────────────────────────────────────

#[test]
fn hidden_sink_has_no_visible_lines() {
    let sink = BufferSink::new("s");
    assert!(!sink.is_visible());
    assert_eq!(sink.visible_lines(), None);
}

#[test]
fn attached_viewport_follows_appends() {
    let sink = BufferSink::new("s");
    sink.attach_viewport(2);
    for n in 0..5 {
        sink.append(&format!("line {n}\n"));
    }
    assert!(sink.is_visible());
    assert_eq!(
        sink.visible_lines(),
        Some(vec!["line 3".to_owned(), "line 4".to_owned()])
    );
}

#[test]
fn scrolling_up_stops_following() {
    let sink = BufferSink::new("s");
    sink.attach_viewport(2);
    for n in 0..5 {
        sink.append(&format!("{n}\n"));
    }

    sink.scroll_to(0);
    sink.append("5\n");
    let viewport = sink.viewport().expect("viewport attached");
    assert_eq!(viewport.top, 0);
    assert!(!viewport.follow);

    sink.scroll_to(usize::MAX);
    sink.append("6\n");
    assert_eq!(
        sink.visible_lines(),
        Some(vec!["5".to_owned(), "6".to_owned()])
    );
}

#[test]
fn detach_keeps_content() {
    let sink = BufferSink::new("s");
    sink.attach_viewport(10);
    sink.append("kept\n");
    sink.detach_viewport();
    assert!(!sink.is_visible());
    assert_eq!(sink.lines(), vec!["kept".to_owned()]);
}

#[test]
fn focus_requests_are_counted() {
    let sink = BufferSink::new("s");
    sink.focus();
    sink.focus();
    assert_eq!(sink.focus_requests(), 2);
}

// ── Factory ───────────────────────────────────────────────────────────────────

#[test]
fn factory_sinks_are_retrievable_by_title() {
    let factory = BufferSinkFactory::new();
    let sink = factory.create("job-3", "working…");
    sink.append("out\n");

    let buffer = factory.get("job-3").expect("sink registered");
    assert_eq!(buffer.contents(), "working…\nout\n");
    assert!(factory.get("job-4").is_none());
}
