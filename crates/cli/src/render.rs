//! Terminal rendering of runtime events.
//!
//! Renderers are looked up by event kind; kinds without one go to the
//! default renderer, which only logs. Rendered lines go to stderr so the
//! final answer on stdout stays clean.

use std::sync::Arc;

use cadre_core::event::RuntimeEvent;
use cadre_core::pubsub::{Hub, Unsubscribe};
use cadre_core::registry::{Factory, Registry};

/// Turns one event into a line of output, or nothing.
pub type Renderer = fn(&RuntimeEvent) -> Option<String>;

const PREVIEW_CHARS: usize = 120;

fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    let mut short: String = first.chars().take(PREVIEW_CHARS).collect();
    if short.len() < first.len() || text.lines().nth(1).is_some() {
        short.push_str(" …");
    }
    short
}

fn tool_call(event: &RuntimeEvent) -> Option<String> {
    match event {
        RuntimeEvent::ToolCall {
            agent,
            tool_name,
            arguments,
            ..
        } => Some(format!("[{agent}] → {tool_name}({})", preview(arguments))),
        _ => None,
    }
}

fn tool_call_response(event: &RuntimeEvent) -> Option<String> {
    match event {
        RuntimeEvent::ToolCallResponse {
            agent,
            tool_name,
            output,
            is_error,
            ..
        } => {
            let status = if *is_error { "failed" } else { "ok" };
            Some(format!("[{agent}] ← {tool_name} {status}: {}", preview(output)))
        }
        _ => None,
    }
}

fn handoff(event: &RuntimeEvent) -> Option<String> {
    match event {
        RuntimeEvent::Handoff { from, to } => Some(format!("[{from}] handed off to {to}")),
        _ => None,
    }
}

fn transfer_task(event: &RuntimeEvent) -> Option<String> {
    match event {
        RuntimeEvent::TransferTask { from, to, task } => {
            Some(format!("[{from}] delegated to {to}: {}", preview(task)))
        }
        _ => None,
    }
}

fn warning(event: &RuntimeEvent) -> Option<String> {
    match event {
        RuntimeEvent::Warning { agent, message } => Some(format!("warning [{agent}]: {message}")),
        _ => None,
    }
}

fn error(event: &RuntimeEvent) -> Option<String> {
    match event {
        RuntimeEvent::Error { agent, message } => Some(format!("error [{agent}]: {message}")),
        _ => None,
    }
}

fn max_iterations(event: &RuntimeEvent) -> Option<String> {
    match event {
        RuntimeEvent::MaxIterationsReached {
            agent,
            max_iterations,
        } => Some(format!(
            "[{agent}] stopped after {max_iterations} iterations"
        )),
        _ => None,
    }
}

fn session_summary(event: &RuntimeEvent) -> Option<String> {
    match event {
        RuntimeEvent::SessionSummary { .. } => Some("history summarized".to_string()),
        _ => None,
    }
}

fn log_only(event: &RuntimeEvent) -> Option<String> {
    tracing::debug!(event = event.kind(), "Runtime event");
    None
}

/// Renderers for the events worth showing, falling back to [`log_only`].
pub fn default_factory() -> Arc<Factory<String, Renderer>> {
    let registry: Registry<String, Renderer> = Registry::new();
    let renderers: [(&str, Renderer); 8] = [
        ("tool_call", tool_call),
        ("tool_call_response", tool_call_response),
        ("handoff", handoff),
        ("transfer_task", transfer_task),
        ("warning", warning),
        ("error", error),
        ("max_iterations_reached", max_iterations),
        ("session_summary", session_summary),
    ];
    for (kind, renderer) in renderers {
        registry.register(kind.to_string(), renderer);
    }
    Arc::new(Factory::new(Arc::new(registry)).with_fallback(log_only as Renderer))
}

pub fn render(factory: &Factory<String, Renderer>, event: &RuntimeEvent) -> Option<String> {
    factory.resolve(event.kind()).and_then(|renderer| renderer(event))
}

/// Print every event published on `hub` to stderr.
pub fn attach(hub: &Hub<RuntimeEvent>, factory: Arc<Factory<String, Renderer>>) -> Unsubscribe {
    hub.subscribe(move |_cancel, event| {
        let line = render(&factory, &event);
        async move {
            if let Some(line) = line {
                eprintln!("{line}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn registered_kinds_render() {
        let factory = default_factory();
        let line = render(
            &factory,
            &RuntimeEvent::ToolCall {
                agent: "root".into(),
                tool_call_id: "c1".into(),
                tool_name: "read_file".into(),
                arguments: r#"{"path":"a.txt"}"#.into(),
            },
        );
        assert_eq!(line.as_deref(), Some(r#"[root] → read_file({"path":"a.txt"})"#));

        let line = render(
            &factory,
            &RuntimeEvent::Handoff {
                from: "root".into(),
                to: "reviewer".into(),
            },
        );
        assert_eq!(line.as_deref(), Some("[root] handed off to reviewer"));
    }

    #[test]
    fn unregistered_kinds_fall_back_to_logging() {
        let factory = default_factory();
        assert!(factory.get_builder("stream_started").is_none());
        let event = RuntimeEvent::StreamStarted {
            session_id: "s".into(),
            agent: "root".into(),
            timestamp: Utc::now(),
        };
        assert_eq!(render(&factory, &event), None);
    }

    #[test]
    fn long_output_is_previewed() {
        let factory = default_factory();
        let line = render(
            &factory,
            &RuntimeEvent::ToolCallResponse {
                agent: "root".into(),
                tool_call_id: "c1".into(),
                tool_name: "shell".into(),
                output: "line one\nline two".into(),
                is_error: true,
            },
        )
        .unwrap();
        assert_eq!(line, "[root] ← shell failed: line one …");
    }
}
