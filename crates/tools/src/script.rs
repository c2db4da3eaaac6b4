//! Scripting sandbox: run JavaScript against a tool surface.
//!
//! Every evaluation builds a fresh interpreter, injects every tool from the
//! given toolsets as a global function and evaluates one snippet. Nothing
//! survives between evaluations.
//!
//! The interpreter is single threaded and runs on a blocking worker; a tool
//! call from script blocks the interpreter until the tool's async handler
//! finishes on the caller's runtime.
//!
//! Tool names are bound in toolset order, so a later toolset's tool shadows
//! an earlier one with the same name.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use boa_engine::{Context, JsNativeError, JsResult, JsString, JsValue, NativeFunction, Source, js_string};
use boa_gc::{Finalize, Trace};
use cadre_config::SandboxConfig;
use cadre_core::{CancellationToken, Tool, ToolError, ToolSet, required_parameters};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tracing::debug;

/// Installed before any tool. `__cadre_call` and `__cadre_console` are the
/// only host functions.
const PRELUDE: &str = r#"
function __cadre_str(v) {
  if (typeof v === "string") return v;
  if (v === undefined) return "undefined";
  try {
    const s = JSON.stringify(v);
    return s === undefined ? String(v) : s;
  } catch (e) {
    return String(v);
  }
}
function __cadre_format(v) {
  if (v === undefined || v === null) return "";
  if (typeof v === "object") return JSON.stringify(v);
  return String(v);
}
globalThis.console = {
  log: (...a) => __cadre_console("out", a.map(__cadre_str).join(" ")),
  info: (...a) => __cadre_console("out", a.map(__cadre_str).join(" ")),
  debug: (...a) => __cadre_console("out", a.map(__cadre_str).join(" ")),
  warn: (...a) => __cadre_console("err", a.map(__cadre_str).join(" ")),
  error: (...a) => __cadre_console("err", a.map(__cadre_str).join(" ")),
};
"#;

/// Result of running a script: the returned value and captured console
/// output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutput {
    /// The value returned by the script, or the error text if it failed
    pub value: String,

    /// Everything written with console.log/info/debug
    pub stdout: String,

    /// Everything written with console.warn/error
    pub stderr: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("{0}")]
    Evaluation(String),

    #[error("listing tools of toolset {toolset} failed: {reason}")]
    ToolListing { toolset: String, reason: String },

    #[error("script cancelled")]
    Cancelled,

    #[error("sandbox worker failed: {0}")]
    Worker(String),
}

/// Tools visible to one evaluation.
#[derive(Default)]
struct ToolSurface {
    /// Injection order
    names: Vec<String>,
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolSurface {
    async fn collect(toolsets: &[Arc<dyn ToolSet>]) -> Result<Self, ScriptError> {
        let mut surface = Self::default();
        for toolset in toolsets {
            let tools = toolset
                .tools()
                .await
                .map_err(|e| ScriptError::ToolListing {
                    toolset: toolset.name().to_string(),
                    reason: e.to_string(),
                })?;
            for tool in tools {
                let name = tool.name().to_string();
                if surface.tools.insert(name.clone(), tool).is_some() {
                    debug!(tool = %name, toolset = %toolset.name(), "Tool shadows an earlier tool of the same name");
                } else {
                    surface.names.push(name);
                }
            }
        }
        Ok(surface)
    }

    /// JavaScript binding every tool name to a bridge call.
    fn injection_source(&self) -> String {
        let mut source = String::new();
        for name in &self.names {
            let quoted = Value::String(name.clone()).to_string();
            source.push_str(&format!(
                "globalThis[{quoted}] = function (args) {{ \
                 return __cadre_call({quoted}, JSON.stringify(args === undefined ? {{}} : args)); }};\n"
            ));
        }
        source
    }
}

/// Host side of `__cadre_call`.
struct Bridge {
    tools: HashMap<String, Arc<dyn Tool>>,
    handle: Handle,
    cancel: CancellationToken,
}

impl Bridge {
    fn call(&self, name: &str, raw_arguments: &str) -> Result<String, String> {
        if self.cancel.is_cancelled() {
            return Err(ToolError::Cancelled(name.to_string()).to_string());
        }
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| format!("unknown tool '{name}'"))?;
        let arguments = prepare_arguments(tool.as_ref(), raw_arguments)?;

        debug!(tool = %name, "Script calling tool");
        let result = self.handle.block_on(async {
            tokio::select! {
                _ = self.cancel.cancelled() => Err(ToolError::Cancelled(name.to_string())),
                result = tool.execute(arguments) => result,
            }
        });

        result
            .map(|r| r.output)
            .map_err(|e| format!("executing tool {name}: {e}"))
    }
}

/// Parse script arguments and drop null optional parameters.
pub fn prepare_arguments(tool: &dyn Tool, raw: &str) -> Result<Value, String> {
    let parsed: Value =
        serde_json::from_str(raw).map_err(|e| format!("invalid arguments for {}: {e}", tool.name()))?;
    let mut arguments = match parsed {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(format!(
                "arguments for {} must be an object, got {other}",
                tool.name()
            ));
        }
    };

    let required = required_parameters(&tool.parameters_schema());
    arguments.retain(|key, value| !value.is_null() || required.iter().any(|r| r == key));
    Ok(Value::Object(arguments))
}

#[derive(Default)]
struct Captured {
    stdout: String,
    stderr: String,
}

struct Outcome {
    result: Result<String, String>,
    stdout: String,
    stderr: String,
}

/// Runs scripts and templates in a fresh sandbox per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptEngine {
    limits: SandboxConfig,
}

impl ScriptEngine {
    pub fn new(limits: SandboxConfig) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SandboxConfig {
        self.limits
    }

    /// Run a script body. A top-level `return` becomes the value.
    ///
    /// A script that fails to parse or throws is not an error: the error text
    /// is returned as the value together with the output captured so far.
    pub async fn run(
        &self,
        script: &str,
        toolsets: &[Arc<dyn ToolSet>],
        cancel: &CancellationToken,
    ) -> Result<ScriptOutput, ScriptError> {
        let source = format!("__cadre_format((() => {{\n{script}\n}})())");
        let outcome = self.evaluate(source, toolsets, cancel).await?;
        let value = match outcome.result {
            Ok(value) => value,
            Err(error) => {
                debug!(error = %error, "Script failed");
                error
            }
        };
        Ok(ScriptOutput {
            value,
            stdout: outcome.stdout,
            stderr: outcome.stderr,
        })
    }

    /// Evaluate `template` as one template literal so every `${...}` span is
    /// interpolated. Any evaluation failure is an error; there is no partial
    /// result.
    pub async fn expand_template(
        &self,
        template: &str,
        toolsets: &[Arc<dyn ToolSet>],
        cancel: &CancellationToken,
    ) -> Result<String, ScriptError> {
        let source = format!("`{template}`");
        self.evaluate(source, toolsets, cancel)
            .await?
            .result
            .map_err(ScriptError::Evaluation)
    }

    async fn evaluate(
        &self,
        source: String,
        toolsets: &[Arc<dyn ToolSet>],
        cancel: &CancellationToken,
    ) -> Result<Outcome, ScriptError> {
        if cancel.is_cancelled() {
            return Err(ScriptError::Cancelled);
        }
        let surface = ToolSurface::collect(toolsets).await?;
        let limits = self.limits;
        let handle = Handle::current();
        let worker_cancel = cancel.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            run_sandboxed(&source, surface, handle, worker_cancel, limits)
        })
        .await
        .map_err(|e| ScriptError::Worker(e.to_string()))?;

        if cancel.is_cancelled() {
            return Err(ScriptError::Cancelled);
        }
        Ok(outcome)
    }
}

fn run_sandboxed(
    source: &str,
    surface: ToolSurface,
    handle: Handle,
    cancel: CancellationToken,
    limits: SandboxConfig,
) -> Outcome {
    let injection = surface.injection_source();
    let bridge = Bridge {
        tools: surface.tools,
        handle,
        cancel,
    };

    let captured = Rc::new(RefCell::new(Captured::default()));
    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(limits.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(limits.recursion_limit);

    let result = install_host_functions(&mut context, Rc::new(bridge), Rc::clone(&captured))
        .and_then(|()| context.eval(Source::from_bytes(PRELUDE)))
        .and_then(|_| context.eval(Source::from_bytes(&injection)))
        .and_then(|_| context.eval(Source::from_bytes(source)))
        .and_then(|value| value.to_string(&mut context))
        .map(|value| value.to_std_string_escaped())
        .map_err(|e| e.to_string());

    let captured = captured.take();
    Outcome {
        result,
        stdout: captured.stdout,
        stderr: captured.stderr,
    }
}

fn install_host_functions(
    context: &mut Context,
    bridge: Rc<Bridge>,
    captured: Rc<RefCell<Captured>>,
) -> JsResult<()> {
    let call = NativeFunction::from_copy_closure_with_captures(
        |_this, args, host: &HostCall, context| {
            let name = string_arg(args, 0, context)?;
            let raw = string_arg(args, 1, context)?;
            match host.bridge.call(&name, &raw) {
                Ok(output) => Ok(JsValue::from(JsString::from(output.as_str()))),
                Err(message) => Err(JsNativeError::error().with_message(message).into()),
            }
        },
        HostCall { bridge },
    );
    context.register_global_callable(js_string!("__cadre_call"), 2, call)?;

    let console = NativeFunction::from_copy_closure_with_captures(
        |_this, args, host: &HostConsole, context| {
            let stream = string_arg(args, 0, context)?;
            let text = string_arg(args, 1, context)?;
            let mut captured = host.captured.borrow_mut();
            let buffer = if stream == "err" {
                &mut captured.stderr
            } else {
                &mut captured.stdout
            };
            buffer.push_str(&text);
            buffer.push('\n');
            Ok(JsValue::undefined())
        },
        HostConsole { captured },
    );
    context.register_global_callable(js_string!("__cadre_console"), 2, console)?;
    Ok(())
}

/// Captures of the `__cadre_call` host function. Host values hold no
/// JavaScript objects, so the collector skips them.
#[derive(Trace, Finalize)]
struct HostCall {
    #[unsafe_ignore_trace]
    bridge: Rc<Bridge>,
}

#[derive(Trace, Finalize)]
struct HostConsole {
    #[unsafe_ignore_trace]
    captured: Rc<RefCell<Captured>>,
}

fn string_arg(args: &[JsValue], index: usize, context: &mut Context) -> JsResult<String> {
    let value = args.get(index).cloned().unwrap_or_default();
    Ok(value.to_string(context)?.to_std_string_escaped())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FailingToolSet, FnTool, toolset};
    use cadre_core::ToolResult;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine() -> ScriptEngine {
        ScriptEngine::default()
    }

    fn greeter() -> Arc<dyn ToolSet> {
        toolset(
            "greeter",
            vec![
                FnTool::new("tool", |args| {
                    Ok(ToolResult::ok(format!("X: {}", args["message"].as_str().unwrap_or(""))))
                }),
                FnTool::new("a", |_| Ok(ToolResult::ok("Hello"))),
                FnTool::new("b", |_| Ok(ToolResult::ok("World"))),
            ],
        )
    }

    #[tokio::test]
    async fn template_interpolates_tool_output() {
        let out = engine()
            .expand_template(
                r#"prefix ${tool({message:"hello"})} suffix"#,
                &[greeter()],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "prefix X: hello suffix");
    }

    #[tokio::test]
    async fn template_with_several_expressions() {
        let out = engine()
            .expand_template("${a()}, ${b()}!", &[greeter()], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out, "Hello, World!");
    }

    #[tokio::test]
    async fn template_with_unknown_tool_fails() {
        let err = engine()
            .expand_template("${missing_tool()}", &[greeter()], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Evaluation(_)));
    }

    #[tokio::test]
    async fn script_captures_console_and_return_value() {
        let out = engine()
            .run(
                r#"console.log("hi", {n: 1}); console.error("oops"); return 1 + 1;"#,
                &[],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.value, "2");
        assert_eq!(out.stdout, "hi {\"n\":1}\n");
        assert_eq!(out.stderr, "oops\n");
    }

    #[tokio::test]
    async fn object_results_are_json() {
        let out = engine()
            .run("return {x: 1, y: [true]};", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.value, r#"{"x":1,"y":[true]}"#);

        let out = engine()
            .run("const z = 3;", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.value, "");
    }

    #[tokio::test]
    async fn syntax_error_is_reported_as_value() {
        let out = engine()
            .run("return (", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(!out.value.is_empty());
        assert!(out.stdout.is_empty());
    }

    #[tokio::test]
    async fn runtime_error_keeps_earlier_output() {
        let out = engine()
            .run(
                r#"console.log("before"); throw new Error("boom");"#,
                &[],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.value.contains("boom"));
        assert_eq!(out.stdout, "before\n");
    }

    #[tokio::test]
    async fn scripts_can_call_tools_in_loops() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let set = toolset(
            "counter",
            vec![FnTool::new("bump", move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ToolResult::ok(n.to_string()))
            })],
        );

        let out = engine()
            .run(
                "let last; for (let i = 0; i < 3; i++) { last = bump(); } return last;",
                &[set],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.value, "3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn null_optional_arguments_are_dropped() {
        let seen = Arc::new(Mutex::new(Value::Null));
        let sink = Arc::clone(&seen);
        let set = toolset(
            "rec",
            vec![
                FnTool::new("rec", move |args| {
                    *sink.lock().unwrap() = args;
                    Ok(ToolResult::ok("ok"))
                })
                .with_schema(serde_json::json!({
                    "type": "object",
                    "properties": {"a": {}, "b": {}, "c": {}},
                    "required": ["a"]
                })),
            ],
        );

        engine()
            .run("return rec({a: null, b: null, c: 1});", &[set], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), serde_json::json!({"a": null, "c": 1}));
    }

    #[tokio::test]
    async fn tool_failure_becomes_script_exception() {
        let set = toolset(
            "bad",
            vec![FnTool::new("explode", |_| Err(ToolError::failed("explode", "disk on fire")))],
        );
        let out = engine()
            .run(
                r#"try { explode(); } catch (e) { return "caught: " + e.message; }"#,
                &[set],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(out.value.starts_with("caught: "));
        assert!(out.value.contains("disk on fire"));
    }

    #[tokio::test]
    async fn later_toolset_shadows_earlier_tool() {
        let first = toolset("first", vec![FnTool::new("same", |_| Ok(ToolResult::ok("first")))]);
        let second = toolset("second", vec![FnTool::new("same", |_| Ok(ToolResult::ok("second")))]);
        let out = engine()
            .run("return same();", &[first, second], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.value, "second");
    }

    #[tokio::test]
    async fn interpreters_are_not_shared() {
        let engine = engine();
        let cancel = CancellationToken::new();
        engine.run("globalThis.leak = 1; return 1;", &[], &cancel).await.unwrap();
        let out = engine.run("return typeof leak;", &[], &cancel).await.unwrap();
        assert_eq!(out.value, "undefined");
    }

    #[tokio::test]
    async fn loop_limit_stops_runaway_scripts() {
        let engine = ScriptEngine::new(SandboxConfig {
            loop_iteration_limit: 100,
            recursion_limit: 64,
        });
        let out = engine
            .run("while (true) {}", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert!(!out.value.is_empty());
    }

    #[tokio::test]
    async fn cancelled_token_aborts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine().run("return 1;", &[], &cancel).await.unwrap_err();
        assert!(matches!(err, ScriptError::Cancelled));
    }

    #[tokio::test]
    async fn tool_listing_failure_is_an_error() {
        let err = engine()
            .run("return 1;", &[Arc::new(FailingToolSet::new("broken"))], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::ToolListing { ref toolset, .. } if toolset == "broken"));
    }
}
