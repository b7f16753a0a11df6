//! Evaluation of compiled modules inside QuickJS.
//!
//! One module is instantiated per emitted JS file, labeled with its stripped
//! name and linked by specifier through an artifact-backed resolver/loader
//! pair. Evaluation runs in two phases: the auxiliaries first, in harness
//! order (they are embedder-supplied, so a fault there is an embedding bug
//! and never a user diagnostic), then the harness module, which re-uses the
//! evaluated auxiliaries, runs the user module's top level, performs the
//! call, and leaves the outcome in the `result` global. The wall-clock
//! budget is enforced with an interrupt handler spanning both phases.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rquickjs::loader::{Loader, Resolver};
use rquickjs::module::Declared;
use rquickjs::{AsyncContext, AsyncRuntime, Ctx, Module};

use crate::compiler::CompilationArtifacts;
use crate::error::HostError;
use crate::fault::RawFault;
use crate::files::{specifier_to_stripped, HARNESS_FILE};

const DEFAULT_MEMORY_LIMIT_BYTES: usize = 256 * 1024 * 1024;
const DEFAULT_MAX_STACK_BYTES: usize = 1024 * 1024;
const DEFAULT_GC_THRESHOLD_BYTES: usize = 32 * 1024 * 1024;

static EXECUTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Resource bounds applied to the QuickJS runtime for each evaluation.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeLimits {
    pub memory_limit_bytes: usize,
    pub max_stack_bytes: usize,
    pub gc_threshold_bytes: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
            max_stack_bytes: DEFAULT_MAX_STACK_BYTES,
            gc_threshold_bytes: DEFAULT_GC_THRESHOLD_BYTES,
        }
    }
}

/// A caller-owned evaluation context: the runtime plus the global object that
/// ambient bindings are exchanged through. Not re-entrant: each execution
/// overwrites `args` and `result`.
pub struct EvalContext {
    runtime: AsyncRuntime,
    context: AsyncContext,
}

impl EvalContext {
    pub async fn new() -> Result<Self, HostError> {
        let runtime = AsyncRuntime::new()
            .map_err(|e| HostError::engine(format!("failed to create runtime: {e}")))?;
        let context = AsyncContext::full(&runtime)
            .await
            .map_err(|e| HostError::engine(format!("failed to create context: {e}")))?;
        Ok(Self { runtime, context })
    }

    /// Run a script against the context's globals, e.g. to install a host
    /// function before execution.
    pub async fn eval(&self, source: &str) -> Result<(), HostError> {
        let code = source.to_string();
        self.context
            .with(|ctx| {
                ctx.eval::<(), _>(code)
                    .map_err(|e| HostError::engine(caught_error_text(&ctx, e)))
            })
            .await
    }

    /// Publish a JSON value under a global name.
    pub async fn inject_json(&self, name: &str, value: &serde_json::Value) -> Result<(), HostError> {
        let name = name.to_string();
        let value = value.clone();
        self.context
            .with(move |ctx| {
                let js = json_to_js(&ctx, &value)
                    .map_err(|e| HostError::engine(format!("injecting '{name}': {e}")))?;
                ctx.globals()
                    .set(name.as_str(), js)
                    .map_err(|e| HostError::engine(format!("injecting '{name}': {e}")))
            })
            .await
    }
}

struct ArtifactResolver;

impl Resolver for ArtifactResolver {
    fn resolve<'js>(&mut self, _ctx: &Ctx<'js>, _base: &str, name: &str) -> rquickjs::Result<String> {
        Ok(specifier_to_stripped(name))
    }
}

struct ArtifactLoader {
    js_by_name: HashMap<String, String>,
    missing: Arc<Mutex<Option<String>>>,
}

impl Loader for ArtifactLoader {
    fn load<'js>(
        &mut self,
        ctx: &Ctx<'js>,
        path: &str,
    ) -> rquickjs::Result<Module<'js, Declared>> {
        // Each evaluation imports the harness under a fresh alias so that a
        // reused context re-runs the call instead of hitting the engine's
        // per-name module registry.
        let lookup = match path.split_once('$') {
            Some((base, _)) if base == HARNESS_FILE => base,
            _ => path,
        };
        match self.js_by_name.get(lookup) {
            Some(code) => Module::declare(ctx.clone(), path, code.clone()),
            None => {
                *self.missing.lock().unwrap_or_else(|e| e.into_inner()) = Some(path.to_string());
                Err(rquickjs::Error::new_loading_message(
                    path,
                    "module is not part of the compiled program",
                ))
            }
        }
    }
}

async fn configure_runtime(runtime: &AsyncRuntime, limits: RuntimeLimits, timeout: Duration) {
    runtime.set_memory_limit(limits.memory_limit_bytes).await;
    runtime.set_max_stack_size(limits.max_stack_bytes).await;
    runtime.set_gc_threshold(limits.gc_threshold_bytes).await;

    let started_at = Instant::now();
    runtime
        .set_interrupt_handler(Some(Box::new(move || started_at.elapsed() >= timeout)))
        .await;
}

/// Evaluate the harness against the given artifacts.
///
/// `Ok(Ok(value))` is the user's result; `Ok(Err(fault))` is a runtime fault
/// to be mapped; `Err` is an embedder bug (unresolved specifier, engine
/// failure outside user code).
pub async fn execute(
    artifacts: &CompilationArtifacts,
    args: &[serde_json::Value],
    timeout: Duration,
    limits: RuntimeLimits,
    context: Option<&EvalContext>,
) -> Result<Result<serde_json::Value, RawFault>, HostError> {
    let owned;
    let eval_context = match context {
        Some(context) => context,
        None => {
            owned = EvalContext::new().await?;
            &owned
        }
    };

    let missing: Arc<Mutex<Option<String>>> = Arc::default();
    let loader = ArtifactLoader {
        js_by_name: artifacts.js_by_name.clone(),
        missing: missing.clone(),
    };
    eval_context.runtime.set_loader(ArtifactResolver, loader).await;
    configure_runtime(&eval_context.runtime, limits, timeout).await;

    tracing::debug!(modules = artifacts.js_by_name.len(), ?timeout, "evaluating harness");

    let args = serde_json::Value::Array(args.to_vec());
    eval_context
        .context
        .with(move |ctx| -> Result<(), HostError> {
            let globals = ctx.globals();
            let js_args = json_to_js(&ctx, &args)
                .map_err(|e| HostError::engine(format!("staging args: {e}")))?;
            globals
                .set("args", js_args)
                .map_err(|e| HostError::engine(format!("staging args: {e}")))?;
            globals
                .set("result", rquickjs::Value::new_undefined(ctx.clone()))
                .map_err(|e| HostError::engine(format!("staging result: {e}")))
        })
        .await?;

    let outcome = run_program(eval_context, artifacts, &missing).await;

    // The deadline belongs to this evaluation only; a reused context must not
    // inherit it.
    eval_context.runtime.set_interrupt_handler(None).await;

    outcome
}

/// The two evaluation phases: auxiliaries ahead of the harness.
async fn run_program(
    eval_context: &EvalContext,
    artifacts: &CompilationArtifacts,
    missing: &Arc<Mutex<Option<String>>>,
) -> Result<Result<serde_json::Value, RawFault>, HostError> {
    // Phase one: the auxiliaries, in harness order. These modules come from
    // the embedder, not the user, so a fault raised here (top-level side
    // effects, linking) is an embedding bug and must not be demoted to a
    // user diagnostic.
    if !artifacts.aux_names.is_empty() {
        let list = serde_json::to_string(&artifacts.aux_names)
            .map_err(|e| HostError::engine(format!("staging aux imports: {e}")))?;
        let bootstrap = format!(
            "globalThis.__auxFault = undefined;\n\
             {list}.reduce((p, n) => p.then(() => import(n)), Promise.resolve())\n\
               .catch((e) => {{ globalThis.__auxFault = e; }});\n\
             undefined;"
        );
        eval_context
            .context
            .with(move |ctx| {
                ctx.eval::<(), _>(bootstrap)
                    .map_err(|e| HostError::engine(caught_error_text(&ctx, e)))
            })
            .await?;
        eval_context.runtime.idle().await;
        check_missing(missing)?;

        let aux_fault = eval_context
            .context
            .with(|ctx| -> Result<Option<RawFault>, HostError> {
                let fault: rquickjs::Value = ctx
                    .globals()
                    .get("__auxFault")
                    .map_err(|e| HostError::engine(format!("reading aux fault: {e}")))?;
                if fault.is_undefined() || fault.is_null() {
                    Ok(None)
                } else {
                    Ok(Some(fault_from_value(&fault)))
                }
            })
            .await?;
        if let Some(fault) = aux_fault {
            return Err(HostError::EmbeddingFault {
                message: format!("auxiliary module failed before user code ran: {}", fault.message),
            });
        }
    }

    // Phase two: the harness. The auxiliaries are already evaluated, so from
    // here on the engine only runs the user module's top level and the call;
    // any fault belongs to the user.
    let entry = format!(
        "{HARNESS_FILE}${}",
        EXECUTION_COUNTER.fetch_add(1, Ordering::Relaxed)
    );
    let bootstrap = format!(
        "globalThis.__harnessFault = undefined;\n\
         import('{entry}').catch((e) => {{ globalThis.__harnessFault = e; }});\n\
         undefined;"
    );
    eval_context
        .context
        .with(move |ctx| {
            ctx.eval::<(), _>(bootstrap)
                .map_err(|e| HostError::engine(caught_error_text(&ctx, e)))
        })
        .await?;

    // Drive the event loop until the import, the call, and any user async
    // work settle (or the interrupt handler cuts them off).
    eval_context.runtime.idle().await;
    check_missing(missing)?;

    eval_context
        .context
        .with(|ctx| -> Result<Result<serde_json::Value, RawFault>, HostError> {
            let globals = ctx.globals();
            let fault: rquickjs::Value = globals
                .get("__harnessFault")
                .map_err(|e| HostError::engine(format!("reading fault: {e}")))?;
            if !fault.is_undefined() && !fault.is_null() {
                return Ok(Err(fault_from_value(&fault)));
            }
            let result: rquickjs::Value = globals
                .get("result")
                .map_err(|e| HostError::engine(format!("reading result: {e}")))?;
            js_to_json(&result)
                .map(Ok)
                .map_err(|e| HostError::engine(format!("converting result: {e}")))
        })
        .await
}

fn check_missing(missing: &Arc<Mutex<Option<String>>>) -> Result<(), HostError> {
    if let Some(specifier) = missing.lock().unwrap_or_else(|e| e.into_inner()).take() {
        return Err(HostError::UnresolvedSpecifier { specifier });
    }
    Ok(())
}

fn fault_from_value(value: &rquickjs::Value) -> RawFault {
    if let Some(object) = value.as_object() {
        let message: Option<String> = object.get("message").ok().flatten();
        let stack: Option<String> = object.get("stack").ok().flatten();
        return RawFault {
            message: message.unwrap_or_else(|| value_text(value)),
            stack: stack.unwrap_or_default(),
        };
    }
    RawFault {
        message: value_text(value),
        stack: String::new(),
    }
}

fn caught_error_text(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if matches!(err, rquickjs::Error::Exception) {
        return format!("{:?}", ctx.catch());
    }
    err.to_string()
}

/// Plain display of a JavaScript value, for faults that are not Error objects.
fn value_text(value: &rquickjs::Value) -> String {
    if value.is_undefined() {
        "undefined".to_string()
    } else if value.is_null() {
        "null".to_string()
    } else if let Some(s) = value.as_string() {
        s.to_string().unwrap_or_default()
    } else if let Some(n) = value.as_number() {
        format!("{n}")
    } else if let Some(b) = value.as_bool() {
        format!("{b}")
    } else {
        format!("{value:?}")
    }
}

fn json_to_js<'js>(
    ctx: &Ctx<'js>,
    value: &serde_json::Value,
) -> rquickjs::Result<rquickjs::Value<'js>> {
    use serde_json::Value as Json;
    Ok(match value {
        Json::Null => rquickjs::Value::new_null(ctx.clone()),
        Json::Bool(b) => rquickjs::Value::new_bool(ctx.clone(), *b),
        Json::Number(n) => match n.as_i64() {
            Some(i) if i64::from(i as i32) == i => rquickjs::Value::new_int(ctx.clone(), i as i32),
            Some(i) => rquickjs::Value::new_float(ctx.clone(), i as f64),
            None => rquickjs::Value::new_float(ctx.clone(), n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => rquickjs::String::from_str(ctx.clone(), s)?.into_value(),
        Json::Array(items) => {
            let array = rquickjs::Array::new(ctx.clone())?;
            for (i, item) in items.iter().enumerate() {
                array.set(i, json_to_js(ctx, item)?)?;
            }
            array.into_value()
        }
        Json::Object(entries) => {
            let object = rquickjs::Object::new(ctx.clone())?;
            for (key, item) in entries {
                object.set(key.as_str(), json_to_js(ctx, item)?)?;
            }
            object.into_value()
        }
    })
}

fn js_to_json(value: &rquickjs::Value) -> rquickjs::Result<serde_json::Value> {
    use serde_json::Value as Json;
    if value.is_undefined() || value.is_null() {
        return Ok(Json::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(Json::Bool(b));
    }
    if let Some(n) = value.as_number() {
        if n.fract() == 0.0 && n.abs() <= i64::MAX as f64 {
            return Ok(Json::Number((n as i64).into()));
        }
        return Ok(serde_json::Number::from_f64(n)
            .map(Json::Number)
            .unwrap_or(Json::Null));
    }
    if let Some(s) = value.as_string() {
        return Ok(Json::String(s.to_string()?));
    }
    if let Some(array) = value.as_array() {
        let mut items = Vec::with_capacity(array.len());
        for item in array.iter::<rquickjs::Value>() {
            items.push(js_to_json(&item?)?);
        }
        return Ok(Json::Array(items));
    }
    if value.is_function() {
        return Ok(Json::Null);
    }
    if let Some(object) = value.as_object() {
        let mut entries = serde_json::Map::new();
        for key in object.keys::<String>() {
            let key = key?;
            let item: rquickjs::Value = object.get(key.as_str())?;
            entries.insert(key, js_to_json(&item)?);
        }
        return Ok(Json::Object(entries));
    }
    Ok(Json::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_lite::future::block_on;

    #[test]
    fn json_round_trips_through_the_engine() {
        block_on(async {
            let eval_context = EvalContext::new().await.unwrap();
            let input = serde_json::json!({
                "s": "hello",
                "n": 4,
                "f": 1.5,
                "b": true,
                "z": null,
                "list": [1, "two", false],
            });
            eval_context
                .context
                .with(|ctx| {
                    let js = json_to_js(&ctx, &input).unwrap();
                    let back = js_to_json(&js).unwrap();
                    assert_eq!(back, input);
                })
                .await;
        });
    }

    #[test]
    fn injected_globals_are_visible_to_scripts() {
        block_on(async {
            let eval_context = EvalContext::new().await.unwrap();
            eval_context
                .inject_json("seed", &serde_json::json!(41))
                .await
                .unwrap();
            eval_context
                .eval("globalThis.bumped = seed + 1;")
                .await
                .unwrap();
            let bumped = eval_context
                .context
                .with(|ctx| {
                    let value: rquickjs::Value = ctx.globals().get("bumped").unwrap();
                    js_to_json(&value).unwrap()
                })
                .await;
            assert_eq!(bumped, serde_json::json!(42));
        });
    }

    #[test]
    fn eval_reports_script_errors() {
        block_on(async {
            let eval_context = EvalContext::new().await.unwrap();
            let err = eval_context.eval("throw new Error('nope');").await.unwrap_err();
            assert!(matches!(err, HostError::Engine { .. }));
        });
    }
}
