//! ts-harness: run untrusted TypeScript functions in a QuickJS sandbox.
//!
//! A caller hands over a user-authored TypeScript module, the expected
//! signature of its default export (opaque type texts), arguments, and
//! optionally auxiliary modules. The crate:
//!
//! 1. synthesizes a hidden harness module that imports the auxiliaries for
//!    side effects, imports the user's default export, and calls it against
//!    ambient `args`/`result` declarations typed with the expected signature;
//! 2. compiles the combined program in memory (swc), collecting diagnostics;
//! 3. rewrites every diagnostic, wherever it originated, so it points into
//!    the *user's* source with a domain-appropriate message ("Incorrect
//!    return type", "No default export", …);
//! 4. on a clean check, instantiates one QuickJS module per emitted file,
//!    links by stripped-name specifier, evaluates the harness under a
//!    wall-clock budget, and maps any runtime fault back through the source
//!    map to a trimmed, user-only stack.
//!
//! User-caused conditions are always returned as diagnostic lists; an `Err`
//! from the runner means the embedder (or this crate) has a bug.
//!
//! ```no_run
//! use ts_harness::{CompileRequest, RunOutcome, Runner};
//!
//! # fn main() -> Result<(), ts_harness::HostError> {
//! let runner = Runner::default();
//! let request = CompileRequest {
//!     user_source: "export default function F(s: string): string { return s + '!'; }".into(),
//!     expected_return_type: "string".into(),
//!     expected_arg_types: vec!["string".into()],
//!     aux_files: vec![],
//! };
//! let outcome = futures_lite::future::block_on(
//!     runner.execute_user_code(&request, &[serde_json::json!("hi")], None),
//! )?;
//! match outcome {
//!     RunOutcome::Value(value) => println!("ok: {value}"),
//!     RunOutcome::Diagnostics(diags) => println!("rejected: {diags:?}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod checker;
mod compiler;
mod diagnostics;
mod error;
mod executor;
mod fault;
mod files;
mod harness;
mod messages;
mod remap;
mod srcmap;
pub mod strings;

use std::sync::Arc;
use std::time::Duration;

pub use cache::{cache_key, CacheKey, CompileCache, LruTtlCache, UnboundedCache};
pub use compiler::{Compilation, CompilationArtifacts, CompileRequest};
pub use diagnostics::{Location, UserCodeError};
pub use error::HostError;
pub use executor::{EvalContext, RuntimeLimits};
pub use files::{AuxFile, HARNESS_FILE, USER_FILE};
pub use messages::MessageMappers;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Runner configuration.
pub struct RunnerOptions {
    /// Wall-clock budget per evaluation.
    pub timeout: Duration,
    /// QuickJS resource bounds.
    pub limits: RuntimeLimits,
    /// Compilation store; shared across runners if the caller wants.
    pub cache: Arc<dyn CompileCache>,
    /// Per-code rewriting of compiler message text.
    pub message_mappers: MessageMappers,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            limits: RuntimeLimits::default(),
            cache: cache::default_cache(),
            message_mappers: MessageMappers::standard(),
        }
    }
}

/// What an execution produced: the user's value, or their diagnostics.
#[derive(Debug)]
pub enum RunOutcome {
    Value(serde_json::Value),
    Diagnostics(Vec<UserCodeError>),
}

impl RunOutcome {
    pub fn value(self) -> Option<serde_json::Value> {
        match self {
            RunOutcome::Value(value) => Some(value),
            RunOutcome::Diagnostics(_) => None,
        }
    }

    pub fn diagnostics(self) -> Option<Vec<UserCodeError>> {
        match self {
            RunOutcome::Value(_) => None,
            RunOutcome::Diagnostics(diagnostics) => Some(diagnostics),
        }
    }
}

/// The pipeline front door.
pub struct Runner {
    options: RunnerOptions,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(RunnerOptions::default())
    }
}

impl Runner {
    pub fn new(options: RunnerOptions) -> Self {
        Self { options }
    }

    /// Compile (or fetch from cache) without executing.
    pub fn pre_process(&self, request: &CompileRequest) -> Result<Compilation, HostError> {
        let aux_texts: Vec<String> =
            request.aux_files.iter().map(|f| f.text.clone()).collect();
        let key = cache_key(
            &request.user_source,
            &request.expected_return_type,
            &request.expected_arg_types,
            &aux_texts,
        );
        if let Some(hit) = self.options.cache.get(&key) {
            tracing::debug!(%key, "compilation cache hit");
            return Ok(hit);
        }
        let outcome = compiler::compile(request, &self.options.message_mappers)?;
        self.options.cache.set(key, outcome.clone());
        tracing::debug!(%key, ok = outcome.is_ok(), "compilation cached");
        Ok(outcome)
    }

    /// Compile and run the user's default export with `args`.
    ///
    /// Never returns `Err` for user-caused conditions: type-level problems and
    /// runtime faults both come back as `RunOutcome::Diagnostics`.
    pub async fn execute_user_code(
        &self,
        request: &CompileRequest,
        args: &[serde_json::Value],
        context: Option<&EvalContext>,
    ) -> Result<RunOutcome, HostError> {
        match self.pre_process(request)? {
            Err(diagnostics) => Ok(RunOutcome::Diagnostics(diagnostics)),
            Ok(artifacts) => self.execute_from_artifacts(&artifacts, args, context).await,
        }
    }

    /// Run previously compiled artifacts, skipping compilation entirely.
    pub async fn execute_from_artifacts(
        &self,
        artifacts: &CompilationArtifacts,
        args: &[serde_json::Value],
        context: Option<&EvalContext>,
    ) -> Result<RunOutcome, HostError> {
        let evaluated = executor::execute(
            artifacts,
            args,
            self.options.timeout,
            self.options.limits,
            context,
        )
        .await?;
        match evaluated {
            Ok(value) => Ok(RunOutcome::Value(value)),
            Err(raw) => Ok(RunOutcome::Diagnostics(vec![fault::map_runtime_fault(
                &raw,
                &artifacts.user_source_map,
            )])),
        }
    }
}
