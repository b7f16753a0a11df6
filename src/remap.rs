//! Classification and remapping of raw diagnostics.
//!
//! Every diagnostic the front end yields is rewritten so its location lies in
//! the user's source and its message explains the condition in the caller's
//! domain. Harness-origin diagnostics are classified by span identity against
//! the harness anchors and dispatched over a tagged sum; user-origin ones pass
//! through with message mapping; auxiliary-origin ones are pinned to the start
//! of the user file with the auxiliary named in the message.

use crate::checker::{self, ExportShape, FunctionShape, ModuleExports};
use crate::compiler::ParsedFile;
use crate::diagnostics::{line_col_at, Diagnostic, TextSpan, UserCodeError};
use crate::error::HostError;
use crate::files::{HARNESS_FILE, USER_FILE};
use crate::harness::HarnessAnchors;
use crate::messages::MessageMappers;

/// Codes that some compiler versions emit without a file and that carry no
/// user-relevant information. Anything else file-less is a host bug.
const BENIGN_FILELESS_CODES: &[u32] = &[
    // "File is a CommonJS module; it may be converted to an ES module.",
    // advisory output some emitters produce for the synthesized program.
    80001,
];

/// Where a diagnostic came from, after classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticOrigin {
    UserFile,
    Aux(String),
    HarnessResult,
    HarnessCall,
    HarnessCallee,
    HarnessArgList,
    NoDefault,
    NotAModule,
    NotCallable,
    Other,
}

pub struct RemapContext<'a> {
    pub user_source: &'a str,
    pub user: Option<&'a ParsedFile>,
    pub exports: Option<&'a ModuleExports>,
    pub anchors: &'a HarnessAnchors,
    pub mappers: &'a MessageMappers,
}

/// Classify one raw diagnostic. `Ok(None)` means benign and droppable.
pub fn classify(
    diagnostic: &Diagnostic,
    anchors: &HarnessAnchors,
) -> Result<Option<DiagnosticOrigin>, HostError> {
    let Some(file) = diagnostic.file.as_deref() else {
        if BENIGN_FILELESS_CODES.contains(&diagnostic.code) {
            return Ok(None);
        }
        return Err(HostError::FilelessDiagnostic {
            code: diagnostic.code,
            message: diagnostic.message.text.clone(),
        });
    };

    if file == USER_FILE {
        return Ok(Some(DiagnosticOrigin::UserFile));
    }
    if file != HARNESS_FILE {
        return Ok(Some(DiagnosticOrigin::Aux(file.to_string())));
    }

    // Harness origin: codes that identify themselves first, then the smallest
    // anchor enclosing the span.
    if diagnostic.code == 1192 {
        return Ok(Some(DiagnosticOrigin::NoDefault));
    }
    if diagnostic.code == 2306 {
        return Ok(Some(DiagnosticOrigin::NotAModule));
    }

    let Some(start) = diagnostic.start else {
        return Ok(Some(DiagnosticOrigin::Other));
    };
    let span = TextSpan::new(start, diagnostic.length.unwrap_or(0));

    if diagnostic.code == 2349 && anchors.callee.encloses(span) {
        return Ok(Some(DiagnosticOrigin::NotCallable));
    }
    if anchors.result_lhs.encloses(span) {
        return Ok(Some(DiagnosticOrigin::HarnessResult));
    }
    if anchors.callee.encloses(span) {
        return Ok(Some(DiagnosticOrigin::HarnessCallee));
    }
    if anchors.arg_list.encloses(span) {
        return Ok(Some(DiagnosticOrigin::HarnessArgList));
    }
    if anchors.call.encloses(span) {
        return Ok(Some(DiagnosticOrigin::HarnessCall));
    }
    Ok(Some(DiagnosticOrigin::Other))
}

/// Remap one raw diagnostic into the user-facing surface. `Ok(None)` drops a
/// benign diagnostic; `Err` is an embedder bug.
pub fn remap(
    diagnostic: &Diagnostic,
    ctx: &RemapContext<'_>,
) -> Result<Option<UserCodeError>, HostError> {
    let Some(origin) = classify(diagnostic, ctx.anchors)? else {
        return Ok(None);
    };

    let whole_file = TextSpan::new(0, ctx.user_source.len());
    let expected = ctx.anchors.expected_signature_text();

    let (anchor, text) = match &origin {
        DiagnosticOrigin::UserFile => {
            let start = diagnostic.start.unwrap_or(0);
            let text = ctx.mappers.render(&diagnostic.message)?;
            return Ok(Some(finish(ctx, diagnostic.code, start, text)));
        }
        DiagnosticOrigin::Aux(name) => {
            let text = ctx.mappers.render(&diagnostic.message)?;
            return Ok(Some(finish(
                ctx,
                diagnostic.code,
                0,
                format!("In '{name}': {text}"),
            )));
        }
        DiagnosticOrigin::NoDefault => (
            whole_file,
            format!(
                "No default export. Expected a default export function with the signature: \"{expected}\"."
            ),
        ),
        DiagnosticOrigin::NotAModule => (
            whole_file,
            format!(
                "No exports. Expected a default export function with the signature: \"{expected}\"."
            ),
        ),
        DiagnosticOrigin::NotCallable => {
            let anchor = ctx
                .exports
                .and_then(|e| e.default.as_ref())
                .map(|d| d.stmt_span)
                .unwrap_or(whole_file);
            (
                anchor,
                format!(
                    "Default export is not a valid function. Expected a default export function with the signature: \"{expected}\"."
                ),
            )
        }
        DiagnosticOrigin::HarnessResult => {
            let shape = default_function(ctx, diagnostic)?;
            let anchor = shape
                .return_expr
                .or_else(|| shape.return_ann.as_ref().map(|a| a.span))
                .unwrap_or(shape.signature_span);
            (
                anchor,
                format!(
                    "Incorrect return type. Expected: '{}', Actual: '{}'.",
                    ctx.anchors.expected_return_type,
                    shape.actual_return_text()
                ),
            )
        }
        DiagnosticOrigin::HarnessCall
        | DiagnosticOrigin::HarnessCallee
        | DiagnosticOrigin::HarnessArgList => {
            let shape = default_function(ctx, diagnostic)?;
            let anchor = argument_anchor(ctx, shape).unwrap_or(whole_file);
            (
                anchor,
                format!(
                    "Incorrect argument type. Expected: '{}', Actual: '{}'.",
                    ctx.anchors.expected_tuple_text(),
                    shape.actual_tuple_text()
                ),
            )
        }
        DiagnosticOrigin::Other => {
            return Err(HostError::UnmappedHarnessDiagnostic {
                code: diagnostic.code,
                start: diagnostic.start.unwrap_or(0),
            });
        }
    };

    Ok(Some(finish(ctx, diagnostic.code, anchor.start, text)))
}

/// The user's default export as a function shape; anything else here means
/// the checker and the remapper disagree, which is a bug in this crate.
fn default_function<'a>(
    ctx: &RemapContext<'a>,
    diagnostic: &Diagnostic,
) -> Result<&'a FunctionShape, HostError> {
    let shape = ctx
        .exports
        .and_then(|e| e.default.as_ref())
        .map(|d| &d.shape);
    match shape {
        Some(ExportShape::Function(shape)) => Ok(shape),
        _ => Err(HostError::UnmappedHarnessDiagnostic {
            code: diagnostic.code,
            start: diagnostic.start.unwrap_or(0),
        }),
    }
}

/// Pick the span to underline for an argument mismatch: the whole default
/// export when there are no parameters; the first surplus parameter's
/// annotation on an arity overrun; otherwise the first incompatible
/// parameter; falling back to the parameter list.
fn argument_anchor(ctx: &RemapContext<'_>, shape: &FunctionShape) -> Option<TextSpan> {
    if shape.params.is_empty() {
        return ctx.exports.and_then(|e| e.default.as_ref()).map(|d| d.stmt_span);
    }
    let expected = &ctx.anchors.expected_arg_types;
    if shape.params.len() > expected.len() {
        let surplus = &shape.params[expected.len()];
        return Some(surplus.ann_span.unwrap_or(surplus.span));
    }
    if shape.params.len() < expected.len() {
        return shape.params_span;
    }
    for (param, expected_type) in shape.params.iter().zip(expected) {
        if !checker::compatible(&param.type_text, expected_type) {
            return Some(param.ann_span.unwrap_or(param.span));
        }
    }
    shape.params_span
}

/// Assemble the surfaced error: prefix, 1-based location, single-frame stack
/// naming the enclosing function at the final position.
fn finish(ctx: &RemapContext<'_>, code: u32, start: usize, text: String) -> UserCodeError {
    let location = line_col_at(ctx.user_source, start);
    let name = ctx
        .user
        .map(|user| checker::enclosing_function_name(user, start))
        .unwrap_or_default();
    UserCodeError {
        message: format!("TypeError: TS{code} {text}"),
        stack: format!("at {name}({}:{})", location.line, location.column),
        location,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parse_source;
    use crate::diagnostics::MessageChain;
    use crate::files::FileKind;
    use crate::harness;

    fn anchors_for(arg_types: &[&str], return_type: &str) -> HarnessAnchors {
        let args: Vec<String> = arg_types.iter().map(|s| s.to_string()).collect();
        let text = harness::synthesize(&[], &args, return_type);
        let parsed = parse_source(HARNESS_FILE, &text, FileKind::Source).unwrap();
        harness::anchors(&parsed).unwrap()
    }

    fn harness_diag(span: TextSpan, code: u32) -> Diagnostic {
        Diagnostic::in_file(HARNESS_FILE, span, code, "raw")
    }

    #[test]
    fn classification_is_by_anchor_identity() {
        let anchors = anchors_for(&["string"], "number");
        let d = harness_diag(anchors.result_lhs, 2322);
        assert_eq!(
            classify(&d, &anchors).unwrap(),
            Some(DiagnosticOrigin::HarnessResult)
        );
        let d = harness_diag(anchors.callee, 2349);
        assert_eq!(
            classify(&d, &anchors).unwrap(),
            Some(DiagnosticOrigin::NotCallable)
        );
        let d = harness_diag(anchors.arg_list, 2345);
        assert_eq!(
            classify(&d, &anchors).unwrap(),
            Some(DiagnosticOrigin::HarnessArgList)
        );
        let d = harness_diag(anchors.call, 2554);
        assert_eq!(
            classify(&d, &anchors).unwrap(),
            Some(DiagnosticOrigin::HarnessCall)
        );
    }

    #[test]
    fn code_identified_origins_ignore_spans() {
        let anchors = anchors_for(&[], "void");
        let d = harness_diag(anchors.call, 1192);
        assert_eq!(classify(&d, &anchors).unwrap(), Some(DiagnosticOrigin::NoDefault));
        let d = harness_diag(anchors.call, 2306);
        assert_eq!(classify(&d, &anchors).unwrap(), Some(DiagnosticOrigin::NotAModule));
    }

    #[test]
    fn fileless_diagnostics_are_host_bugs_unless_benign() {
        let anchors = anchors_for(&[], "void");
        let mut d = Diagnostic::in_file(HARNESS_FILE, TextSpan::new(0, 1), 9999, "raw");
        d.file = None;
        let err = classify(&d, &anchors).unwrap_err();
        assert!(matches!(err, HostError::FilelessDiagnostic { code: 9999, .. }));

        let mut benign = Diagnostic::in_file(HARNESS_FILE, TextSpan::new(0, 1), 80001, "raw");
        benign.file = None;
        assert_eq!(classify(&benign, &anchors).unwrap(), None);
    }

    #[test]
    fn unanchored_harness_diagnostic_is_unmapped() {
        let anchors = anchors_for(&[], "void");
        let user_source = "export default function F() {}";
        let user = parse_source(USER_FILE, user_source, FileKind::Source).unwrap();
        let exports = checker::analyze_exports(&user);
        let ctx = RemapContext {
            user_source,
            user: Some(&user),
            exports: Some(&exports),
            anchors: &anchors,
            mappers: &MessageMappers::standard(),
        };
        // A span pointing at the import line matches no anchor.
        let d = harness_diag(TextSpan::new(0, 3), 1434);
        let err = remap(&d, &ctx).unwrap_err();
        assert!(matches!(err, HostError::UnmappedHarnessDiagnostic { code: 1434, .. }));
    }

    #[test]
    fn user_diagnostics_pass_through_with_mapping() {
        let anchors = anchors_for(&["string"], "string");
        let user_source = "const x: number = 'hi';\nexport default function F(s: string): string { return s; }";
        let user = parse_source(USER_FILE, user_source, FileKind::Source).unwrap();
        let exports = checker::analyze_exports(&user);
        let ctx = RemapContext {
            user_source,
            user: Some(&user),
            exports: Some(&exports),
            anchors: &anchors,
            mappers: &MessageMappers::standard(),
        };
        let d = Diagnostic {
            file: Some(USER_FILE.into()),
            start: Some(6),
            length: Some(1),
            code: 2322,
            message: MessageChain::leaf(2322, "Type 'string' is not assignable to type 'number'."),
        };
        let mapped = remap(&d, &ctx).unwrap().unwrap();
        assert_eq!(
            mapped.message,
            "TypeError: TS2322 Type 'string' is not assignable to type 'number'."
        );
        assert_eq!(mapped.location.line, 1);
        assert_eq!(mapped.location.column, 7);
        assert_eq!(mapped.stack, "at (1:7)");
    }

    #[test]
    fn aux_diagnostics_are_pinned_to_the_user_file() {
        let anchors = anchors_for(&[], "void");
        let user_source = "export default function F() {}";
        let user = parse_source(USER_FILE, user_source, FileKind::Source).unwrap();
        let exports = checker::analyze_exports(&user);
        let ctx = RemapContext {
            user_source,
            user: Some(&user),
            exports: Some(&exports),
            anchors: &anchors,
            mappers: &MessageMappers::standard(),
        };
        let d = Diagnostic::in_file("helper", TextSpan::new(40, 2), 2322, "Type mismatch.");
        let mapped = remap(&d, &ctx).unwrap().unwrap();
        assert_eq!(mapped.location, crate::diagnostics::Location { line: 1, column: 1 });
        assert!(mapped.message.contains("In 'helper':"), "got {}", mapped.message);
    }
}
