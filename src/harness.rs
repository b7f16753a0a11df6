//! Synthesis of the hidden execution harness.
//!
//! The harness is a TypeScript module generated around the user's module: it
//! imports each auxiliary for side effects, imports the user's default
//! binding, declares ambient `args`/`result` with the caller-supplied type
//! texts, and performs the call. Caller types are opaque: they are spliced
//! verbatim, never parsed here.
//!
//! After the front end parses the harness, [`anchors`] recovers the spans of
//! the structural anchor nodes. Downstream classification works by span
//! identity against these anchors, never by searching the text.

use swc_common::Spanned;
use swc_ecma_ast::{
    AssignTarget, Callee, Decl, Expr, ImportSpecifier, ModuleDecl, ModuleItem,
    SimpleAssignTarget, Stmt, TsNamespaceBody, TsType,
};

use crate::compiler::ParsedFile;
use crate::diagnostics::TextSpan;
use crate::error::HostError;
use crate::files::USER_FILE;
use crate::strings::normalize_ws;

/// Local binding name for the user's default export inside the harness.
const DEFAULT_BINDING: &str = "defaultExport";

/// Generate the harness source.
///
/// `aux_names` are the stripped names of the non-declaration auxiliaries, in
/// caller order; declaration files contribute types only and are not imported.
pub fn synthesize(aux_names: &[&str], arg_types: &[String], return_type: &str) -> String {
    let mut out = String::new();
    for name in aux_names {
        out.push_str(&format!("import '{name}';\n"));
    }
    out.push_str(&format!("import {DEFAULT_BINDING} from '{USER_FILE}';\n"));
    out.push_str("declare global {\n");
    out.push_str(&format!("  const args: [{}];\n", arg_types.join(", ")));
    out.push_str(&format!("  let result: {return_type};\n"));
    out.push_str("}\n");
    out.push_str(&format!("result = {DEFAULT_BINDING}(...args);\n"));
    out
}

/// Spans of the anchor nodes plus the expected-type texts read back off the
/// ambient declarations.
#[derive(Debug, Clone)]
pub struct HarnessAnchors {
    /// The `'__user_file'` module specifier of the default import.
    pub user_import_src: TextSpan,
    /// The local binding of the default import.
    pub default_import_local: TextSpan,
    /// LHS identifier of the final assignment.
    pub result_lhs: TextSpan,
    /// The call expression on the RHS of that assignment.
    pub call: TextSpan,
    /// The callee of the call.
    pub callee: TextSpan,
    /// The argument list of the call.
    pub arg_list: TextSpan,
    /// The tuple type annotating `args`.
    pub expected_args_node: TextSpan,
    /// The type annotating `result`.
    pub expected_return_node: TextSpan,
    /// Element texts of the `args` tuple, whitespace-normalized.
    pub expected_arg_types: Vec<String>,
    /// Text of the `result` annotation, whitespace-normalized.
    pub expected_return_type: String,
}

impl HarnessAnchors {
    /// The expected argument tuple as display text, e.g. `[string, number]`.
    pub fn expected_tuple_text(&self) -> String {
        format!("[{}]", self.expected_arg_types.join(", "))
    }

    /// The expected signature as display text, e.g.
    /// `(...args: [string]) => number`, used by the no-default-export and
    /// not-callable messages.
    pub fn expected_signature_text(&self) -> String {
        format!(
            "(...args: {}) => {}",
            self.expected_tuple_text(),
            self.expected_return_type
        )
    }
}

fn malformed(detail: &str) -> HostError {
    HostError::MalformedHarness {
        detail: detail.to_string(),
    }
}

/// Recover the anchors from the parsed harness by structural position.
pub fn anchors(harness: &ParsedFile) -> Result<HarnessAnchors, HostError> {
    let mut user_import: Option<(TextSpan, TextSpan)> = None;
    let mut expected_args: Option<(TextSpan, Vec<String>)> = None;
    let mut expected_return: Option<(TextSpan, String)> = None;

    for item in &harness.module.body {
        match item {
            ModuleItem::ModuleDecl(ModuleDecl::Import(import)) => {
                for spec in &import.specifiers {
                    if let ImportSpecifier::Default(default) = spec {
                        user_import = Some((
                            harness.rel(import.src.span),
                            harness.rel(default.local.span),
                        ));
                    }
                }
            }
            ModuleItem::Stmt(Stmt::Decl(Decl::TsModule(module))) if module.global => {
                let Some(TsNamespaceBody::TsModuleBlock(block)) = &module.body else {
                    return Err(malformed("global declaration block has no body"));
                };
                for decl in &block.body {
                    let ModuleItem::Stmt(Stmt::Decl(Decl::Var(var))) = decl else {
                        continue;
                    };
                    let Some(declarator) = var.decls.first() else {
                        continue;
                    };
                    let swc_ecma_ast::Pat::Ident(binding) = &declarator.name else {
                        continue;
                    };
                    let Some(ann) = &binding.type_ann else {
                        continue;
                    };
                    match &*binding.id.sym {
                        "args" => {
                            let TsType::TsTupleType(tuple) = &*ann.type_ann else {
                                return Err(malformed("args annotation is not a tuple"));
                            };
                            let elems = tuple
                                .elem_types
                                .iter()
                                .map(|elem| normalize_ws(harness.text_of(elem.ty.span())))
                                .collect();
                            expected_args = Some((harness.rel(ann.type_ann.span()), elems));
                        }
                        "result" => {
                            expected_return = Some((
                                harness.rel(ann.type_ann.span()),
                                normalize_ws(harness.text_of(ann.type_ann.span())),
                            ));
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    let Some(ModuleItem::Stmt(Stmt::Expr(stmt))) = harness.module.body.last() else {
        return Err(malformed("final item is not an expression statement"));
    };
    let Expr::Assign(assign) = &*stmt.expr else {
        return Err(malformed("final statement is not an assignment"));
    };
    let AssignTarget::Simple(SimpleAssignTarget::Ident(lhs)) = &assign.left else {
        return Err(malformed("assignment target is not an identifier"));
    };
    let Expr::Call(call) = &*assign.right else {
        return Err(malformed("assignment RHS is not a call"));
    };
    let Callee::Expr(callee) = &call.callee else {
        return Err(malformed("call has no expression callee"));
    };
    let arg_list = match (call.args.first(), call.args.last()) {
        (Some(first), Some(last)) => {
            let lo = first
                .spread
                .map(|s| harness.rel(s).start)
                .unwrap_or_else(|| harness.rel(first.expr.span()).start);
            let hi = harness.rel(last.expr.span()).end();
            TextSpan::new(lo, hi - lo)
        }
        _ => return Err(malformed("call has no arguments")),
    };

    let (user_import_src, default_import_local) =
        user_import.ok_or_else(|| malformed("no default import of the user module"))?;
    let (expected_args_node, expected_arg_types) =
        expected_args.ok_or_else(|| malformed("no ambient args declaration"))?;
    let (expected_return_node, expected_return_type) =
        expected_return.ok_or_else(|| malformed("no ambient result declaration"))?;

    Ok(HarnessAnchors {
        user_import_src,
        default_import_local,
        result_lhs: harness.rel(lhs.id.span),
        call: harness.rel(call.span),
        callee: harness.rel(callee.span()),
        arg_list,
        expected_args_node,
        expected_return_node,
        expected_arg_types,
        expected_return_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parse_source;
    use crate::files::FileKind;

    fn parsed(arg_types: &[String], return_type: &str, aux: &[&str]) -> ParsedFile {
        let text = synthesize(aux, arg_types, return_type);
        parse_source("__execution_harness", &text, FileKind::Source).expect("harness parses")
    }

    #[test]
    fn synthesized_text_has_expected_shape() {
        let text = synthesize(&["helper"], &["string".into(), "number".into()], "boolean");
        let expected = crate::strings::trim_template(
            r#"
            import 'helper';
            import defaultExport from '__user_file';
            declare global {
              const args: [string, number];
              let result: boolean;
            }
            result = defaultExport(...args);
            "#,
        );
        assert_eq!(text, expected);
    }

    #[test]
    fn empty_argument_tuple_synthesizes_empty_brackets() {
        let text = synthesize(&[], &[], "void");
        assert!(text.contains("const args: [];"));
    }

    #[test]
    fn anchors_recover_expected_types() {
        let harness = parsed(&["string".into(), "number".into()], "boolean", &[]);
        let anchors = anchors(&harness).unwrap();
        assert_eq!(anchors.expected_arg_types, vec!["string", "number"]);
        assert_eq!(anchors.expected_return_type, "boolean");
        assert_eq!(anchors.expected_tuple_text(), "[string, number]");
        assert_eq!(
            anchors.expected_signature_text(),
            "(...args: [string, number]) => boolean"
        );
    }

    #[test]
    fn anchors_point_at_the_final_call() {
        let harness = parsed(&["string".into()], "string", &["helper"]);
        let anchors = anchors(&harness).unwrap();
        let text = &harness.text;
        let call = &text[anchors.call.start..anchors.call.end()];
        assert_eq!(call, "defaultExport(...args)");
        let lhs = &text[anchors.result_lhs.start..anchors.result_lhs.end()];
        assert_eq!(lhs, "result");
        let callee = &text[anchors.callee.start..anchors.callee.end()];
        assert_eq!(callee, "defaultExport");
        let args = &text[anchors.arg_list.start..anchors.arg_list.end()];
        assert_eq!(args, "...args");
    }

    #[test]
    fn call_encloses_callee_and_arguments() {
        let harness = parsed(&["string".into()], "string", &[]);
        let anchors = anchors(&harness).unwrap();
        assert!(anchors.call.encloses(anchors.callee));
        assert!(anchors.call.encloses(anchors.arg_list));
    }
}
