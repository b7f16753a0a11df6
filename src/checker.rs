//! Gradually-typed signature checking.
//!
//! This is the narrow slice of a type checker the pipeline needs: the user
//! module's export table, resolution of the default export (one alias hop),
//! extraction of its call signature, and the compatibility checks the harness
//! call implies. Types are opaque annotation texts compared structurally after
//! whitespace normalization; a missing annotation is `any`, and `any` is
//! compatible in both directions.
//!
//! Diagnostics carry TypeScript codes so the rest of the pipeline can key off
//! them: 1192 (no default export), 2306 (not a module), 2322 (type not
//! assignable), 2345 (argument not assignable), 2349 (not callable), 2554
//! (arity).

use swc_common::Spanned;
use swc_ecma_ast::{
    ArrowExpr, BlockStmtOrExpr, Decl, DefaultDecl, Expr, Function, Lit, ModuleDecl,
    ModuleExportName, ModuleItem, Pat, Stmt, TsType, UnaryOp, VarDeclarator,
};
use swc_ecma_visit::{Visit, VisitWith};

use crate::compiler::ParsedFile;
use crate::diagnostics::{Diagnostic, TextSpan};
use crate::files::{HARNESS_FILE, USER_FILE};
use crate::harness::HarnessAnchors;
use crate::strings::normalize_ws;

// ============================================================================
// EXPORT TABLE
// ============================================================================

#[derive(Debug, Clone)]
pub struct ModuleExports {
    /// Whether the module exports anything at all.
    pub has_any: bool,
    pub default: Option<DefaultExport>,
}

#[derive(Debug, Clone)]
pub struct DefaultExport {
    /// The whole `export default …` statement.
    pub stmt_span: TextSpan,
    pub shape: ExportShape,
}

#[derive(Debug, Clone)]
pub enum ExportShape {
    /// A function-like value with a recoverable signature.
    Function(FunctionShape),
    /// A value of unknown (`any`-like) type; callable, nothing to check.
    Opaque,
    /// A value that is demonstrably not callable.
    Value { type_text: String },
}

#[derive(Debug, Clone)]
pub struct AnnInfo {
    /// Annotation text without the colon, whitespace-normalized.
    pub text: String,
    /// Span including the leading colon.
    pub span: TextSpan,
}

#[derive(Debug, Clone)]
pub struct ParamInfo {
    pub name: String,
    /// Annotation text, or `any` when unannotated.
    pub type_text: String,
    pub span: TextSpan,
    pub ann_span: Option<TextSpan>,
    pub rest: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionShape {
    pub name: Option<String>,
    pub params: Vec<ParamInfo>,
    pub return_ann: Option<AnnInfo>,
    /// The first returned expression (or an arrow's expression body).
    pub return_expr: Option<TextSpan>,
    /// Literal-based inference used when there is no annotation.
    pub inferred_return: Option<String>,
    /// From the `function` keyword (or arrow start) up to the body.
    pub signature_span: TextSpan,
    /// First parameter through last, annotations included.
    pub params_span: Option<TextSpan>,
}

impl FunctionShape {
    pub fn actual_return_text(&self) -> String {
        if let Some(ann) = &self.return_ann {
            return ann.text.clone();
        }
        self.inferred_return
            .clone()
            .unwrap_or_else(|| "any".to_string())
    }

    /// Parameter types as display text, e.g. `[string, number]`.
    pub fn actual_tuple_text(&self) -> String {
        let parts: Vec<&str> = self.params.iter().map(|p| p.type_text.as_str()).collect();
        format!("[{}]", parts.join(", "))
    }

    pub fn has_rest(&self) -> bool {
        self.params.iter().any(|p| p.rest)
    }
}

// ============================================================================
// TYPE COMPATIBILITY
// ============================================================================

/// Whether a value of type `source` may flow into a slot of type `target`.
pub fn compatible(target: &str, source: &str) -> bool {
    let target = normalize_ws(target);
    let source = normalize_ws(source);
    if target == "any" || source == "any" {
        return true;
    }
    if target == "unknown" || source == "never" {
        return true;
    }
    target == source
}

// ============================================================================
// EXPORT ANALYSIS
// ============================================================================

/// Build the export table for the user module.
pub fn analyze_exports(user: &ParsedFile) -> ModuleExports {
    let mut exports = ModuleExports {
        has_any: false,
        default: None,
    };

    for item in &user.module.body {
        let ModuleItem::ModuleDecl(decl) = item else {
            continue;
        };
        match decl {
            ModuleDecl::ExportDefaultDecl(default) => {
                exports.has_any = true;
                let stmt_span = user.rel(default.span);
                let shape = match &default.decl {
                    DefaultDecl::Fn(fn_expr) => {
                        let name = fn_expr.ident.as_ref().map(|i| i.sym.to_string());
                        ExportShape::Function(function_shape(user, &fn_expr.function, name))
                    }
                    DefaultDecl::Class(class) => ExportShape::Value {
                        type_text: match &class.ident {
                            Some(ident) => format!("typeof {}", ident.sym),
                            None => "class".to_string(),
                        },
                    },
                    DefaultDecl::TsInterfaceDecl(_) => ExportShape::Opaque,
                };
                exports.default = Some(DefaultExport { stmt_span, shape });
            }
            ModuleDecl::ExportDefaultExpr(default) => {
                exports.has_any = true;
                let stmt_span = user.rel(default.span);
                exports.default = resolve_default_expr(user, &default.expr)
                    .map(|shape| DefaultExport { stmt_span, shape });
            }
            ModuleDecl::ExportNamed(named) => {
                exports.has_any = true;
                for spec in &named.specifiers {
                    let swc_ecma_ast::ExportSpecifier::Named(spec) = spec else {
                        continue;
                    };
                    let exported_as_default = match &spec.exported {
                        Some(ModuleExportName::Ident(i)) => &*i.sym == "default",
                        Some(ModuleExportName::Str(s)) => &*s.value == "default",
                        None => matches!(&spec.orig, ModuleExportName::Ident(i) if &*i.sym == "default"),
                    };
                    if !exported_as_default {
                        continue;
                    }
                    let stmt_span = user.rel(named.span);
                    if let ModuleExportName::Ident(orig) = &spec.orig {
                        exports.default = resolve_ident(user, &orig.sym)
                            .map(|shape| DefaultExport { stmt_span, shape });
                    }
                }
            }
            ModuleDecl::ExportDecl(_) | ModuleDecl::ExportAll(_) => {
                exports.has_any = true;
            }
            _ => {}
        }
    }

    exports
}

/// Resolve the expression of `export default <expr>`. `None` means resolution
/// failed (dangling alias) and the caller should fall through to the
/// no-default-export path.
fn resolve_default_expr(user: &ParsedFile, expr: &Expr) -> Option<ExportShape> {
    match expr {
        // One alias hop through a module-level binding.
        Expr::Ident(ident) => resolve_ident(user, &ident.sym),
        Expr::Arrow(arrow) => Some(ExportShape::Function(arrow_shape(user, arrow, None))),
        Expr::Fn(fn_expr) => {
            let name = fn_expr.ident.as_ref().map(|i| i.sym.to_string());
            Some(ExportShape::Function(function_shape(
                user,
                &fn_expr.function,
                name,
            )))
        }
        Expr::Paren(paren) => resolve_default_expr(user, &paren.expr),
        _ => match non_callable_type(expr) {
            Some(type_text) => Some(ExportShape::Value {
                type_text: type_text.to_string(),
            }),
            None => Some(ExportShape::Opaque),
        },
    }
}

/// Look a module-level binding up by name. A single hop: an unknown name
/// fails resolution, and a binding whose initializer is itself an identifier
/// is left opaque rather than chased further.
fn resolve_ident(user: &ParsedFile, sym: &str) -> Option<ExportShape> {
    for item in &user.module.body {
        let decl = match item {
            ModuleItem::Stmt(Stmt::Decl(decl)) => decl,
            ModuleItem::ModuleDecl(ModuleDecl::ExportDecl(export)) => &export.decl,
            _ => continue,
        };
        match decl {
            Decl::Fn(fn_decl) if &*fn_decl.ident.sym == sym => {
                return Some(ExportShape::Function(function_shape(
                    user,
                    &fn_decl.function,
                    Some(sym.to_string()),
                )));
            }
            Decl::Var(var) => {
                for declarator in &var.decls {
                    let Pat::Ident(binding) = &declarator.name else {
                        continue;
                    };
                    if &*binding.id.sym != sym {
                        continue;
                    }
                    return Some(shape_of_binding(user, declarator, sym));
                }
            }
            _ => {}
        }
    }
    None
}

fn shape_of_binding(user: &ParsedFile, declarator: &VarDeclarator, sym: &str) -> ExportShape {
    if let Some(init) = &declarator.init {
        return match &**init {
            Expr::Arrow(arrow) => {
                ExportShape::Function(arrow_shape(user, arrow, Some(sym.to_string())))
            }
            Expr::Fn(fn_expr) => {
                let name = fn_expr
                    .ident
                    .as_ref()
                    .map(|i| i.sym.to_string())
                    .or_else(|| Some(sym.to_string()));
                ExportShape::Function(function_shape(user, &fn_expr.function, name))
            }
            other => match non_callable_type(other) {
                Some(type_text) => ExportShape::Value {
                    type_text: type_text.to_string(),
                },
                None => ExportShape::Opaque,
            },
        };
    }
    // No initializer: judge callability by the annotation alone.
    let Pat::Ident(binding) = &declarator.name else {
        return ExportShape::Opaque;
    };
    match binding.type_ann.as_deref() {
        Some(ann) => match &*ann.type_ann {
            TsType::TsFnOrConstructorType(_) => ExportShape::Opaque,
            ty => ExportShape::Value {
                type_text: normalize_ws(user.text_of(ty.span())),
            },
        },
        None => ExportShape::Opaque,
    }
}

// ============================================================================
// SIGNATURE EXTRACTION
// ============================================================================

fn function_shape(user: &ParsedFile, function: &Function, name: Option<String>) -> FunctionShape {
    let params: Vec<ParamInfo> = function
        .params
        .iter()
        .map(|p| param_from_pat(user, &p.pat))
        .collect();
    let params_span = span_of_params(&params);

    let return_ann = function.return_type.as_deref().map(|ann| AnnInfo {
        text: normalize_ws(user.text_of(ann.type_ann.span())),
        span: user.rel(ann.span),
    });

    let return_expr = function
        .body
        .as_ref()
        .and_then(|body| first_return_expr(&body.stmts));
    let inferred_return = return_expr.and_then(|expr| literal_type(expr).map(str::to_string));
    let return_expr = return_expr.map(|expr| user.rel(expr.span()));

    let fn_span = user.rel(function.span);
    let signature_span = match &function.body {
        Some(body) => {
            let body_start = user.rel(body.span).start;
            TextSpan::new(fn_span.start, body_start.saturating_sub(fn_span.start))
        }
        None => fn_span,
    };

    FunctionShape {
        name,
        params,
        return_ann,
        return_expr,
        inferred_return,
        signature_span,
        params_span,
    }
}

fn arrow_shape(user: &ParsedFile, arrow: &ArrowExpr, name: Option<String>) -> FunctionShape {
    let params: Vec<ParamInfo> = arrow.params.iter().map(|p| param_from_pat(user, p)).collect();
    let params_span = span_of_params(&params);

    let return_ann = arrow.return_type.as_deref().map(|ann| AnnInfo {
        text: normalize_ws(user.text_of(ann.type_ann.span())),
        span: user.rel(ann.span),
    });

    let (return_expr, inferred_return) = match &*arrow.body {
        BlockStmtOrExpr::Expr(expr) => (
            Some(user.rel(expr.span())),
            literal_type(expr).map(str::to_string),
        ),
        BlockStmtOrExpr::BlockStmt(block) => {
            let expr = first_return_expr(&block.stmts);
            (
                expr.map(|e| user.rel(e.span())),
                expr.and_then(|e| literal_type(e).map(str::to_string)),
            )
        }
    };

    let arrow_span = user.rel(arrow.span);
    let body_start = user.rel(arrow.body.span()).start;
    let signature_span = TextSpan::new(
        arrow_span.start,
        body_start.saturating_sub(arrow_span.start),
    );

    FunctionShape {
        name,
        params,
        return_ann,
        return_expr,
        inferred_return,
        signature_span,
        params_span,
    }
}

fn param_from_pat(user: &ParsedFile, pat: &Pat) -> ParamInfo {
    match pat {
        Pat::Ident(binding) => {
            let ann = binding.type_ann.as_deref();
            let id_span = user.rel(binding.id.span);
            let end = ann
                .map(|a| user.rel(a.span).end())
                .unwrap_or_else(|| id_span.end());
            ParamInfo {
                name: binding.id.sym.to_string(),
                type_text: ann
                    .map(|a| normalize_ws(user.text_of(a.type_ann.span())))
                    .unwrap_or_else(|| "any".to_string()),
                span: TextSpan::new(id_span.start, end - id_span.start),
                ann_span: ann.map(|a| user.rel(a.span)),
                rest: false,
            }
        }
        Pat::Rest(rest) => {
            let ann = rest.type_ann.as_deref();
            ParamInfo {
                name: match &*rest.arg {
                    Pat::Ident(binding) => binding.id.sym.to_string(),
                    _ => "_".to_string(),
                },
                type_text: ann
                    .map(|a| normalize_ws(user.text_of(a.type_ann.span())))
                    .unwrap_or_else(|| "any".to_string()),
                span: user.rel(rest.span()),
                ann_span: ann.map(|a| user.rel(a.span)),
                rest: true,
            }
        }
        other => {
            let ann = match other {
                Pat::Object(o) => o.type_ann.as_deref(),
                Pat::Array(a) => a.type_ann.as_deref(),
                _ => None,
            };
            ParamInfo {
                name: "_".to_string(),
                type_text: ann
                    .map(|a| normalize_ws(user.text_of(a.type_ann.span())))
                    .unwrap_or_else(|| "any".to_string()),
                span: user.rel(other.span()),
                ann_span: ann.map(|a| user.rel(a.span)),
                rest: false,
            }
        }
    }
}

fn span_of_params(params: &[ParamInfo]) -> Option<TextSpan> {
    let first = params.first()?;
    let last = params.last()?;
    Some(TextSpan::new(first.span.start, last.span.end() - first.span.start))
}

/// The first `return <expr>` reachable without entering a nested function.
fn first_return_expr(stmts: &[Stmt]) -> Option<&Expr> {
    for stmt in stmts {
        if let Some(expr) = return_expr_of(stmt) {
            return Some(expr);
        }
    }
    None
}

fn return_expr_of(stmt: &Stmt) -> Option<&Expr> {
    match stmt {
        Stmt::Return(ret) => ret.arg.as_deref(),
        Stmt::Block(block) => first_return_expr(&block.stmts),
        Stmt::If(branch) => return_expr_of(&branch.cons)
            .or_else(|| branch.alt.as_deref().and_then(return_expr_of)),
        Stmt::Try(try_stmt) => first_return_expr(&try_stmt.block.stmts),
        _ => None,
    }
}

/// Display type of an expression that is demonstrably not callable.
///
/// Wider than [`literal_type`]: object and array literals belong here (a
/// plain object is the most common thing mistakenly default-exported in
/// place of a function), but must stay out of return-type inference and
/// variable checks, where their structural types are unknown.
fn non_callable_type(expr: &Expr) -> Option<&'static str> {
    match expr {
        Expr::Object(_) => Some("object"),
        Expr::Array(_) => Some("array"),
        Expr::Paren(paren) => non_callable_type(&paren.expr),
        _ => literal_type(expr),
    }
}

/// Type of a literal-ish expression, if it has one.
fn literal_type(expr: &Expr) -> Option<&'static str> {
    match expr {
        Expr::Lit(Lit::Str(_)) => Some("string"),
        Expr::Lit(Lit::Num(_)) => Some("number"),
        Expr::Lit(Lit::Bool(_)) => Some("boolean"),
        Expr::Lit(Lit::Null(_)) => Some("null"),
        Expr::Tpl(_) => Some("string"),
        Expr::Unary(unary)
            if matches!(unary.op, UnaryOp::Minus | UnaryOp::Plus)
                && matches!(&*unary.arg, Expr::Lit(Lit::Num(_))) =>
        {
            Some("number")
        }
        Expr::Paren(paren) => literal_type(&paren.expr),
        _ => None,
    }
}

// ============================================================================
// HARNESS CHECKS
// ============================================================================

/// Type-check the harness call against the user module's default export.
/// Every span points into the harness; remapping happens downstream.
pub fn check_harness(anchors: &HarnessAnchors, exports: &ModuleExports) -> Vec<Diagnostic> {
    let mut diags = Vec::new();

    if !exports.has_any {
        diags.push(Diagnostic::in_file(
            HARNESS_FILE,
            anchors.user_import_src,
            2306,
            format!("File '{USER_FILE}' is not a module."),
        ));
        return diags;
    }

    let Some(default) = &exports.default else {
        diags.push(Diagnostic::in_file(
            HARNESS_FILE,
            anchors.default_import_local,
            1192,
            format!("Module '{USER_FILE}' has no default export."),
        ));
        return diags;
    };

    let shape = match &default.shape {
        ExportShape::Opaque => return diags,
        ExportShape::Value { type_text } => {
            diags.push(Diagnostic::in_file(
                HARNESS_FILE,
                anchors.callee,
                2349,
                format!("This expression is not callable. Type '{type_text}' has no call signatures."),
            ));
            return diags;
        }
        ExportShape::Function(shape) => shape,
    };

    let actual_return = shape.actual_return_text();
    if !compatible(&anchors.expected_return_type, &actual_return) {
        diags.push(Diagnostic::in_file(
            HARNESS_FILE,
            anchors.result_lhs,
            2322,
            format!(
                "Type '{actual_return}' is not assignable to type '{}'.",
                anchors.expected_return_type
            ),
        ));
    }

    if !shape.has_rest() {
        let expected = &anchors.expected_arg_types;
        if shape.params.len() != expected.len() {
            diags.push(Diagnostic::in_file(
                HARNESS_FILE,
                anchors.call,
                2554,
                format!(
                    "Expected {} arguments, but got {}.",
                    shape.params.len(),
                    expected.len()
                ),
            ));
        } else {
            for (param, expected_type) in shape.params.iter().zip(expected) {
                if !compatible(&param.type_text, expected_type) {
                    diags.push(Diagnostic::in_file(
                        HARNESS_FILE,
                        anchors.arg_list,
                        2345,
                        format!(
                            "Argument of type '{expected_type}' is not assignable to parameter of type '{}'.",
                            param.type_text
                        ),
                    ));
                    break;
                }
            }
        }
    }

    diags
}

// ============================================================================
// USER-FILE CHECKS
// ============================================================================

struct VarDeclChecks<'a> {
    file: &'a ParsedFile,
    diags: Vec<Diagnostic>,
}

impl Visit for VarDeclChecks<'_> {
    fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
        declarator.visit_children_with(self);
        let Pat::Ident(binding) = &declarator.name else {
            return;
        };
        let (Some(ann), Some(init)) = (binding.type_ann.as_deref(), declarator.init.as_deref())
        else {
            return;
        };
        let Some(init_type) = literal_type(init) else {
            return;
        };
        let ann_text = normalize_ws(self.file.text_of(ann.type_ann.span()));
        if !compatible(&ann_text, init_type) {
            self.diags.push(Diagnostic::in_file(
                self.file.stripped_name.clone(),
                self.file.rel(binding.id.span),
                2322,
                format!("Type '{init_type}' is not assignable to type '{ann_text}'."),
            ));
        }
    }
}

/// Checks that run over a caller-supplied file (user or auxiliary) on its own.
pub fn check_source(file: &ParsedFile) -> Vec<Diagnostic> {
    let mut visitor = VarDeclChecks { file, diags: Vec::new() };
    file.module.visit_with(&mut visitor);
    visitor.diags
}

// ============================================================================
// ENCLOSING FUNCTION LOOKUP
// ============================================================================

struct FnSpans<'a> {
    file: &'a ParsedFile,
    found: Vec<(TextSpan, String)>,
}

impl Visit for FnSpans<'_> {
    fn visit_fn_decl(&mut self, decl: &swc_ecma_ast::FnDecl) {
        self.found
            .push((self.file.rel(decl.function.span), decl.ident.sym.to_string()));
        decl.visit_children_with(self);
    }

    fn visit_fn_expr(&mut self, expr: &swc_ecma_ast::FnExpr) {
        let name = expr.ident.as_ref().map(|i| i.sym.to_string()).unwrap_or_default();
        self.found.push((self.file.rel(expr.function.span), name));
        expr.visit_children_with(self);
    }

    fn visit_arrow_expr(&mut self, arrow: &ArrowExpr) {
        self.found.push((self.file.rel(arrow.span), String::new()));
        arrow.visit_children_with(self);
    }

    fn visit_var_declarator(&mut self, declarator: &VarDeclarator) {
        // Name anonymous function initializers after their binding.
        if let (Pat::Ident(binding), Some(init)) = (&declarator.name, declarator.init.as_deref()) {
            match init {
                Expr::Arrow(arrow) => self
                    .found
                    .push((self.file.rel(arrow.span), binding.id.sym.to_string())),
                Expr::Fn(fn_expr) if fn_expr.ident.is_none() => self
                    .found
                    .push((self.file.rel(fn_expr.function.span), binding.id.sym.to_string())),
                _ => {}
            }
        }
        declarator.visit_children_with(self);
    }
}

/// Name of the nearest function-like enclosing `offset`, or empty.
pub fn enclosing_function_name(file: &ParsedFile, offset: usize) -> String {
    let mut visitor = FnSpans { file, found: Vec::new() };
    file.module.visit_with(&mut visitor);

    let mut best: Option<(TextSpan, String)> = None;
    for (span, name) in visitor.found {
        if !span.contains(offset) {
            continue;
        }
        match &best {
            None => best = Some((span, name)),
            Some((best_span, best_name)) => {
                if span.len < best_span.len || (span.len == best_span.len && best_name.is_empty()) {
                    best = Some((span, name));
                }
            }
        }
    }
    best.map(|(_, name)| name).unwrap_or_default()
}
