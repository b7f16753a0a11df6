//! Program assembly: virtual files in, raw diagnostics and emitted modules out.
//!
//! All compilation happens over in-memory sources. Each virtual file is parsed
//! on its own swc source map, so spans are file-relative after subtracting the
//! file's base position. Emission strips types and records per-token source
//! mappings; only the user file's map is retained, as the artifact consulted
//! when runtime faults are translated back.

use std::collections::HashMap;
use std::sync::Arc;

use swc_common::{sync::Lrc, FileName, Mark, SourceFile, SourceMap, Spanned, GLOBALS};
use swc_ecma_ast::{EsVersion, Pass, Program};
use swc_ecma_codegen::{text_writer::JsWriter, Config, Emitter};
use swc_ecma_parser::{lexer::Lexer, Parser, StringInput, Syntax, TsSyntax};
use swc_ecma_transforms_typescript::strip;

use crate::checker;
use crate::diagnostics::{Diagnostic, TextSpan, UserCodeError};
use crate::error::HostError;
use crate::files::{build_file_set, AuxFile, FileKind, HARNESS_FILE, USER_FILE};
use crate::harness;
use crate::messages::MessageMappers;
use crate::remap::{self, RemapContext};
use crate::srcmap::SourceMapConsumer;

/// One compilation's inputs.
#[derive(Debug, Clone, Default)]
pub struct CompileRequest {
    pub user_source: String,
    pub expected_return_type: String,
    pub expected_arg_types: Vec<String>,
    pub aux_files: Vec<AuxFile>,
}

/// Everything an execution needs, shared between the cache and callers.
pub struct CompilationArtifacts {
    /// Emitted JS per non-declaration source, stripped name to code.
    pub js_by_name: HashMap<String, String>,
    /// Original source units, stripped name to text.
    pub ts_by_name: HashMap<String, String>,
    /// Auxiliary module names in the order the harness imports them. The
    /// executor evaluates these ahead of the harness so embedder-supplied
    /// faults stay distinguishable from user faults.
    pub aux_names: Vec<String>,
    /// Positions in the user's emitted module back to the user's source.
    pub user_source_map: SourceMapConsumer,
}

impl std::fmt::Debug for CompilationArtifacts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.js_by_name.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("CompilationArtifacts").field("modules", &names).finish()
    }
}

/// Outcome of one compilation: artifacts, or the user's diagnostics.
pub type Compilation = Result<Arc<CompilationArtifacts>, Vec<UserCodeError>>;

/// A parsed virtual file with its swc bookkeeping.
pub struct ParsedFile {
    pub stripped_name: String,
    pub text: String,
    pub kind: FileKind,
    pub module: swc_ecma_ast::Module,
    cm: Lrc<SourceMap>,
    fm: Lrc<SourceFile>,
}

impl ParsedFile {
    /// File-relative span of an AST node.
    pub fn rel(&self, span: swc_common::Span) -> TextSpan {
        let base = self.fm.start_pos.0;
        let start = span.lo.0.saturating_sub(base) as usize;
        let end = span.hi.0.saturating_sub(base) as usize;
        TextSpan::new(start, end.saturating_sub(start))
    }

    /// Source text covered by an AST node.
    pub fn text_of(&self, span: swc_common::Span) -> &str {
        let rel = self.rel(span);
        &self.text[rel.start.min(self.text.len())..rel.end().min(self.text.len())]
    }
}

fn ts_syntax() -> Syntax {
    Syntax::Typescript(TsSyntax {
        tsx: true,
        decorators: true,
        ..Default::default()
    })
}

/// Parse one virtual file. A syntax error comes back as a raw diagnostic in
/// that file, carrying the parser's own code when it names one.
pub(crate) fn parse_source(
    stripped_name: &str,
    text: &str,
    kind: FileKind,
) -> Result<ParsedFile, Diagnostic> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(stripped_name.to_string())),
        text.to_string(),
    );

    let lexer = Lexer::new(ts_syntax(), EsVersion::latest(), StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);

    let module = match parser.parse_module() {
        Ok(module) => module,
        Err(err) => return Err(parse_error_diagnostic(stripped_name, &fm, err)),
    };
    if let Some(err) = parser.take_errors().into_iter().next() {
        return Err(parse_error_diagnostic(stripped_name, &fm, err));
    }

    Ok(ParsedFile {
        stripped_name: stripped_name.to_string(),
        text: text.to_string(),
        kind,
        module,
        cm,
        fm,
    })
}

fn parse_error_diagnostic(
    stripped_name: &str,
    fm: &SourceFile,
    err: swc_ecma_parser::error::Error,
) -> Diagnostic {
    let span = err.span();
    let start = span.lo.0.saturating_sub(fm.start_pos.0) as usize;
    let len = span.hi.0.saturating_sub(span.lo.0) as usize;
    let debug = format!("{err:?}");
    Diagnostic::in_file(
        stripped_name,
        TextSpan::new(start, len.max(1)),
        parse_error_code(&debug),
        readable_parse_error(&debug),
    )
}

/// Pull a `TS<code>` out of the parser's debug output, defaulting to 1005.
fn parse_error_code(debug: &str) -> u32 {
    if let Some(at) = debug.find("TS") {
        let digits: String = debug[at + 2..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if let Ok(code) = digits.parse() {
            return code;
        }
    }
    1005
}

fn readable_parse_error(debug: &str) -> String {
    if debug.contains("Unexpected eof") || debug.contains("UnexpectedEof") {
        return "Unexpected end of file.".to_string();
    }
    if let Some(at) = debug.find("message:") {
        let rest = &debug[at + 8..];
        if let Some(end) = rest.find([',', '}']) {
            let msg = rest[..end].trim().trim_matches('"');
            if !msg.is_empty() {
                return format!("{msg}.");
            }
        }
    }
    "Syntax error.".to_string()
}

/// Run the whole front half of the pipeline: assemble, parse, check, remap,
/// and, with a clean bill, emit.
pub fn compile(request: &CompileRequest, mappers: &MessageMappers) -> Result<Compilation, HostError> {
    let file_set = build_file_set(&request.user_source, &request.aux_files)?;
    let aux_names: Vec<&str> = file_set
        .iter()
        .filter(|f| f.kind == FileKind::Source && f.stripped_name != USER_FILE)
        .map(|f| f.stripped_name.as_str())
        .collect();
    let harness_text = harness::synthesize(
        &aux_names,
        &request.expected_arg_types,
        &request.expected_return_type,
    );

    let mut raw: Vec<Diagnostic> = Vec::new();
    let mut parsed: Vec<ParsedFile> = Vec::new();
    for file in &file_set {
        match parse_source(&file.stripped_name, &file.text, file.kind) {
            Ok(p) => parsed.push(p),
            Err(d) => raw.push(d),
        }
    }

    // The harness is ours; failing to parse it is a bug, not a user condition.
    let harness_parsed = parse_source(HARNESS_FILE, &harness_text, FileKind::Source)
        .map_err(|d| HostError::MalformedHarness {
            detail: format!("harness failed to parse: TS{} {}", d.code, d.message.text),
        })?;
    let anchors = harness::anchors(&harness_parsed)?;

    let user = parsed.iter().find(|p| p.stripped_name == USER_FILE);
    let exports = user.map(checker::analyze_exports);

    if raw.is_empty() {
        let resolvable: std::collections::HashSet<String> = file_set
            .iter()
            .filter(|f| f.kind == FileKind::Source)
            .map(|f| f.stripped_name.clone())
            .collect();
        for file in &parsed {
            raw.extend(collect_import_diagnostics(file, &resolvable));
            raw.extend(checker::check_source(file));
        }
        let exports = exports
            .as_ref()
            .ok_or_else(|| HostError::engine("user module missing from parsed set"))?;
        raw.extend(checker::check_harness(&anchors, exports));
    }

    tracing::debug!(raw = raw.len(), files = file_set.len(), "front end finished");

    if !raw.is_empty() {
        let ctx = RemapContext {
            user_source: &request.user_source,
            user,
            exports: exports.as_ref(),
            anchors: &anchors,
            mappers,
        };
        let mut out = Vec::new();
        for diagnostic in &raw {
            if let Some(error) = remap::remap(diagnostic, &ctx)? {
                out.push(error);
            }
        }
        if !out.is_empty() {
            return Ok(Err(out));
        }
    }

    let mut js_by_name = HashMap::new();
    let mut ts_by_name = HashMap::new();
    let mut user_map = None;
    for file in parsed.iter().chain(std::iter::once(&harness_parsed)) {
        ts_by_name.insert(file.stripped_name.clone(), file.text.clone());
        if file.kind == FileKind::Declaration {
            continue;
        }
        let wants_map = file.stripped_name == USER_FILE;
        let (code, map) = emit_js(file, wants_map)?;
        if wants_map {
            user_map = map;
        }
        js_by_name.insert(file.stripped_name.clone(), code);
    }

    let user_source_map =
        user_map.ok_or_else(|| HostError::engine("no source map emitted for the user module"))?;

    tracing::debug!(modules = js_by_name.len(), "emitted program");

    Ok(Ok(Arc::new(CompilationArtifacts {
        js_by_name,
        ts_by_name,
        aux_names: aux_names.iter().map(|name| name.to_string()).collect(),
        user_source_map,
    })))
}

/// Flag import specifiers that resolve to nothing in the virtual file set.
/// Link-time resolution assumes every specifier was vetted here.
fn collect_import_diagnostics(
    file: &ParsedFile,
    resolvable: &std::collections::HashSet<String>,
) -> Vec<Diagnostic> {
    use swc_ecma_ast::{ModuleDecl, ModuleItem};

    let mut diags = Vec::new();
    for item in &file.module.body {
        let ModuleItem::ModuleDecl(decl) = item else {
            continue;
        };
        let (src, type_only) = match decl {
            ModuleDecl::Import(import) => (&import.src, import.type_only),
            ModuleDecl::ExportAll(export) => (&export.src, export.type_only),
            ModuleDecl::ExportNamed(export) => match &export.src {
                Some(src) => (src, export.type_only),
                None => continue,
            },
            _ => continue,
        };
        if type_only {
            continue;
        }
        let specifier = src.value.to_string_lossy().into_owned();
        if resolvable.contains(&crate::files::specifier_to_stripped(&specifier)) {
            continue;
        }
        diags.push(Diagnostic::in_file(
            file.stripped_name.clone(),
            file.rel(src.span),
            2792,
            format!(
                "Cannot find module '{specifier}'. Did you mean to set the 'moduleResolution' \
                 option to 'nodenext', or to add aliases to the 'paths' option?"
            ),
        ));
    }
    diags
}

/// Strip types and emit one module, optionally with a source map.
fn emit_js(
    file: &ParsedFile,
    with_map: bool,
) -> Result<(String, Option<SourceMapConsumer>), HostError> {
    GLOBALS.set(&Default::default(), || {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();
        let mut program = Program::Module(file.module.clone());
        let mut pass = strip(unresolved_mark, top_level_mark);
        pass.process(&mut program);

        let module = match program {
            Program::Module(module) => module,
            _ => return Err(HostError::engine("type stripping changed the program kind")),
        };

        let mut buf = Vec::new();
        let mut mappings = Vec::new();
        {
            let mut emitter = Emitter {
                cfg: Config::default(),
                cm: file.cm.clone(),
                comments: None,
                wr: JsWriter::new(
                    file.cm.clone(),
                    "\n",
                    &mut buf,
                    if with_map { Some(&mut mappings) } else { None },
                ),
            };
            emitter
                .emit_module(&module)
                .map_err(|e| HostError::engine(format!("emit failed: {e:?}")))?;
        }
        let code = String::from_utf8(buf)
            .map_err(|e| HostError::engine(format!("emitted module is not UTF-8: {e}")))?;

        let map = if with_map {
            let mut builder = swc_sourcemap::SourceMapBuilder::new(None);
            for (pos, generated) in &mappings {
                if pos.0 == 0 {
                    continue;
                }
                let loc = file.cm.lookup_char_pos(*pos);
                builder.add(
                    generated.line,
                    generated.col,
                    loc.line.saturating_sub(1) as u32,
                    loc.col.0 as u32,
                    Some(file.stripped_name.clone().into()),
                    None,
                    false,
                );
            }
            Some(SourceMapConsumer::from_map(builder.into_sourcemap()))
        } else {
            None
        };

        Ok((code, map))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user: &str, ret: &str, args: &[&str]) -> CompileRequest {
        CompileRequest {
            user_source: user.to_string(),
            expected_return_type: ret.to_string(),
            expected_arg_types: args.iter().map(|s| s.to_string()).collect(),
            aux_files: Vec::new(),
        }
    }

    fn compile_ok(req: &CompileRequest) -> Arc<CompilationArtifacts> {
        compile(req, &MessageMappers::standard())
            .expect("no host error")
            .expect("no diagnostics")
    }

    #[test]
    fn clean_program_emits_user_and_harness() {
        let artifacts = compile_ok(&request(
            "export default function F(s: string): string { return s; }",
            "string",
            &["string"],
        ));
        assert!(artifacts.js_by_name.contains_key(USER_FILE));
        assert!(artifacts.js_by_name.contains_key(HARNESS_FILE));
        assert_eq!(artifacts.js_by_name.len(), 2);
        let user_js = &artifacts.js_by_name[USER_FILE];
        assert!(!user_js.contains(": string"), "types not stripped: {user_js}");
    }

    #[test]
    fn harness_js_keeps_call_and_drops_declarations() {
        let artifacts = compile_ok(&request(
            "export default function F(s: string): string { return s; }",
            "string",
            &["string"],
        ));
        let harness_js = &artifacts.js_by_name[HARNESS_FILE];
        assert!(harness_js.contains("defaultExport(...args)"), "got: {harness_js}");
        assert!(!harness_js.contains("declare"), "got: {harness_js}");
        assert!(harness_js.contains("__user_file"), "got: {harness_js}");
    }

    #[test]
    fn declarations_are_typed_only() {
        let mut req = request("export default function F(): void {}", "void", &[]);
        req.aux_files.push(AuxFile::new("globals.d.ts", "declare function g(s: string): string;"));
        let artifacts = compile_ok(&req);
        assert!(!artifacts.js_by_name.contains_key("globals"));
        assert!(artifacts.ts_by_name.contains_key("globals"));
    }

    #[test]
    fn aux_sources_are_emitted_and_imported_first() {
        let mut req = request("export default function F(): void {}", "void", &[]);
        req.aux_files.push(AuxFile::new("helper.ts", "export const n: number = 1;"));
        let artifacts = compile_ok(&req);
        assert!(artifacts.js_by_name.contains_key("helper"));
        let harness_js = &artifacts.js_by_name[HARNESS_FILE];
        let helper_at = harness_js.find("'helper'").expect("helper import");
        let user_at = harness_js.find("'__user_file'").expect("user import");
        assert!(helper_at < user_at);
    }

    #[test]
    fn user_source_map_translates_emitted_positions() {
        let artifacts = compile_ok(&request(
            "export default function F(s: string): string {\n  return s;\n}",
            "string",
            &["string"],
        ));
        let js = &artifacts.js_by_name[USER_FILE];
        // Locate `return` in the emitted module and map it home.
        let offset = js.find("return").expect("return survives stripping");
        let line = js[..offset].matches('\n').count() + 1;
        let col = offset - js[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0) + 1;
        let original = artifacts
            .user_source_map
            .original_position_for(line as u32, col as u32)
            .expect("maps to user source");
        assert_eq!(original.0, 2);
    }

    #[test]
    fn parse_error_surfaces_as_user_diagnostic() {
        let outcome = compile(&request("const x = {", "void", &[]), &MessageMappers::standard())
            .expect("no host error");
        let diags = outcome.expect_err("should fail");
        assert_eq!(diags.len(), 1);
        assert!(diags[0].message.starts_with("TypeError: TS"), "got: {}", diags[0].message);
        assert!(diags[0].location.line >= 1);
    }

    #[test]
    fn reserved_name_is_a_host_error() {
        let mut req = request("export default function F(): void {}", "void", &[]);
        req.aux_files.push(AuxFile::new("__execution_harness.ts", ""));
        let err = compile(&req, &MessageMappers::standard()).unwrap_err();
        assert!(matches!(err, HostError::ReservedFileName { .. }));
    }
}
