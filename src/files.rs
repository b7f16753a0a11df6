//! Virtual file set served to the compiler.
//!
//! Files never touch the real file system. Identity is the *stripped* logical
//! name: the caller-supplied name with its extension removed (`.d.ts` counts as
//! one extension). Import specifiers resolve against stripped names, so
//! `./helper`, `helper.ts` and `helper` all denote the same virtual file.

use crate::error::HostError;

/// Logical name of the user's module. Reserved; callers must not use it.
pub const USER_FILE: &str = "__user_file";

/// Logical name of the synthesized harness module. Reserved.
pub const HARNESS_FILE: &str = "__execution_harness";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// A TypeScript source that compiles to an emitted JS module.
    Source,
    /// A declaration file: contributes types only, never emitted or imported.
    Declaration,
}

/// One entry of the virtual file set.
#[derive(Debug, Clone)]
pub struct VirtualFile {
    pub stripped_name: String,
    pub text: String,
    pub kind: FileKind,
}

/// An auxiliary source supplied by the caller alongside the user module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxFile {
    /// Caller-facing logical name, extension included (`helper.ts`, `types.d.ts`).
    pub name: String,
    pub text: String,
}

impl AuxFile {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Strip the extension off a logical name. `.d.ts` is a single extension.
pub fn stripped_name(name: &str) -> String {
    if let Some(base) = name.strip_suffix(".d.ts") {
        return base.to_string();
    }
    match name.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() && !ext.contains('/') => base.to_string(),
        _ => name.to_string(),
    }
}

/// Normalize an import specifier to a stripped name.
pub fn specifier_to_stripped(specifier: &str) -> String {
    let s = specifier.strip_prefix("./").unwrap_or(specifier);
    stripped_name(s)
}

fn is_declaration(name: &str) -> bool {
    name.ends_with(".d.ts")
}

/// Build the virtual file set for one compilation: the user module plus each
/// auxiliary, validated against reserved-name and duplicate-name collisions.
///
/// The harness is not part of the returned set; the assembler appends it after
/// synthesis. Order is preserved: auxiliaries first (caller order), user last.
pub fn build_file_set(user_source: &str, aux: &[AuxFile]) -> Result<Vec<VirtualFile>, HostError> {
    let mut set: Vec<VirtualFile> = Vec::with_capacity(aux.len() + 1);
    for file in aux {
        let stripped = stripped_name(&file.name);
        if stripped == USER_FILE || stripped == HARNESS_FILE {
            return Err(HostError::ReservedFileName { name: stripped });
        }
        if set.iter().any(|f| f.stripped_name == stripped) {
            return Err(HostError::DuplicateFileName { name: stripped });
        }
        set.push(VirtualFile {
            stripped_name: stripped,
            text: file.text.clone(),
            kind: if is_declaration(&file.name) {
                FileKind::Declaration
            } else {
                FileKind::Source
            },
        });
    }
    set.push(VirtualFile {
        stripped_name: USER_FILE.to_string(),
        text: user_source.to_string(),
        kind: FileKind::Source,
    });
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_extension() {
        assert_eq!(stripped_name("helper.ts"), "helper");
        assert_eq!(stripped_name("helper.js"), "helper");
        assert_eq!(stripped_name("helper"), "helper");
    }

    #[test]
    fn strips_declaration_extension_whole() {
        assert_eq!(stripped_name("types.d.ts"), "types");
    }

    #[test]
    fn specifier_normalization_is_extension_insensitive() {
        assert_eq!(specifier_to_stripped("./helper.ts"), "helper");
        assert_eq!(specifier_to_stripped("helper"), "helper");
        assert_eq!(specifier_to_stripped("./helper"), "helper");
    }

    #[test]
    fn rejects_reserved_names() {
        let err = build_file_set("", &[AuxFile::new("__user_file.ts", "")]).unwrap_err();
        assert!(matches!(err, HostError::ReservedFileName { .. }));
    }

    #[test]
    fn rejects_colliding_stripped_names() {
        let aux = [
            AuxFile::new("foo.ts", "export const a = 1;"),
            AuxFile::new("foo.js", "export const b = 2;"),
        ];
        let err = build_file_set("", &aux).unwrap_err();
        assert!(matches!(err, HostError::DuplicateFileName { .. }));
    }

    #[test]
    fn classifies_declarations() {
        let set = build_file_set("export default 1;", &[AuxFile::new("g.d.ts", "declare function g(): void;")])
            .unwrap();
        assert_eq!(set[0].kind, FileKind::Declaration);
        assert_eq!(set[1].stripped_name, USER_FILE);
        assert_eq!(set[1].kind, FileKind::Source);
    }
}
