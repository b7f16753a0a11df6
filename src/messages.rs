//! Per-code rewriting of compiler message text.
//!
//! Callers register a rewriter per diagnostic code; unregistered codes pass
//! through untouched. Rewriters run over every clause of a message chain in
//! depth-first order, and nested clauses join onto the parent with two-space
//! indentation. A registered rewriter returning `None` means the code was
//! claimed but the text shape was not understood, which is an internal
//! inconsistency rather than a user condition.

use std::collections::HashMap;
use std::sync::Arc;

use crate::diagnostics::MessageChain;
use crate::error::HostError;

pub type MessageMapperFn = dyn Fn(&str) -> Option<String> + Send + Sync;

#[derive(Clone, Default)]
pub struct MessageMappers {
    by_code: HashMap<u32, Arc<MessageMapperFn>>,
}

impl std::fmt::Debug for MessageMappers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut codes: Vec<u32> = self.by_code.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("MessageMappers").field("codes", &codes).finish()
    }
}

impl MessageMappers {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in table.
    pub fn standard() -> Self {
        let mut mappers = Self::default();
        // "Cannot find module 'x'. Did you mean to set the 'moduleResolution'
        // option to 'nodenext', or to add aliases to the 'paths' option?"
        // carries implementation advice that means nothing inside the sandbox.
        mappers.register(2792, |text| {
            let head = text.split(" Did you mean to set").next()?;
            Some(head.to_string())
        });
        mappers
    }

    pub fn register<F>(&mut self, code: u32, mapper: F)
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.by_code.insert(code, Arc::new(mapper));
    }

    fn apply_one(&self, code: u32, text: &str) -> Result<String, HostError> {
        match self.by_code.get(&code) {
            None => Ok(text.to_string()),
            Some(mapper) => mapper(text).ok_or_else(|| HostError::MessageMapperContract {
                code,
                message: text.to_string(),
            }),
        }
    }

    /// Rewrite a whole chain into display text: the head clause first, each
    /// nested clause on its own line, indented two spaces per depth.
    pub fn render(&self, chain: &MessageChain) -> Result<String, HostError> {
        let mut out = String::new();
        self.render_into(chain, 0, &mut out)?;
        Ok(out)
    }

    fn render_into(
        &self,
        chain: &MessageChain,
        depth: usize,
        out: &mut String,
    ) -> Result<(), HostError> {
        if depth > 0 {
            out.push('\n');
            for _ in 0..depth * 2 {
                out.push(' ');
            }
        }
        out.push_str(&self.apply_one(chain.code, &chain.text)?);
        for next in &chain.next {
            self.render_into(next, depth + 1, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> MessageChain {
        MessageChain {
            text: "outer".into(),
            code: 1,
            next: vec![
                MessageChain {
                    text: "mid".into(),
                    code: 2,
                    next: vec![MessageChain::leaf(3, "inner")],
                },
                MessageChain::leaf(4, "sibling"),
            ],
        }
    }

    #[test]
    fn unregistered_codes_pass_through() {
        let rendered = MessageMappers::empty().render(&chain()).unwrap();
        assert_eq!(rendered, "outer\n  mid\n    inner\n  sibling");
    }

    #[test]
    fn chain_order_is_depth_first() {
        let mut mappers = MessageMappers::empty();
        mappers.register(2, |t| Some(format!("<{t}>")));
        let rendered = mappers.render(&chain()).unwrap();
        assert_eq!(rendered, "outer\n  <mid>\n    inner\n  sibling");
    }

    #[test]
    fn rejecting_mapper_is_a_contract_violation() {
        let mut mappers = MessageMappers::empty();
        mappers.register(1, |_| None);
        let err = mappers.render(&chain()).unwrap_err();
        assert!(matches!(err, HostError::MessageMapperContract { code: 1, .. }));
    }

    #[test]
    fn standard_table_strips_module_resolution_advice() {
        let text = "Cannot find module 'left-pad'. Did you mean to set the 'moduleResolution' option?";
        let rendered = MessageMappers::standard()
            .render(&MessageChain::leaf(2792, text))
            .unwrap();
        assert_eq!(rendered, "Cannot find module 'left-pad'.");
    }
}
