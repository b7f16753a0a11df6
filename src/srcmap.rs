//! Source-map consumption.
//!
//! Thin wrapper owning the decoded tables. Constructed once per compilation
//! and shared for the artifact's lifetime; lookups are 1-based on both sides.

use crate::error::HostError;

pub struct SourceMapConsumer {
    map: swc_sourcemap::SourceMap,
}

impl std::fmt::Debug for SourceMapConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceMapConsumer")
            .field("tokens", &self.map.get_token_count())
            .finish()
    }
}

impl SourceMapConsumer {
    pub fn from_map(map: swc_sourcemap::SourceMap) -> Self {
        Self { map }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, HostError> {
        let map = swc_sourcemap::SourceMap::from_slice(bytes)
            .map_err(|e| HostError::engine(format!("invalid source map: {e}")))?;
        Ok(Self { map })
    }

    /// Translate a 1-based generated position to a 1-based original position.
    /// `None` when the position has no source mapping (synthesized output).
    pub fn original_position_for(&self, line: u32, column: u32) -> Option<(u32, u32)> {
        let token = self
            .map
            .lookup_token(line.saturating_sub(1), column.saturating_sub(1))?;
        if !token.has_source() {
            return None;
        }
        Some((token.get_src_line() + 1, token.get_src_col() + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer() -> SourceMapConsumer {
        let mut builder = swc_sourcemap::SourceMapBuilder::new(None);
        // generated (0-based) -> original (0-based)
        builder.add(0, 0, 4, 2, Some("__user_file".into()), None, false);
        builder.add(1, 2, 9, 0, Some("__user_file".into()), None, false);
        SourceMapConsumer::from_map(builder.into_sourcemap())
    }

    #[test]
    fn positions_are_one_based_both_ways() {
        let map = consumer();
        assert_eq!(map.original_position_for(1, 1), Some((5, 3)));
        assert_eq!(map.original_position_for(2, 3), Some((10, 1)));
    }

    #[test]
    fn lookup_falls_back_to_preceding_token() {
        let map = consumer();
        assert_eq!(map.original_position_for(2, 40), Some((10, 1)));
    }
}
