//! The untrusted-content block registry.
//!
//! Blocks are the verifier's unit of taint tracking: every piece of
//! external content (tool results from the web, MCP servers, untrusted
//! user messages) is registered with a trust label, a source tag, and
//! its Shannon entropy. The registry lives as long as the session and is
//! owned by the verifier; blocks are never mutated after registration.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trust level attached to a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Produced by the runtime or the operator.
    Trusted,
    /// Externally sourced but reviewed.
    Vetted,
    /// Externally sourced, unreviewed.
    Untrusted,
}

/// Whether a block carries instructions or data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Prompt or directive text. Immutable and trusted by construction.
    Instruction,
    /// Payload content.
    Data,
}

/// A registered piece of content with its taint metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Unique block id.
    pub id: String,
    /// Trust label.
    pub trust: TrustLevel,
    /// Instruction or data.
    pub kind: BlockKind,
    /// Where the content came from, e.g. `tool:web_fetch`.
    pub source: String,
    /// Whether downstream processing may rewrite the content.
    pub mutable: bool,
    /// The content itself.
    pub content: String,
    /// Shannon entropy of the content, bits per byte (base 2).
    pub entropy: f64,
}

/// Shannon entropy over the byte distribution of `text`, base 2.
#[must_use]
pub fn shannon_entropy(text: &str) -> f64 {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for &b in bytes {
        counts[b as usize] += 1;
    }
    let len = bytes.len() as f64;
    counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Session-lifetime registry of content blocks.
///
/// Interior mutability keeps registration possible from parallel tool
/// tasks; reads return clones so no lock is held across awaits.
#[derive(Debug, Default)]
pub struct BlockRegistry {
    blocks: Mutex<Vec<ContentBlock>>,
}

impl BlockRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, trust: TrustLevel, kind: BlockKind, source: &str, content: &str, mutable: bool) -> ContentBlock {
        let block = ContentBlock {
            id: Uuid::new_v4().to_string(),
            trust,
            kind,
            source: source.to_string(),
            mutable,
            content: content.to_string(),
            entropy: shannon_entropy(content),
        };
        if let Ok(mut blocks) = self.blocks.lock() {
            blocks.push(block.clone());
        }
        block
    }

    /// Register untrusted external data (mutable by default).
    pub fn register_untrusted(&self, source: &str, content: &str) -> ContentBlock {
        self.register(TrustLevel::Untrusted, BlockKind::Data, source, content, true)
    }

    /// Register vetted external data.
    pub fn register_vetted(&self, source: &str, content: &str) -> ContentBlock {
        self.register(TrustLevel::Vetted, BlockKind::Data, source, content, true)
    }

    /// Register instruction content. Instructions are immutable and
    /// trusted by construction.
    pub fn register_instruction(&self, source: &str, content: &str) -> ContentBlock {
        self.register(TrustLevel::Trusted, BlockKind::Instruction, source, content, false)
    }

    /// Snapshot of every registered block, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ContentBlock> {
        self.blocks.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Snapshot of the untrusted blocks only.
    #[must_use]
    pub fn untrusted(&self) -> Vec<ContentBlock> {
        self.blocks
            .lock()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.trust == TrustLevel::Untrusted)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of registered blocks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod entropy {
        use super::*;

        #[test]
        fn empty_string_has_zero_entropy() {
            assert_eq!(shannon_entropy(""), 0.0);
        }

        #[test]
        fn uniform_repetition_has_zero_entropy() {
            assert_eq!(shannon_entropy("aaaaaaaa"), 0.0);
        }

        #[test]
        fn two_symbols_give_one_bit() {
            let entropy = shannon_entropy("abababab");
            assert!((entropy - 1.0).abs() < 1e-9);
        }

        #[test]
        fn random_looking_text_is_high_entropy() {
            let entropy = shannon_entropy("8fJ2kQ!xZp0vW5mN3rT7yLbC1dHsGu9A");
            assert!(entropy > 4.0);
        }

        #[test]
        fn english_prose_is_moderate_entropy() {
            let entropy = shannon_entropy("the quick brown fox jumps over the lazy dog");
            assert!(entropy > 3.0 && entropy < 4.5);
        }
    }

    mod registry {
        use super::*;

        #[test]
        fn untrusted_blocks_are_mutable_data() {
            let registry = BlockRegistry::new();
            let block = registry.register_untrusted("tool:web_fetch", "external payload");
            assert_eq!(block.trust, TrustLevel::Untrusted);
            assert_eq!(block.kind, BlockKind::Data);
            assert!(block.mutable);
            assert_eq!(block.source, "tool:web_fetch");
        }

        #[test]
        fn instruction_blocks_are_immutable_and_trusted() {
            let registry = BlockRegistry::new();
            let block = registry.register_instruction("system", "Be careful.");
            assert_eq!(block.trust, TrustLevel::Trusted);
            assert_eq!(block.kind, BlockKind::Instruction);
            assert!(!block.mutable);
        }

        #[test]
        fn snapshot_preserves_registration_order() {
            let registry = BlockRegistry::new();
            registry.register_untrusted("tool:a", "one");
            registry.register_untrusted("tool:b", "two");
            let blocks = registry.snapshot();
            assert_eq!(blocks.len(), 2);
            assert_eq!(blocks[0].source, "tool:a");
            assert_eq!(blocks[1].source, "tool:b");
        }

        #[test]
        fn untrusted_filter_excludes_trusted() {
            let registry = BlockRegistry::new();
            registry.register_instruction("system", "prompt");
            registry.register_untrusted("tool:web_search", "results");
            assert_eq!(registry.len(), 2);
            let untrusted = registry.untrusted();
            assert_eq!(untrusted.len(), 1);
            assert_eq!(untrusted[0].source, "tool:web_search");
        }

        #[test]
        fn ids_are_unique() {
            let registry = BlockRegistry::new();
            let a = registry.register_untrusted("s", "x");
            let b = registry.register_untrusted("s", "x");
            assert_ne!(a.id, b.id);
        }
    }
}
