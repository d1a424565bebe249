//! Radix-2 decomposition planning.
//!
//! A [`Plan`] halves a signal of length `N` by even/odd decimation until the
//! pieces are no longer than the chunk size. Because every split halves the
//! length exactly, the tree is perfectly balanced: all leaves share one length
//! (`leaf_len`) and every node at height `h` holds `leaf_len * 2^h` elements.
//!
//! Node elements are addressed through explicit index maps rather than array
//! views: element `i` of a node lives at physical index `start + i * stride`
//! of the original signal. The even child of `(start, stride)` is
//! `(start, 2 * stride)`, the odd child `(start + stride, 2 * stride)`.

use daft_cache::BlockKey;

use crate::error::{DaftError, DaftResult};

/// Identity and index map of one decomposition node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeSpan {
    /// Physical index of the node's first element.
    pub start: u64,
    /// Distance between consecutive node elements in the original signal.
    pub stride: u64,
    /// Number of elements.
    pub len: u64,
}

impl NodeSpan {
    /// Span covering a whole signal of `len` elements.
    #[must_use]
    pub fn root(len: u64) -> Self {
        Self {
            start: 0,
            stride: 1,
            len,
        }
    }

    /// Physical signal index of logical element `logical`.
    #[must_use]
    pub fn physical_index(&self, logical: u64) -> u64 {
        self.start + logical * self.stride
    }

    /// `(even, odd)` halves of this span.
    #[must_use]
    pub fn children(&self) -> (NodeSpan, NodeSpan) {
        let stride = self.stride * 2;
        let len = self.len / 2;
        (
            NodeSpan {
                start: self.start,
                stride,
                len,
            },
            NodeSpan {
                start: self.start + self.stride,
                stride,
                len,
            },
        )
    }

    /// Cache key of output chunk `chunk` of this node.
    #[must_use]
    pub fn block_key(&self, chunk: u64) -> BlockKey {
        BlockKey::new(self.start, self.stride, self.len, chunk)
    }
}

/// One recursive call of the radix-2 decomposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompositionNode {
    pub span: NodeSpan,
    /// Number of splits between the root and this node.
    pub depth: u32,
    /// `[even, odd]` children; `None` for leaves.
    pub children: Option<Box<[DecompositionNode; 2]>>,
}

impl DecompositionNode {
    fn build(span: NodeSpan, depth: u32, leaf_len: u64) -> Self {
        if span.len <= leaf_len {
            return Self {
                span,
                depth,
                children: None,
            };
        }
        let (even, odd) = span.children();
        Self {
            span,
            depth,
            children: Some(Box::new([
                Self::build(even, depth + 1, leaf_len),
                Self::build(odd, depth + 1, leaf_len),
            ])),
        }
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.span.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.span.len == 0
    }

    #[must_use]
    pub fn physical_index(&self, logical: u64) -> u64 {
        self.span.physical_index(logical)
    }

    /// Collect leaves in even-before-odd order.
    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a DecompositionNode>) {
        match &self.children {
            None => out.push(self),
            Some(children) => {
                children[0].collect_leaves(out);
                children[1].collect_leaves(out);
            }
        }
    }

    fn count(&self) -> usize {
        1 + self
            .children
            .as_ref()
            .map_or(0, |c| c[0].count() + c[1].count())
    }
}

/// Decomposition of a signal into in-core pieces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    root: DecompositionNode,
    chunksize: usize,
    leaf_len: usize,
    height: u32,
}

/// Plan the decomposition of a length-`len` signal for a `chunksize` threshold.
///
/// # Errors
///
/// - [`DaftError::InvalidChunkSize`] if `chunksize` is zero.
/// - [`DaftError::UnsupportedLength`] if `len` is zero, or if halving meets
///   an odd length that is still larger than `chunksize`.
pub fn plan(len: u64, chunksize: usize) -> DaftResult<Plan> {
    if chunksize == 0 {
        return Err(DaftError::InvalidChunkSize);
    }
    if len == 0 {
        return Err(DaftError::UnsupportedLength {
            len,
            chunksize,
            at: 0,
        });
    }

    let mut leaf_len = len;
    let mut height = 0u32;
    while leaf_len > chunksize as u64 {
        if leaf_len % 2 == 1 {
            return Err(DaftError::UnsupportedLength {
                len,
                chunksize,
                at: leaf_len,
            });
        }
        leaf_len /= 2;
        height += 1;
    }

    let root = DecompositionNode::build(NodeSpan::root(len), 0, leaf_len);
    tracing::debug!(len, chunksize, leaf_len, height, "Planned decomposition");
    Ok(Plan {
        root,
        chunksize,
        leaf_len: leaf_len as usize,
        height,
    })
}

impl Plan {
    #[must_use]
    pub fn root(&self) -> &DecompositionNode {
        &self.root
    }

    /// Signal length.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.root.span.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    #[must_use]
    pub fn chunksize(&self) -> usize {
        self.chunksize
    }

    /// Common length of every leaf, and of every output chunk.
    #[must_use]
    pub fn leaf_len(&self) -> usize {
        self.leaf_len
    }

    /// Number of splits from the root to the leaves.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn leaf_count(&self) -> u64 {
        1 << self.height
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.root.count()
    }

    /// Number of `leaf_len` chunks in the output of a node at `height`.
    #[must_use]
    pub fn chunks_at(&self, height: u32) -> u64 {
        1 << height
    }

    /// Output length of the butterfly stage producing nodes at `height`.
    ///
    /// This is the `M` of the stage's twiddle factors `exp(-2πi·j/M)`.
    #[must_use]
    pub fn combine_len(&self, height: u32) -> u64 {
        (self.leaf_len as u64) << height
    }

    /// Node at `height` whose first element is physical index `start`.
    #[must_use]
    pub fn node_at(&self, height: u32, start: u64) -> Option<NodeSpan> {
        if height > self.height {
            return None;
        }
        let stride = 1u64 << (self.height - height);
        (start < stride).then(|| NodeSpan {
            start,
            stride,
            len: self.combine_len(height),
        })
    }

    /// All nodes at `height`, even before odd.
    #[must_use]
    pub fn nodes_at(&self, height: u32) -> Vec<NodeSpan> {
        if height > self.height {
            return Vec::new();
        }
        let depth = self.height - height;
        (0..1u64 << depth)
            .filter_map(|i| self.node_at(height, reverse_bits(i, depth)))
            .collect()
    }

    /// Leaves in even-before-odd order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&DecompositionNode> {
        let mut out = Vec::with_capacity(self.leaf_count() as usize);
        self.root.collect_leaves(&mut out);
        out
    }
}

/// Reverse the low `bits` bits of `value`.
fn reverse_bits(value: u64, bits: u32) -> u64 {
    if bits == 0 {
        0
    } else {
        value.reverse_bits() >> (64 - bits)
    }
}
