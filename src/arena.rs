//! Flat storage for one parsed BER element tree.
//!
//! Nodes live in a single vector in breadth-first order, so the children of
//! any node occupy a contiguous index range. Sizes and the "needs rewrite"
//! flag are computed in one reverse pass, since every child has a larger
//! index than its parent.

use std::ops::Range;

use crate::error::{DecodeError, DecodeResult};
use crate::tlv::{encoded_length_len, find_eoc, read_header, write_length, Length};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub start: usize,
    pub tag_len: usize,
    pub content: Range<usize>,
    pub end: usize,
    pub constructed: bool,
    pub indefinite: bool,
    pub children: Range<usize>,
    /// An indefinite length exists at or below this node.
    pub dirty: bool,
    /// Content size once every nested length is definite.
    pub content_size: usize,
}

impl Node {
    /// Encoded size after normalization.
    #[inline]
    pub fn encoded_size(&self) -> usize {
        if self.dirty {
            self.tag_len + encoded_length_len(self.content_size) + self.content_size
        } else {
            self.end - self.start
        }
    }
}

#[derive(Debug)]
pub struct ElementArena<'a> {
    src: &'a [u8],
    nodes: Vec<Node>,
}

fn parse_node(src: &[u8], pos: usize, limit: usize) -> DecodeResult<Node> {
    let header = read_header(src, pos)?;
    let content_start = pos + header.len();

    let (content, end, indefinite) = match header.length {
        Length::Indefinite => {
            if !header.tag.constructed {
                return Err(DecodeError::UnterminatedIndefiniteLength { offset: pos });
            }
            let eoc_end = find_eoc(src, content_start)
                .filter(|&e| e <= limit)
                .ok_or(DecodeError::UnterminatedIndefiniteLength { offset: pos })?;
            (content_start..eoc_end - 2, eoc_end, true)
        }
        Length::Definite(len) => {
            let end = content_start.saturating_add(len);
            if end > limit {
                return Err(DecodeError::TruncatedInput {
                    offset: pos,
                    needed: end - limit,
                });
            }
            (content_start..end, end, false)
        }
    };

    Ok(Node {
        start: pos,
        tag_len: header.tag_len,
        content,
        end,
        constructed: header.tag.constructed,
        indefinite,
        children: 0..0,
        dirty: indefinite,
        content_size: 0,
    })
}

fn parse_children(src: &[u8], region: Range<usize>) -> DecodeResult<Vec<Node>> {
    let mut out = Vec::new();
    let mut pos = region.start;
    while pos < region.end {
        let node = parse_node(src, pos, region.end)?;
        pos = node.end;
        out.push(node);
    }
    Ok(out)
}

impl<'a> ElementArena<'a> {
    /// Parses the element starting at `pos` and every constructed element
    /// below it that may hide an indefinite length.
    ///
    /// Definite constructed content that does not parse as TLVs is kept as an
    /// opaque leaf. A malformed indefinite element is an error because its
    /// content cannot be re-emitted.
    pub fn parse(src: &'a [u8], pos: usize) -> DecodeResult<Self> {
        let root = parse_node(src, pos, src.len())?;
        let mut nodes = vec![root];

        let mut next = 0;
        while next < nodes.len() {
            let node = &nodes[next];
            let descend = node.constructed
                && (node.indefinite || src[node.content.clone()].contains(&0x80));
            if descend {
                let indefinite = node.indefinite;
                match parse_children(src, node.content.clone()) {
                    Ok(children) => {
                        let first = nodes.len();
                        nodes.extend(children);
                        nodes[next].children = first..nodes.len();
                    }
                    Err(e) if indefinite => return Err(e),
                    Err(_) => {}
                }
            }
            next += 1;
        }

        for i in (0..nodes.len()).rev() {
            let children = nodes[i].children.clone();
            let dirty = nodes[i].indefinite || nodes[children.clone()].iter().any(|c| c.dirty);
            let content_size = if dirty {
                nodes[children].iter().map(Node::encoded_size).sum()
            } else {
                nodes[i].content.len()
            };
            nodes[i].dirty = dirty;
            nodes[i].content_size = content_size;
        }

        Ok(Self { src, nodes })
    }

    pub fn root(&self) -> &Node {
        &self.nodes[0]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn children(&self, idx: usize) -> &[Node] {
        &self.nodes[self.nodes[idx].children.clone()]
    }

    /// Identifier octets of node `idx`, verbatim from the source.
    pub fn tag_bytes(&self, idx: usize) -> &'a [u8] {
        let node = &self.nodes[idx];
        &self.src[node.start..node.start + node.tag_len]
    }

    /// Number of indefinite-length elements that will be rewritten.
    pub fn indefinite_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.indefinite).count()
    }

    /// Appends the whole element with every length definite.
    pub fn emit(&self, out: &mut Vec<u8>) {
        self.emit_from(&[0], out);
    }

    /// Appends only the content of the root element, normalized.
    pub fn emit_root_content(&self, out: &mut Vec<u8>) {
        let root = &self.nodes[0];
        if root.dirty {
            let children: Vec<usize> = root.children.clone().collect();
            self.emit_from(&children, out);
        } else {
            out.extend_from_slice(&self.src[root.content.clone()]);
        }
    }

    fn emit_from(&self, roots: &[usize], out: &mut Vec<u8>) {
        let mut stack: Vec<usize> = roots.iter().rev().copied().collect();
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if !node.dirty {
                out.extend_from_slice(&self.src[node.start..node.end]);
                continue;
            }
            out.extend_from_slice(self.tag_bytes(idx));
            write_length(out, node.content_size);
            stack.extend(node.children.clone().rev());
        }
    }
}
