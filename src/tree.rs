//! Rooted phylogenetic trees with branch lengths and branch labels.
//!
//! Nodes are stored in a flat arena indexed by id. Leaves carry the taxon
//! name and a leaf id that doubles as the row index into the alignment's
//! state matrix. Labels partition branches into classes for models that
//! assign different substitution processes to different branches.

use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub struct Node {
    pub id: usize,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub branch_length: f64,
    /// Branch class label (0 = background).
    pub label: u8,
    pub name: Option<String>,
    pub leaf_id: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct Tree {
    nodes: Vec<Node>,
    root: usize,
    postorder: Vec<usize>,
    leaf_ids: Vec<usize>,
}

impl Tree {
    /// Build a tree from a parent table: `structure[i]` is `(id, parent)` for
    /// node `i`, with `None` marking the root. `leaf_names[k]` names the leaf
    /// whose node id is `leaf_node_ids[k]`; that leaf gets leaf id `k`.
    pub fn from_structure(
        structure: &[(usize, Option<usize>)],
        branch_lengths: &[f64],
        leaf_names: &[String],
        leaf_node_ids: &[usize],
    ) -> Result<Self> {
        let n = structure.len();
        if branch_lengths.len() != n {
            return Err(Error::Tree(format!(
                "{} nodes but {} branch lengths",
                n,
                branch_lengths.len()
            )));
        }
        if leaf_names.len() != leaf_node_ids.len() {
            return Err(Error::Tree("leaf names and ids differ in length".into()));
        }

        let mut nodes: Vec<Node> = (0..n)
            .map(|id| Node {
                id,
                parent: None,
                children: Vec::new(),
                branch_length: 0.0,
                label: 0,
                name: None,
                leaf_id: None,
            })
            .collect();

        let mut root = None;
        for &(id, parent) in structure {
            if id >= n {
                return Err(Error::Tree(format!("node id {} out of range", id)));
            }
            nodes[id].branch_length = branch_lengths[id];
            match parent {
                Some(p) => {
                    if p >= n {
                        return Err(Error::Tree(format!("parent id {} out of range", p)));
                    }
                    nodes[id].parent = Some(p);
                    nodes[p].children.push(id);
                }
                None => {
                    if root.replace(id).is_some() {
                        return Err(Error::Tree("multiple roots".into()));
                    }
                }
            }
        }
        let root = root.ok_or_else(|| Error::Tree("no root node".into()))?;

        for (k, (&id, name)) in leaf_node_ids.iter().zip(leaf_names).enumerate() {
            if id >= n {
                return Err(Error::Tree(format!("leaf node id {} out of range", id)));
            }
            if !nodes[id].children.is_empty() {
                return Err(Error::Tree(format!("node {} is internal, not a leaf", id)));
            }
            nodes[id].name = Some(name.clone());
            if nodes[id].leaf_id.replace(k).is_some() {
                return Err(Error::Tree(format!("node {} named twice", id)));
            }
        }

        let postorder = postorder_from(&nodes, root, n)?;

        // keep caller order: leaf_ids[k] is the node holding leaf id k
        let leaf_ids = leaf_node_ids.to_vec();
        let n_leaves = nodes.iter().filter(|nd| nd.children.is_empty()).count();
        if leaf_ids.len() != n_leaves {
            return Err(Error::Tree("some leaves have no name".into()));
        }

        Ok(Self {
            nodes,
            root,
            postorder,
            leaf_ids,
        })
    }

    /// Parse a rooted Newick string, e.g. `((A:0.1,B:0.2):0.12,C:0.3);`.
    /// Supports branch lengths and PAML-style `#k` branch labels. Leaves
    /// are assigned node ids 0..L-1 in order of appearance, internal nodes
    /// follow, and the root gets the highest id.
    pub fn from_newick(newick: &str) -> Result<Self> {
        let s = newick.trim().trim_end_matches(';');
        let mut parser = NewickParser {
            chars: s.char_indices().peekable(),
            src: s,
            leaves: Vec::new(),
            internals: Vec::new(),
        };
        let root = parser.parse_clade()?;
        if parser.chars.next().is_some() {
            return Err(Error::Tree("trailing characters after newick tree".into()));
        }

        // Number leaves first, then internal nodes, root last.
        let n_leaves = parser.leaves.len();
        let n = n_leaves + parser.internals.len();
        let mut nodes: Vec<Node> = Vec::with_capacity(n);
        for (k, raw) in parser.leaves.iter().enumerate() {
            nodes.push(Node {
                id: k,
                parent: None,
                children: Vec::new(),
                branch_length: raw.branch_length,
                label: raw.label,
                name: Some(raw.name.clone().ok_or_else(|| {
                    Error::Tree("leaf without a name in newick string".into())
                })?),
                leaf_id: Some(k),
            });
        }
        // internals were recorded children-first, so the root is last already
        for (j, raw) in parser.internals.iter().enumerate() {
            nodes.push(Node {
                id: n_leaves + j,
                parent: None,
                children: Vec::new(),
                branch_length: raw.branch_length,
                label: raw.label,
                name: None,
                leaf_id: None,
            });
        }

        // Resolve raw child references (leaf-k or internal-j) to node ids.
        let resolve = |r: RawRef| match r {
            RawRef::Leaf(k) => k,
            RawRef::Internal(j) => n_leaves + j,
        };
        for (j, raw) in parser.internals.iter().enumerate() {
            let pid = n_leaves + j;
            for &c in &raw.children {
                let cid = resolve(c);
                nodes[cid].parent = Some(pid);
                nodes[pid].children.push(cid);
            }
        }

        let root_id = resolve(root);
        let postorder = postorder_from(&nodes, root_id, n)?;
        let leaf_ids = (0..n_leaves).collect();

        Ok(Self {
            nodes,
            root: root_id,
            postorder,
            leaf_ids,
        })
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn root(&self) -> usize {
        self.root
    }

    /// Node ids in postorder; every child precedes its parent, root last.
    pub fn postorder(&self) -> &[usize] {
        &self.postorder
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn children(&self, id: usize) -> &[usize] {
        &self.nodes[id].children
    }

    pub fn parent(&self, id: usize) -> Option<usize> {
        self.nodes[id].parent
    }

    pub fn is_leaf(&self, id: usize) -> bool {
        self.nodes[id].children.is_empty()
    }

    pub fn branch_length(&self, id: usize) -> f64 {
        self.nodes[id].branch_length
    }

    pub fn set_branch_length(&mut self, id: usize, length: f64) -> Result<()> {
        if id >= self.nodes.len() {
            return Err(Error::Tree(format!("node id {} out of range", id)));
        }
        if !(length >= 0.0) {
            return Err(Error::Tree(format!(
                "branch length for node {} must be non-negative, got {}",
                id, length
            )));
        }
        self.nodes[id].branch_length = length;
        Ok(())
    }

    pub fn label(&self, id: usize) -> u8 {
        self.nodes[id].label
    }

    pub fn set_label(&mut self, id: usize, label: u8) {
        self.nodes[id].label = label;
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_ids.len()
    }

    /// Node ids of the leaves, ordered by leaf id.
    pub fn leaf_node_ids(&self) -> &[usize] {
        &self.leaf_ids
    }

    /// Taxon names ordered by leaf id, matching state matrix rows.
    pub fn leaf_names(&self) -> Vec<String> {
        self.leaf_ids
            .iter()
            .map(|&id| self.nodes[id].name.clone().unwrap_or_default())
            .collect()
    }
}

fn postorder_from(nodes: &[Node], root: usize, n: usize) -> Result<Vec<usize>> {
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![(root, false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
        } else {
            stack.push((id, true));
            for &c in &nodes[id].children {
                stack.push((c, false));
            }
        }
    }
    if order.len() != n {
        return Err(Error::Tree(
            "tree is disconnected or contains a cycle".into(),
        ));
    }
    Ok(order)
}

#[derive(Clone, Copy)]
enum RawRef {
    Leaf(usize),
    Internal(usize),
}

struct RawNode {
    name: Option<String>,
    branch_length: f64,
    label: u8,
    children: Vec<RawRef>,
}

struct NewickParser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
    leaves: Vec<RawNode>,
    internals: Vec<RawNode>,
}

impl<'a> NewickParser<'a> {
    fn parse_clade(&mut self) -> Result<RawRef> {
        match self.chars.peek() {
            Some(&(_, '(')) => {
                self.chars.next();
                let mut children = vec![self.parse_clade()?];
                while let Some(&(_, ',')) = self.chars.peek() {
                    self.chars.next();
                    children.push(self.parse_clade()?);
                }
                match self.chars.next() {
                    Some((_, ')')) => {}
                    _ => return Err(Error::Tree("unbalanced parentheses in newick".into())),
                }
                // internal names are permitted but discarded
                let _ = self.parse_name();
                let (branch_length, label) = self.parse_suffix()?;
                self.internals.push(RawNode {
                    name: None,
                    branch_length,
                    label,
                    children,
                });
                Ok(RawRef::Internal(self.internals.len() - 1))
            }
            Some(_) => {
                let name = self.parse_name();
                let (branch_length, label) = self.parse_suffix()?;
                self.leaves.push(RawNode {
                    name,
                    branch_length,
                    label,
                    children: Vec::new(),
                });
                Ok(RawRef::Leaf(self.leaves.len() - 1))
            }
            None => Err(Error::Tree("unexpected end of newick string".into())),
        }
    }

    fn parse_name(&mut self) -> Option<String> {
        let start = self.chars.peek().map(|&(i, _)| i)?;
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if matches!(c, '(' | ')' | ',' | ':' | '#' | ';') || c.is_whitespace() {
                break;
            }
            end = i + c.len_utf8();
            self.chars.next();
        }
        if end > start {
            Some(self.src[start..end].to_string())
        } else {
            None
        }
    }

    // `:length` and `#label` may appear in either order after a clade.
    fn parse_suffix(&mut self) -> Result<(f64, u8)> {
        let mut branch_length = 0.0;
        let mut label = 0u8;
        loop {
            match self.chars.peek() {
                Some(&(_, ':')) => {
                    self.chars.next();
                    branch_length = self
                        .parse_number()
                        .ok_or_else(|| Error::Tree("missing branch length after ':'".into()))?;
                    if branch_length < 0.0 {
                        return Err(Error::Tree("negative branch length in newick".into()));
                    }
                }
                Some(&(_, '#')) => {
                    self.chars.next();
                    let v = self
                        .parse_number()
                        .ok_or_else(|| Error::Tree("missing branch label after '#'".into()))?;
                    label = v as u8;
                }
                _ => break,
            }
        }
        Ok((branch_length, label))
    }

    fn parse_number(&mut self) -> Option<f64> {
        let start = self.chars.peek().map(|&(i, _)| i)?;
        let mut end = start;
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E') {
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        self.src[start..end].parse().ok()
    }
}
