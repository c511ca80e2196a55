//! Directory/file tree over slash-separated paths, with the sibling order
//! shared by the GGPK and bundle-index views.
//!
//! Siblings sort directories first, then by natural order: runs of ASCII
//! digits compare by numeric value and everything else compares
//! case-insensitively. Names equal under that order fall back to ordinal
//! comparison so two distinct names never collide.

use std::cmp::Ordering;

// ── Ordering ─────────────────────────────────────────────────────────────────

/// Natural, case-insensitive string order (`file2` < `file10`).
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (a_bytes, b_bytes) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a_bytes.len() && j < b_bytes.len() {
        if a_bytes[i].is_ascii_digit() && b_bytes[j].is_ascii_digit() {
            let a_end = digit_run_end(a_bytes, i);
            let b_end = digit_run_end(b_bytes, j);
            let ord = cmp_digit_runs(&a[i..a_end], &b[j..b_end]);
            if ord != Ordering::Equal {
                return ord;
            }
            i = a_end;
            j = b_end;
            continue;
        }

        // Step one char on each side; both indices sit on char boundaries.
        let ca = a[i..].chars().next().unwrap_or_default();
        let cb = b[j..].chars().next().unwrap_or_default();
        let ord = ca.to_lowercase().cmp(cb.to_lowercase());
        if ord != Ordering::Equal {
            return ord;
        }
        i += ca.len_utf8();
        j += cb.len_utf8();
    }

    (a_bytes.len() - i)
        .cmp(&(b_bytes.len() - j))
        .then_with(|| a.cmp(b))
}

fn digit_run_end(s: &[u8], start: usize) -> usize {
    s[start..]
        .iter()
        .position(|c| !c.is_ascii_digit())
        .map_or(s.len(), |n| start + n)
}

fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a_trim = a.trim_start_matches('0');
    let b_trim = b.trim_start_matches('0');
    a_trim
        .len()
        .cmp(&b_trim.len())
        .then_with(|| a_trim.cmp(b_trim))
}

/// Sibling order: directories before files, then [`natural_cmp`].
pub fn sibling_cmp(a_is_dir: bool, a: &str, b_is_dir: bool, b: &str) -> Ordering {
    b_is_dir.cmp(&a_is_dir).then_with(|| natural_cmp(a, b))
}

/// Path segments split on `/` or `\`, skipping empty ones.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split(|c: char| c == '/' || c == '\\').filter(|s| !s.is_empty())
}

// ── PathTree ─────────────────────────────────────────────────────────────────

pub type NodeId = usize;

#[derive(Debug, Clone)]
pub enum NodeKind<T> {
    Directory { children: Vec<NodeId> },
    File(T),
}

#[derive(Debug, Clone)]
pub struct TreeNode<T> {
    pub name:   String,
    pub parent: Option<NodeId>,
    pub kind:   NodeKind<T>,
}

impl<T> TreeNode<T> {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn file(&self) -> Option<&T> {
        match &self.kind {
            NodeKind::File(v) => Some(v),
            NodeKind::Directory { .. } => None,
        }
    }
}

/// Arena-backed tree. Node 0 is the unnamed root directory.
#[derive(Debug, Clone)]
pub struct PathTree<T> {
    nodes: Vec<TreeNode<T>>,
}

impl<T> Default for PathTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PathTree<T> {
    pub const ROOT: NodeId = 0;

    pub fn new() -> Self {
        PathTree {
            nodes: vec![TreeNode {
                name:   String::new(),
                parent: None,
                kind:   NodeKind::Directory { children: Vec::new() },
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn node(&self, id: NodeId) -> &TreeNode<T> {
        &self.nodes[id]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id].kind {
            NodeKind::Directory { children } => children,
            NodeKind::File(_) => &[],
        }
    }

    /// Insert a file at `path`, creating intermediate directories.
    pub fn insert_file(&mut self, path: &str, value: T) -> NodeId {
        let segments: Vec<&str> = path.split('/').collect();
        let (file_name, dirs) = match segments.split_last() {
            Some(parts) => parts,
            None => (&"", &[][..]),
        };

        let mut parent = Self::ROOT;
        for dir in dirs {
            parent = match self.child_named(parent, true, dir) {
                Some(id) => id,
                None => self.push_child(parent, dir, NodeKind::Directory { children: Vec::new() }),
            };
        }
        self.push_child(parent, file_name, NodeKind::File(value))
    }

    fn child_named(&self, parent: NodeId, is_dir: bool, name: &str) -> Option<NodeId> {
        let children = self.children(parent);
        children
            .binary_search_by(|&c| {
                let n = &self.nodes[c];
                sibling_cmp(n.is_dir(), &n.name, is_dir, name)
            })
            .ok()
            .map(|i| children[i])
    }

    fn push_child(&mut self, parent: NodeId, name: &str, kind: NodeKind<T>) -> NodeId {
        let id = self.nodes.len();
        let is_dir = matches!(kind, NodeKind::Directory { .. });
        self.nodes.push(TreeNode { name: name.to_string(), parent: Some(parent), kind });

        let pos = self
            .children(parent)
            .binary_search_by(|&c| {
                let n = &self.nodes[c];
                sibling_cmp(n.is_dir(), &n.name, is_dir, name)
            })
            .unwrap_or_else(|i| i);
        if let NodeKind::Directory { children } = &mut self.nodes[parent].kind {
            children.insert(pos, id);
        }
        id
    }

    /// Resolve `path` below `from` (or the root). Names match exactly.
    pub fn find(&self, path: &str, from: Option<NodeId>) -> Option<NodeId> {
        let mut current = from.unwrap_or(Self::ROOT);
        for segment in split_path(path) {
            if !self.nodes[current].is_dir() {
                return None;
            }
            current = *self
                .children(current)
                .iter()
                .find(|&&c| self.nodes[c].name == segment)?;
        }
        Some(current)
    }

    /// Full path of `id`; directories end with `/`, the root is `""`.
    pub fn path_of(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = &self.nodes[c];
            if node.parent.is_some() {
                parts.push(node.name.as_str());
            }
            cur = node.parent;
        }
        parts.reverse();
        let mut path = parts.join("/");
        if self.nodes[id].is_dir() && !path.is_empty() {
            path.push('/');
        }
        path
    }

    /// Every file node at or below `id`, in tree order.
    pub fn files_under(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(c) = stack.pop() {
            match &self.nodes[c].kind {
                NodeKind::File(_) => out.push(c),
                NodeKind::Directory { children } => stack.extend(children.iter().rev()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_order_compares_numbers_by_value() {
        let mut names = vec!["file10.txt", "File2.txt", "file1.txt", "file02.txt", "a"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, ["a", "file1.txt", "File2.txt", "file02.txt", "file10.txt"]);
    }

    #[test]
    fn case_variants_stay_distinct() {
        assert_ne!(natural_cmp("Art", "art"), Ordering::Equal);
        assert_eq!(natural_cmp("art", "art"), Ordering::Equal);
    }

    #[test]
    fn directories_sort_first() {
        assert_eq!(sibling_cmp(true, "z", false, "a"), Ordering::Less);
        assert_eq!(sibling_cmp(false, "a", true, "z"), Ordering::Greater);
    }

    #[test]
    fn build_and_find() {
        let mut tree = PathTree::new();
        tree.insert_file("data/b.dat", 2);
        tree.insert_file("data/a10.dat", 3);
        tree.insert_file("data/a9.dat", 4);
        tree.insert_file("art/x.dds", 1);
        tree.insert_file("readme", 5);

        let root_names: Vec<&str> = tree
            .children(PathTree::<i32>::ROOT)
            .iter()
            .map(|&c| tree.node(c).name.as_str())
            .collect();
        assert_eq!(root_names, ["art", "data", "readme"]);

        let data = tree.find("data", None).unwrap();
        let names: Vec<&str> = tree.children(data).iter().map(|&c| tree.node(c).name.as_str()).collect();
        assert_eq!(names, ["a9.dat", "a10.dat", "b.dat"]);

        let file = tree.find("data\\a10.dat", None).unwrap();
        assert_eq!(tree.node(file).file(), Some(&3));
        assert_eq!(tree.path_of(file), "data/a10.dat");
        assert_eq!(tree.path_of(data), "data/");
        assert!(tree.find("data/a10.dat/more", None).is_none());
        assert!(tree.find("Data", None).is_none());
        assert_eq!(tree.files_under(data).len(), 3);
        assert_eq!(tree.files_under(PathTree::<i32>::ROOT).len(), 5);
    }
}
