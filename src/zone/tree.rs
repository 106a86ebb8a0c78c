//! Label tree keyed by domain name.
//!
//! Names are split into labels and stored from the root down, so
//! `www.example.com` lives at `com -> example -> www`. Interior nodes may
//! exist without a value (empty non-terminals); they matter for telling
//! NODATA from NXDOMAIN and for locating the closest encloser.

use crate::dns::resource::normalize_name;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
struct Node<T> {
    value: Option<T>,
    children: BTreeMap<String, Node<T>>,
}

impl<T> Default for Node<T> {
    fn default() -> Self {
        Self {
            value: None,
            children: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DomainTree<T> {
    root: Node<T>,
    len: usize,
}

impl<T> Default for DomainTree<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Labels of `name` ordered from the root down
fn reversed_labels(name: &str) -> Vec<String> {
    name.trim_end_matches('.')
        .split('.')
        .filter(|label| !label.is_empty())
        .rev()
        .map(|label| label.to_lowercase())
        .collect()
}

fn child_name(parent: &str, label: &str) -> String {
    if parent.is_empty() {
        label.to_string()
    } else {
        format!("{}.{}", label, parent)
    }
}

impl<T> DomainTree<T> {
    pub fn new() -> Self {
        Self {
            root: Node::default(),
            len: 0,
        }
    }

    /// Number of names holding a value
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.root = Node::default();
        self.len = 0;
    }

    fn node(&self, name: &str) -> Option<&Node<T>> {
        let mut node = &self.root;
        for label in reversed_labels(name) {
            node = node.children.get(&label)?;
        }
        Some(node)
    }

    fn node_mut(&mut self, name: &str) -> Option<&mut Node<T>> {
        let mut node = &mut self.root;
        for label in reversed_labels(name) {
            node = node.children.get_mut(&label)?;
        }
        Some(node)
    }

    pub fn get(&self, name: &str) -> Option<&T> {
        self.node(name)?.value.as_ref()
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        self.node_mut(name)?.value.as_mut()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether `name` exists as a node, with or without a value
    pub fn node_exists(&self, name: &str) -> bool {
        self.node(name).is_some()
    }

    /// Insert or replace, returning the previous value
    pub fn insert(&mut self, name: &str, value: T) -> Option<T> {
        let mut node = &mut self.root;
        for label in reversed_labels(name) {
            node = node.children.entry(label).or_default();
        }

        let previous = node.value.replace(value);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Insert only when `name` holds no value; hands `value` back otherwise
    pub fn try_insert(&mut self, name: &str, value: T) -> Result<(), T> {
        if self.contains(name) {
            return Err(value);
        }
        self.insert(name, value);
        Ok(())
    }

    /// Get the value at `name`, inserting one built by `create` if absent
    pub fn get_or_insert_with(&mut self, name: &str, create: impl FnOnce() -> T) -> &mut T {
        let mut node = &mut self.root;
        for label in reversed_labels(name) {
            node = node.children.entry(label).or_default();
        }

        if node.value.is_none() {
            self.len += 1;
        }
        node.value.get_or_insert_with(create)
    }

    /// Remove the value at `name`, pruning interior nodes left empty
    pub fn remove(&mut self, name: &str) -> Option<T> {
        let labels = reversed_labels(name);
        let removed = Self::remove_at(&mut self.root, &labels);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    fn remove_at(node: &mut Node<T>, labels: &[String]) -> Option<T> {
        match labels.split_first() {
            None => node.value.take(),
            Some((label, rest)) => {
                let child = node.children.get_mut(label)?;
                let removed = Self::remove_at(child, rest);
                if child.value.is_none() && child.children.is_empty() {
                    node.children.remove(label);
                }
                removed
            }
        }
    }

    /// Deepest name at or above `name` holding a value, with that value
    pub fn find_closest(&self, name: &str) -> Option<(String, &T)> {
        let mut node = &self.root;
        let mut current = String::new();
        let mut best = node.value.as_ref().map(|value| (String::new(), value));

        for label in reversed_labels(name) {
            match node.children.get(&label) {
                Some(child) => {
                    current = child_name(&current, &label);
                    node = child;
                    if let Some(value) = node.value.as_ref() {
                        best = Some((current.clone(), value));
                    }
                }
                None => break,
            }
        }

        best
    }

    /// Deepest existing node at or above `name`, whether or not it holds a value
    pub fn closest_encloser(&self, name: &str) -> String {
        let mut node = &self.root;
        let mut current = String::new();

        for label in reversed_labels(name) {
            match node.children.get(&label) {
                Some(child) => {
                    current = child_name(&current, &label);
                    node = child;
                }
                None => break,
            }
        }

        current
    }

    /// Values on the path from the root down to `name` inclusive, topmost first
    pub fn ancestors(&self, name: &str) -> Vec<(String, &T)> {
        let mut found = Vec::new();
        let mut node = &self.root;
        let mut current = String::new();

        if let Some(value) = node.value.as_ref() {
            found.push((String::new(), value));
        }

        for label in reversed_labels(name) {
            match node.children.get(&label) {
                Some(child) => {
                    current = child_name(&current, &label);
                    node = child;
                    if let Some(value) = node.value.as_ref() {
                        found.push((current.clone(), value));
                    }
                }
                None => break,
            }
        }

        found
    }

    /// Labels of the immediate children of `name`, in sorted order
    pub fn child_labels(&self, name: &str) -> Vec<String> {
        self.node(name)
            .map(|node| node.children.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Pre-order walk of the whole tree: parents before children,
    /// siblings in label order
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            stack: vec![(String::new(), &self.root)],
        }
    }

    /// Pre-order walk of `name` and everything below it
    pub fn iter_from(&self, name: &str) -> Iter<'_, T> {
        let stack = match self.node(name) {
            Some(node) => vec![(normalize_name(name), node)],
            None => Vec::new(),
        };
        Iter { stack }
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.iter().map(|(_, value)| value)
    }
}

pub struct Iter<'a, T> {
    stack: Vec<(String, &'a Node<T>)>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (String, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((name, node)) = self.stack.pop() {
            for (label, child) in node.children.iter().rev() {
                self.stack.push((child_name(&name, label), child));
            }
            if let Some(value) = node.value.as_ref() {
                return Some((name, value));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DomainTree<u32> {
        let mut tree = DomainTree::new();
        tree.insert("example.com", 1);
        tree.insert("sub.example.com", 2);
        tree.insert("example.org", 3);
        tree
    }

    #[test]
    fn test_insert_get_and_len() {
        let mut tree = sample();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.get("EXAMPLE.com."), Some(&1));
        assert_eq!(tree.get("com"), None);
        assert!(tree.node_exists("com"));

        assert_eq!(tree.insert("example.com", 10), Some(1));
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.try_insert("example.com", 11), Err(11));
        assert!(tree.try_insert("example.net", 4).is_ok());
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn test_find_closest() {
        let tree = sample();
        assert_eq!(tree.find_closest("a.b.sub.example.com"), Some(("sub.example.com".to_string(), &2)));
        assert_eq!(tree.find_closest("www.example.com"), Some(("example.com".to_string(), &1)));
        assert_eq!(tree.find_closest("example.net"), None);
        assert_eq!(tree.find_closest("com"), None);
    }

    #[test]
    fn test_root_value() {
        let mut tree = sample();
        tree.insert("", 0);
        assert_eq!(tree.find_closest("example.net"), Some((String::new(), &0)));
        assert_eq!(tree.ancestors("sub.example.com").len(), 3);
    }

    #[test]
    fn test_remove_prunes() {
        let mut tree = sample();
        assert_eq!(tree.remove("sub.example.com"), Some(2));
        assert!(!tree.node_exists("sub.example.com"));
        assert!(tree.node_exists("example.com"));
        assert_eq!(tree.remove("sub.example.com"), None);

        assert_eq!(tree.remove("example.org"), Some(3));
        assert!(!tree.node_exists("org"));
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_closest_encloser() {
        let tree = sample();
        assert_eq!(tree.closest_encloser("x.y.sub.example.com"), "sub.example.com");
        assert_eq!(tree.closest_encloser("x.org"), "org");
        assert_eq!(tree.closest_encloser("x.net"), "");
    }

    #[test]
    fn test_iteration_order() {
        let tree = sample();
        let names: Vec<String> = tree.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["example.com", "sub.example.com", "example.org"]);

        let below: Vec<u32> = tree.iter_from("example.com").map(|(_, v)| *v).collect();
        assert_eq!(below, vec![1, 2]);
        assert_eq!(tree.child_labels("example.com"), vec!["sub".to_string()]);
        assert_eq!(tree.child_labels(""), vec!["com".to_string(), "org".to_string()]);
    }
}
