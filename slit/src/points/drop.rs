/// A pure predicate over decoded data. Returning true drops the record.
pub type DropFn<T> = fn(&T) -> bool;

/// Ordered list of drop functions, OR-ed together left to right.
pub struct DropChain<T> {
    predicates: Vec<DropFn<T>>,
}

impl<T> DropChain<T> {
    /// An empty chain, which passes every record.
    pub fn new() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    pub fn with(mut self, predicate: DropFn<T>) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn should_drop(&self, data: &T) -> bool {
        self.predicates.iter().any(|drop| drop(data))
    }

    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

impl<T> Default for DropChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for DropChain<T> {
    fn clone(&self) -> Self {
        Self {
            predicates: self.predicates.clone(),
        }
    }
}

impl<T> FromIterator<DropFn<T>> for DropChain<T> {
    fn from_iter<I: IntoIterator<Item = DropFn<T>>>(iter: I) -> Self {
        Self {
            predicates: iter.into_iter().collect(),
        }
    }
}
