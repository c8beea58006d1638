//! Key-based batching.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use super::{Batch, BatchStrategy};

/// Groups items by a discriminating key so each batch holds items of a
/// single category.
///
/// Categories are emitted in first-seen order and item order is preserved
/// within a category. A category larger than `max_size` is split into
/// consecutive chunks. Grouping requires a full pass over the input; batch
/// construction itself stays lazy.
pub struct CategoryBatcher<T> {
    max_size: usize,
    key_fn: Arc<dyn Fn(&T) -> String + Send + Sync>,
}

impl<T> CategoryBatcher<T> {
    pub fn new(max_size: usize, key_fn: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        Self {
            max_size: max_size.max(1),
            key_fn: Arc::new(key_fn),
        }
    }
}

impl<T: Send + 'static> BatchStrategy<T> for CategoryBatcher<T> {
    fn strategy_key(&self) -> &'static str {
        "category"
    }

    fn produce_batches(&self, items: Vec<T>) -> Box<dyn Iterator<Item = Batch<T>> + Send> {
        let max_size = self.max_size;
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<T>> = HashMap::new();
        for item in items {
            match groups.entry((self.key_fn)(&item)) {
                Entry::Occupied(mut entry) => entry.get_mut().push(item),
                Entry::Vacant(entry) => {
                    order.push(entry.key().clone());
                    entry.insert(vec![item]);
                }
            }
        }

        let mut pending: std::vec::IntoIter<(String, std::vec::IntoIter<T>)> = order
            .into_iter()
            .filter_map(|key| groups.remove(&key).map(|group| (key, group.into_iter())))
            .collect::<Vec<_>>()
            .into_iter();
        let mut current: Option<(String, std::vec::IntoIter<T>)> = None;

        Box::new(std::iter::from_fn(move || loop {
            let (key, group) = match current.as_mut() {
                Some(active) => active,
                None => {
                    current = Some(pending.next()?);
                    continue;
                }
            };
            let chunk: Vec<T> = group.by_ref().take(max_size).collect();
            if chunk.is_empty() {
                current = None;
                continue;
            }
            let cost = chunk.len() as f64;
            return Some(Batch::new(chunk, format!("category:{key}"), cost));
        }))
    }
}
