use std::collections::HashMap;

/// Bidirectional `label <-> id` mapping built during a training-set scan.
///
/// Ids are dense and assigned in first-seen order starting at 0. A registry is
/// never mutated after it is published alongside its model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelRegistry {
    labels: Vec<String>,
    ids: HashMap<String, u32>,
}

impl LabelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id of `label`, assigning the next free id on first sight.
    pub fn id_or_insert(&mut self, label: &str) -> u32 {
        if let Some(&id) = self.ids.get(label) {
            return id;
        }
        let id = self.labels.len() as u32;
        self.labels.push(label.to_string());
        self.ids.insert(label.to_string(), id);
        id
    }

    pub fn label(&self, id: u32) -> Option<&str> {
        self.labels.get(id as usize).map(String::as_str)
    }

    /// Labels in id order.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
