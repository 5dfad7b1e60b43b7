use serde::Serialize;

use crate::store::Record;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub category: Option<String>,
    pub pending_only: bool,
}

/// Records of one category, in store order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryGroup {
    pub category: String,
    pub items: Vec<Record>,
}

impl CategoryGroup {
    pub fn remaining(&self) -> usize {
        self.items.iter().filter(|item| !item.done).count()
    }
}

pub fn apply_filter(records: Vec<Record>, filter: &ListFilter) -> Vec<Record> {
    let category = normalize_scalar(filter.category.as_deref());
    records
        .into_iter()
        .filter(|record| {
            if filter.pending_only && record.done {
                return false;
            }
            match category.as_deref() {
                Some(expected) => record.category.trim().to_lowercase() == expected,
                None => true,
            }
        })
        .collect()
}

/// Groups by category. Groups appear in the order their category is first
/// seen; a record never moves ahead of an earlier one inside its group.
pub fn group_by_category(records: Vec<Record>) -> Vec<CategoryGroup> {
    let mut groups: Vec<CategoryGroup> = Vec::new();
    for record in records {
        match groups
            .iter_mut()
            .find(|group| group.category == record.category)
        {
            Some(group) => group.items.push(record),
            None => groups.push(CategoryGroup {
                category: record.category.clone(),
                items: vec![record],
            }),
        }
    }
    groups
}

fn normalize_scalar(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_lowercase)
}
