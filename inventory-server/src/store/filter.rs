use std::cmp::Ordering;

use inventory_core::{AttributeValue, Device, GroupName, Scope, SortKey};

use crate::query::QueryError;

pub const DEFAULT_PER_PAGE: usize = 20;
pub const MAX_PER_PAGE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
}

/// A predicate on a single attribute.
///
/// `value` is always the literal text. `value_float` and `value_time` are
/// filled when the literal also reads as a number or an RFC3339 instant so
/// stores can compare typed values without re-parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub attr_name: String,
    pub attr_scope: Scope,
    pub operator: ComparisonOperator,
    pub value: String,
    pub value_float: Option<f64>,
    pub value_time: Option<jiff::Timestamp>,
}

impl Filter {
    pub fn new(
        attr_scope: Scope,
        attr_name: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<String>,
    ) -> Self {
        let value = value.into();
        let value_float = value.parse::<f64>().ok().filter(|f| f.is_finite());
        let value_time = value.parse::<jiff::Timestamp>().ok();

        Self {
            attr_name: attr_name.into(),
            attr_scope,
            operator,
            value,
            value_float,
            value_time,
        }
    }

    pub fn eq(attr_scope: Scope, attr_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(attr_scope, attr_name, ComparisonOperator::Eq, value)
    }

    pub fn matches(&self, device: &Device) -> bool {
        device
            .attributes
            .get(self.attr_scope, &self.attr_name)
            .is_some_and(|attr| self.matches_value(&attr.value))
    }

    fn matches_value(&self, value: &AttributeValue) -> bool {
        match self.operator {
            ComparisonOperator::Eq => match value {
                AttributeValue::String(s) => self.text_eq(s),
                AttributeValue::Number(n) => self.value_float == Some(n.into_inner()),
                AttributeValue::StringArray(values) => values.iter().any(|s| self.text_eq(s)),
                AttributeValue::NumberArray(values) => values
                    .iter()
                    .any(|n| self.value_float == Some(n.into_inner())),
            },
        }
    }

    fn text_eq(&self, stored: &str) -> bool {
        if stored == self.value {
            return true;
        }

        match self.value_time {
            Some(expected) => stored.parse::<jiff::Timestamp>().ok() == Some(expected),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub attr_name: String,
    pub attr_scope: Scope,
    pub ascending: bool,
}

impl Sort {
    fn key<'a>(&self, device: &'a Device) -> SortKey<'a> {
        device
            .attributes
            .get(self.attr_scope, &self.attr_name)
            .map_or(SortKey::Missing, |attr| attr.value.sort_key())
    }

    /// Orders by the attribute value, ties broken by ascending device id.
    pub fn compare(&self, a: &Device, b: &Device) -> Ordering {
        let ord = self.key(a).cmp(&self.key(b));
        let ord = if self.ascending { ord } else { ord.reverse() };

        ord.then_with(|| a.id.cmp(&b.id))
    }
}

/// A page of devices matching every filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ListQuery {
    pub skip: usize,
    pub limit: usize,
    pub filters: Vec<Filter>,
    pub sort: Option<Sort>,
    pub has_group: Option<bool>,
    pub group_name: Option<GroupName>,
}

impl ListQuery {
    pub fn builder() -> ListQueryBuilder {
        ListQueryBuilder::new()
    }

    pub fn matches(&self, device: &Device) -> bool {
        if let Some(has_group) = self.has_group
            && device.group.is_some() != has_group
        {
            return false;
        }

        if let Some(group) = &self.group_name
            && device.group.as_ref() != Some(group)
        {
            return false;
        }

        self.filters.iter().all(|filter| filter.matches(device))
    }

    pub fn compare(&self, a: &Device, b: &Device) -> Ordering {
        match &self.sort {
            Some(sort) => sort.compare(a, b),
            None => a.id.cmp(&b.id),
        }
    }
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: DEFAULT_PER_PAGE,
            filters: Vec::new(),
            sort: None,
            has_group: None,
            group_name: None,
        }
    }
}

/// Number of entries before the 1-based `page`. Pages past `usize::MAX`
/// entries saturate and select nothing.
pub fn page_offset(page: usize, per_page: usize) -> usize {
    page.saturating_sub(1).saturating_mul(per_page)
}

#[derive(Debug, Default)]
pub struct ListQueryBuilder {
    query: ListQuery,
}

impl ListQueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.query.skip = skip;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = limit;
        self
    }

    /// Translates a 1-based page number and page size into skip/limit.
    pub fn page(self, page: usize, per_page: usize) -> Self {
        self.skip(page_offset(page, per_page)).limit(per_page)
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.query.filters.push(filter);
        self
    }

    pub fn filters<I>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = Filter>,
    {
        self.query.filters.extend(filters);
        self
    }

    pub fn sort(mut self, sort: Option<Sort>) -> Self {
        self.query.sort = sort;
        self
    }

    pub fn has_group(mut self, has_group: Option<bool>) -> Self {
        self.query.has_group = has_group;
        self
    }

    pub fn group(mut self, group: Option<GroupName>) -> Self {
        self.query.group_name = group;
        self
    }

    pub fn build(self) -> Result<ListQuery, QueryError> {
        if self.query.limit == 0 {
            return Err(QueryError::InvalidLimit);
        }
        Ok(self.query)
    }
}
