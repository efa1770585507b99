//! Translates raw query parameters into a [`ListQuery`].
//!
//! Filters are written `<scope>/<name>=[<op>:]<value>` and sorting as
//! `sort=<scope>/<name>[:asc|desc]`. The operator prefix is only taken when
//! it appears in the operator table, so values such as MAC addresses or
//! RFC3339 timestamps keep their colons.

use inventory_core::{GroupName, Scope};

use crate::store::filter::{
    ComparisonOperator, DEFAULT_PER_PAGE, Filter, ListQuery, MAX_PER_PAGE, Sort,
};

pub const PARAM_PAGE: &str = "page";
pub const PARAM_PER_PAGE: &str = "per_page";
pub const PARAM_SORT: &str = "sort";
pub const PARAM_HAS_GROUP: &str = "has_group";
pub const PARAM_GROUP: &str = "group";

const SCOPE_SEPARATOR: char = '/';
const VALUE_SEPARATOR: char = ':';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid filter '{0}': must include scope and name (e.g. 'identity/mac')")]
    MissingScope(String),
    #[error("invalid filter '{param}': supported attribute scopes: [ {supported} ]")]
    UnsupportedScope { param: String, supported: String },
    #[error("invalid sort '{0}': must include scope and name (e.g. 'identity/mac')")]
    InvalidSort(String),
    #[error("invalid sort '{param}': unknown sort order '{order}', expected asc or desc")]
    InvalidSortOrder { param: String, order: String },
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParam { name: String, reason: String },
    #[error("limit must be greater than zero")]
    InvalidLimit,
}

/// How attribute paths without an explicit scope are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeSyntax {
    /// A missing scope means `inventory`.
    Legacy,
    /// The scope is mandatory.
    Strict,
}

/// Static tables the parser works from.
#[derive(Debug, Clone)]
pub struct ParserConfig {
    pub syntax: ScopeSyntax,
    pub operators: Vec<(&'static str, ComparisonOperator)>,
    pub filterable_scopes: Vec<Scope>,
    pub reserved_params: Vec<&'static str>,
}

impl ParserConfig {
    pub fn legacy() -> Self {
        Self {
            syntax: ScopeSyntax::Legacy,
            operators: default_operators(),
            filterable_scopes: Scope::ALL.to_vec(),
            reserved_params: default_reserved_params(),
        }
    }

    pub fn strict(filterable_scopes: Vec<Scope>) -> Self {
        Self {
            syntax: ScopeSyntax::Strict,
            operators: default_operators(),
            filterable_scopes,
            reserved_params: default_reserved_params(),
        }
    }
}

fn default_operators() -> Vec<(&'static str, ComparisonOperator)> {
    vec![("eq", ComparisonOperator::Eq)]
}

fn default_reserved_params() -> Vec<&'static str> {
    vec![
        PARAM_PAGE,
        PARAM_PER_PAGE,
        PARAM_SORT,
        PARAM_HAS_GROUP,
        PARAM_GROUP,
    ]
}

#[derive(Debug, Clone)]
pub struct QueryParser {
    config: ParserConfig,
}

impl QueryParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// Parses a full parameter list. The first invalid parameter aborts.
    pub fn parse_list_query(&self, params: &[(String, String)]) -> Result<ListQuery, QueryError> {
        let mut page = 1;
        let mut per_page = DEFAULT_PER_PAGE;
        let mut sort = None;
        let mut has_group = None;
        let mut group = None;
        let mut filters = Vec::new();

        for (name, value) in params {
            match name.as_str() {
                PARAM_PAGE => page = parse_number(name, value, 1, usize::MAX)?,
                PARAM_PER_PAGE => per_page = parse_number(name, value, 1, MAX_PER_PAGE)?,
                PARAM_SORT => sort = Some(self.parse_sort(value)?),
                PARAM_HAS_GROUP => has_group = Some(parse_bool(name, value)?),
                PARAM_GROUP => {
                    group = Some(GroupName::new(value.as_str()).map_err(|e| {
                        QueryError::InvalidParam {
                            name: name.clone(),
                            reason: e.to_string(),
                        }
                    })?)
                }
                other if self.config.reserved_params.contains(&other) => {}
                _ => filters.push(self.parse_filter(name, value)?),
            }
        }

        ListQuery::builder()
            .page(page, per_page)
            .filters(filters)
            .sort(sort)
            .has_group(has_group)
            .group(group)
            .build()
    }

    /// Parses one `<scope>/<name>=[<op>:]<value>` pair.
    pub fn parse_filter(&self, key: &str, raw_value: &str) -> Result<Filter, QueryError> {
        let (scope, name) = self.split_path(key, || QueryError::MissingScope(key.to_string()))?;
        let (operator, value) = self.split_operator(raw_value);

        Ok(Filter::new(scope, name, operator, value))
    }

    /// Parses `<scope>/<name>[:asc|desc]`, descending when no order is given.
    pub fn parse_sort(&self, raw: &str) -> Result<Sort, QueryError> {
        let (path, order) = match raw.split_once(VALUE_SEPARATOR) {
            Some((path, order)) => (path, Some(order)),
            None => (raw, None),
        };

        let ascending = match order {
            None | Some("desc") => false,
            Some("asc") => true,
            Some(other) => {
                return Err(QueryError::InvalidSortOrder {
                    param: raw.to_string(),
                    order: other.to_string(),
                });
            }
        };

        let (scope, name) = self.split_path(path, || QueryError::InvalidSort(raw.to_string()))?;

        Ok(Sort {
            attr_name: name.to_string(),
            attr_scope: scope,
            ascending,
        })
    }

    fn split_path<'k>(
        &self,
        path: &'k str,
        missing: impl FnOnce() -> QueryError,
    ) -> Result<(Scope, &'k str), QueryError> {
        let explicit = path
            .split_once(SCOPE_SEPARATOR)
            .filter(|(scope, name)| !scope.is_empty() && !name.is_empty());

        let (scope, name) = match (self.config.syntax, explicit) {
            (ScopeSyntax::Strict, None) => return Err(missing()),
            (ScopeSyntax::Strict, Some((scope, name))) => {
                let scope = scope
                    .parse::<Scope>()
                    .map_err(|_| self.unsupported_scope(path))?;
                (scope, name)
            }
            (ScopeSyntax::Legacy, Some((scope, name))) => match scope.parse::<Scope>() {
                Ok(scope) => (scope, name),
                Err(_) => (Scope::Inventory, path),
            },
            (ScopeSyntax::Legacy, None) => {
                if path.is_empty() {
                    return Err(missing());
                }
                (Scope::Inventory, path)
            }
        };

        if !self.config.filterable_scopes.contains(&scope) {
            return Err(self.unsupported_scope(path));
        }

        Ok((scope, name))
    }

    fn split_operator<'v>(&self, raw: &'v str) -> (ComparisonOperator, &'v str) {
        if let Some((prefix, rest)) = raw.split_once(VALUE_SEPARATOR)
            && let Some((_, operator)) = self
                .config
                .operators
                .iter()
                .find(|(token, _)| *token == prefix)
        {
            return (*operator, rest);
        }

        (ComparisonOperator::Eq, raw)
    }

    fn unsupported_scope(&self, param: &str) -> QueryError {
        let supported = self
            .config
            .filterable_scopes
            .iter()
            .map(|scope| scope.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        QueryError::UnsupportedScope {
            param: param.to_string(),
            supported,
        }
    }
}

fn parse_number(name: &str, value: &str, min: usize, max: usize) -> Result<usize, QueryError> {
    let invalid = || QueryError::InvalidParam {
        name: name.to_string(),
        reason: format!("must be an integer between {min} and {max}"),
    };

    let number = value.parse::<usize>().map_err(|_| invalid())?;
    if number < min || number > max {
        return Err(invalid());
    }
    Ok(number)
}

fn parse_bool(name: &str, value: &str) -> Result<bool, QueryError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(QueryError::InvalidParam {
            name: name.to_string(),
            reason: "must be true or false".to_string(),
        }),
    }
}
