//! Query composition
//!
//! Builds one SELECT against `computers`, joining child tables only when
//! one of their columns is referenced. Predicates and output columns are
//! kept as column references until rendering so the join-elimination pass
//! can rewrite primary-key references after the fact.

use super::filter::{
    glob_to_like, parse_compare_op, parse_day_range, parse_float, parse_integer,
    parse_string_op, CompareOp, Filter, StringOp,
};
use crate::errors::{QueryError, Result};
use crate::model::GROUP_PLACEHOLDER_DEVICE_ID;
use crate::schema::{EntityKind, FieldRef, FieldType, Schema, TableDescriptor, PRIMARY_KEY};
use serde::Serialize;

/// Typed bind parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    /// `asc`/`desc`, case-insensitive; `None` means ascending
    ///
    /// # Errors
    ///
    /// Returns `InvalidDirection` for anything else.
    pub fn parse(direction: Option<&str>) -> std::result::Result<Self, QueryError> {
        match direction.map(|d| d.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("asc") => Ok(Direction::Asc),
            Some("desc") => Ok(Direction::Desc),
            Some(other) => Err(QueryError::InvalidDirection {
                direction: other.to_string(),
            }),
        }
    }

    fn sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// Describes one column of the result set
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    /// Canonical logical name (`Name`, `Software.Version`)
    pub field: String,
    /// Column alias in the result set
    pub alias: String,
    pub field_type: FieldType,
}

/// An executable query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub sql: String,
    /// Positional parameters in placeholder order
    pub params: Vec<SqlValue>,
    pub columns: Vec<OutputColumn>,
    /// The primary table was dropped from FROM by join elimination
    pub join_eliminated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnRef {
    entity: EntityKind,
    column: String,
}

impl ColumnRef {
    fn of(field: &FieldRef<'_>) -> Self {
        Self {
            entity: field.entity(),
            column: field.field.column.clone(),
        }
    }

    fn primary_key() -> Self {
        Self {
            entity: EntityKind::Computer,
            column: PRIMARY_KEY.to_string(),
        }
    }

    fn is_primary(&self) -> bool {
        self.entity == EntityKind::Computer
    }
}

#[derive(Debug, Clone)]
enum Fragment {
    Sql(String),
    Column(ColumnRef),
}

fn sql(text: impl Into<String>) -> Fragment {
    Fragment::Sql(text.into())
}

/// Composes queries against a schema registry
///
/// Composition is pure: it never touches the database and is safe to call
/// from any number of threads.
#[derive(Debug, Clone, Copy)]
pub struct QueryComposer<'s> {
    schema: &'s Schema,
}

impl<'s> QueryComposer<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self { schema }
    }

    /// Compose a query
    ///
    /// `Id` is always the first output column. `order` is a logical field
    /// name (default `Id`), `direction` is `asc` or `desc`.
    ///
    /// # Errors
    ///
    /// Returns a validation error (`UnknownField`, `InvalidOperator`,
    /// `InvalidArgument`) for the first offending filter, output field or
    /// ordering field.
    pub fn compose<S: AsRef<str>>(
        &self,
        filters: &[Filter],
        output_fields: &[S],
        order: Option<&str>,
        direction: Option<&str>,
    ) -> Result<Query> {
        let direction = Direction::parse(direction)?;
        let mut plan = Plan::new(self.schema);

        plan.add_output(self.schema.resolve(PRIMARY_KEY)?);
        for name in output_fields {
            plan.add_output(self.schema.resolve(name.as_ref())?);
        }

        for filter in filters {
            let field = self.schema.resolve(&filter.field)?;
            plan.add_filter(field, filter)?;
        }

        let order_field = match order {
            Some(name) if !name.trim().is_empty() => self.schema.resolve(name.trim())?,
            _ => self.schema.resolve(PRIMARY_KEY)?,
        };
        plan.set_order(order_field, direction);

        Ok(plan.finish())
    }

    /// Compose a query returning only matching computer ids
    ///
    /// # Errors
    ///
    /// Same as [`QueryComposer::compose`].
    pub fn compose_ids(&self, filters: &[Filter]) -> Result<Query> {
        self.compose::<&str>(filters, &[], None, None)
    }
}

struct Plan<'s> {
    schema: &'s Schema,
    joins: Vec<(EntityKind, JoinKind)>,
    select: Vec<(ColumnRef, String)>,
    columns: Vec<OutputColumn>,
    predicates: Vec<Vec<Fragment>>,
    params: Vec<SqlValue>,
    order: Vec<(ColumnRef, Direction)>,
    subqueries: usize,
}

impl<'s> Plan<'s> {
    fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            joins: Vec::new(),
            select: Vec::new(),
            columns: Vec::new(),
            predicates: Vec::new(),
            params: Vec::new(),
            order: Vec::new(),
            subqueries: 0,
        }
    }

    /// Add a join on first reference; a filter upgrades an existing LEFT
    /// join to INNER.
    fn ensure_join(&mut self, entity: EntityKind, kind: JoinKind) {
        if entity == EntityKind::Computer {
            return;
        }
        match self.joins.iter_mut().find(|(e, _)| *e == entity) {
            Some((_, existing)) => {
                if kind == JoinKind::Inner {
                    *existing = JoinKind::Inner;
                }
            }
            None => self.joins.push((entity, kind)),
        }
    }

    fn add_output(&mut self, field: FieldRef<'_>) {
        let name = field.qualified_name();
        if self.columns.iter().any(|c| c.field == name) {
            return;
        }
        self.ensure_join(field.entity(), JoinKind::Left);

        let alias = match field.entity() {
            EntityKind::Computer => field.field.column.clone(),
            EntityKind::CustomFields => format!("customfield_{}", field.field.column),
            _ => format!("{}_{}", field.table.table, field.field.column),
        };
        self.select.push((ColumnRef::of(&field), alias.clone()));
        self.columns.push(OutputColumn {
            field: name,
            alias,
            field_type: field.field_type(),
        });
    }

    fn add_filter(&mut self, field: FieldRef<'_>, filter: &Filter) -> Result<()> {
        if field.is_primary() {
            let (body, params) =
                predicate_body(Fragment::Column(ColumnRef::of(&field)), &field, filter, filter.invert)?;
            self.predicates.push(body);
            self.params.extend(params);
        } else if filter.invert {
            // Negating the predicate on a joined row would also drop
            // computers without any child row, so select the matching
            // computers in a subquery and exclude them instead.
            self.subqueries += 1;
            let alias = format!("sq{}", self.subqueries);
            let column = sql(format!("{}.{}", alias, field.field.column));
            let (body, params) = predicate_body(column, &field, filter, false)?;

            let mut predicate = vec![
                Fragment::Column(ColumnRef::primary_key()),
                sql(format!(
                    " NOT IN (SELECT {alias}.{fk} FROM {table} {alias} WHERE ",
                    alias = alias,
                    fk = field.table.foreign_key,
                    table = field.table.table,
                )),
            ];
            predicate.extend(body);
            predicate.push(sql(")"));
            self.predicates.push(predicate);
            self.params.extend(params);
        } else {
            self.ensure_join(field.entity(), JoinKind::Inner);
            let (body, params) =
                predicate_body(Fragment::Column(ColumnRef::of(&field)), &field, filter, false)?;
            self.predicates.push(body);
            self.params.extend(params);
        }
        Ok(())
    }

    fn set_order(&mut self, field: FieldRef<'_>, direction: Direction) {
        self.ensure_join(field.entity(), JoinKind::Left);
        let column = ColumnRef::of(&field);
        let is_key = column == ColumnRef::primary_key();
        self.order.push((column, direction));
        if !is_key {
            // Stable order among equal sort keys
            self.order.push((ColumnRef::primary_key(), Direction::Asc));
        }
    }

    fn has_inner_join(&self) -> bool {
        self.joins.iter().any(|(_, kind)| *kind == JoinKind::Inner)
    }

    fn column_refs(&self) -> impl Iterator<Item = &ColumnRef> {
        let from_predicates = self.predicates.iter().flatten().filter_map(|f| match f {
            Fragment::Column(c) => Some(c),
            Fragment::Sql(_) => None,
        });
        self.select
            .iter()
            .map(|(c, _)| c)
            .chain(from_predicates)
            .chain(self.order.iter().map(|(c, _)| c))
    }

    /// The secondary table to select from when the primary table can be
    /// dropped: exactly one INNER join and no primary column other than
    /// the key referenced anywhere.
    fn elimination_target(&self) -> Option<&'s TableDescriptor> {
        match self.joins.as_slice() {
            [(entity, JoinKind::Inner)] => {
                let only_key = self
                    .column_refs()
                    .filter(|c| c.is_primary())
                    .all(|c| c.column == PRIMARY_KEY);
                only_key.then(|| self.schema.table(*entity))
            }
            _ => None,
        }
    }

    fn finish(mut self) -> Query {
        // Child-row writers reject placeholder ids, so any INNER join
        // already filters them out.
        if !self.has_inner_join() {
            self.predicates.push(vec![
                Fragment::Column(ColumnRef {
                    entity: EntityKind::Computer,
                    column: "device_id".to_string(),
                }),
                sql(format!(" != '{}'", GROUP_PLACEHOLDER_DEVICE_ID)),
            ]);
        }

        let target = self.elimination_target();
        let render = |c: &ColumnRef| -> String {
            match target {
                Some(secondary) if c.is_primary() => {
                    format!("{}.{}", secondary.table, secondary.foreign_key)
                }
                _ => format!("{}.{}", self.schema.table(c.entity).table, c.column),
            }
        };

        let distinct = self.joins.iter().any(|(entity, kind)| {
            *kind == JoinKind::Inner && !self.schema.table(*entity).single_row
        });

        let mut out = String::from("SELECT ");
        if distinct {
            out.push_str("DISTINCT ");
        }
        let select_list: Vec<String> = self
            .select
            .iter()
            .map(|(c, alias)| format!("{} AS {}", render(c), alias))
            .collect();
        out.push_str(&select_list.join(", "));

        let primary = self.schema.primary();
        match target {
            Some(secondary) => {
                out.push_str(" FROM ");
                out.push_str(secondary.table);
            }
            None => {
                out.push_str(" FROM ");
                out.push_str(primary.table);
                for (entity, kind) in &self.joins {
                    let table = self.schema.table(*entity);
                    out.push_str(&format!(
                        " {} {t} ON {t}.{fk} = {p}.{pk}",
                        kind.sql(),
                        t = table.table,
                        fk = table.foreign_key,
                        p = primary.table,
                        pk = PRIMARY_KEY,
                    ));
                }
            }
        }

        if !self.predicates.is_empty() {
            let clauses: Vec<String> = self
                .predicates
                .iter()
                .map(|fragments| {
                    fragments
                        .iter()
                        .map(|f| match f {
                            Fragment::Sql(s) => s.clone(),
                            Fragment::Column(c) => render(c),
                        })
                        .collect::<String>()
                })
                .collect();
            out.push_str(" WHERE ");
            out.push_str(&clauses.join(" AND "));
        }

        let order_list: Vec<String> = self
            .order
            .iter()
            .map(|(c, d)| format!("{} {}", render(c), d.sql()))
            .collect();
        out.push_str(" ORDER BY ");
        out.push_str(&order_list.join(", "));

        Query {
            sql: out,
            params: self.params,
            columns: self.columns,
            join_eliminated: target.is_some(),
        }
    }
}

/// Build the predicate for one filter against `column`
///
/// With `invert_inline` the negation is folded into the predicate: text
/// operators are negated directly, numeric and date predicates are wrapped
/// in `IS NOT TRUE` so rows with a NULL column match the inverted filter.
fn predicate_body(
    column: Fragment,
    field: &FieldRef<'_>,
    filter: &Filter,
    invert_inline: bool,
) -> Result<(Vec<Fragment>, Vec<SqlValue>)> {
    let name = field.qualified_name();
    let operator = filter.operator.as_deref();

    let (body, params) = match field.field_type() {
        FieldType::Text => {
            let (op_sql, param) = match parse_string_op(&name, operator)? {
                StringOp::Substring => (
                    if invert_inline { " NOT LIKE ? ESCAPE '\\'" } else { " LIKE ? ESCAPE '\\'" },
                    format!("%{}%", glob_to_like(&filter.value)),
                ),
                StringOp::Like => (
                    if invert_inline { " NOT LIKE ? ESCAPE '\\'" } else { " LIKE ? ESCAPE '\\'" },
                    glob_to_like(&filter.value),
                ),
                StringOp::Eq => (
                    if invert_inline { " != ?" } else { " = ?" },
                    filter.value.clone(),
                ),
            };
            // Text negation is already applied above
            return Ok((vec![column, sql(op_sql)], vec![SqlValue::Text(param)]));
        }
        FieldType::Integer => {
            let op = parse_compare_op(&name, operator, FieldType::Integer)?;
            let value = parse_integer(&name, &filter.value)?;
            (
                vec![column, sql(format!(" {} ?", op.sql()))],
                vec![SqlValue::Integer(value)],
            )
        }
        FieldType::Float => {
            let op = parse_compare_op(&name, operator, FieldType::Float)?;
            let value = parse_float(&name, &filter.value)?;
            (
                vec![column, sql(format!(" {} ?", op.sql()))],
                vec![SqlValue::Real(value)],
            )
        }
        FieldType::Date => {
            let op = parse_compare_op(&name, operator, FieldType::Date)?;
            let range = parse_day_range(&name, &filter.value)?;
            date_predicate(column, op, range.start, range.next)
        }
    };

    if invert_inline {
        let mut wrapped = Vec::with_capacity(body.len() + 2);
        wrapped.push(sql("("));
        wrapped.extend(body);
        wrapped.push(sql(") IS NOT TRUE"));
        Ok((wrapped, params))
    } else {
        Ok((body, params))
    }
}

/// Date comparisons against the half-open day `[start, next)`
fn date_predicate(
    column: Fragment,
    op: CompareOp,
    start: String,
    next: String,
) -> (Vec<Fragment>, Vec<SqlValue>) {
    match op {
        CompareOp::Eq => (
            vec![sql("("), column.clone(), sql(" >= ? AND "), column, sql(" < ?)")],
            vec![SqlValue::Text(start), SqlValue::Text(next)],
        ),
        CompareOp::Ne => (
            vec![sql("("), column.clone(), sql(" < ? OR "), column, sql(" >= ?)")],
            vec![SqlValue::Text(start), SqlValue::Text(next)],
        ),
        CompareOp::Lt => (vec![column, sql(" < ?")], vec![SqlValue::Text(start)]),
        CompareOp::Le => (vec![column, sql(" < ?")], vec![SqlValue::Text(next)]),
        CompareOp::Gt => (vec![column, sql(" >= ?")], vec![SqlValue::Text(next)]),
        CompareOp::Ge => (vec![column, sql(" >= ?")], vec![SqlValue::Text(start)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ExErrorKind;

    fn compose(filters: &[Filter], output: &[&str]) -> Query {
        let schema = Schema::new();
        QueryComposer::new(&schema)
            .compose(filters, output, None, None)
            .unwrap()
    }

    #[test]
    fn test_no_filters_excludes_placeholders() {
        let query = compose(&[], &["Name"]);
        assert_eq!(
            query.sql,
            "SELECT computers.id AS id, computers.name AS name FROM computers \
             WHERE computers.device_id != '_SYSTEMGROUP_' ORDER BY computers.id ASC"
        );
        assert!(query.params.is_empty());
        assert_eq!(query.columns.len(), 2);
    }

    #[test]
    fn test_substring_default_and_like() {
        let query = compose(&[Filter::new("Name", None, "win*")], &[]);
        assert!(query.sql.contains("computers.name LIKE ? ESCAPE '\\'"));
        assert_eq!(query.params, vec![SqlValue::Text("%win%%".into())]);

        let query = compose(&[Filter::new("Name", Some("like"), "Win*")], &[]);
        assert_eq!(query.params, vec![SqlValue::Text("Win%".into())]);
    }

    #[test]
    fn test_primary_text_inversion_negates_operator() {
        let query = compose(&[Filter::new("Name", Some("eq"), "srv01").inverted()], &[]);
        assert!(query.sql.contains("computers.name != ?"));
    }

    #[test]
    fn test_numeric_inversion_uses_is_not_true() {
        let query = compose(&[Filter::new("CpuCores", Some("gt"), "4").inverted()], &[]);
        assert!(query.sql.contains("(computers.cpu_cores > ?) IS NOT TRUE"));
        assert_eq!(query.params, vec![SqlValue::Integer(4)]);
    }

    #[test]
    fn test_date_eq_uses_half_open_range() {
        let query = compose(&[Filter::new("InventoryDate", Some("eq"), "2024-05-01")], &[]);
        assert!(query
            .sql
            .contains("(computers.inventory_date >= ? AND computers.inventory_date < ?)"));
        assert_eq!(
            query.params,
            vec![
                SqlValue::Text("2024-05-01 00:00:00".into()),
                SqlValue::Text("2024-05-02 00:00:00".into())
            ]
        );
    }

    #[test]
    fn test_date_operator_bounds() {
        let cases = [
            ("lt", " < ?", "2024-05-01 00:00:00"),
            ("le", " < ?", "2024-05-02 00:00:00"),
            ("gt", " >= ?", "2024-05-02 00:00:00"),
            ("ge", " >= ?", "2024-05-01 00:00:00"),
        ];
        for (op, sql_op, bound) in cases {
            let query = compose(&[Filter::new("InventoryDate", Some(op), "2024-05-01")], &[]);
            assert!(
                query.sql.contains(&format!("computers.inventory_date{}", sql_op)),
                "{}: {}",
                op,
                query.sql
            );
            assert_eq!(query.params, vec![SqlValue::Text(bound.into())], "{}", op);
        }
    }

    #[test]
    fn test_joined_filter_is_eliminated_to_secondary_table() {
        let query = compose(&[Filter::new("Software.Name", Some("eq"), "Firefox")], &[]);
        assert!(query.join_eliminated);
        assert_eq!(
            query.sql,
            "SELECT DISTINCT software.computer_id AS id FROM software \
             WHERE software.name = ? ORDER BY software.computer_id ASC"
        );
    }

    #[test]
    fn test_elimination_skipped_when_primary_column_referenced() {
        let query = compose(&[Filter::new("Software.Name", Some("eq"), "Firefox")], &["Name"]);
        assert!(!query.join_eliminated);
        assert!(query
            .sql
            .contains("FROM computers INNER JOIN software ON software.computer_id = computers.id"));
        // INNER join already excludes placeholders
        assert!(!query.sql.contains("_SYSTEMGROUP_"));
    }

    #[test]
    fn test_elimination_skipped_for_three_tables() {
        let query = compose(
            &[
                Filter::new("Software.Name", Some("eq"), "Firefox"),
                Filter::new("NetworkInterface.Subnet", Some("eq"), "10.0.0.0"),
            ],
            &[],
        );
        assert!(!query.join_eliminated);
        assert!(query.sql.contains("INNER JOIN software"));
        assert!(query.sql.contains("INNER JOIN network_interfaces"));
    }

    #[test]
    fn test_left_join_for_output_only_is_not_eliminated() {
        let query = compose(&[], &["Software.Version"]);
        assert!(!query.join_eliminated);
        assert!(query.sql.contains("LEFT JOIN software"));
        assert!(query.sql.contains("software.version AS software_version"));
        assert!(query.sql.contains("computers.device_id != '_SYSTEMGROUP_'"));
    }

    #[test]
    fn test_filter_upgrades_left_join_and_reuses_it() {
        let query = compose(
            &[
                Filter::new("Software.Name", Some("eq"), "Firefox"),
                Filter::new("Software.Version", Some("like"), "12*"),
            ],
            &["Software.Version"],
        );
        assert_eq!(query.sql.matches("JOIN software").count(), 1);
        assert!(query.sql.contains("INNER JOIN software"));
    }

    #[test]
    fn test_joined_inversion_uses_not_in_subquery() {
        let query = compose(&[Filter::new("Software.Name", Some("eq"), "Firefox").inverted()], &[]);
        assert!(!query.sql.contains("JOIN"));
        assert!(query.sql.contains(
            "computers.id NOT IN (SELECT sq1.computer_id FROM software sq1 WHERE sq1.name = ?)"
        ));
        assert!(query.sql.contains("_SYSTEMGROUP_"));
    }

    #[test]
    fn test_custom_field_alias() {
        let query = compose(&[], &["CustomFields.Tag"]);
        assert!(query.sql.contains("custom_fields.tag AS customfield_tag"));
        assert_eq!(query.columns[1].alias, "customfield_tag");
    }

    #[test]
    fn test_order_by_child_field_adds_tiebreaker() {
        let schema = Schema::new();
        let query = QueryComposer::new(&schema)
            .compose(&[], &["Name"], Some("Name"), Some("DESC"))
            .unwrap();
        assert!(query
            .sql
            .ends_with("ORDER BY computers.name DESC, computers.id ASC"));
    }

    #[test]
    fn test_validation_errors() {
        let schema = Schema::new();
        let composer = QueryComposer::new(&schema);

        let err = composer
            .compose_ids(&[Filter::new("Nope", None, "x")])
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::UnknownField);

        let err = composer
            .compose_ids(&[Filter::new("CpuCores", Some("like"), "4")])
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidOperator);

        let err = composer
            .compose_ids(&[Filter::new("CpuCores", Some("gt"), "four")])
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidArgument);

        let err = composer
            .compose::<&str>(&[], &[], None, Some("sideways"))
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidArgument);
    }
}
