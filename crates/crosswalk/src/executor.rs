//! Rule execution.
//!
//! Rules run in declaration order against one source document and write into
//! a [`ColumnMap`]. All per-invocation state lives in `ExecutionState`,
//! which is threaded explicitly so a `oneOf` branch can run against a copy
//! and be discarded when it produces nothing.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, warn};

use crate::assemble::ColumnMap;
use crate::error::{TransformError, TransformErrorKind, TransformWarning};
use crate::filter;
use crate::function::{FunctionInvoker, INPUT_ARG};
use crate::model::{FunctionCall, MappingRule, NodeRef, OneOfBranch};
use crate::path::{
    MAX_INDEX, PathError, PathToken, Resolved, bind_wildcards, first_wildcard, format_path,
    parse_path, resolve, wildcard_count,
};

/// Result of running a rule list: the column map plus recovered problems.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Execution {
    pub columns: ColumnMap,
    /// Minimum array length per target prefix, from slots reserved by
    /// filters with `distinctValues: false`.
    pub reserved: BTreeMap<String, usize>,
    pub warnings: Vec<TransformWarning>,
}

#[derive(Debug, Clone, Default)]
struct ExecutionState {
    columns: ColumnMap,
    /// Base index per (source collection, target prefix).
    offsets: HashMap<(String, String), usize>,
    reserved: BTreeMap<String, usize>,
    writes: usize,
    warnings: Vec<TransformWarning>,
}

impl ExecutionState {
    fn write(&mut self, key: String, value: JsonValue) {
        self.columns.insert(key, value);
        self.writes += 1;
    }

    fn reserve(&mut self, prefix: String, index: usize) {
        let len = self.reserved.entry(prefix).or_insert(0);
        *len = (*len).max(index.saturating_add(1));
    }

    /// The first time a source collection writes under a target prefix it is
    /// placed after everything already there, written or reserved; later
    /// elements keep that base. `None` when the index would exceed
    /// [`MAX_INDEX`].
    fn outer_index(&mut self, collection: &str, prefix: &str, slot: usize) -> Option<usize> {
        let key = (collection.to_string(), prefix.to_string());
        let base = match self.offsets.get(&key) {
            Some(base) => *base,
            None => {
                let written = match self.columns.highest_index(prefix) {
                    Some(highest) => highest.checked_add(1)?,
                    None => 0,
                };
                let reserved = self.reserved.get(prefix).copied().unwrap_or(0);
                let base = written.max(reserved);
                self.offsets.insert(key, base);
                base
            }
        };
        base.checked_add(slot).filter(|index| *index <= MAX_INDEX)
    }
}

/// Runs `rules` against `doc`.
pub fn execute_rules(
    doc: &JsonValue,
    rules: &[MappingRule],
    invoker: &dyn FunctionInvoker,
) -> Result<Execution, TransformError> {
    let executor = Executor { doc, invoker };
    let mut state = ExecutionState::default();
    executor.run_rules(rules, "rules", &mut state)?;
    Ok(Execution {
        columns: state.columns,
        reserved: state.reserved,
        warnings: state.warnings,
    })
}

struct Element<'a> {
    scope: &'a JsonValue,
    value: JsonValue,
}

enum Values<'a> {
    Absent,
    Single(JsonValue),
    Flat(Vec<Element<'a>>),
    Grouped(Vec<Vec<Option<Element<'a>>>>),
}

impl Values<'_> {
    fn depth(&self) -> usize {
        match self {
            Values::Absent | Values::Single(_) => 0,
            Values::Flat(_) => 1,
            Values::Grouped(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Slot {
    outer: usize,
    inner: usize,
    flat: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Write,
    Reserve,
    Skip,
}

struct Target<'r> {
    node: &'r NodeRef,
    tokens: Vec<PathToken>,
    path: String,
}

struct Executor<'a> {
    doc: &'a JsonValue,
    invoker: &'a dyn FunctionInvoker,
}

impl<'a> Executor<'a> {
    fn run_rules(
        &self,
        rules: &[MappingRule],
        base: &str,
        state: &mut ExecutionState,
    ) -> Result<(), TransformError> {
        for (index, rule) in rules.iter().enumerate() {
            let path = format!("{}[{}]", base, index);
            match &rule.one_of {
                Some(branches) => self.run_one_of(rule, branches, &path, state)?,
                None => self.run_plain(rule, &path, state)?,
            }
        }
        Ok(())
    }

    fn run_one_of(
        &self,
        rule: &MappingRule,
        branches: &[OneOfBranch],
        path: &str,
        state: &mut ExecutionState,
    ) -> Result<(), TransformError> {
        for (index, branch) in branches.iter().enumerate() {
            let branch_path = format!("{}.oneOf[{}]", path, index);
            if let Some(branch_filter) = &branch.filter {
                let passed = filter::evaluate(self.doc, branch_filter)
                    .map_err(|err| err.with_path(format!("{}.filter", branch_path)))?;
                if !passed {
                    continue;
                }
            }

            let mut trial = state.clone();
            let before = trial.writes;
            self.run_rules(&branch.rules, &format!("{}.rules", branch_path), &mut trial)?;
            if trial.writes > before {
                debug!(rule = %rule.id, branch = index, "oneOf branch selected");
                *state = trial;
                return Ok(());
            }
        }
        debug!(rule = %rule.id, "no oneOf branch produced output");
        Ok(())
    }

    fn run_plain(
        &self,
        rule: &MappingRule,
        path: &str,
        state: &mut ExecutionState,
    ) -> Result<(), TransformError> {
        debug!(rule = %rule.id, "executing rule");

        let mut collections = Vec::new();
        let mut values = Vec::with_capacity(rule.sources.len());
        for (index, source) in rule.sources.iter().enumerate() {
            let source_path = format!("{}.sources[{}]", path, index);
            let tokens = parse_tokens(&source.path, &source_path)?;
            if let Some(at) = first_wildcard(&tokens) {
                let collection = format_path(&tokens[..=at]);
                if !collections.contains(&collection) {
                    collections.push(collection);
                }
            }
            let resolved =
                resolve(self.doc, &tokens).map_err(|err| path_error(err, &source_path))?;
            values.push(self.source_values(resolved, source, &source_path, state));
        }
        let collection = collections.join("|");

        let mut targets = Vec::with_capacity(rule.targets.len());
        for (index, node) in rule.targets.iter().enumerate() {
            let target_path = format!("{}.targets[{}]", path, index);
            targets.push(Target {
                node,
                tokens: parse_tokens(&node.path, &target_path)?,
                path: target_path,
            });
        }

        match combine(self.doc, &rule.sources, values) {
            Values::Absent => {
                debug!(rule = %rule.id, "source absent, nothing written");
            }
            Values::Single(value) => {
                if self.outcome(rule, self.doc, path)? == Outcome::Write {
                    let value = self.apply(rule.processing.as_ref(), value, path, state);
                    self.write_targets(&targets, &collection, value, Slot::default(), state)?;
                }
            }
            Values::Flat(elements) => {
                let mut slot = 0;
                for element in elements {
                    match self.outcome(rule, element.scope, path)? {
                        Outcome::Write => {
                            let value =
                                self.apply(rule.processing.as_ref(), element.value, path, state);
                            let at = Slot {
                                outer: slot,
                                inner: 0,
                                flat: slot,
                            };
                            self.write_targets(&targets, &collection, value, at, state)?;
                            slot += 1;
                        }
                        Outcome::Reserve => {
                            let at = Slot {
                                outer: slot,
                                inner: 0,
                                flat: slot,
                            };
                            self.reserve_targets(&targets, &collection, at, state)?;
                            slot += 1;
                        }
                        Outcome::Skip => {}
                    }
                }
            }
            Values::Grouped(groups) => {
                let mut flat = 0;
                for (outer, group) in groups.into_iter().enumerate() {
                    let mut inner = 0;
                    for element in group.into_iter().flatten() {
                        match self.outcome(rule, element.scope, path)? {
                            Outcome::Write => {
                                let value = self.apply(
                                    rule.processing.as_ref(),
                                    element.value,
                                    path,
                                    state,
                                );
                                let at = Slot { outer, inner, flat };
                                self.write_targets(&targets, &collection, value, at, state)?;
                                inner += 1;
                                flat += 1;
                            }
                            Outcome::Reserve => {
                                let at = Slot { outer, inner, flat };
                                self.reserve_targets(&targets, &collection, at, state)?;
                                inner += 1;
                                flat += 1;
                            }
                            Outcome::Skip => {}
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn source_values(
        &self,
        resolved: Resolved<'a>,
        source: &NodeRef,
        path: &str,
        state: &mut ExecutionState,
    ) -> Values<'a> {
        let processing = source.processing.as_ref();
        match resolved {
            Resolved::Absent => Values::Absent,
            Resolved::Single(value) => {
                Values::Single(self.apply(processing, value.clone(), path, state))
            }
            Resolved::Flat(hits) => {
                let mut elements = Vec::with_capacity(hits.len());
                for hit in hits {
                    elements.push(Element {
                        scope: hit.scope,
                        value: self.apply(processing, hit.value.clone(), path, state),
                    });
                }
                Values::Flat(elements)
            }
            Resolved::Grouped(groups) => {
                let mut out = Vec::with_capacity(groups.len());
                for group in groups {
                    let mut elements = Vec::with_capacity(group.len());
                    for hit in group {
                        elements.push(hit.map(|hit| Element {
                            scope: hit.scope,
                            value: self.apply(processing, hit.value.clone(), path, state),
                        }));
                    }
                    out.push(elements);
                }
                Values::Grouped(out)
            }
        }
    }

    fn outcome(
        &self,
        rule: &MappingRule,
        scope: &JsonValue,
        path: &str,
    ) -> Result<Outcome, TransformError> {
        let Some(rule_filter) = &rule.filter else {
            return Ok(Outcome::Write);
        };
        let passed = filter::evaluate(scope, rule_filter)
            .map_err(|err| err.with_path(format!("{}.filter", path)))?;
        Ok(if passed {
            Outcome::Write
        } else if rule_filter.distinct_values {
            Outcome::Skip
        } else {
            Outcome::Reserve
        })
    }

    /// Writes one value to every target. The first wildcard target fixes the
    /// array index and the other targets reuse it.
    fn write_targets(
        &self,
        targets: &[Target<'_>],
        collection: &str,
        value: JsonValue,
        slot: Slot,
        state: &mut ExecutionState,
    ) -> Result<(), TransformError> {
        let mut fixed = None;
        for target in targets {
            let value = self.apply(target.node.processing.as_ref(), value.clone(), &target.path, state);
            let key = match first_wildcard(&target.tokens) {
                None => format_path(&target.tokens),
                Some(at) => {
                    let outer = bind_outer(target, at, collection, slot, &mut fixed, state)?;
                    format_path(&bind_wildcards(&target.tokens, &[outer, slot.inner]))
                }
            };
            state.write(key, value);
        }
        Ok(())
    }

    /// Claims the indices a filtered-out element would have been written to,
    /// so the gap survives reconstruction and later collections append after it.
    fn reserve_targets(
        &self,
        targets: &[Target<'_>],
        collection: &str,
        slot: Slot,
        state: &mut ExecutionState,
    ) -> Result<(), TransformError> {
        let mut fixed = None;
        for target in targets {
            let Some(at) = first_wildcard(&target.tokens) else {
                continue;
            };
            let outer = bind_outer(target, at, collection, slot, &mut fixed, state)?;
            state.reserve(format_path(&target.tokens[..at]), outer);

            let second = target.tokens[at + 1..]
                .iter()
                .position(|token| matches!(token, PathToken::Wildcard));
            if let Some(offset) = second {
                let inner_prefix = bind_wildcards(&target.tokens[..at + 1 + offset], &[outer]);
                state.reserve(format_path(&inner_prefix), slot.inner);
            }
        }
        Ok(())
    }

    fn apply(
        &self,
        call: Option<&FunctionCall>,
        value: JsonValue,
        path: &str,
        state: &mut ExecutionState,
    ) -> JsonValue {
        match call {
            Some(call) => self.invoke(call, value, path, state),
            None => value,
        }
    }

    /// Function failures keep the original value.
    fn invoke(
        &self,
        call: &FunctionCall,
        value: JsonValue,
        path: &str,
        state: &mut ExecutionState,
    ) -> JsonValue {
        let mut args = call.params.clone();
        args.insert(INPUT_ARG.to_string(), value.clone());
        match self.invoker.execute(&call.function_id, &args) {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    function = %call.function_id,
                    path = %path,
                    error = %err,
                    "function failed, keeping original value"
                );
                state.warnings.push(
                    TransformWarning::new(
                        TransformErrorKind::FunctionFailed,
                        format!("function {} failed: {}", call.function_id, err),
                    )
                    .with_path(path),
                );
                value
            }
        }
    }
}

fn parse_tokens(path: &str, error_path: &str) -> Result<Vec<PathToken>, TransformError> {
    parse_path(path).map_err(|err| {
        TransformError::new(
            TransformErrorKind::InvalidPath,
            format!("invalid path '{}': {}", path, err),
        )
        .with_path(error_path)
    })
}

/// Index for the first wildcard of `target`. The first wildcard target of a
/// rule decides it and the remaining targets reuse it through `fixed`.
fn bind_outer(
    target: &Target<'_>,
    at: usize,
    collection: &str,
    slot: Slot,
    fixed: &mut Option<usize>,
    state: &mut ExecutionState,
) -> Result<usize, TransformError> {
    if let Some(index) = *fixed {
        return Ok(index);
    }
    let prefix = format_path(&target.tokens[..at]);
    let local = if wildcard_count(&target.tokens) > 1 {
        slot.outer
    } else {
        slot.flat
    };
    let index = state.outer_index(collection, &prefix, local).ok_or_else(|| {
        TransformError::new(
            TransformErrorKind::InvalidPath,
            format!("target index under '{}' exceeds the limit of {}", prefix, MAX_INDEX),
        )
        .with_path(&target.path)
    })?;
    *fixed = Some(index);
    Ok(index)
}

fn path_error(err: PathError, error_path: &str) -> TransformError {
    TransformError::new(TransformErrorKind::InvalidPath, err.to_string()).with_path(error_path)
}

fn source_label(source: &NodeRef, index: usize) -> String {
    if !source.label.is_empty() {
        source.label.clone()
    } else if !source.path.is_empty() {
        source.path.clone()
    } else {
        format!("source{}", index)
    }
}

/// Merges the values of several sources into labelled objects, element by
/// element. Scalars are repeated for every element of a sequence.
fn combine<'a>(doc: &'a JsonValue, sources: &[NodeRef], mut values: Vec<Values<'a>>) -> Values<'a> {
    if values.len() <= 1 {
        return values.pop().unwrap_or(Values::Absent);
    }

    match values.iter().map(Values::depth).max().unwrap_or(0) {
        0 => {
            let mut object = JsonMap::new();
            for (index, (source, value)) in sources.iter().zip(&values).enumerate() {
                if let Values::Single(value) = value {
                    object.insert(source_label(source, index), value.clone());
                }
            }
            if object.is_empty() {
                Values::Absent
            } else {
                Values::Single(JsonValue::Object(object))
            }
        }
        1 => {
            let len = values
                .iter()
                .map(|value| match value {
                    Values::Flat(elements) => elements.len(),
                    _ => 0,
                })
                .max()
                .unwrap_or(0);
            Values::Flat(
                (0..len)
                    .filter_map(|outer| labelled(doc, sources, &values, outer, None))
                    .collect(),
            )
        }
        _ => {
            let outer_len = values
                .iter()
                .map(|value| match value {
                    Values::Grouped(groups) => groups.len(),
                    _ => 0,
                })
                .max()
                .unwrap_or(0);
            let groups = (0..outer_len)
                .map(|outer| {
                    let inner_len = values
                        .iter()
                        .map(|value| match value {
                            Values::Grouped(groups) => groups.get(outer).map_or(0, Vec::len),
                            _ => 0,
                        })
                        .max()
                        .unwrap_or(0);
                    (0..inner_len)
                        .map(|inner| labelled(doc, sources, &values, outer, Some(inner)))
                        .collect()
                })
                .collect();
            Values::Grouped(groups)
        }
    }
}

fn labelled<'a>(
    doc: &'a JsonValue,
    sources: &[NodeRef],
    values: &[Values<'a>],
    outer: usize,
    inner: Option<usize>,
) -> Option<Element<'a>> {
    let mut object = JsonMap::new();
    let mut scope = None;
    let mut from_sequence = false;

    for (index, (source, value)) in sources.iter().zip(values).enumerate() {
        let picked = match (value, inner) {
            (Values::Single(v), _) => Some((v, None)),
            (Values::Flat(elements), _) => elements
                .get(outer)
                .map(|element| (&element.value, Some(element.scope))),
            (Values::Grouped(groups), Some(inner)) => groups
                .get(outer)
                .and_then(|group| group.get(inner))
                .and_then(Option::as_ref)
                .map(|element| (&element.value, Some(element.scope))),
            _ => None,
        };
        if let Some((v, element_scope)) = picked {
            object.insert(source_label(source, index), v.clone());
            if let Some(element_scope) = element_scope {
                from_sequence = true;
                if scope.is_none() {
                    scope = Some(element_scope);
                }
            }
        }
    }

    from_sequence.then(|| Element {
        scope: scope.unwrap_or(doc),
        value: JsonValue::Object(object),
    })
}

#[cfg(test)]
mod executor_tests {
    use super::*;
    use crate::function::{FunctionError, FunctionRegistry};
    use crate::model::{FilterExpr, FilterOperator};
    use serde_json::json;

    fn rule(id: &str, sources: &[&str], targets: &[&str]) -> MappingRule {
        MappingRule {
            id: id.to_string(),
            sources: sources.iter().map(|p| NodeRef::new(*p, *p)).collect(),
            targets: targets.iter().map(|p| NodeRef::new(*p, *p)).collect(),
            ..MappingRule::default()
        }
    }

    fn columns(doc: &JsonValue, rules: &[MappingRule]) -> Vec<(String, JsonValue)> {
        let registry = FunctionRegistry::with_builtins();
        let execution = execute_rules(doc, rules, &registry).unwrap();
        execution
            .columns
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn entry(key: &str, value: JsonValue) -> (String, JsonValue) {
        (key.to_string(), value)
    }

    #[test]
    fn scalar_rule_writes_literal_target() {
        let doc = json!({"name": "Ada"});
        let out = columns(&doc, &[rule("r1", &["name"], &["person.name"])]);
        assert_eq!(out, vec![entry("person.name", json!("Ada"))]);
    }

    #[test]
    fn absent_source_writes_nothing() {
        let doc = json!({"name": "Ada"});
        let out = columns(&doc, &[rule("r1", &["missing"], &["x"])]);
        assert!(out.is_empty());
    }

    #[test]
    fn targets_of_one_rule_share_the_element_index() {
        let doc = json!({"items": [{"v": 1}, {"v": 2}]});
        let out = columns(&doc, &[rule("r1", &["items[*].v"], &["a[*].x", "b[*].y"])]);
        assert_eq!(
            out,
            vec![
                entry("a[0].x", json!(1)),
                entry("b[0].y", json!(1)),
                entry("a[1].x", json!(2)),
                entry("b[1].y", json!(2)),
            ]
        );
    }

    #[test]
    fn same_collection_correlates_across_rules() {
        let doc = json!({"items": [{"a": 1, "b": "x"}, {"a": 2, "b": "y"}]});
        let out = columns(
            &doc,
            &[
                rule("r1", &["items[*].a"], &["out[*].a"]),
                rule("r2", &["items[*].b"], &["out[*].b"]),
            ],
        );
        assert_eq!(
            out,
            vec![
                entry("out[0].a", json!(1)),
                entry("out[1].a", json!(2)),
                entry("out[0].b", json!("x")),
                entry("out[1].b", json!("y")),
            ]
        );
    }

    #[test]
    fn other_collection_appends_after_existing_entries() {
        let doc = json!({"xs": [1, 2], "ys": [3]});
        let out = columns(
            &doc,
            &[rule("r1", &["xs[*]"], &["all[*]"]), rule("r2", &["ys[*]"], &["all[*]"])],
        );
        assert_eq!(
            out,
            vec![
                entry("all[0]", json!(1)),
                entry("all[1]", json!(2)),
                entry("all[2]", json!(3)),
            ]
        );
    }

    #[test]
    fn later_rule_overwrites_same_key() {
        let doc = json!({"a": 1, "b": 2});
        let out = columns(&doc, &[rule("r1", &["a"], &["x"]), rule("r2", &["b"], &["x"])]);
        assert_eq!(out, vec![entry("x", json!(2))]);
    }

    #[test]
    fn multiple_sources_combine_into_labelled_object() {
        let doc = json!({"first": "Ada", "last": "Lovelace"});
        let mut r = rule("r1", &[], &["name"]);
        r.sources = vec![NodeRef::new("first", "first"), NodeRef::new("last", "last")];
        r.processing = Some(FunctionCall::new("concat").with_param("delimiter", json!(" ")));
        let out = columns(&doc, &[r]);
        assert_eq!(out, vec![entry("name", json!("Ada Lovelace"))]);
    }

    #[test]
    fn multiple_sources_zip_sequences_and_broadcast_scalars() {
        let doc = json!({"prefix": "id-", "items": [{"n": "1"}, {"n": "2"}]});
        let mut r = rule("r1", &[], &["ids[*]"]);
        r.sources = vec![NodeRef::new("prefix", "p"), NodeRef::new("items[*].n", "n")];
        r.processing = Some(FunctionCall::new("concat"));
        let out = columns(&doc, &[r]);
        assert_eq!(
            out,
            vec![entry("ids[0]", json!("id-1")), entry("ids[1]", json!("id-2"))]
        );
    }

    #[test]
    fn nested_wildcards_map_to_nested_targets() {
        let doc = json!({
            "orders": [
                {"lines": [{"sku": "a"}, {"sku": "b"}]},
                {"lines": [{"sku": "c"}]}
            ]
        });
        let out = columns(
            &doc,
            &[rule("r1", &["orders[*].lines[*].sku"], &["o[*].l[*].s"])],
        );
        assert_eq!(
            out,
            vec![
                entry("o[0].l[0].s", json!("a")),
                entry("o[0].l[1].s", json!("b")),
                entry("o[1].l[0].s", json!("c")),
            ]
        );
    }

    #[test]
    fn nested_wildcards_flatten_into_single_target_wildcard() {
        let doc = json!({
            "orders": [
                {"lines": [{"sku": "a"}, {"sku": "b"}]},
                {"note": "none"},
                {"lines": [{"sku": "c"}]}
            ]
        });
        let out = columns(&doc, &[rule("r1", &["orders[*].lines[*].sku"], &["skus[*]"])]);
        assert_eq!(
            out,
            vec![
                entry("skus[0]", json!("a")),
                entry("skus[1]", json!("b")),
                entry("skus[2]", json!("c")),
            ]
        );
    }

    #[test]
    fn filter_scope_is_the_array_element() {
        let doc = json!({"items": [{"lang": "fi", "v": "a"}, {"lang": "en", "v": "b"}]});
        let mut r = rule("r1", &["items[*].v"], &["out[*]"]);
        r.filter = Some(FilterExpr::new("$.lang", FilterOperator::Eq, json!("en")).distinct(true));
        let out = columns(&doc, &[r]);
        assert_eq!(out, vec![entry("out[0]", json!("b"))]);
    }

    #[test]
    fn failing_function_keeps_value_and_records_warning() {
        let doc = json!({"a": "x", "b": "y"});
        let mut failing = rule("r1", &["a"], &["a"]);
        failing.processing = Some(FunctionCall::new("does_not_exist"));
        let plain = rule("r2", &["b"], &["b"]);

        let registry = FunctionRegistry::with_builtins();
        let execution = execute_rules(&doc, &[failing, plain], &registry).unwrap();
        assert_eq!(execution.columns.get("a"), Some(&json!("x")));
        assert_eq!(execution.columns.get("b"), Some(&json!("y")));
        assert_eq!(execution.warnings.len(), 1);
        assert_eq!(execution.warnings[0].kind, TransformErrorKind::FunctionFailed);
        assert_eq!(execution.warnings[0].path.as_deref(), Some("rules[0]"));
    }

    #[test]
    fn function_receives_params_and_input() {
        let mut registry = FunctionRegistry::new();
        registry.register("suffix", |args| {
            let input = args.get(INPUT_ARG).and_then(JsonValue::as_str).unwrap_or_default();
            let suffix = args
                .get("suffix")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| FunctionError::invalid_argument("suffix", "missing suffix"))?;
            Ok(json!(format!("{}{}", input, suffix)))
        });
        let doc = json!({"a": "x"});
        let mut r = rule("r1", &["a"], &["a"]);
        r.targets[0].processing = Some(FunctionCall::new("suffix").with_param("suffix", json!("!")));
        let execution = execute_rules(&doc, &[r], &registry).unwrap();
        assert_eq!(execution.columns.get("a"), Some(&json!("x!")));
    }

    #[test]
    fn one_of_skips_branch_without_output() {
        let doc = json!({"type": "A", "b": 1});
        let mut r = MappingRule {
            id: "choice".to_string(),
            ..MappingRule::default()
        };
        r.one_of = Some(vec![
            OneOfBranch {
                filter: Some(FilterExpr::new("$.type", FilterOperator::Eq, json!("A"))),
                rules: vec![rule("r1", &["missing"], &["x"])],
            },
            OneOfBranch {
                filter: None,
                rules: vec![rule("r2", &["b"], &["y"])],
            },
        ]);
        let out = columns(&doc, &[r]);
        assert_eq!(out, vec![entry("y", json!(1))]);
    }

    #[test]
    fn invalid_target_path_aborts() {
        let doc = json!({"a": 1});
        let registry = FunctionRegistry::new();
        let err = execute_rules(&doc, &[rule("r1", &["a"], &["x..y"])], &registry).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidPath);
        assert_eq!(err.path.as_deref(), Some("rules[0].targets[0]"));
    }

    fn reserved(execution: &Execution) -> Vec<(&str, usize)> {
        execution
            .reserved
            .iter()
            .map(|(prefix, len)| (prefix.as_str(), *len))
            .collect()
    }

    #[test]
    fn filtered_last_element_is_still_reserved() {
        let doc = json!({"items": [{"v": 1}, {"v": 2}, {"v": 3}]});
        let mut r = rule("r1", &["items[*].v"], &["out[*].v"]);
        r.filter = Some(FilterExpr::new("$.v", FilterOperator::Neq, json!(3)));
        let execution = execute_rules(&doc, &[r], &FunctionRegistry::new()).unwrap();
        assert_eq!(execution.columns.len(), 2);
        assert_eq!(reserved(&execution), vec![("out", 3)]);
    }

    #[test]
    fn later_collection_appends_after_reserved_slots() {
        let doc = json!({"items": [{"v": 1}, {"v": 2}, {"v": 3}], "others": ["x"]});
        let mut first = rule("r1", &["items[*].v"], &["out[*].v"]);
        first.filter = Some(FilterExpr::new("$.v", FilterOperator::Neq, json!(3)));
        let second = rule("r2", &["others[*]"], &["out[*].v"]);
        let out = columns(&doc, &[first, second]);
        assert_eq!(
            out,
            vec![
                entry("out[0].v", json!(1)),
                entry("out[1].v", json!(2)),
                entry("out[3].v", json!("x")),
            ]
        );
    }

    #[test]
    fn distinct_filter_reserves_nothing() {
        let doc = json!({"items": [{"v": 1}, {"v": 2}]});
        let mut r = rule("r1", &["items[*].v"], &["out[*].v"]);
        r.filter = Some(FilterExpr::new("$.v", FilterOperator::Neq, json!(2)).distinct(true));
        let execution = execute_rules(&doc, &[r], &FunctionRegistry::new()).unwrap();
        assert!(execution.reserved.is_empty());
    }

    #[test]
    fn inner_reservations_are_kept_per_outer_element() {
        let doc = json!({"orders": [{"lines": [{"q": 1}, {"q": 0}]}]});
        let mut r = rule("r1", &["orders[*].lines[*].q"], &["out[*].lines[*].q"]);
        r.filter = Some(FilterExpr::new("$.q", FilterOperator::Neq, json!(0)));
        let execution = execute_rules(&doc, &[r], &FunctionRegistry::new()).unwrap();
        assert_eq!(reserved(&execution), vec![("out", 1), ("out[0].lines", 2)]);
    }

    #[test]
    fn appending_past_the_index_limit_fails() {
        let doc = json!({"last": "z", "items": ["a"]});
        let last_slot = format!("out[{}]", MAX_INDEX);
        let full = rule("r1", &["last"], &[last_slot.as_str()]);
        let append = rule("r2", &["items[*]"], &["out[*]"]);
        let err = execute_rules(&doc, &[full, append], &FunctionRegistry::new()).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidPath);
        assert_eq!(err.path.as_deref(), Some("rules[1].targets[0]"));
    }

    #[test]
    fn oversized_literal_index_is_rejected() {
        let doc = json!({"a": 1});
        let r = rule("r1", &["a"], &["out[18446744073709551615]"]);
        let err = execute_rules(&doc, &[r], &FunctionRegistry::new()).unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidPath);
        assert_eq!(err.path.as_deref(), Some("rules[0].targets[0]"));
    }
}
