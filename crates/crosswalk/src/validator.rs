use std::collections::HashSet;

use crate::error::{ErrorCode, RuleError, ValidationResult};
use crate::model::{Crosswalk, FilterExpr, FilterOperator, Format, FunctionCall, MappingRule, NodeRef};
use crate::path::{parse_path, wildcard_count};

/// Checks a crosswalk for structural problems before it is executed.
/// Every problem is reported, not just the first.
pub fn validate_crosswalk(crosswalk: &Crosswalk) -> ValidationResult {
    let mut ctx = ValidationCtx::new(crosswalk.target_format);

    if crosswalk.rules.is_empty() {
        ctx.push(ErrorCode::MissingRules, "rules must not be empty", "rules");
    }
    validate_rules(&crosswalk.rules, "rules", &mut ctx);

    if let Some(root) = &crosswalk.root_element {
        if root.trim().is_empty() {
            ctx.push(
                ErrorCode::InvalidPath,
                "rootElement must not be empty",
                "rootElement",
            );
        }
    }

    ctx.finish()
}

fn validate_rules(rules: &[MappingRule], base_path: &str, ctx: &mut ValidationCtx) {
    for (index, rule) in rules.iter().enumerate() {
        let base = format!("{}[{}]", base_path, index);

        if rule.id.trim().is_empty() {
            ctx.push(
                ErrorCode::MissingRuleId,
                "rule.id is required",
                format!("{}.id", base),
            );
        } else if !ctx.rule_ids.insert(rule.id.clone()) {
            ctx.push(
                ErrorCode::DuplicateRuleId,
                "rule.id is duplicated",
                format!("{}.id", base),
            );
        }

        match &rule.one_of {
            Some(_) => validate_one_of(rule, &base, ctx),
            None => validate_plain(rule, &base, ctx),
        }
    }
}

fn validate_one_of(rule: &MappingRule, base: &str, ctx: &mut ValidationCtx) {
    let has_plain_shape = !rule.sources.is_empty()
        || !rule.targets.is_empty()
        || rule.processing.is_some()
        || rule.filter.is_some();
    if has_plain_shape {
        ctx.push(
            ErrorCode::RuleShapeExclusive,
            "oneOf cannot be combined with sources, targets, processing or filter",
            base,
        );
    }

    let branches = rule.one_of.as_deref().unwrap_or_default();
    if branches.is_empty() {
        ctx.push(
            ErrorCode::EmptyBranch,
            "oneOf must have at least one branch",
            format!("{}.oneOf", base),
        );
    }

    for (index, branch) in branches.iter().enumerate() {
        let branch_base = format!("{}.oneOf[{}]", base, index);
        if let Some(filter) = &branch.filter {
            validate_filter(filter, &format!("{}.filter", branch_base), ctx);
        }
        if branch.rules.is_empty() {
            ctx.push(
                ErrorCode::EmptyBranch,
                "oneOf branch must have at least one rule",
                format!("{}.rules", branch_base),
            );
        }
        validate_rules(&branch.rules, &format!("{}.rules", branch_base), ctx);
    }
}

fn validate_plain(rule: &MappingRule, base: &str, ctx: &mut ValidationCtx) {
    if rule.sources.is_empty() {
        ctx.push(
            ErrorCode::MissingSources,
            "rule.sources must not be empty",
            format!("{}.sources", base),
        );
    }
    if rule.targets.is_empty() {
        ctx.push(
            ErrorCode::MissingTargets,
            "rule.targets must not be empty",
            format!("{}.targets", base),
        );
    }

    for (index, source) in rule.sources.iter().enumerate() {
        validate_node(source, &format!("{}.sources[{}]", base, index), ctx);
    }
    for (index, target) in rule.targets.iter().enumerate() {
        let target_base = format!("{}.targets[{}]", base, index);
        validate_node(target, &target_base, ctx);
        if ctx.target_format == Format::Csv && target.label.trim().is_empty() {
            ctx.push(
                ErrorCode::MissingTargetLabel,
                "csv targets need a label to use as column name",
                format!("{}.label", target_base),
            );
        }
    }

    if let Some(processing) = &rule.processing {
        validate_function(processing, &format!("{}.processing", base), ctx);
    }
    if let Some(filter) = &rule.filter {
        validate_filter(filter, &format!("{}.filter", base), ctx);
    }
}

fn validate_node(node: &NodeRef, base: &str, ctx: &mut ValidationCtx) {
    if let Err(err) = parse_path(&node.path) {
        ctx.push(
            ErrorCode::InvalidPath,
            &format!("path is invalid: {}", err),
            format!("{}.path", base),
        );
    }
    if let Some(processing) = &node.processing {
        validate_function(processing, &format!("{}.processing", base), ctx);
    }
}

fn validate_function(call: &FunctionCall, base: &str, ctx: &mut ValidationCtx) {
    if call.function_id.trim().is_empty() {
        ctx.push(
            ErrorCode::MissingFunctionId,
            "processing.functionId is required",
            format!("{}.functionId", base),
        );
    }
}

fn validate_filter(filter: &FilterExpr, base: &str, ctx: &mut ValidationCtx) {
    match parse_path(&filter.path) {
        Ok(tokens) if wildcard_count(&tokens) > 0 => ctx.push(
            ErrorCode::InvalidFilterPath,
            "filter path must not contain wildcards",
            format!("{}.path", base),
        ),
        Ok(_) => {}
        Err(err) => ctx.push(
            ErrorCode::InvalidFilterPath,
            &format!("filter path is invalid: {}", err),
            format!("{}.path", base),
        ),
    }

    if filter.operator == FilterOperator::In && !filter.value.is_array() {
        ctx.push(
            ErrorCode::InvalidFilterValue,
            "IN filter value must be an array",
            format!("{}.value", base),
        );
    }
}

struct ValidationCtx {
    target_format: Format,
    rule_ids: HashSet<String>,
    errors: Vec<RuleError>,
}

impl ValidationCtx {
    fn new(target_format: Format) -> Self {
        Self {
            target_format,
            rule_ids: HashSet::new(),
            errors: Vec::new(),
        }
    }

    fn push(&mut self, code: ErrorCode, message: &str, path: impl Into<String>) {
        self.errors.push(RuleError::new(code, message).with_path(path));
    }

    fn finish(self) -> ValidationResult {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}
