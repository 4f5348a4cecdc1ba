// quillbase-core/src/aggregation.rs
// Aggregation pipeline implementation

use ahash::AHashMap;
use serde_json::{Map, Value};

use crate::error::{QuillError, Result};
use crate::find_options::{parse_sort, SortDirection, SortSpec};
use crate::query::Filter;
use crate::value_utils::{canonical_json_string, get_nested_value, number_value, sort_cmp};

fn invalid(msg: impl Into<String>) -> QuillError {
    QuillError::InvalidPipeline(msg.into())
}

/// Single-operator object (`{"$sum": 1}`) split into name and argument
fn single_operator<'a>(obj: &'a Map<String, Value>, what: &str) -> Result<(&'a String, &'a Value)> {
    let mut entries = obj.iter();
    match (entries.next(), entries.next()) {
        (Some(entry), None) => Ok(entry),
        _ => Err(invalid(format!("{} must have exactly one operator", what))),
    }
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

/// Value expression used by `$project`, `$group` keys and accumulators
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `"$published_year"`
    Field(String),
    Literal(Value),
    Add(Vec<Expr>),
    Subtract(Box<Expr>, Box<Expr>),
    Multiply(Vec<Expr>),
    Divide(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
    /// `{"author": "$author", "decade": ...}` builds an object
    Object(Vec<(String, Expr)>),
}

impl Expr {
    pub fn field(path: impl Into<String>) -> Self {
        Expr::Field(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn from_json(json: &Value) -> Result<Self> {
        match json {
            Value::String(s) if s.starts_with('$') => {
                let path = &s[1..];
                if path.is_empty() || path.starts_with('$') {
                    return Err(invalid(format!("invalid field reference '{}'", s)));
                }
                Ok(Expr::Field(path.to_string()))
            }
            Value::Object(obj) if obj.keys().any(|k| k.starts_with('$')) => {
                let (op, arg) = single_operator(obj, "expression")?;
                Self::operator_from_json(op, arg)
            }
            Value::Object(obj) => obj
                .iter()
                .map(|(k, v)| Ok((k.clone(), Expr::from_json(v)?)))
                .collect::<Result<Vec<_>>>()
                .map(Expr::Object),
            other => Ok(Expr::Literal(other.clone())),
        }
    }

    fn operator_from_json(op: &str, arg: &Value) -> Result<Self> {
        if op == "$literal" {
            return Ok(Expr::Literal(arg.clone()));
        }
        let args = match arg {
            Value::Array(items) => items.iter().map(Expr::from_json).collect::<Result<Vec<_>>>()?,
            other => vec![Expr::from_json(other)?],
        };
        let binary = |args: Vec<Expr>| -> Result<(Box<Expr>, Box<Expr>)> {
            let mut it = args.into_iter();
            match (it.next(), it.next(), it.next()) {
                (Some(a), Some(b), None) => Ok((Box::new(a), Box::new(b))),
                _ => Err(invalid(format!("{} takes exactly two arguments", op))),
            }
        };
        match op {
            "$add" => Ok(Expr::Add(args)),
            "$multiply" => Ok(Expr::Multiply(args)),
            "$subtract" => binary(args).map(|(a, b)| Expr::Subtract(a, b)),
            "$divide" => binary(args).map(|(a, b)| Expr::Divide(a, b)),
            "$mod" => binary(args).map(|(a, b)| Expr::Mod(a, b)),
            other => Err(invalid(format!("unknown expression operator '{}'", other))),
        }
    }

    /// Evaluate against a document; `None` means the value is missing
    pub fn eval(&self, doc: &Value) -> Result<Option<Value>> {
        match self {
            Expr::Field(path) => Ok(get_nested_value(doc, path).cloned()),
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Object(fields) => {
                let mut out = Map::new();
                for (name, expr) in fields {
                    if let Some(value) = expr.eval(doc)? {
                        out.insert(name.clone(), value);
                    }
                }
                Ok(Some(Value::Object(out)))
            }
            Expr::Add(args) => self.fold(doc, args, "$add", 0.0, |a, b| a + b),
            Expr::Multiply(args) => self.fold(doc, args, "$multiply", 1.0, |a, b| a * b),
            Expr::Subtract(a, b) => self.binary(doc, a, b, "$subtract", |x, y| Ok(x - y)),
            Expr::Divide(a, b) => self.binary(doc, a, b, "$divide", |x, y| {
                if y == 0.0 {
                    Err(invalid("$divide by zero"))
                } else {
                    Ok(x / y)
                }
            }),
            Expr::Mod(a, b) => self.binary(doc, a, b, "$mod", |x, y| {
                if y == 0.0 {
                    Err(invalid("$mod by zero"))
                } else {
                    Ok(x % y)
                }
            }),
        }
    }

    /// Numeric operand; `Ok(None)` for null or missing
    fn operand(expr: &Expr, doc: &Value, op: &str) -> Result<Option<f64>> {
        match expr.eval(doc)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(other) => Err(invalid(format!("{} only supports numbers, got {}", op, other))),
        }
    }

    fn fold<F>(&self, doc: &Value, args: &[Expr], op: &str, init: f64, f: F) -> Result<Option<Value>>
    where
        F: Fn(f64, f64) -> f64,
    {
        let mut acc = init;
        for arg in args {
            match Self::operand(arg, doc, op)? {
                Some(n) => acc = f(acc, n),
                None => return Ok(Some(Value::Null)),
            }
        }
        Ok(Some(number_value(acc)))
    }

    fn binary<F>(&self, doc: &Value, a: &Expr, b: &Expr, op: &str, f: F) -> Result<Option<Value>>
    where
        F: Fn(f64, f64) -> Result<f64>,
    {
        match (Self::operand(a, doc, op)?, Self::operand(b, doc, op)?) {
            (Some(x), Some(y)) => Ok(Some(number_value(f(x, y)?))),
            _ => Ok(Some(Value::Null)),
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Aggregation pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Filter),
    Project(ProjectStage),
    Group(GroupStage),
    Sort(SortSpec),
    Limit(usize),
    Skip(usize),
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(invalid("Pipeline cannot be empty"));
        }
        if stages.iter().any(|s| matches!(s, Stage::Limit(0))) {
            return Err(invalid("$limit must be positive"));
        }
        Ok(Pipeline { stages })
    }

    /// Create pipeline from JSON array
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        let stages_array = pipeline_json
            .as_array()
            .ok_or_else(|| invalid("Pipeline must be an array"))?;
        let stages = stages_array
            .iter()
            .map(Stage::from_json)
            .collect::<Result<Vec<_>>>()?;
        Pipeline::new(stages)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Filter of a leading `$match`, which the planner may serve from an index
    pub fn leading_match(&self) -> Option<&Filter> {
        match self.stages.first() {
            Some(Stage::Match(filter)) => Some(filter),
            _ => None,
        }
    }

    /// Execute every stage in order
    pub fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        self.execute_from(0, docs)
    }

    /// Execute stages starting at `first`; earlier stages are assumed applied
    pub fn execute_from(&self, first: usize, mut docs: Vec<Value>) -> Result<Vec<Value>> {
        for stage in self.stages.iter().skip(first) {
            docs = stage.execute(docs)?;
        }
        Ok(docs)
    }
}

impl Stage {
    /// Parse stage from JSON
    pub fn from_json(stage_json: &Value) -> Result<Self> {
        let obj = stage_json
            .as_object()
            .ok_or_else(|| invalid("Stage must be an object"))?;
        let (stage_name, spec) = single_operator(obj, "stage")?;

        match stage_name.as_str() {
            "$match" => Ok(Stage::Match(Filter::from_json(spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_json(spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_json(spec)?)),
            "$sort" => parse_sort(spec)
                .map(Stage::Sort)
                .map_err(|e| invalid(e.to_string())),
            "$limit" => Ok(Stage::Limit(count_arg(spec, "$limit")?)),
            "$skip" => Ok(Stage::Skip(count_arg(spec, "$skip")?)),
            other => Err(invalid(format!("Unknown pipeline stage: {}", other))),
        }
    }

    /// Execute this stage
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Stage::Match(filter) => Ok(docs.into_iter().filter(|d| filter.matches(d)).collect()),
            Stage::Project(stage) => docs.iter().map(|d| stage.project_document(d)).collect(),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(spec) => Ok(sort_documents(docs, spec)),
            Stage::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
            Stage::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
        }
    }
}

fn count_arg(spec: &Value, stage: &str) -> Result<usize> {
    spec.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| invalid(format!("{} must be a non-negative integer", stage)))
}

/// Stable sort; documents with equal keys keep their incoming order
fn sort_documents(mut docs: Vec<Value>, spec: &[(String, SortDirection)]) -> Vec<Value> {
    docs.sort_by(|a, b| {
        for (field, direction) in spec {
            let cmp = sort_cmp(get_nested_value(a, field), get_nested_value(b, field));
            if cmp != std::cmp::Ordering::Equal {
                return direction.apply(cmp);
            }
        }
        std::cmp::Ordering::Equal
    });
    docs
}

// ============================================================================
// $project
// ============================================================================

/// $project stage - reshape documents
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectStage {
    fields: Vec<(String, ProjectField)>,
    keep_id: bool,
    exclusion: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectField {
    Include,
    Exclude,
    Computed(Expr),
}

impl ProjectStage {
    pub fn new() -> Self {
        ProjectStage {
            fields: Vec::new(),
            keep_id: true,
            exclusion: false,
        }
    }

    pub fn include(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), ProjectField::Include));
        self
    }

    pub fn compute(mut self, field: impl Into<String>, expr: Expr) -> Self {
        self.fields.push((field.into(), ProjectField::Computed(expr)));
        self
    }

    pub fn without_id(mut self) -> Self {
        self.keep_id = false;
        self
    }

    pub fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| invalid("$project must be an object"))?;
        if obj.is_empty() {
            return Err(invalid("$project needs at least one field"));
        }

        let mut stage = ProjectStage::new();
        for (field, value) in obj {
            let kind = match value {
                Value::Bool(true) => ProjectField::Include,
                Value::Bool(false) => ProjectField::Exclude,
                Value::Number(n) if n.as_f64() == Some(0.0) => ProjectField::Exclude,
                Value::Number(n) if n.as_f64() == Some(1.0) => ProjectField::Include,
                other => ProjectField::Computed(Expr::from_json(other)?),
            };
            if field == "_id" && kind == ProjectField::Exclude {
                stage.keep_id = false;
                continue;
            }
            stage.fields.push((field.clone(), kind));
        }

        let excludes = stage.fields.iter().filter(|(_, k)| *k == ProjectField::Exclude).count();
        if excludes > 0 && excludes != stage.fields.len() {
            return Err(invalid("$project cannot mix exclusion with inclusion or computed fields"));
        }
        stage.exclusion = excludes > 0 || stage.fields.is_empty();
        Ok(stage)
    }

    fn project_document(&self, doc: &Value) -> Result<Value> {
        let source = match doc {
            Value::Object(obj) => obj,
            other => return Ok(other.clone()),
        };

        if self.exclusion {
            let mut out = source.clone();
            for (field, _) in &self.fields {
                out.remove(field);
            }
            if !self.keep_id {
                out.remove("_id");
            }
            return Ok(Value::Object(out));
        }

        let mut out = Map::new();
        if self.keep_id {
            if let Some(id) = source.get("_id") {
                out.insert("_id".to_string(), id.clone());
            }
        }
        for (field, kind) in &self.fields {
            let value = match kind {
                ProjectField::Include => get_nested_value(doc, field).cloned(),
                ProjectField::Computed(expr) => expr.eval(doc)?,
                ProjectField::Exclude => None,
            };
            if let Some(value) = value {
                out.insert(field.clone(), value);
            }
        }
        Ok(Value::Object(out))
    }
}

impl Default for ProjectStage {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// $group
// ============================================================================

/// $group stage - group documents and compute aggregates
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStage {
    id: Expr,
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    /// `{"$sum": 1}` counts; `{"$sum": "$price"}` adds numeric values
    Sum(Expr),
    Avg(Expr),
    Count,
    Push(Expr),
    Min(Expr),
    Max(Expr),
    First(Expr),
    Last(Expr),
}

impl GroupStage {
    /// Group by `id`; `Expr::Literal(Value::Null)` puts everything in one bucket
    pub fn new(id: Expr) -> Self {
        GroupStage {
            id,
            accumulators: Vec::new(),
        }
    }

    pub fn accumulate(mut self, name: impl Into<String>, accumulator: Accumulator) -> Self {
        self.accumulators.push((name.into(), accumulator));
        self
    }

    pub fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| invalid("$group must be an object"))?;
        let id = obj
            .get("_id")
            .ok_or_else(|| invalid("Group stage must have _id field"))
            .and_then(Expr::from_json)?;

        let mut stage = GroupStage::new(id);
        for (field, value) in obj {
            if field == "_id" {
                continue;
            }
            if field.contains('.') || field.starts_with('$') {
                return Err(invalid(format!("invalid accumulator name '{}'", field)));
            }
            stage = stage.accumulate(field.clone(), Accumulator::from_json(value)?);
        }
        Ok(stage)
    }

    /// Buckets are emitted in first-seen order
    fn execute(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        let mut positions: AHashMap<String, usize> = AHashMap::new();
        let mut buckets: Vec<(Value, Vec<AccState>)> = Vec::new();

        for doc in &docs {
            let key = self.id.eval(doc)?.unwrap_or(Value::Null);
            let slot = *positions.entry(canonical_json_string(&key)).or_insert_with(|| {
                let states = self.accumulators.iter().map(|(_, a)| a.init()).collect();
                buckets.push((key, states));
                buckets.len() - 1
            });
            let states = &mut buckets[slot].1;
            for ((_, accumulator), state) in self.accumulators.iter().zip(states.iter_mut()) {
                accumulator.update(state, doc)?;
            }
        }

        Ok(buckets
            .into_iter()
            .map(|(key, states)| {
                let mut out = Map::new();
                out.insert("_id".to_string(), key);
                for ((name, _), state) in self.accumulators.iter().zip(states) {
                    out.insert(name.clone(), state.finish());
                }
                Value::Object(out)
            })
            .collect())
    }
}

impl Accumulator {
    pub fn from_json(spec: &Value) -> Result<Self> {
        let obj = spec
            .as_object()
            .ok_or_else(|| invalid("Accumulator must be an object"))?;
        let (op, arg) = single_operator(obj, "accumulator")?;

        match op.as_str() {
            "$count" => match arg {
                Value::Object(o) if o.is_empty() => Ok(Accumulator::Count),
                _ => Err(invalid("$count takes an empty object")),
            },
            "$sum" => match arg {
                Value::Number(_) | Value::String(_) | Value::Object(_) => {
                    Ok(Accumulator::Sum(Expr::from_json(arg)?))
                }
                _ => Err(invalid("$sum must be a number or expression")),
            },
            "$avg" => Ok(Accumulator::Avg(Self::expr_arg(arg, op)?)),
            "$push" => Ok(Accumulator::Push(Self::expr_arg(arg, op)?)),
            "$min" => Ok(Accumulator::Min(Self::expr_arg(arg, op)?)),
            "$max" => Ok(Accumulator::Max(Self::expr_arg(arg, op)?)),
            "$first" => Ok(Accumulator::First(Self::expr_arg(arg, op)?)),
            "$last" => Ok(Accumulator::Last(Self::expr_arg(arg, op)?)),
            other => Err(invalid(format!("Unknown accumulator: {}", other))),
        }
    }

    fn expr_arg(arg: &Value, op: &str) -> Result<Expr> {
        match arg {
            Value::String(_) | Value::Object(_) => Expr::from_json(arg),
            _ => Err(invalid(format!("{} must be a field reference or expression", op))),
        }
    }

    fn init(&self) -> AccState {
        match self {
            Accumulator::Sum(_) => AccState::Sum {
                int: 0,
                float: 0.0,
                is_float: false,
            },
            Accumulator::Avg(_) => AccState::Avg { total: 0.0, n: 0 },
            Accumulator::Count => AccState::Count(0),
            Accumulator::Push(_) => AccState::Push(Vec::new()),
            Accumulator::Min(_) => AccState::Extreme(None),
            Accumulator::Max(_) => AccState::Extreme(None),
            Accumulator::First(_) => AccState::First(None),
            Accumulator::Last(_) => AccState::Last(Value::Null),
        }
    }

    fn update(&self, state: &mut AccState, doc: &Value) -> Result<()> {
        match (self, state) {
            (Accumulator::Count, AccState::Count(n)) => *n += 1,
            (Accumulator::Sum(expr), AccState::Sum { int, float, is_float }) => {
                if let Some(Value::Number(n)) = expr.eval(doc)? {
                    match (n.as_i64(), *is_float) {
                        (Some(i), false) => match int.checked_add(i) {
                            Some(sum) => *int = sum,
                            None => {
                                *float = *int as f64 + i as f64;
                                *is_float = true;
                            }
                        },
                        _ => {
                            if !*is_float {
                                *float = *int as f64;
                                *is_float = true;
                            }
                            *float += n.as_f64().unwrap_or(0.0);
                        }
                    }
                }
            }
            (Accumulator::Avg(expr), AccState::Avg { total, n }) => {
                if let Some(Value::Number(v)) = expr.eval(doc)? {
                    *total += v.as_f64().unwrap_or(0.0);
                    *n += 1;
                }
            }
            (Accumulator::Push(expr), AccState::Push(items)) => {
                if let Some(value) = expr.eval(doc)? {
                    items.push(value);
                }
            }
            (Accumulator::Min(expr), AccState::Extreme(best)) => {
                if let Some(value) = expr.eval(doc)?.filter(|v| !v.is_null()) {
                    let replace = best
                        .as_ref()
                        .map_or(true, |b| sort_cmp(Some(&value), Some(b)).is_lt());
                    if replace {
                        *best = Some(value);
                    }
                }
            }
            (Accumulator::Max(expr), AccState::Extreme(best)) => {
                if let Some(value) = expr.eval(doc)?.filter(|v| !v.is_null()) {
                    let replace = best
                        .as_ref()
                        .map_or(true, |b| sort_cmp(Some(&value), Some(b)).is_gt());
                    if replace {
                        *best = Some(value);
                    }
                }
            }
            (Accumulator::First(expr), AccState::First(first)) => {
                if first.is_none() {
                    *first = Some(expr.eval(doc)?.unwrap_or(Value::Null));
                }
            }
            (Accumulator::Last(expr), AccState::Last(last)) => {
                *last = expr.eval(doc)?.unwrap_or(Value::Null);
            }
            _ => return Err(invalid("accumulator state mismatch")),
        }
        Ok(())
    }
}

/// Running state of one accumulator within one bucket
#[derive(Debug)]
enum AccState {
    Sum { int: i64, float: f64, is_float: bool },
    Avg { total: f64, n: u64 },
    Count(u64),
    Push(Vec<Value>),
    Extreme(Option<Value>),
    First(Option<Value>),
    Last(Value),
}

impl AccState {
    fn finish(self) -> Value {
        match self {
            AccState::Sum { int, float, is_float } => {
                if is_float {
                    serde_json::Number::from_f64(float)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                } else {
                    Value::from(int)
                }
            }
            AccState::Avg { n: 0, .. } => Value::Null,
            AccState::Avg { total, n } => serde_json::Number::from_f64(total / n as f64)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            AccState::Count(n) => Value::from(n),
            AccState::Push(items) => Value::Array(items),
            AccState::Extreme(best) => best.unwrap_or(Value::Null),
            AccState::First(first) => first.unwrap_or(Value::Null),
            AccState::Last(last) => last,
        }
    }
}
