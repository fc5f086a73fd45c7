//! Tree-walking interpreter for parsed geometry scripts.
//!
//! Scripts see exactly three modules (`App`, its alias `FreeCAD`, and
//! `Part`) plus `abs min max range len int float`. Every other name is a
//! `NameError`. Host objects are handles into the [`Workspace`]; all
//! mutation goes through the document API.

use std::collections::HashMap;
use std::fmt;

use super::parser::{BinOp, CmpOp, Expr, FStrPart, Program, Stmt, StmtKind, Target};
use crate::document::{
    expression, DocumentError, Placement, PrimitiveShape, PropertyValue, Rotation, Vector3, Workspace,
    FEATURE_TYPE,
};
use crate::log_debug;
use crate::logging::{with_logger, LogCategory};

const MAX_RANGE_LEN: usize = 100_000;
const MAX_STR_LEN: usize = 100_000;
const MAX_LIST_NESTING: usize = 32;
/// String bytes plus list slots of any one value, nested lists included
const MAX_VALUE_SIZE: usize = 1_000_000;
/// String bytes plus list slots a script may materialize over its run
const MAX_MATERIALIZED: usize = 5_000_000;
const MAX_PRECISION: usize = 64;
/// Nested evaluation frames, bounding left-deep chains like `1+1+...+1`
const MAX_EVAL_DEPTH: usize = 150;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorKind {
    Name,
    Type,
    Attribute,
    Value,
    Index,
    ZeroDivision,
    Document,
    Limit,
}

impl ErrorKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Name => "NameError",
            Self::Type => "TypeError",
            Self::Attribute => "AttributeError",
            Self::Value => "ValueError",
            Self::Index => "IndexError",
            Self::ZeroDivision => "ZeroDivisionError",
            Self::Document => "DocumentError",
            Self::Limit => "LimitExceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// 1-based line of the failing statement, 0 until known
    pub line: usize,
}

impl RuntimeError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: 0,
        }
    }

    fn at(mut self, line: usize) -> Self {
        if self.line == 0 {
            self.line = line;
        }
        self
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}: {}", self.line, self.kind.label(), self.message)
    }
}

impl std::error::Error for RuntimeError {}

impl From<DocumentError> for RuntimeError {
    fn from(e: DocumentError) -> Self {
        let kind = match e {
            DocumentError::UnknownProperty { .. } => ErrorKind::Attribute,
            DocumentError::WrongValueType { .. } => ErrorKind::Type,
            DocumentError::UnknownType(_)
            | DocumentError::InvalidCell(_)
            | DocumentError::InvalidAlias { .. } => ErrorKind::Value,
            _ => ErrorKind::Document,
        };
        Self::new(kind, e.to_string())
    }
}

fn type_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::Type, message)
}

fn value_error(message: impl Into<String>) -> RuntimeError {
    RuntimeError::new(ErrorKind::Value, message)
}

fn check_list_len(len: usize) -> Result<(), RuntimeError> {
    if len > MAX_RANGE_LEN {
        return Err(value_error(format!("list of {} items exceeds the limit of {}", len, MAX_RANGE_LEN)));
    }
    Ok(())
}

fn check_str_len(len: usize) -> Result<(), RuntimeError> {
    if len > MAX_STR_LEN {
        return Err(value_error(format!("string of {} bytes exceeds the limit of {}", len, MAX_STR_LEN)));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Module {
    App,
    Part,
    Console,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Builtin {
    Abs,
    Min,
    Max,
    Range,
    Len,
    Int,
    Float,
}

impl Builtin {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Self::Abs,
            "min" => Self::Min,
            "max" => Self::Max,
            "range" => Self::Range,
            "len" => Self::Len,
            "int" => Self::Int,
            "float" => Self::Float,
            _ => return None,
        })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Min => "min",
            Self::Max => "max",
            Self::Range => "range",
            Self::Len => "len",
            Self::Int => "int",
            Self::Float => "float",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Number(f64),
    Str(String),
    /// Lists and tuples alike
    List(Vec<Value>),
    Vector(Vector3),
    Rotation(Rotation),
    Placement(Placement),
    Shape {
        shape: PrimitiveShape,
        offset: Vector3,
    },
    Module(Module),
    Builtin(Builtin),
    Document(usize),
    Object {
        doc: usize,
        name: String,
    },
    Method {
        receiver: Box<Value>,
        name: String,
    },
}

impl Value {
    /// String bytes plus list slots held by this value, and its list
    /// nesting depth
    fn measure(&self) -> (usize, usize) {
        match self {
            Self::Str(s) => (s.len(), 0),
            Self::List(items) => items.iter().fold((items.len(), 1), |(size, depth), item| {
                let (item_size, item_depth) = item.measure();
                (size.saturating_add(item_size), depth.max(item_depth + 1))
            }),
            Self::Method { receiver, .. } => receiver.measure(),
            _ => (0, 0),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Number(n) if n.fract() == 0.0 => "int",
            Self::Number(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Vector(_) => "Vector",
            Self::Rotation(_) => "Rotation",
            Self::Placement(_) => "Placement",
            Self::Shape { .. } => "Shape",
            Self::Module(_) => "module",
            Self::Builtin(_) => "builtin_function_or_method",
            Self::Document(_) => "Document",
            Self::Object { .. } => "DocumentObject",
            Self::Method { .. } => "method",
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            _ => true,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn repr(&self) -> String {
        match self {
            Self::Str(s) => format!("'{}'", s),
            other => other.to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::repr).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Self::Vector(v) => write!(f, "Vector ({}, {}, {})", v.x, v.y, v.z),
            Self::Rotation(r) => write!(f, "Rotation (yaw={}, pitch={}, roll={})", r.yaw, r.pitch, r.roll),
            Self::Placement(p) => write!(
                f,
                "Placement [Pos=({}, {}, {}), Yaw-Pitch-Roll=({}, {}, {})]",
                p.base.x, p.base.y, p.base.z, p.rotation.yaw, p.rotation.pitch, p.rotation.roll
            ),
            Self::Shape { shape, .. } => write!(f, "<{} Solid>", shape.kind_name()),
            Self::Module(Module::App) => f.write_str("<module 'FreeCAD'>"),
            Self::Module(Module::Part) => f.write_str("<module 'Part'>"),
            Self::Module(Module::Console) => f.write_str("<FreeCAD Console>"),
            Self::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Self::Document(i) => write!(f, "<Document #{}>", i),
            Self::Object { name, .. } => write!(f, "<DocumentObject {}>", name),
            Self::Method { name, .. } => write!(f, "<method {}>", name),
        }
    }
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Number(n) => Value::Number(n),
            PropertyValue::Text(s) => Value::Str(s),
            PropertyValue::Vector(v) => Value::Vector(v),
            PropertyValue::Rotation(r) => Value::Rotation(r),
            PropertyValue::Placement(p) => Value::Placement(p),
            PropertyValue::Shape(shape) => Value::Shape {
                shape,
                offset: Vector3::default(),
            },
        }
    }
}

fn to_property(value: Value) -> Result<PropertyValue, RuntimeError> {
    Ok(match value {
        Value::Number(n) => PropertyValue::Number(n),
        Value::Bool(b) => PropertyValue::Number(if b { 1.0 } else { 0.0 }),
        Value::Str(s) => PropertyValue::Text(s),
        Value::Vector(v) => PropertyValue::Vector(v),
        Value::Rotation(r) => PropertyValue::Rotation(r),
        Value::Placement(p) => PropertyValue::Placement(p),
        Value::Shape { shape, .. } => PropertyValue::Shape(shape),
        other => return Err(type_error(format!("cannot assign a '{}' to a property", other.type_name()))),
    })
}

/// Positional and keyword arguments of one call
struct CallArgs {
    func: String,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
}

impl CallArgs {
    fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.args
            .get(index)
            .or_else(|| self.kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v))
    }

    fn expect(&self, max: usize, keywords: &[&str]) -> Result<(), RuntimeError> {
        if self.args.len() > max {
            return Err(type_error(format!(
                "{}() takes at most {} arguments ({} given)",
                self.func,
                max,
                self.args.len()
            )));
        }
        if let Some((k, _)) = self.kwargs.iter().find(|(k, _)| !keywords.contains(&k.as_str())) {
            return Err(type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.func, k
            )));
        }
        Ok(())
    }

    fn required(&self, index: usize, name: &str) -> Result<&Value, RuntimeError> {
        self.get(index, name).ok_or_else(|| {
            type_error(format!("{}() missing required argument: '{}'", self.func, name))
        })
    }

    fn number(&self, index: usize, name: &str) -> Result<Option<f64>, RuntimeError> {
        match self.get(index, name) {
            None | Some(Value::None) => Ok(None),
            Some(v) => v.as_number().map(Some).ok_or_else(|| {
                type_error(format!(
                    "{}() argument '{}' must be a number, not '{}'",
                    self.func,
                    name,
                    v.type_name()
                ))
            }),
        }
    }

    fn required_number(&self, index: usize, name: &str) -> Result<f64, RuntimeError> {
        self.required(index, name)?;
        self.number(index, name)?.ok_or_else(|| {
            type_error(format!("{}() argument '{}' must be a number, not 'NoneType'", self.func, name))
        })
    }

    fn string(&self, index: usize, name: &str) -> Result<Option<String>, RuntimeError> {
        match self.get(index, name) {
            None | Some(Value::None) => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(v) => Err(type_error(format!(
                "{}() argument '{}' must be str, not '{}'",
                self.func,
                name,
                v.type_name()
            ))),
        }
    }

    fn required_string(&self, index: usize, name: &str) -> Result<String, RuntimeError> {
        self.required(index, name)?;
        self.string(index, name)?
            .ok_or_else(|| type_error(format!("{}() argument '{}' must be str", self.func, name)))
    }

    fn vector(&self, index: usize, name: &str) -> Result<Option<Vector3>, RuntimeError> {
        match self.get(index, name) {
            None | Some(Value::None) => Ok(None),
            Some(Value::Vector(v)) => Ok(Some(*v)),
            Some(v) => Err(type_error(format!(
                "{}() argument '{}' must be Vector, not '{}'",
                self.func,
                name,
                v.type_name()
            ))),
        }
    }
}

fn as_index(value: &Value, len: usize) -> Result<usize, RuntimeError> {
    let n = value
        .as_number()
        .filter(|n| n.fract() == 0.0)
        .ok_or_else(|| type_error(format!("indices must be integers, not '{}'", value.type_name())))?;
    let resolved = if n < 0.0 { len as f64 + n } else { n };
    if resolved < 0.0 || resolved >= len as f64 {
        return Err(RuntimeError::new(ErrorKind::Index, "index out of range"));
    }
    Ok(resolved as usize)
}

fn integral(value: &Value, func: &str) -> Result<i64, RuntimeError> {
    match value.as_number() {
        Some(n) if n.fract() == 0.0 => Ok(n as i64),
        _ => Err(type_error(format!(
            "{}() expects integers, got '{}'",
            func,
            value.type_name()
        ))),
    }
}

pub struct Interpreter<'w> {
    workspace: &'w mut Workspace,
    locals: HashMap<String, Value>,
    steps: usize,
    max_steps: usize,
    depth: usize,
    materialized: usize,
}

impl<'w> Interpreter<'w> {
    pub fn new(workspace: &'w mut Workspace, max_steps: usize) -> Self {
        Self {
            workspace,
            locals: HashMap::new(),
            steps: 0,
            max_steps,
            depth: 0,
            materialized: 0,
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        self.exec_block(&program.body)
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    fn exec_block(&mut self, body: &[Stmt]) -> Result<(), RuntimeError> {
        for stmt in body {
            self.exec(stmt).map_err(|e| e.at(stmt.line))?;
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<(), RuntimeError> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(RuntimeError::new(
                ErrorKind::Limit,
                format!("script exceeded {} statements", self.max_steps),
            ));
        }

        match &stmt.kind {
            StmtKind::Pass => Ok(()),
            StmtKind::Expr(expr) => self.eval(expr).map(|_| ()),
            StmtKind::Assign(target, expr) => {
                let value = self.eval(expr)?;
                self.assign(target, value)
            }
            StmtKind::AugAssign(target, op, expr) => {
                let current = self.eval(&target_expr(target)?)?;
                let rhs = self.eval(expr)?;
                let value = binary(*op, current, rhs)?;
                self.charge(&value)?;
                self.assign(target, value)
            }
            StmtKind::For { target, iter, body } => {
                let items = iterate(self.eval(iter)?)?;
                for item in items {
                    self.assign(target, item)?;
                    self.exec_block(body)?;
                }
                Ok(())
            }
        }
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), RuntimeError> {
        match target {
            Target::Name(name) => {
                self.locals.insert(name.clone(), value);
                Ok(())
            }
            Target::Tuple(targets) => {
                let items = iterate(value)?;
                if items.len() != targets.len() {
                    return Err(value_error(format!(
                        "expected {} values to unpack, got {}",
                        targets.len(),
                        items.len()
                    )));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
                Ok(())
            }
            Target::Index(object, index) => {
                let Expr::Name(name) = object else {
                    return Err(type_error("item assignment is only supported on list variables"));
                };
                let index = self.eval(index)?;
                match self.locals.get_mut(name) {
                    Some(Value::List(items)) => {
                        let i = as_index(&index, items.len())?;
                        items[i] = value;
                        Ok(())
                    }
                    Some(other) => Err(type_error(format!(
                        "'{}' object does not support item assignment",
                        other.type_name()
                    ))),
                    None => Err(RuntimeError::new(
                        ErrorKind::Name,
                        format!("name '{}' is not defined", name),
                    )),
                }
            }
            Target::Attribute(object, attr) => self.set_attribute(object, attr, value),
        }
    }

    /// `a.b.c = v`: walk until a document object is reached, then the
    /// rest of the path is a property path on it. Value-type variables
    /// (vectors, placements) are updated in place.
    fn set_attribute(&mut self, object: &Expr, attr: &str, value: Value) -> Result<(), RuntimeError> {
        let mut path = vec![attr.to_string()];
        let mut root = object;
        while let Expr::Attribute(inner, name) = root {
            path.push(name.clone());
            root = inner;
        }
        path.reverse();

        if let Expr::Name(name) = root {
            if let Some(current) = self.locals.get(name) {
                if matches!(current, Value::Vector(_) | Value::Placement(_)) {
                    let updated = update_value(current.clone(), &path, value)?;
                    self.locals.insert(name.clone(), updated);
                    return Ok(());
                }
            }
        }

        let mut current = self.eval(root)?;
        for (i, segment) in path.iter().enumerate() {
            if let Value::Object { doc, name } = &current {
                let property = path[i..].join(".");
                let document = self.document_mut(*doc)?;
                document.set_property(name, &property, to_property(value)?)?;
                return Ok(());
            }
            if i + 1 == path.len() {
                break;
            }
            current = self.get_attr(current, segment)?;
        }

        Err(RuntimeError::new(
            ErrorKind::Attribute,
            format!(
                "cannot set attribute '{}' on '{}' object",
                attr,
                current.type_name()
            ),
        ))
    }

    fn document_mut(&mut self, index: usize) -> Result<&mut crate::document::Document, RuntimeError> {
        self.workspace
            .document_mut(index)
            .ok_or_else(|| RuntimeError::new(ErrorKind::Document, "document was closed"))
    }

    fn document(&self, index: usize) -> Result<&crate::document::Document, RuntimeError> {
        self.workspace
            .document(index)
            .ok_or_else(|| RuntimeError::new(ErrorKind::Document, "document was closed"))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(RuntimeError::new(ErrorKind::Limit, "expression is nested too deeply"));
        }
        self.depth += 1;
        let result = self.eval_inner(expr);
        self.depth -= 1;

        let value = result?;
        self.charge(&value)?;
        Ok(value)
    }

    /// Every evaluated value counts against the materialization budget,
    /// including the copies made by reading a variable.
    fn charge(&mut self, value: &Value) -> Result<(), RuntimeError> {
        let (size, nesting) = value.measure();
        if nesting > MAX_LIST_NESTING {
            return Err(value_error(format!("lists nested deeper than {} levels", MAX_LIST_NESTING)));
        }
        if size > MAX_VALUE_SIZE {
            return Err(value_error(format!("value of size {} exceeds the limit of {}", size, MAX_VALUE_SIZE)));
        }
        self.materialized = self.materialized.saturating_add(size);
        if self.materialized > MAX_MATERIALIZED {
            return Err(RuntimeError::new(
                ErrorKind::Limit,
                format!("script built more than {} units of string and list data", MAX_MATERIALIZED),
            ));
        }
        Ok(())
    }

    fn eval_inner(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::None => Ok(Value::None),
            Expr::FStr(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        FStrPart::Literal(text) => out.push_str(text),
                        FStrPart::Value { expr, spec } => {
                            let value = self.eval(expr)?;
                            out.push_str(&format_spec(&value, spec.as_deref())?);
                            check_str_len(out.len())?;
                        }
                    }
                }
                Ok(Value::Str(out))
            }
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) | Expr::Tuple(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                Ok(Value::List(values))
            }
            Expr::Attribute(object, attr) => {
                let value = self.eval(object)?;
                self.get_attr(value, attr)
            }
            Expr::Index(object, index) => {
                let value = self.eval(object)?;
                let index = self.eval(index)?;
                subscript(value, &index)
            }
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Vector(v) => Ok(Value::Vector(Vector3::new(-v.x, -v.y, -v.z))),
                other => other
                    .as_number()
                    .map(|n| Value::Number(-n))
                    .ok_or_else(|| type_error(format!("bad operand type for unary -: '{}'", other.type_name()))),
            },
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.truthy())),
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, left, right)
            }
            Expr::Compare(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                compare(*op, &left, &right)
            }
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if !left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.truthy() {
                    return Ok(left);
                }
                self.eval(right)
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, RuntimeError> {
        if let Some(value) = self.locals.get(name) {
            return Ok(value.clone());
        }
        match name {
            "App" | "FreeCAD" => Ok(Value::Module(Module::App)),
            "Part" => Ok(Value::Module(Module::Part)),
            _ => Builtin::lookup(name).map(Value::Builtin).ok_or_else(|| {
                RuntimeError::new(ErrorKind::Name, format!("name '{}' is not defined", name))
            }),
        }
    }

    fn eval_call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> Result<Value, RuntimeError> {
        // list.append / list.extend mutate the variable in place
        if let Expr::Attribute(object, method) = func {
            if let Expr::Name(name) = object.as_ref() {
                if matches!(method.as_str(), "append" | "extend")
                    && matches!(self.locals.get(name), Some(Value::List(_)))
                {
                    if args.len() != 1 || !kwargs.is_empty() {
                        return Err(type_error(format!("{}() takes exactly one argument", method)));
                    }
                    let value = self.eval(&args[0])?;
                    let extra = if method == "append" { vec![value] } else { iterate(value)? };
                    if let Some(Value::List(items)) = self.locals.get_mut(name) {
                        check_list_len(items.len().saturating_add(extra.len()))?;
                        items.extend(extra);
                    }
                    return Ok(Value::None);
                }
            }
        }

        let callee = self.eval(func)?;
        let mut call = CallArgs {
            func: match &callee {
                Value::Method { name, .. } => name.clone(),
                Value::Builtin(b) => b.name().to_string(),
                other => other.type_name().to_string(),
            },
            args: Vec::with_capacity(args.len()),
            kwargs: Vec::with_capacity(kwargs.len()),
        };
        for arg in args {
            call.args.push(self.eval(arg)?);
        }
        for (key, arg) in kwargs {
            call.kwargs.push((key.clone(), self.eval(arg)?));
        }

        match callee {
            Value::Builtin(builtin) => call_builtin(builtin, &call),
            Value::Method { receiver, name } => self.call_method(*receiver, &name, &call),
            other => Err(type_error(format!("'{}' object is not callable", other.type_name()))),
        }
    }

    fn get_attr(&mut self, value: Value, attr: &str) -> Result<Value, RuntimeError> {
        let method = |receiver: Value| Value::Method {
            receiver: Box::new(receiver),
            name: attr.to_string(),
        };
        let missing = |type_name: &str| {
            RuntimeError::new(
                ErrorKind::Attribute,
                format!("'{}' object has no attribute '{}'", type_name, attr),
            )
        };

        match value {
            Value::Module(Module::App) => match attr {
                "ActiveDocument" => Ok(self
                    .workspace
                    .active_index()
                    .map(Value::Document)
                    .unwrap_or(Value::None)),
                "Console" => Ok(Value::Module(Module::Console)),
                "Vector" | "Rotation" | "Placement" | "newDocument" | "getDocument" | "activeDocument"
                | "setActiveDocument" => Ok(method(value)),
                _ => Err(RuntimeError::new(
                    ErrorKind::Attribute,
                    format!("module 'FreeCAD' has no attribute '{}'", attr),
                )),
            },
            Value::Module(Module::Part) => match attr {
                "makeBox" | "makeCylinder" | "makeSphere" | "makeCone" | "makeTorus" | "show" => {
                    Ok(method(value))
                }
                _ => Err(RuntimeError::new(
                    ErrorKind::Attribute,
                    format!("module 'Part' has no attribute '{}'", attr),
                )),
            },
            Value::Module(Module::Console) => match attr {
                "PrintMessage" | "PrintWarning" | "PrintError" | "PrintLog" => Ok(method(value)),
                _ => Err(missing("Console")),
            },
            Value::Document(index) => {
                let document = self.document(index)?;
                match attr {
                    "Name" | "Label" => Ok(Value::Str(document.name.clone())),
                    "Objects" => Ok(Value::List(
                        document
                            .objects()
                            .iter()
                            .map(|o| Value::Object {
                                doc: index,
                                name: o.name.clone(),
                            })
                            .collect(),
                    )),
                    "addObject" | "getObject" | "recompute" | "removeObject" | "getObjectsByLabel" => {
                        Ok(method(value))
                    }
                    name if document.get_object(name).is_some() => Ok(Value::Object {
                        doc: index,
                        name: name.to_string(),
                    }),
                    _ => Err(missing("Document")),
                }
            }
            Value::Object { doc, ref name } => {
                let document = self.document(doc)?;
                let object = document.get_object(name).ok_or_else(|| {
                    RuntimeError::new(ErrorKind::Document, format!("object '{}' was deleted", name))
                })?;

                match attr {
                    "Document" => return Ok(Value::Document(doc)),
                    "setExpression" | "recompute" => return Ok(method(value.clone())),
                    "set" | "get" | "setAlias" | "getAlias" | "getUsedCells" | "getContents"
                        if object.is_spreadsheet() =>
                    {
                        return Ok(method(value.clone()))
                    }
                    "ExpressionEngine" => {
                        return Ok(Value::List(
                            object
                                .expressions
                                .iter()
                                .map(|(p, e)| Value::List(vec![Value::Str(p.clone()), Value::Str(e.clone())]))
                                .collect(),
                        ))
                    }
                    _ => {}
                }

                if let Ok(property) = object.get_property(attr) {
                    return Ok(property.into());
                }
                if let Some(cell) = object.sheet.as_ref().and_then(|s| s.cell_for_alias(attr)) {
                    let number = expression::cell_value(document, name, cell)?;
                    return Ok(Value::Number(number));
                }
                let type_id = object.type_id.clone();
                Err(missing(&type_id))
            }
            Value::Vector(v) => match attr {
                "x" => Ok(Value::Number(v.x)),
                "y" => Ok(Value::Number(v.y)),
                "z" => Ok(Value::Number(v.z)),
                "Length" => Ok(Value::Number((v.x * v.x + v.y * v.y + v.z * v.z).sqrt())),
                _ => Err(missing("Vector")),
            },
            Value::Placement(p) => match attr {
                "Base" => Ok(Value::Vector(p.base)),
                "Rotation" => Ok(Value::Rotation(p.rotation)),
                _ => Err(missing("Placement")),
            },
            Value::Shape { ref shape, .. } => match attr {
                "Volume" => Ok(Value::Number(shape.volume())),
                "ShapeType" => Ok(Value::Str("Solid".into())),
                _ => Err(missing("Shape")),
            },
            other => Err(missing(other.type_name())),
        }
    }

    fn call_method(&mut self, receiver: Value, name: &str, call: &CallArgs) -> Result<Value, RuntimeError> {
        match receiver {
            Value::Module(Module::App) => self.call_app(name, call),
            Value::Module(Module::Part) => self.call_part(name, call),
            Value::Module(Module::Console) => {
                call.expect(1, &[])?;
                let text = call.get(0, "text").map(Value::to_string).unwrap_or_default();
                let text = text.trim_end_matches('\n');
                let line = match name {
                    "PrintWarning" => format!("Warning: {}", text),
                    "PrintError" => format!("Error: {}", text),
                    _ => text.to_string(),
                };
                log_debug!(LogCategory::Executor, format!("console: {}", line));
                self.workspace.print(line);
                Ok(Value::None)
            }
            Value::Document(index) => self.call_document(index, name, call),
            Value::Object { doc, name: object } => self.call_object(doc, &object, name, call),
            other => Err(type_error(format!("'{}' object is not callable", other.type_name()))),
        }
    }

    fn call_app(&mut self, name: &str, call: &CallArgs) -> Result<Value, RuntimeError> {
        match name {
            "newDocument" => {
                call.expect(1, &["name"])?;
                let doc_name = call.string(0, "name")?.unwrap_or_else(|| "Unnamed".to_string());
                Ok(Value::Document(self.workspace.new_document(&doc_name)))
            }
            "activeDocument" => {
                call.expect(0, &[])?;
                Ok(self
                    .workspace
                    .active_index()
                    .map(Value::Document)
                    .unwrap_or(Value::None))
            }
            "getDocument" | "setActiveDocument" => {
                call.expect(1, &["name"])?;
                let doc_name = call.required_string(0, "name")?;
                let index = self.workspace.find_document(&doc_name).ok_or_else(|| {
                    RuntimeError::new(ErrorKind::Name, format!("Unknown document '{}'", doc_name))
                })?;
                if name == "setActiveDocument" {
                    self.workspace.set_active(index);
                    Ok(Value::None)
                } else {
                    Ok(Value::Document(index))
                }
            }
            "Vector" => {
                call.expect(3, &["x", "y", "z"])?;
                if let Some(Value::Vector(v)) = call.args.first() {
                    return Ok(Value::Vector(*v));
                }
                Ok(Value::Vector(Vector3::new(
                    call.number(0, "x")?.unwrap_or(0.0),
                    call.number(1, "y")?.unwrap_or(0.0),
                    call.number(2, "z")?.unwrap_or(0.0),
                )))
            }
            "Rotation" => {
                call.expect(3, &[])?;
                match call.args.as_slice() {
                    [] => Ok(Value::Rotation(Rotation::default())),
                    [Value::Rotation(r)] => Ok(Value::Rotation(*r)),
                    [Value::Vector(axis), angle] => {
                        let angle = angle
                            .as_number()
                            .ok_or_else(|| type_error("Rotation() angle must be a number"))?;
                        axis_rotation(axis, angle).map(Value::Rotation)
                    }
                    _ => Ok(Value::Rotation(Rotation::new(
                        call.required_number(0, "yaw")?,
                        call.required_number(1, "pitch")?,
                        call.required_number(2, "roll")?,
                    ))),
                }
            }
            "Placement" => {
                call.expect(2, &["Base", "Rotation"])?;
                let base = call.vector(0, "Base")?.unwrap_or_default();
                let rotation = match call.get(1, "Rotation") {
                    None | Some(Value::None) => Rotation::default(),
                    Some(Value::Rotation(r)) => *r,
                    Some(other) => {
                        return Err(type_error(format!(
                            "Placement() rotation must be Rotation, not '{}'",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Placement(Placement { base, rotation }))
            }
            _ => Err(RuntimeError::new(
                ErrorKind::Attribute,
                format!("module 'FreeCAD' has no attribute '{}'", name),
            )),
        }
    }

    fn call_part(&mut self, name: &str, call: &CallArgs) -> Result<Value, RuntimeError> {
        let positive = |value: f64, what: &str| {
            if value > 0.0 {
                Ok(value)
            } else {
                Err(value_error(format!("{}() {} must be greater than zero", name, what)))
            }
        };

        let (shape, offset_index) = match name {
            "makeBox" => {
                call.expect(4, &["pnt"])?;
                (
                    PrimitiveShape::Box {
                        length: positive(call.required_number(0, "length")?, "length")?,
                        width: positive(call.required_number(1, "width")?, "width")?,
                        height: positive(call.required_number(2, "height")?, "height")?,
                    },
                    3,
                )
            }
            "makeCylinder" => {
                call.expect(3, &["pnt"])?;
                (
                    PrimitiveShape::Cylinder {
                        radius: positive(call.required_number(0, "radius")?, "radius")?,
                        height: positive(call.required_number(1, "height")?, "height")?,
                    },
                    2,
                )
            }
            "makeSphere" => {
                call.expect(2, &["pnt"])?;
                (
                    PrimitiveShape::Sphere {
                        radius: positive(call.required_number(0, "radius")?, "radius")?,
                    },
                    1,
                )
            }
            "makeCone" => {
                call.expect(4, &["pnt"])?;
                let radius1 = call.required_number(0, "radius1")?;
                let radius2 = call.required_number(1, "radius2")?;
                if radius1 < 0.0 || radius2 < 0.0 || (radius1 == 0.0 && radius2 == 0.0) {
                    return Err(value_error("makeCone() radii must be non-negative and not both zero"));
                }
                (
                    PrimitiveShape::Cone {
                        radius1,
                        radius2,
                        height: positive(call.required_number(2, "height")?, "height")?,
                    },
                    3,
                )
            }
            "makeTorus" => {
                call.expect(3, &["pnt"])?;
                (
                    PrimitiveShape::Torus {
                        radius1: positive(call.required_number(0, "radius1")?, "radius1")?,
                        radius2: positive(call.required_number(1, "radius2")?, "radius2")?,
                    },
                    2,
                )
            }
            "show" => {
                call.expect(2, &["name"])?;
                let (shape, offset) = match call.required(0, "shape")? {
                    Value::Shape { shape, offset } => (shape.clone(), *offset),
                    other => {
                        return Err(type_error(format!(
                            "show() argument 'shape' must be Shape, not '{}'",
                            other.type_name()
                        )))
                    }
                };
                let object_name = call.string(1, "name")?.unwrap_or_else(|| "Shape".to_string());

                self.workspace.active_or_new();
                let index = self.workspace.active_index().unwrap_or(0);
                let document = self.document_mut(index)?;
                let object = document.add_object(FEATURE_TYPE, &object_name)?;
                object.feature_shape = Some(shape);
                object.placement.base = offset;
                let created = object.name.clone();

                with_logger(|logger| logger.log_geometry("created", &created, FEATURE_TYPE));
                return Ok(Value::Object {
                    doc: index,
                    name: created,
                });
            }
            _ => {
                return Err(RuntimeError::new(
                    ErrorKind::Attribute,
                    format!("module 'Part' has no attribute '{}'", name),
                ))
            }
        };

        let offset = call.vector(offset_index, "pnt")?.unwrap_or_default();
        Ok(Value::Shape { shape, offset })
    }

    fn call_document(&mut self, index: usize, name: &str, call: &CallArgs) -> Result<Value, RuntimeError> {
        match name {
            "addObject" => {
                call.expect(2, &["type", "name"])?;
                let type_id = call.required_string(0, "type")?;
                let base = call.string(1, "name")?.unwrap_or_else(|| {
                    type_id.rsplit("::").next().unwrap_or(type_id.as_str()).to_string()
                });
                let document = self.document_mut(index)?;
                let created = document.add_object(&type_id, &base)?.name.clone();

                with_logger(|logger| logger.log_geometry("created", &created, &type_id));
                Ok(Value::Object {
                    doc: index,
                    name: created,
                })
            }
            "getObject" => {
                call.expect(1, &["name"])?;
                let object = call.required_string(0, "name")?;
                let exists = self.document(index)?.get_object(&object).is_some();
                Ok(if exists {
                    Value::Object {
                        doc: index,
                        name: object,
                    }
                } else {
                    Value::None
                })
            }
            "getObjectsByLabel" => {
                call.expect(1, &["label"])?;
                let label = call.required_string(0, "label")?;
                Ok(Value::List(
                    self.document(index)?
                        .objects()
                        .iter()
                        .filter(|o| o.label == label)
                        .map(|o| Value::Object {
                            doc: index,
                            name: o.name.clone(),
                        })
                        .collect(),
                ))
            }
            "removeObject" => {
                call.expect(1, &["name"])?;
                let object = call.required_string(0, "name")?;
                self.document_mut(index)?.remove_object(&object)?;
                Ok(Value::None)
            }
            "recompute" => {
                call.expect(0, &[])?;
                let count = self.document_mut(index)?.recompute()?;
                Ok(Value::Number(count as f64))
            }
            _ => Err(RuntimeError::new(
                ErrorKind::Attribute,
                format!("'Document' object has no attribute '{}'", name),
            )),
        }
    }

    fn call_object(&mut self, index: usize, object: &str, name: &str, call: &CallArgs) -> Result<Value, RuntimeError> {
        match name {
            "setExpression" => {
                call.expect(2, &[])?;
                let property = call.required_string(0, "property")?;
                let expression = call.string(1, "expression")?.unwrap_or_default();
                self.document_mut(index)?
                    .set_expression(object, &property, &expression)?;
                Ok(Value::None)
            }
            "recompute" => {
                call.expect(0, &[])?;
                self.document_mut(index)?.recompute()?;
                Ok(Value::Bool(true))
            }
            "set" => {
                call.expect(2, &[])?;
                let cell = call.required_string(0, "cell")?;
                let content = match call.required(1, "content")? {
                    Value::Str(s) => s.clone(),
                    v @ (Value::Number(_) | Value::Bool(_)) => v.to_string(),
                    other => {
                        return Err(type_error(format!(
                            "set() content must be str, not '{}'",
                            other.type_name()
                        )))
                    }
                };
                self.document_mut(index)?.sheet_mut(object)?.set(&cell, &content)?;
                Ok(Value::None)
            }
            "get" => {
                call.expect(1, &[])?;
                let cell = call.required_string(0, "cell")?;
                let document = self.document(index)?;
                let sheet = document
                    .sheet(object)
                    .ok_or_else(|| DocumentError::NotASpreadsheet(object.to_string()))?;
                let content = sheet
                    .get(&cell)?
                    .ok_or_else(|| value_error(format!("cell {} is empty", cell)))?;

                if content.starts_with('=') || content.trim().parse::<f64>().is_ok() {
                    let number = expression::cell_value(document, object, cell.parse()?)?;
                    Ok(Value::Number(number))
                } else {
                    Ok(Value::Str(content.to_string()))
                }
            }
            "getContents" => {
                call.expect(1, &[])?;
                let cell = call.required_string(0, "cell")?;
                let document = self.document(index)?;
                let content = document
                    .sheet(object)
                    .ok_or_else(|| DocumentError::NotASpreadsheet(object.to_string()))?
                    .get(&cell)?
                    .unwrap_or_default();
                Ok(Value::Str(content.to_string()))
            }
            "setAlias" => {
                call.expect(2, &[])?;
                let cell = call.required_string(0, "cell")?;
                let alias = call.required_string(1, "alias")?;
                self.document_mut(index)?.sheet_mut(object)?.set_alias(&cell, &alias)?;
                Ok(Value::None)
            }
            "getAlias" => {
                call.expect(1, &[])?;
                let cell = call.required_string(0, "cell")?;
                let document = self.document(index)?;
                let alias = document
                    .sheet(object)
                    .ok_or_else(|| DocumentError::NotASpreadsheet(object.to_string()))?
                    .get_alias(&cell)?;
                Ok(alias.map(|a| Value::Str(a.to_string())).unwrap_or(Value::None))
            }
            "getUsedCells" => {
                call.expect(0, &[])?;
                let document = self.document(index)?;
                let cells = document
                    .sheet(object)
                    .ok_or_else(|| DocumentError::NotASpreadsheet(object.to_string()))?
                    .used_cells();
                Ok(Value::List(cells.into_iter().map(Value::Str).collect()))
            }
            _ => Err(RuntimeError::new(
                ErrorKind::Attribute,
                format!("'{}' object has no attribute '{}'", object, name),
            )),
        }
    }
}

fn target_expr(target: &Target) -> Result<Expr, RuntimeError> {
    Ok(match target {
        Target::Name(name) => Expr::Name(name.clone()),
        Target::Attribute(object, attr) => Expr::Attribute(Box::new(object.clone()), attr.clone()),
        Target::Index(object, index) => Expr::Index(Box::new(object.clone()), Box::new(index.clone())),
        Target::Tuple(_) => return Err(type_error("illegal expression for augmented assignment")),
    })
}

fn update_value(current: Value, path: &[String], new: Value) -> Result<Value, RuntimeError> {
    let cannot = |ty: &str, attr: &str| {
        RuntimeError::new(
            ErrorKind::Attribute,
            format!("attribute '{}' of '{}' object cannot be set", attr, ty),
        )
    };
    let (head, rest) = path
        .split_first()
        .ok_or_else(|| type_error("empty attribute path"))?;

    match current {
        Value::Vector(mut v) if rest.is_empty() => {
            let n = new
                .as_number()
                .ok_or_else(|| type_error(format!("Vector.{} must be a number", head)))?;
            match head.as_str() {
                "x" => v.x = n,
                "y" => v.y = n,
                "z" => v.z = n,
                _ => return Err(cannot("Vector", head)),
            }
            Ok(Value::Vector(v))
        }
        Value::Placement(mut p) => {
            match (head.as_str(), rest.is_empty(), new) {
                ("Base", true, Value::Vector(v)) => p.base = v,
                ("Base", false, new) => match update_value(Value::Vector(p.base), rest, new)? {
                    Value::Vector(v) => p.base = v,
                    _ => return Err(cannot("Placement", head)),
                },
                ("Rotation", true, Value::Rotation(r)) => p.rotation = r,
                (_, _, other) => {
                    return Err(type_error(format!(
                        "cannot set Placement.{} to '{}'",
                        path.join("."),
                        other.type_name()
                    )))
                }
            }
            Ok(Value::Placement(p))
        }
        other => Err(cannot(other.type_name(), head)),
    }
}

fn axis_rotation(axis: &Vector3, angle: f64) -> Result<Rotation, RuntimeError> {
    let len = (axis.x * axis.x + axis.y * axis.y + axis.z * axis.z).sqrt();
    if len == 0.0 {
        return Err(value_error("Rotation() axis must not be a null vector"));
    }
    let (x, y, z) = (axis.x / len, axis.y / len, axis.z / len);
    let eps = 1e-9;
    if x.abs() < eps && y.abs() < eps {
        Ok(Rotation::new(angle * z.signum(), 0.0, 0.0))
    } else if x.abs() < eps && z.abs() < eps {
        Ok(Rotation::new(0.0, angle * y.signum(), 0.0))
    } else if y.abs() < eps && z.abs() < eps {
        Ok(Rotation::new(0.0, 0.0, angle * x.signum()))
    } else {
        Err(value_error("Rotation() supports axis-aligned rotations only"))
    }
}

fn iterate(value: Value) -> Result<Vec<Value>, RuntimeError> {
    match value {
        Value::List(items) => Ok(items),
        Value::Str(s) => Ok(s.chars().map(|c| Value::Str(c.to_string())).collect()),
        Value::Vector(v) => Ok(vec![Value::Number(v.x), Value::Number(v.y), Value::Number(v.z)]),
        other => Err(type_error(format!("'{}' object is not iterable", other.type_name()))),
    }
}

fn subscript(value: Value, index: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::List(mut items) => {
            let i = as_index(index, items.len())?;
            Ok(items.swap_remove(i))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = as_index(index, chars.len())?;
            Ok(Value::Str(chars[i].to_string()))
        }
        Value::Vector(v) => {
            let i = as_index(index, 3)?;
            Ok(Value::Number([v.x, v.y, v.z][i]))
        }
        other => Err(type_error(format!("'{}' object is not subscriptable", other.type_name()))),
    }
}

fn format_spec(value: &Value, spec: Option<&str>) -> Result<String, RuntimeError> {
    let spec = match spec {
        None | Some("") => return Ok(value.to_string()),
        Some(spec) => spec,
    };
    let number = value
        .as_number()
        .ok_or_else(|| value_error(format!("format spec '{}' needs a number", spec)))?;

    if spec == "d" {
        return Ok(format!("{}", number.trunc() as i64));
    }
    if let Some(precision) = spec.strip_prefix('.').and_then(|s| s.strip_suffix('f')) {
        let precision: usize = precision
            .parse()
            .map_err(|_| value_error(format!("invalid format spec '{}'", spec)))?;
        if precision > MAX_PRECISION {
            return Err(value_error(format!("precision {} exceeds the limit of {}", precision, MAX_PRECISION)));
        }
        return Ok(format!("{:.*}", precision, number));
    }
    Err(value_error(format!("unsupported format spec '{}'", spec)))
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    let symbol = match op {
        BinOp::Add => "+",
        BinOp::Sub => "-",
        BinOp::Mul => "*",
        BinOp::Div => "/",
        BinOp::FloorDiv => "//",
        BinOp::Mod => "%",
        BinOp::Pow => "**",
    };
    let unsupported = |l: &Value, r: &Value| {
        type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            symbol,
            l.type_name(),
            r.type_name()
        ))
    };

    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        let zero = || RuntimeError::new(ErrorKind::ZeroDivision, "division by zero");
        let result = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div if b == 0.0 => return Err(zero()),
            BinOp::Div => a / b,
            BinOp::FloorDiv if b == 0.0 => return Err(zero()),
            BinOp::FloorDiv => (a / b).floor(),
            BinOp::Mod if b == 0.0 => return Err(zero()),
            BinOp::Mod => a - b * (a / b).floor(),
            BinOp::Pow => a.powf(b),
        };
        return Ok(Value::Number(result));
    }

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            check_str_len(a.len().saturating_add(b.len()))?;
            Ok(Value::Str(a + &b))
        }
        (BinOp::Add, Value::List(mut a), Value::List(b)) => {
            check_list_len(a.len().saturating_add(b.len()))?;
            a.extend(b);
            Ok(Value::List(a))
        }
        (BinOp::Mul, Value::Str(s), n @ Value::Number(_)) | (BinOp::Mul, n @ Value::Number(_), Value::Str(s)) => {
            let count = usize::try_from(integral(&n, "*")?.max(0)).unwrap_or(usize::MAX);
            check_str_len(s.len().saturating_mul(count))?;
            Ok(Value::Str(s.repeat(count)))
        }
        (BinOp::Mul, Value::List(items), n @ Value::Number(_))
        | (BinOp::Mul, n @ Value::Number(_), Value::List(items)) => {
            let count = usize::try_from(integral(&n, "*")?.max(0)).unwrap_or(usize::MAX);
            check_list_len(items.len().saturating_mul(count))?;
            Ok(Value::List(items.iter().cloned().cycle().take(items.len() * count).collect()))
        }
        (BinOp::Add, Value::Vector(a), Value::Vector(b)) => {
            Ok(Value::Vector(Vector3::new(a.x + b.x, a.y + b.y, a.z + b.z)))
        }
        (BinOp::Sub, Value::Vector(a), Value::Vector(b)) => {
            Ok(Value::Vector(Vector3::new(a.x - b.x, a.y - b.y, a.z - b.z)))
        }
        (BinOp::Mul, Value::Vector(v), Value::Number(k)) | (BinOp::Mul, Value::Number(k), Value::Vector(v)) => {
            Ok(Value::Vector(Vector3::new(v.x * k, v.y * k, v.z * k)))
        }
        (BinOp::Div, Value::Vector(_), Value::Number(k)) if k == 0.0 => {
            Err(RuntimeError::new(ErrorKind::ZeroDivision, "division by zero"))
        }
        (BinOp::Div, Value::Vector(v), Value::Number(k)) => {
            Ok(Value::Vector(Vector3::new(v.x / k, v.y / k, v.z / k)))
        }
        (_, left, right) => Err(unsupported(&left, &right)),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let ordering = match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (left, right) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };

    let result = match op {
        CmpOp::Eq => ordering.map(|o| o.is_eq()).unwrap_or_else(|| left == right),
        CmpOp::Ne => !ordering.map(|o| o.is_eq()).unwrap_or_else(|| left == right),
        _ => {
            let ordering = ordering.ok_or_else(|| {
                type_error(format!(
                    "comparison not supported between instances of '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }
        }
    };
    Ok(Value::Bool(result))
}

fn call_builtin(builtin: Builtin, call: &CallArgs) -> Result<Value, RuntimeError> {
    if !call.kwargs.is_empty() {
        return Err(type_error(format!("{}() takes no keyword arguments", builtin.name())));
    }
    let args = &call.args;

    match builtin {
        Builtin::Abs => {
            call.expect(1, &[])?;
            match args.first() {
                Some(Value::Vector(v)) => Ok(Value::Number((v.x * v.x + v.y * v.y + v.z * v.z).sqrt())),
                Some(v) => v
                    .as_number()
                    .map(|n| Value::Number(n.abs()))
                    .ok_or_else(|| type_error(format!("bad operand type for abs(): '{}'", v.type_name()))),
                None => Err(type_error("abs() takes exactly one argument (0 given)")),
            }
        }
        Builtin::Min | Builtin::Max => {
            let items = match args.as_slice() {
                [single] => iterate(single.clone())?,
                many => many.to_vec(),
            };
            let mut best: Option<Value> = None;
            for item in items {
                best = Some(match best {
                    None => item,
                    Some(current) => {
                        let op = if builtin == Builtin::Min { CmpOp::Lt } else { CmpOp::Gt };
                        if compare(op, &item, &current)?.truthy() {
                            item
                        } else {
                            current
                        }
                    }
                });
            }
            best.ok_or_else(|| value_error(format!("{}() arg is an empty sequence", builtin.name())))
        }
        Builtin::Range => {
            call.expect(3, &[])?;
            let (start, stop, step) = match args.as_slice() {
                [stop] => (0, integral(stop, "range")?, 1),
                [start, stop] => (integral(start, "range")?, integral(stop, "range")?, 1),
                [start, stop, step] => (
                    integral(start, "range")?,
                    integral(stop, "range")?,
                    integral(step, "range")?,
                ),
                _ => return Err(type_error("range expected at least 1 argument, got 0")),
            };
            if step == 0 {
                return Err(value_error("range() arg 3 must not be zero"));
            }
            // i128 so that spans between saturated i64 bounds cannot overflow
            let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
            let span = if step > 0 { stop - start } else { start - stop };
            let len = if span <= 0 { 0 } else { (span - 1) / step.abs() + 1 };
            if len > MAX_RANGE_LEN as i128 {
                return Err(value_error(format!("range() of {} items exceeds the limit of {}", len, MAX_RANGE_LEN)));
            }
            Ok(Value::List(
                (0..len)
                    .map(|i| Value::Number((start + i * step) as f64))
                    .collect(),
            ))
        }
        Builtin::Len => {
            call.expect(1, &[])?;
            match args.first() {
                Some(Value::List(items)) => Ok(Value::Number(items.len() as f64)),
                Some(Value::Str(s)) => Ok(Value::Number(s.chars().count() as f64)),
                Some(other) => Err(type_error(format!("object of type '{}' has no len()", other.type_name()))),
                None => Err(type_error("len() takes exactly one argument (0 given)")),
            }
        }
        Builtin::Int => {
            call.expect(1, &[])?;
            match args.first() {
                None => Ok(Value::Number(0.0)),
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<i64>()
                    .map(|n| Value::Number(n as f64))
                    .map_err(|_| value_error(format!("invalid literal for int() with base 10: '{}'", s))),
                Some(v) => v
                    .as_number()
                    .map(|n| Value::Number(n.trunc()))
                    .ok_or_else(|| type_error(format!("int() argument must be a string or a number, not '{}'", v.type_name()))),
            }
        }
        Builtin::Float => {
            call.expect(1, &[])?;
            match args.first() {
                None => Ok(Value::Number(0.0)),
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| value_error(format!("could not convert string to float: '{}'", s))),
                Some(v) => v
                    .as_number()
                    .map(Value::Number)
                    .ok_or_else(|| type_error(format!("float() argument must be a string or a number, not '{}'", v.type_name()))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::parser::parse;

    fn run(source: &str) -> (Workspace, Result<HashMap<String, Value>, RuntimeError>) {
        let mut workspace = Workspace::new();
        let program = parse(source).unwrap();
        let result = {
            let mut interpreter = Interpreter::new(&mut workspace, 10_000);
            interpreter.run(&program).map(|_| interpreter.locals.clone())
        };
        (workspace, result)
    }

    #[test]
    fn test_creates_box_in_new_document() {
        let (workspace, result) = run(
            "doc = App.ActiveDocument or App.newDocument('Demo')\n\
             box = doc.addObject('Part::Box', 'Base')\n\
             box.Length = 40\n\
             box.Placement.Base = App.Vector(1, 2, 3)\n\
             box.Placement.Base.z = 7\n\
             doc.recompute()\n",
        );
        result.unwrap();

        let doc = workspace.active_document().unwrap();
        assert_eq!(doc.name, "Demo");
        let object = doc.get_object("Base").unwrap();
        assert_eq!(object.number("Length"), Some(40.0));
        assert_eq!(object.placement.base, Vector3::new(1.0, 2.0, 7.0));
    }

    #[test]
    fn test_freecad_alias_and_loops() {
        let (workspace, result) = run(
            "doc = FreeCAD.newDocument()\n\
             for i in range(3):\n\
             \x20   c = doc.addObject('Part::Cylinder', f'Post{i}')\n\
             \x20   c.Radius = 2 + i\n\
             \x20   c.Placement.Base.x = i * 15\n",
        );
        result.unwrap();

        let doc = workspace.active_document().unwrap();
        assert_eq!(doc.object_names(), vec!["Post0", "Post1", "Post2"]);
        let last = doc.get_object("Post2").unwrap();
        assert_eq!(last.number("Radius"), Some(4.0));
        assert_eq!(last.placement.base.x, 30.0);
    }

    #[test]
    fn test_part_shapes_and_show() {
        let (workspace, result) = run(
            "shape = Part.makeBox(10, 20, 30, App.Vector(5, 0, 0))\n\
             vol = shape.Volume\n\
             obj = Part.show(shape, 'Block')\n",
        );
        let locals = result.unwrap();

        assert_eq!(locals["vol"], Value::Number(6000.0));
        let doc = workspace.active_document().unwrap();
        let object = doc.get_object("Block").unwrap();
        assert_eq!(object.type_id, FEATURE_TYPE);
        assert_eq!(object.placement.base.x, 5.0);
    }

    #[test]
    fn test_spreadsheet_methods() {
        let (workspace, result) = run(
            "doc = App.newDocument()\n\
             sheet = doc.addObject('Spreadsheet::Sheet', 'Params')\n\
             sheet.set('B2', '12')\n\
             sheet.setAlias('B2', 'side')\n\
             sheet.set('B3', '=side * 2')\n\
             doubled = sheet.get('B3')\n\
             via_alias = sheet.side\n\
             cells = sheet.getUsedCells()\n\
             box = doc.addObject('Part::Box')\n\
             box.setExpression('Height', 'Params.side')\n\
             doc.recompute()\n",
        );
        let locals = result.unwrap();

        assert_eq!(locals["doubled"], Value::Number(24.0));
        assert_eq!(locals["via_alias"], Value::Number(12.0));
        assert_eq!(locals["cells"], Value::List(vec![Value::Str("B2".into()), Value::Str("B3".into())]));
        let doc = workspace.active_document().unwrap();
        assert_eq!(doc.get_object("Box").unwrap().number("Height"), Some(12.0));
    }

    #[test]
    fn test_expressions_and_builtins() {
        let (_, result) = run(
            "a = max([3, 9, 4])\n\
             b = min(2, -1) + abs(-5)\n\
             c = int('7') * float('1.5')\n\
             d = 7 // 2 + 7 % 3 + 2 ** 3\n\
             e = len(range(2, 10, 3))\n\
             f = not (a > 5 and b < 0)\n\
             xs = []\n\
             xs.append(1)\n\
             xs += [2]\n\
             g = f'{c:.2f} mm'\n",
        );
        let locals = result.unwrap();

        assert_eq!(locals["a"], Value::Number(9.0));
        assert_eq!(locals["b"], Value::Number(4.0));
        assert_eq!(locals["c"], Value::Number(10.5));
        assert_eq!(locals["d"], Value::Number(12.0));
        assert_eq!(locals["e"], Value::Number(3.0));
        assert_eq!(locals["f"], Value::Bool(true));
        assert_eq!(locals["xs"], Value::List(vec![Value::Number(1.0), Value::Number(2.0)]));
        assert_eq!(locals["g"], Value::Str("10.50 mm".into()));
    }

    #[test]
    fn test_runtime_errors_carry_kind_and_line() {
        let (_, result) = run("x = 1\ny = undefined_name + 1\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Name);
        assert_eq!(err.line, 2);
        assert_eq!(err.to_string(), "line 2: NameError: name 'undefined_name' is not defined");

        let (_, result) = run("print('hi')");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Name);

        let (_, result) = run("x = 'a' + 1");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Type);

        let (_, result) = run("x = 1 / 0");
        assert_eq!(result.unwrap_err().kind, ErrorKind::ZeroDivision);

        let (_, result) = run("doc = App.newDocument()\nb = doc.addObject('Part::Box')\nb.Radius = 3");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Attribute);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_string_growth_is_capped() {
        let (_, result) = run("s = 'ab' * 1e19");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Value);

        let (_, result) = run("s = 'x' * 100000\ns = s + 'y'");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
        assert_eq!(err.line, 2);

        let (_, result) = run("s = 'x' * 60000\ns += s");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Value);

        let (_, result) = run("x = 1\ns = f'{x:.1000f}'");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Value);

        let (_, result) = run("s = 'ab' * 3");
        assert_eq!(result.unwrap()["s"], Value::Str("ababab".into()));
    }

    #[test]
    fn test_range_with_saturated_bounds() {
        let (_, result) = run("r = range(-1e30, 1e30)");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Value);

        let (_, result) = run("r = range(1e30, -1e30, -1)");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Value);

        let (_, result) = run("r = range(-1e30, 1e30, 1e30)");
        match &result.unwrap()["r"] {
            Value::List(items) => assert_eq!(items.len(), 3),
            other => panic!("expected a list, got {:?}", other),
        }
    }

    #[test]
    fn test_list_growth_is_capped() {
        let (_, result) = run("a = [1]\nfor i in range(22):\n    a = a + a\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Value);
        assert_eq!(err.line, 3);

        let (_, result) = run("a = [0] * 100000\na.append(1)");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Value);

        let (_, result) = run("a = [0] * 99999\na.extend([1, 2])");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Value);

        let (_, result) = run("a = []\nfor i in range(40):\n    a = [a]\n");
        assert_eq!(result.unwrap_err().kind, ErrorKind::Value);
    }

    #[test]
    fn test_copies_count_against_the_budget() {
        let (_, result) = run("a = [0] * 100000\nfor i in range(1000):\n    b = a\n");
        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Limit);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_long_operator_chain_is_an_error() {
        let source = format!("x = {}1", "1 + ".repeat(300));
        let (_, result) = run(&source);
        assert_eq!(result.unwrap_err().kind, ErrorKind::Limit);

        let source = format!("x = {}1", "1 + ".repeat(50));
        assert_eq!(run(&source).1.unwrap()["x"], Value::Number(51.0));
    }

    #[test]
    fn test_statement_budget_stops_runaway_loops() {
        let mut workspace = Workspace::new();
        let program = parse("total = 0\nfor i in range(50000):\n    total = total + i\n").unwrap();
        let err = Interpreter::new(&mut workspace, 1000).run(&program).unwrap_err();

        assert_eq!(err.kind, ErrorKind::Limit);
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_console_output_collected() {
        let (mut workspace, result) = run("App.Console.PrintMessage('made a box\\n')\nApp.Console.PrintWarning('careful')");
        result.unwrap();
        assert_eq!(workspace.take_console(), vec!["made a box", "Warning: careful"]);
    }

    #[test]
    fn test_axis_rotation() {
        let (_, result) = run(
            "r = App.Rotation(App.Vector(0, 0, 1), 45)\n\
             p = App.Placement(App.Vector(1, 0, 0), r)\n\
             p.Base.y = 4\n",
        );
        let locals = result.unwrap();

        assert_eq!(locals["r"], Value::Rotation(Rotation::new(45.0, 0.0, 0.0)));
        assert_eq!(
            locals["p"],
            Value::Placement(Placement {
                base: Vector3::new(1.0, 4.0, 0.0),
                rotation: Rotation::new(45.0, 0.0, 0.0),
            })
        );
    }
}
