//! [`Pattern`] – the ordered program built from loosely-typed records.
//!
//! Patterns arrive as `{"items": [ {...}, ... ]}` where every record uses
//! the field names of whatever app authored it.  A [`FieldMap`] names the
//! source fields for each logical attribute, and the parser coerces values
//! the forgiving way the authoring app expects:
//!
//! | Attribute | Coercion |
//! |---|---|
//! | order | integer; missing/falsy → 0 |
//! | quantity | float; missing/falsy/unparseable → 0 |
//! | type | lower-cased text routed through the alias table |
//! | paint | bool; absent → false, present-but-empty → true for walks |
//! | angle | arcs only; missing/zero → 90 |
//! | radius | arcs only; overrides quantity when present |
//!
//! Non-finite numbers (`"inf"`, `"NaN"`) are treated like unparseable ones.
//! Typed patterns go through the same normalisation, so every pattern
//! survives [`Pattern::to_wire`] and re-parsing unchanged.
//!
//! Records that are not objects, are empty, or carry no movement type are
//! dropped silently.  The surviving instructions are stable-sorted by order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::FieldError;
use crate::instruction::{DEFAULT_ARC_ANGLE, Instruction, InstructionKind};

/// Source field names for each logical instruction attribute.
///
/// Each attribute accepts a list of candidate names; the first one present
/// in a record wins.  The first name is also the one written by
/// [`Pattern::to_wire`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMap {
    #[serde(default = "default_order")]
    pub order: Vec<String>,
    #[serde(default = "default_quantity")]
    pub quantity: Vec<String>,
    #[serde(rename = "type", default = "default_type")]
    pub kind: Vec<String>,
    #[serde(default = "default_paint")]
    pub paint: Vec<String>,
    #[serde(default = "default_angle")]
    pub angle: Vec<String>,
    #[serde(default = "default_radius")]
    pub radius: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
fn default_order() -> Vec<String> {
    names(&["Instruction Order", "order"])
}
fn default_quantity() -> Vec<String> {
    names(&["Quantity", "Quantity of Movement", "quantity"])
}
fn default_type() -> Vec<String> {
    names(&["Type of Movement", "type"])
}
fn default_paint() -> Vec<String> {
    names(&["Paint", "paint"])
}
fn default_angle() -> Vec<String> {
    names(&["Angle", "angle"])
}
fn default_radius() -> Vec<String> {
    names(&["Radius", "radius"])
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            order: default_order(),
            quantity: default_quantity(),
            kind: default_type(),
            paint: default_paint(),
            angle: default_angle(),
            radius: default_radius(),
        }
    }
}

/// Parser configuration: field names plus extra movement-type aliases that
/// extend (and take precedence over) the built-in
/// [`INSTRUCTION_TYPES`][crate::INSTRUCTION_TYPES] table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    #[serde(default)]
    pub fields: FieldMap,
    #[serde(default)]
    pub type_aliases: BTreeMap<String, String>,
}

/// An ordered, immutable sequence of [`Instruction`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pattern {
    instructions: Vec<Instruction>,
}

impl Pattern {
    /// Build a pattern from already-typed instructions, stable-sorting them
    /// by order.  Non-finite quantities become 0; arcs without a usable
    /// angle get [`DEFAULT_ARC_ANGLE`] and other kinds carry no angle.
    pub fn from_instructions(mut instructions: Vec<Instruction>) -> Self {
        instructions.iter_mut().for_each(normalize);
        instructions.sort_by_key(|i| i.order);
        Self { instructions }
    }

    /// Parse a full pattern message (`{"items": [...]}`).
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::MalformedInput`] when the message is not an
    /// object or its `items` collection is absent or not an array.
    pub fn parse(message: &Value, config: &ParserConfig) -> Result<Self, FieldError> {
        let items = message
            .as_object()
            .ok_or_else(|| FieldError::MalformedInput("pattern message is not an object".into()))?
            .get("items")
            .ok_or_else(|| FieldError::MalformedInput("missing 'items' collection".into()))?
            .as_array()
            .ok_or_else(|| FieldError::MalformedInput("'items' is not an array".into()))?;
        Ok(Self::from_items(items, config))
    }

    /// Parse raw records, dropping empty and typeless ones.
    pub fn from_items(items: &[Value], config: &ParserConfig) -> Self {
        let instructions: Vec<Instruction> = items
            .iter()
            .filter_map(|item| item.as_object())
            .filter_map(|record| parse_record(record, config))
            .collect();

        let pattern = Self::from_instructions(instructions);
        if pattern
            .instructions
            .windows(2)
            .any(|pair| pair[0].order == pair[1].order)
        {
            warn!("pattern contains duplicate instruction orders; keeping input order for ties");
        }
        pattern
    }

    /// Serialise back into the `{"items": [...]}` wire shape using the first
    /// configured name of every field.
    pub fn to_wire(&self, fields: &FieldMap) -> Value {
        let items: Vec<Value> = self
            .instructions
            .iter()
            .map(|instr| {
                let mut record = Map::new();
                put(&mut record, &fields.order, Value::from(instr.order));
                put(&mut record, &fields.kind, Value::from(instr.kind.wire_name()));
                put(&mut record, &fields.quantity, Value::from(instr.quantity));
                put(&mut record, &fields.paint, Value::from(instr.paint));
                if instr.kind == InstructionKind::Arc {
                    put(&mut record, &fields.angle, Value::from(instr.angle));
                }
                Value::Object(record)
            })
            .collect();
        serde_json::json!({ "items": items })
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

impl<'a> IntoIterator for &'a Pattern {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Record parsing
// ────────────────────────────────────────────────────────────────────────────

fn parse_record(record: &Map<String, Value>, config: &ParserConfig) -> Option<Instruction> {
    let fields = &config.fields;
    let raw_kind = lookup(record, &fields.kind).and_then(type_text)?;
    let kind = InstructionKind::resolve(&raw_kind, &config.type_aliases);

    let order = lookup(record, &fields.order).map_or(0, coerce_int);
    let mut quantity = lookup(record, &fields.quantity).map_or(0.0, coerce_float);

    let paint = match lookup(record, &fields.paint) {
        None => false,
        Some(value) => coerce_bool(value).unwrap_or(kind == InstructionKind::Walk),
    };

    let angle = if kind == InstructionKind::Arc {
        if let Some(radius) = lookup(record, &fields.radius) {
            quantity = coerce_float(radius);
        }
        match lookup(record, &fields.angle).map(coerce_float) {
            Some(a) if a != 0.0 => a,
            _ => DEFAULT_ARC_ANGLE,
        }
    } else {
        0.0
    };

    Some(Instruction {
        order,
        kind,
        quantity,
        angle,
        paint,
    })
}

fn normalize(instr: &mut Instruction) {
    if !instr.quantity.is_finite() {
        warn!(order = instr.order, quantity = instr.quantity, "non-finite quantity coerced to 0");
        instr.quantity = 0.0;
    }
    instr.angle = if instr.kind != InstructionKind::Arc {
        0.0
    } else if instr.angle.is_finite() && instr.angle != 0.0 {
        instr.angle
    } else {
        DEFAULT_ARC_ANGLE
    };
}

fn lookup<'a>(record: &'a Map<String, Value>, candidates: &[String]) -> Option<&'a Value> {
    candidates.iter().find_map(|name| record.get(name))
}

fn put(record: &mut Map<String, Value>, candidates: &[String], value: Value) {
    if let Some(name) = candidates.first() {
        record.insert(name.clone(), value);
    }
}

/// Movement type as text; empty or null types count as absent.
fn type_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn coerce_float(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or_else(|_| {
            warn!(value = %s, "non-numeric quantity coerced to 0");
            0.0
        }),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    }
}

fn coerce_int(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .unwrap_or_else(|| n.as_f64().map_or(0, |f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        Value::Bool(true) => 1,
        _ => 0,
    }
}

/// `None` means "present but carries no value".
fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().is_some_and(|f| f != 0.0)),
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(matches!(
            s.trim().to_lowercase().as_str(),
            "true" | "yes" | "y" | "1" | "on"
        )),
        _ => None,
    }
}
