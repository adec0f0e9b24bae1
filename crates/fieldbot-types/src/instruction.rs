//! One program step and the closed set of movement kinds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Built-in alias table mapping normalised free-text movement types to the
/// canonical kind names understood by [`InstructionKind::from_canonical`].
///
/// Keys are lower-case with spaces and hyphens folded to `_`.
pub const INSTRUCTION_TYPES: &[(&str, &str)] = &[
    ("walk", "walk"),
    ("move", "walk"),
    ("forward", "walk"),
    ("line", "walk"),
    ("straight", "walk"),
    ("rotate", "rotate"),
    ("rotation", "rotate"),
    ("turn", "rotate"),
    ("arc", "arc"),
    ("circle", "arc"),
    ("curve", "arc"),
    ("spray_on", "spray_on"),
    ("paint_on", "spray_on"),
    ("spray_off", "spray_off"),
    ("paint_off", "spray_off"),
    ("wait", "wait"),
    ("pause", "wait"),
    ("delay", "wait"),
];

/// The kind of motion or paint step.
///
/// The set is closed: anything the alias table cannot resolve is kept as
/// [`InstructionKind::Unknown`] so the executor can report it instead of
/// silently skipping it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstructionKind {
    Walk,
    Rotate,
    Arc,
    SprayOn,
    SprayOff,
    Wait,
    Unknown(String),
}

impl InstructionKind {
    /// Map a canonical kind name (`"walk"`, `"rotate"`, …) to its variant.
    pub fn from_canonical(name: &str) -> Self {
        match name {
            "walk" => Self::Walk,
            "rotate" => Self::Rotate,
            "arc" => Self::Arc,
            "spray_on" => Self::SprayOn,
            "spray_off" => Self::SprayOff,
            "wait" => Self::Wait,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Resolve a free-text movement type.
    ///
    /// The text is trimmed, lower-cased and has spaces/hyphens folded to `_`,
    /// then looked up in `overrides` first and [`INSTRUCTION_TYPES`] second.
    pub fn resolve(raw: &str, overrides: &BTreeMap<String, String>) -> Self {
        let key = normalise(raw);
        if let Some(canonical) = overrides.get(&key) {
            return Self::from_canonical(&normalise(canonical));
        }
        match INSTRUCTION_TYPES.iter().find(|(alias, _)| *alias == key) {
            Some((_, canonical)) => Self::from_canonical(canonical),
            None => Self::Unknown(key),
        }
    }

    /// Canonical name used when serialising back to the wire shape.
    pub fn wire_name(&self) -> &str {
        match self {
            Self::Walk => "walk",
            Self::Rotate => "rotate",
            Self::Arc => "arc",
            Self::SprayOn => "spray_on",
            Self::SprayOff => "spray_off",
            Self::Wait => "wait",
            Self::Unknown(raw) => raw,
        }
    }
}

fn normalise(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

/// One atomic step of a pattern.
///
/// `quantity` is interpreted per kind: centimetres for [`Walk`], signed
/// degrees for [`Rotate`] (positive = counter-clockwise), radius in
/// centimetres for [`Arc`] and seconds for [`Wait`].  `angle` is only
/// meaningful for arcs.
///
/// [`Walk`]: InstructionKind::Walk
/// [`Rotate`]: InstructionKind::Rotate
/// [`Arc`]: InstructionKind::Arc
/// [`Wait`]: InstructionKind::Wait
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub order: i64,
    pub kind: InstructionKind,
    pub quantity: f64,
    pub angle: f64,
    pub paint: bool,
}

/// Sweep used for arcs that do not specify one.
pub const DEFAULT_ARC_ANGLE: f64 = 90.0;

impl Instruction {
    pub fn walk(order: i64, cm: f64, paint: bool) -> Self {
        Self::plain(order, InstructionKind::Walk, cm, paint)
    }

    pub fn rotate(order: i64, degrees: f64) -> Self {
        Self::plain(order, InstructionKind::Rotate, degrees, false)
    }

    pub fn arc(order: i64, radius_cm: f64, angle: f64, paint: bool) -> Self {
        Self {
            order,
            kind: InstructionKind::Arc,
            quantity: radius_cm,
            angle,
            paint,
        }
    }

    pub fn wait(order: i64, seconds: f64) -> Self {
        Self::plain(order, InstructionKind::Wait, seconds, false)
    }

    pub fn spray_on(order: i64) -> Self {
        Self::plain(order, InstructionKind::SprayOn, 0.0, false)
    }

    pub fn spray_off(order: i64) -> Self {
        Self::plain(order, InstructionKind::SprayOff, 0.0, false)
    }

    fn plain(order: i64, kind: InstructionKind, quantity: f64, paint: bool) -> Self {
        Self {
            order,
            kind,
            quantity,
            angle: 0.0,
            paint,
        }
    }
}
