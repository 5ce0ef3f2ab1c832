//! Compile-time environment schema.
//!
//! Type tags exist only during compilation: they drive attribute checking
//! and "did you mean" suggestions, and have no runtime effect. A schema is
//! plain data so hosts can declare unit APIs in YAML instead of code.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::{Deserializer, Error as _};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

/// Bot squads are numbered B1-B4, gundam slots G1-G30.
static BOT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^B[1-4]$").expect("bot pattern is valid"));
static GUNDAM_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^G([1-9]|[12][0-9]|30)$").expect("gundam pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeTag {
    Any,
    Number,
    Str,
    Bool,
    List(Box<TypeTag>),
    Object(String),
}

impl TypeTag {
    pub fn object(name: &str) -> Self {
        TypeTag::Object(name.to_string())
    }

    pub fn list_of(element: TypeTag) -> Self {
        TypeTag::List(Box::new(element))
    }

    /// Parses the textual tag syntax used in schema files: `any`, `number`,
    /// `string`, `bool`, `List`, `List[Enemy]`, or an object type name.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        match text {
            "any" => Ok(TypeTag::Any),
            "number" => Ok(TypeTag::Number),
            "string" => Ok(TypeTag::Str),
            "bool" => Ok(TypeTag::Bool),
            "List" => Ok(TypeTag::list_of(TypeTag::Any)),
            _ => {
                if let Some(inner) = text.strip_prefix("List[").and_then(|t| t.strip_suffix(']')) {
                    return Ok(TypeTag::list_of(TypeTag::parse(inner)?));
                }
                if text.is_empty() || !text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(format!("invalid type tag '{text}'"));
                }
                Ok(TypeTag::Object(text.to_string()))
            }
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Any => write!(f, "any"),
            TypeTag::Number => write!(f, "number"),
            TypeTag::Str => write!(f, "string"),
            TypeTag::Bool => write!(f, "bool"),
            TypeTag::List(element) if **element == TypeTag::Any => write!(f, "List"),
            TypeTag::List(element) => write!(f, "List[{element}]"),
            TypeTag::Object(name) => write!(f, "{name}"),
        }
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        TypeTag::parse(&text).map_err(D::Error::custom)
    }
}

/// Attribute table of one object type.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TypeSchema {
    /// Attribute name → static tag of the value it yields (for callable
    /// attributes, the tag of the call result).
    #[serde(default)]
    pub attributes: HashMap<String, TypeTag>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct EnvSchema {
    #[serde(default)]
    pub types: HashMap<String, TypeSchema>,
    #[serde(default)]
    pub bindings: HashMap<String, TypeTag>,
    #[serde(default)]
    pub self_type: Option<TypeTag>,
}

impl EnvSchema {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn with_self_type(mut self, tag: TypeTag) -> Self {
        self.self_type = Some(tag);
        self
    }

    /// Static tag of a host-provided binding, including the pattern-matched
    /// unit names.
    pub fn binding_tag(&self, name: &str) -> Option<TypeTag> {
        if let Some(tag) = self.bindings.get(name) {
            return Some(tag.clone());
        }
        pattern_tag(name)
    }

    pub fn attributes_of(&self, type_name: &str) -> Option<&TypeSchema> {
        self.types.get(type_name)
    }

    /// The stock tower-defense schema: unit, enemy, player, and core APIs.
    pub fn default_game() -> Self {
        let number = || TypeTag::Number;
        let position = || TypeTag::list_of(TypeTag::Number);
        let scan = || TypeTag::list_of(TypeTag::object("Enemy"));

        let bot = TypeSchema {
            attributes: HashMap::from([
                ("position".to_string(), position()),
                ("health".to_string(), number()),
                ("max_health".to_string(), number()),
                ("ammo".to_string(), number()),
                ("forward".to_string(), TypeTag::Any),
                ("backward".to_string(), TypeTag::Any),
                ("scan".to_string(), scan()),
                ("fire".to_string(), TypeTag::Any),
                ("reload".to_string(), TypeTag::Any),
                ("hacker".to_string(), TypeTag::object("Player")),
            ]),
        };
        let gundam = TypeSchema {
            attributes: HashMap::from([
                ("position".to_string(), position()),
                ("health".to_string(), number()),
                ("energy".to_string(), number()),
                ("shield".to_string(), number()),
                ("forward".to_string(), TypeTag::Any),
                ("backward".to_string(), TypeTag::Any),
                ("scan".to_string(), scan()),
                ("fire".to_string(), TypeTag::Any),
                ("reload".to_string(), TypeTag::Any),
                ("hacker".to_string(), TypeTag::object("Player")),
            ]),
        };
        let enemy = TypeSchema {
            attributes: HashMap::from([
                ("position".to_string(), position()),
                ("health".to_string(), number()),
                ("speed".to_string(), number()),
                ("armor".to_string(), number()),
            ]),
        };
        let player = TypeSchema {
            attributes: HashMap::from([
                ("position".to_string(), position()),
                ("scrap".to_string(), number()),
            ]),
        };
        let core = TypeSchema {
            attributes: HashMap::from([
                ("position".to_string(), position()),
                ("health".to_string(), number()),
            ]),
        };

        Self {
            types: HashMap::from([
                ("Bot".to_string(), bot),
                ("Gundam".to_string(), gundam),
                ("Enemy".to_string(), enemy),
                ("Player".to_string(), player),
                ("Core".to_string(), core),
            ]),
            bindings: HashMap::new(),
            self_type: None,
        }
    }
}

/// Tags for names every program sees regardless of schema.
pub fn builtin_tag(name: &str) -> Option<TypeTag> {
    match name {
        "len" | "range" | "abs" => Some(TypeTag::Any),
        "nearest" | "furthest" | "weakest" | "strongest" => Some(TypeTag::Any),
        "BULLET" | "ROCKET" | "LASER" | "ICE" | "GRENADE" => Some(TypeTag::Number),
        "CORE" => Some(TypeTag::object("Core")),
        _ => None,
    }
}

/// Result tag of calling a builtin, for best-effort type propagation.
pub fn builtin_call_tag(name: &str) -> Option<TypeTag> {
    match name {
        "len" | "abs" => Some(TypeTag::Number),
        "range" => Some(TypeTag::list_of(TypeTag::Number)),
        "nearest" | "furthest" | "weakest" | "strongest" => Some(TypeTag::object("Enemy")),
        _ => None,
    }
}

pub fn pattern_tag(name: &str) -> Option<TypeTag> {
    if BOT_PATTERN.is_match(name) {
        return Some(TypeTag::object("Bot"));
    }
    if GUNDAM_PATTERN.is_match(name) {
        return Some(TypeTag::object("Gundam"));
    }
    None
}
