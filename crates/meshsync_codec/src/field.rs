//! Field schemas.
//!
//! A [`Field`] describes one value of a resource: its kind, and whether it
//! may be null or omitted. Structural kinds (sequences, mappings, structures,
//! tuples, polymorphic structures) nest further fields.
//!
//! Every field implements the same four operations:
//!
//! - `extract` copies the declared parts of a local value into wire shape
//! - `serialize` type-checks a (possibly partial) value for transmission
//! - `unserialize` type-checks a value received from the wire
//! - `validate` fully checks a value, including required and bound constraints

use crate::mime::MimeType;
use crate::validation::ValidationError;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// A scalar field kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Any JSON value, passed through unchecked.
    Any,
    /// A boolean.
    Boolean,
    /// A signed integer with optional bounds.
    Integer {
        /// Inclusive lower bound.
        minimum: Option<i64>,
        /// Inclusive upper bound.
        maximum: Option<i64>,
    },
    /// A floating-point number with optional bounds.
    Float {
        /// Inclusive lower bound.
        minimum: Option<f64>,
        /// Inclusive upper bound.
        maximum: Option<f64>,
    },
    /// A text string with optional length bounds (in characters).
    Text {
        /// Minimum length.
        min_length: Option<usize>,
        /// Maximum length.
        max_length: Option<usize>,
    },
    /// One of a fixed set of values.
    Enumeration(Vec<Value>),
}

impl Scalar {
    fn normalize(&self, value: &Value) -> Value {
        match (self, value) {
            (Scalar::Boolean, Value::String(text)) => match text.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => value.clone(),
            },
            (Scalar::Integer { .. }, Value::String(text)) => text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or_else(|_| value.clone()),
            (Scalar::Integer { .. }, Value::Number(n)) if n.as_i64().is_none() => {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        Value::from(f as i64)
                    }
                    _ => value.clone(),
                }
            }
            (Scalar::Float { .. }, Value::String(text)) => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .unwrap_or_else(|| value.clone()),
            _ => value.clone(),
        }
    }

    fn check_type(&self, value: &Value) -> Result<(), ValidationError> {
        let ok = match self {
            Scalar::Any | Scalar::Enumeration(_) => true,
            Scalar::Boolean => value.is_boolean(),
            Scalar::Integer { .. } => value.is_i64() || value.is_u64(),
            Scalar::Float { .. } => value.is_number(),
            Scalar::Text { .. } => value.is_string(),
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::token("invalid"))
        }
    }

    fn check_value(&self, value: &Value) -> Result<(), ValidationError> {
        match self {
            Scalar::Integer { minimum, maximum } => {
                let n = value.as_i64().unwrap_or(i64::MAX);
                if minimum.is_some_and(|min| n < min) {
                    return Err(ValidationError::token("minimum"));
                }
                if maximum.is_some_and(|max| n > max) {
                    return Err(ValidationError::token("maximum"));
                }
            }
            Scalar::Float { minimum, maximum } => {
                let n = value.as_f64().unwrap_or(f64::NAN);
                if minimum.is_some_and(|min| n < min) {
                    return Err(ValidationError::token("minimum"));
                }
                if maximum.is_some_and(|max| n > max) {
                    return Err(ValidationError::token("maximum"));
                }
            }
            Scalar::Text {
                min_length,
                max_length,
            } => {
                let len = value.as_str().map_or(0, |s| s.chars().count());
                if min_length.is_some_and(|min| len < min) {
                    return Err(ValidationError::token("min_length"));
                }
                if max_length.is_some_and(|max| len > max) {
                    return Err(ValidationError::token("max_length"));
                }
            }
            Scalar::Enumeration(values) => {
                if !values.contains(value) {
                    return Err(ValidationError::token("invalid"));
                }
            }
            Scalar::Any | Scalar::Boolean => {}
        }
        Ok(())
    }

    fn serialize_value(&self, value: Value, mime: MimeType) -> Value {
        match (self, mime, value) {
            (Scalar::Boolean, MimeType::UrlEncoded, Value::Bool(b)) => {
                Value::String(if b { "true" } else { "false" }.into())
            }
            (_, _, value) => value,
        }
    }
}

/// A named set of fields describing a structured value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Structure {
    fields: BTreeMap<String, Field>,
}

impl Structure {
    /// Creates an empty structure.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        let name = name.into();
        let field = field.named(name.clone());
        self.fields.insert(name, field);
        self
    }

    /// Returns a member field by name.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Iterates over members in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, field)| (name.as_str(), field))
    }

    /// Returns the member names in name order.
    pub fn names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// Returns the number of members.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the structure has no members.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn extract(&self, members: &Map<String, Value>) -> Map<String, Value> {
        let mut extraction = Map::new();
        for (name, field) in &self.fields {
            if let Some(value) = members.get(name) {
                if field.is_structural() {
                    if !value.is_null() {
                        extraction.insert(name.clone(), field.extract(value));
                    }
                } else {
                    extraction.insert(name.clone(), value.clone());
                }
            }
        }
        extraction
    }

    fn walk(
        &self,
        members: &Map<String, Value>,
        skip: Option<&str>,
        mut visit: impl FnMut(&Field, &Value) -> Result<Option<Value>, ValidationError>,
        unknown: Unknown,
    ) -> Result<Map<String, Value>, ValidationError> {
        let mut out = Map::new();
        let mut errors = BTreeMap::new();
        for (name, value) in members {
            if skip == Some(name.as_str()) {
                out.insert(name.clone(), value.clone());
                continue;
            }
            match self.fields.get(name) {
                Some(field) => match visit(field, value) {
                    Ok(Some(v)) => {
                        out.insert(name.clone(), v);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        errors.insert(name.clone(), err);
                    }
                },
                None => match unknown {
                    Unknown::Reject => {
                        errors.insert(name.clone(), ValidationError::token("unknown"));
                    }
                    Unknown::Keep => {
                        out.insert(name.clone(), value.clone());
                    }
                },
            }
        }
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(ValidationError::mapping(errors))
        }
    }
}

#[derive(Clone, Copy)]
enum Unknown {
    Reject,
    Keep,
}

/// A structure whose members depend on a discriminant member.
#[derive(Debug, Clone, PartialEq)]
pub struct Polymorphic {
    /// Name of the discriminant member.
    pub on: String,
    /// Variant structures keyed by discriminant value.
    pub variants: BTreeMap<String, Structure>,
}

impl Polymorphic {
    /// Creates a polymorphic structure discriminated on `on`.
    pub fn new(on: impl Into<String>) -> Self {
        Self {
            on: on.into(),
            variants: BTreeMap::new(),
        }
    }

    /// Adds a variant.
    #[must_use]
    pub fn variant(mut self, discriminant: impl Into<String>, structure: Structure) -> Self {
        self.variants.insert(discriminant.into(), structure);
        self
    }

    fn resolve(&self, members: &Map<String, Value>) -> Result<&Structure, ValidationError> {
        members
            .get(&self.on)
            .and_then(Value::as_str)
            .and_then(|d| self.variants.get(d))
            .ok_or_else(|| {
                let mut errors = BTreeMap::new();
                errors.insert(self.on.clone(), ValidationError::token("invalid"));
                ValidationError::mapping(errors)
            })
    }
}

/// The kind of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// A scalar value.
    Scalar(Scalar),
    /// A homogeneous sequence.
    Sequence(Box<Field>),
    /// A mapping from arbitrary text keys to homogeneous values.
    Mapping(Box<Field>),
    /// A structure with declared members.
    Structure(Structure),
    /// A fixed-length heterogeneous sequence.
    Tuple(Vec<Field>),
    /// A structure discriminated by one of its members.
    Polymorphic(Polymorphic),
}

/// A schema node.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Member name, if this field belongs to a structure.
    pub name: Option<String>,
    /// Whether the member must be present in a structure.
    pub required: bool,
    /// Whether the value may not be null.
    pub nonnull: bool,
    /// The kind of value.
    pub kind: FieldKind,
}

impl Field {
    /// Creates a field of the given kind.
    pub fn new(kind: FieldKind) -> Self {
        Self {
            name: None,
            required: false,
            nonnull: false,
            kind,
        }
    }

    /// A field accepting any value.
    pub fn any() -> Self {
        Self::new(FieldKind::Scalar(Scalar::Any))
    }

    /// A boolean field.
    pub fn boolean() -> Self {
        Self::new(FieldKind::Scalar(Scalar::Boolean))
    }

    /// An unbounded integer field.
    pub fn integer() -> Self {
        Self::new(FieldKind::Scalar(Scalar::Integer {
            minimum: None,
            maximum: None,
        }))
    }

    /// An unbounded float field.
    pub fn float() -> Self {
        Self::new(FieldKind::Scalar(Scalar::Float {
            minimum: None,
            maximum: None,
        }))
    }

    /// An unbounded text field.
    pub fn text() -> Self {
        Self::new(FieldKind::Scalar(Scalar::Text {
            min_length: None,
            max_length: None,
        }))
    }

    /// An enumeration field.
    pub fn enumeration(values: impl IntoIterator<Item = Value>) -> Self {
        Self::new(FieldKind::Scalar(Scalar::Enumeration(
            values.into_iter().collect(),
        )))
    }

    /// A scalar field with explicit constraints.
    pub fn scalar(scalar: Scalar) -> Self {
        Self::new(FieldKind::Scalar(scalar))
    }

    /// A sequence of `item`.
    pub fn sequence(item: Field) -> Self {
        Self::new(FieldKind::Sequence(Box::new(item)))
    }

    /// A mapping of text keys to `value`.
    pub fn mapping(value: Field) -> Self {
        Self::new(FieldKind::Mapping(Box::new(value)))
    }

    /// A structure field.
    pub fn structure(structure: Structure) -> Self {
        Self::new(FieldKind::Structure(structure))
    }

    /// A tuple field.
    pub fn tuple(items: impl IntoIterator<Item = Field>) -> Self {
        Self::new(FieldKind::Tuple(items.into_iter().collect()))
    }

    /// A polymorphic structure field.
    pub fn polymorphic(polymorphic: Polymorphic) -> Self {
        Self::new(FieldKind::Polymorphic(polymorphic))
    }

    /// Marks the field as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the field as non-nullable.
    #[must_use]
    pub fn nonnull(mut self) -> Self {
        self.nonnull = true;
        self
    }

    /// Sets the member name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the structure, if this is a structure field.
    pub fn as_structure(&self) -> Option<&Structure> {
        match &self.kind {
            FieldKind::Structure(structure) => Some(structure),
            _ => None,
        }
    }

    /// Structural fields nest other fields; their null members are omitted
    /// rather than transmitted.
    pub fn is_structural(&self) -> bool {
        !matches!(self.kind, FieldKind::Scalar(_))
    }

    /// Copies the declared parts of `subject` into wire shape.
    pub fn extract(&self, subject: &Value) -> Value {
        match (&self.kind, subject) {
            (FieldKind::Structure(structure), Value::Object(members)) => {
                Value::Object(structure.extract(members))
            }
            (FieldKind::Polymorphic(poly), Value::Object(members)) => {
                match poly.resolve(members) {
                    Ok(structure) => {
                        let mut extraction = structure.extract(members);
                        if let Some(d) = members.get(&poly.on) {
                            extraction.insert(poly.on.clone(), d.clone());
                        }
                        Value::Object(extraction)
                    }
                    Err(_) => subject.clone(),
                }
            }
            (FieldKind::Mapping(inner), Value::Object(members)) => Value::Object(
                members
                    .iter()
                    .filter_map(|(name, value)| {
                        if inner.is_structural() {
                            (!value.is_null()).then(|| (name.clone(), inner.extract(value)))
                        } else {
                            Some((name.clone(), value.clone()))
                        }
                    })
                    .collect(),
            ),
            (FieldKind::Sequence(item), Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .map(|v| {
                        if item.is_structural() && !v.is_null() {
                            item.extract(v)
                        } else {
                            v.clone()
                        }
                    })
                    .collect(),
            ),
            (FieldKind::Tuple(fields), Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .zip(fields)
                    .map(|(v, field)| {
                        if field.is_structural() && !v.is_null() {
                            field.extract(v)
                        } else {
                            v.clone()
                        }
                    })
                    .collect(),
            ),
            _ => subject.clone(),
        }
    }

    /// Type-checks `value` and converts it for transmission as `mime`.
    ///
    /// Partial structures are accepted: required members are not enforced
    /// here, only by [`Field::validate`]. Null members of structural kinds
    /// are dropped. Unless `normalized` is set, scalar values are normalized
    /// first (numeric strings to numbers and the like).
    pub fn serialize(
        &self,
        value: &Value,
        mime: MimeType,
        normalized: bool,
    ) -> Result<Value, ValidationError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match &self.kind {
            FieldKind::Scalar(scalar) => {
                let value = if normalized {
                    value.clone()
                } else {
                    scalar.normalize(value)
                };
                scalar.check_type(&value)?;
                Ok(scalar.serialize_value(value, mime))
            }
            FieldKind::Structure(structure) => {
                let members = value
                    .as_object()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                structure
                    .walk(
                        members,
                        None,
                        |field, v| field.serialize_member(v, mime, normalized),
                        Unknown::Reject,
                    )
                    .map(Value::Object)
            }
            FieldKind::Polymorphic(poly) => {
                let members = value
                    .as_object()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                let structure = poly.resolve(members)?;
                structure
                    .walk(
                        members,
                        Some(&poly.on),
                        |field, v| field.serialize_member(v, mime, normalized),
                        Unknown::Reject,
                    )
                    .map(Value::Object)
            }
            FieldKind::Mapping(inner) => {
                let members = value
                    .as_object()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                let mut out = Map::new();
                let mut errors = BTreeMap::new();
                for (name, v) in members {
                    match inner.serialize_member(v, mime, normalized) {
                        Ok(Some(v)) => {
                            out.insert(name.clone(), v);
                        }
                        Ok(None) => {}
                        Err(err) => {
                            errors.insert(name.clone(), err);
                        }
                    }
                }
                if errors.is_empty() {
                    Ok(Value::Object(out))
                } else {
                    Err(ValidationError::mapping(errors))
                }
            }
            FieldKind::Sequence(item) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                collect_items(items.iter().map(|v| item.serialize(v, mime, normalized)))
            }
            FieldKind::Tuple(fields) => {
                let items = value
                    .as_array()
                    .filter(|items| items.len() == fields.len())
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                collect_items(
                    items
                        .iter()
                        .zip(fields)
                        .map(|(v, field)| field.serialize(v, mime, normalized)),
                )
            }
        }
    }

    fn serialize_member(
        &self,
        value: &Value,
        mime: MimeType,
        normalized: bool,
    ) -> Result<Option<Value>, ValidationError> {
        if self.is_structural() && value.is_null() {
            return Ok(None);
        }
        self.serialize(value, mime, normalized).map(Some)
    }

    /// Type-checks a value received from the wire.
    ///
    /// Structure members the schema does not declare are passed through.
    pub fn unserialize(&self, value: &Value, mime: MimeType) -> Result<Value, ValidationError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match &self.kind {
            FieldKind::Scalar(scalar) => {
                let value = if mime == MimeType::UrlEncoded {
                    scalar.normalize(value)
                } else {
                    value.clone()
                };
                scalar.check_type(&value)?;
                Ok(value)
            }
            FieldKind::Structure(structure) => {
                let members = value
                    .as_object()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                structure
                    .walk(
                        members,
                        None,
                        |field, v| field.unserialize(v, mime).map(Some),
                        Unknown::Keep,
                    )
                    .map(Value::Object)
            }
            FieldKind::Polymorphic(poly) => {
                let members = value
                    .as_object()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                let structure = poly.resolve(members)?;
                structure
                    .walk(
                        members,
                        Some(&poly.on),
                        |field, v| field.unserialize(v, mime).map(Some),
                        Unknown::Keep,
                    )
                    .map(Value::Object)
            }
            FieldKind::Mapping(inner) => {
                let members = value
                    .as_object()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                let mut out = Map::new();
                let mut errors = BTreeMap::new();
                for (name, v) in members {
                    match inner.unserialize(v, mime) {
                        Ok(v) => {
                            out.insert(name.clone(), v);
                        }
                        Err(err) => {
                            errors.insert(name.clone(), err);
                        }
                    }
                }
                if errors.is_empty() {
                    Ok(Value::Object(out))
                } else {
                    Err(ValidationError::mapping(errors))
                }
            }
            FieldKind::Sequence(item) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                collect_items(items.iter().map(|v| item.unserialize(v, mime)))
            }
            FieldKind::Tuple(fields) => {
                let items = value
                    .as_array()
                    .filter(|items| items.len() == fields.len())
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                collect_items(
                    items
                        .iter()
                        .zip(fields)
                        .map(|(v, field)| field.unserialize(v, mime)),
                )
            }
        }
    }

    /// Fully validates `value`, returning its normalized form.
    ///
    /// When `mime` is given, the normalized value is also serialized for
    /// that mimetype.
    pub fn validate(&self, value: &Value, mime: Option<MimeType>) -> Result<Value, ValidationError> {
        let value = self.validate_inner(value)?;
        match mime {
            Some(mime) => self.serialize(&value, mime, true),
            None => Ok(value),
        }
    }

    fn validate_inner(&self, value: &Value) -> Result<Value, ValidationError> {
        if value.is_null() {
            return if self.nonnull {
                Err(ValidationError::token("nonnull"))
            } else {
                Ok(Value::Null)
            };
        }
        match &self.kind {
            FieldKind::Scalar(scalar) => {
                let value = scalar.normalize(value);
                scalar.check_type(&value)?;
                scalar.check_value(&value)?;
                Ok(value)
            }
            FieldKind::Structure(structure) => {
                let members = value
                    .as_object()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                validate_structure(structure, members, None)
            }
            FieldKind::Polymorphic(poly) => {
                let members = value
                    .as_object()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                let structure = poly.resolve(members)?;
                validate_structure(structure, members, Some(&poly.on))
            }
            FieldKind::Mapping(inner) => {
                let members = value
                    .as_object()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                let mut out = Map::new();
                let mut errors = BTreeMap::new();
                for (name, v) in members {
                    match inner.validate_inner(v) {
                        Ok(v) => {
                            out.insert(name.clone(), v);
                        }
                        Err(err) => {
                            errors.insert(name.clone(), err);
                        }
                    }
                }
                if errors.is_empty() {
                    Ok(Value::Object(out))
                } else {
                    Err(ValidationError::mapping(errors))
                }
            }
            FieldKind::Sequence(item) => {
                let items = value
                    .as_array()
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                collect_items(items.iter().map(|v| item.validate_inner(v)))
            }
            FieldKind::Tuple(fields) => {
                let items = value
                    .as_array()
                    .filter(|items| items.len() == fields.len())
                    .ok_or_else(|| ValidationError::token("invalid"))?;
                collect_items(
                    items
                        .iter()
                        .zip(fields)
                        .map(|(v, field)| field.validate_inner(v)),
                )
            }
        }
    }
}

fn validate_structure(
    structure: &Structure,
    members: &Map<String, Value>,
    discriminant: Option<&str>,
) -> Result<Value, ValidationError> {
    let mut errors = match structure.walk(
        members,
        discriminant,
        |field, v| field.validate_inner(v).map(Some),
        Unknown::Reject,
    ) {
        Ok(out) => {
            let missing = missing_required(structure, members);
            if missing.is_empty() {
                return Ok(Value::Object(out));
            }
            missing
        }
        Err(ValidationError {
            structure: Some(crate::validation::ErrorStructure::Mapping(errors)),
            ..
        }) => errors,
        Err(other) => return Err(other),
    };
    for (name, err) in missing_required(structure, members) {
        errors.entry(name).or_insert(err);
    }
    Err(ValidationError::mapping(errors))
}

fn missing_required(
    structure: &Structure,
    members: &Map<String, Value>,
) -> BTreeMap<String, ValidationError> {
    structure
        .iter()
        .filter(|(name, field)| field.required && !members.contains_key(*name))
        .map(|(name, _)| (name.to_string(), ValidationError::token("required")))
        .collect()
}

fn collect_items(
    results: impl Iterator<Item = Result<Value, ValidationError>>,
) -> Result<Value, ValidationError> {
    let mut out = Vec::new();
    let mut errors = BTreeMap::new();
    for (index, result) in results.enumerate() {
        match result {
            Ok(v) => out.push(v),
            Err(err) => {
                errors.insert(index, err);
            }
        }
    }
    if errors.is_empty() {
        Ok(Value::Array(out))
    } else {
        Err(ValidationError::sequence(errors))
    }
}
