//! Update modifier engine.
//!
//! An update expression is either a **replacement** (no top-level key starts
//! with `$`: the whole document except `_id` is replaced) or a **modifier
//! expression** (every top-level key is a `$`-modifier). Modifiers are
//! applied to a copy of the original document; the original is never touched.

use crate::common::{compare_values, values_equal, CompareOptions, Value, DOC_ID};
use crate::document::{validate_document_keys, Document};
use crate::errors::{ErrorKind, LigniteError, LigniteResult};
use crate::query::matcher::matches_cond;
use crate::query::parse_field_cond;
use smallvec::SmallVec;
use std::cmp::Ordering;

/// A parsed update expression.
#[derive(Clone, Debug)]
pub enum UpdateExpr {
    /// Replace the whole document (except `_id`).
    Replace(Document),
    /// Apply modifiers in key order; each entry pairs a modifier with its
    /// `{ path: argument }` document.
    Modify(Vec<(ModifierKind, Document)>),
}

/// The closed set of update modifiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModifierKind {
    Set,
    Unset,
    Inc,
    Min,
    Max,
    Push,
    AddToSet,
    Pop,
    Pull,
}

impl ModifierKind {
    fn parse(key: &str) -> LigniteResult<ModifierKind> {
        match key {
            "$set" => Ok(ModifierKind::Set),
            "$unset" => Ok(ModifierKind::Unset),
            "$inc" => Ok(ModifierKind::Inc),
            "$min" => Ok(ModifierKind::Min),
            "$max" => Ok(ModifierKind::Max),
            "$push" => Ok(ModifierKind::Push),
            "$addToSet" => Ok(ModifierKind::AddToSet),
            "$pop" => Ok(ModifierKind::Pop),
            "$pull" => Ok(ModifierKind::Pull),
            _ => {
                log::error!("Unknown modifier {}", key);
                Err(LigniteError::new(
                    &format!("Unknown modifier {}", key),
                    ErrorKind::UnknownModifier,
                ))
            }
        }
    }
}

/// Parses an update document into an [UpdateExpr].
///
/// # Errors
///
/// - `MixedUpdate` when `$`-modifiers are mixed with plain fields
/// - `UnknownModifier` for an unrecognized `$`-key
/// - `InvalidDataType` when a modifier's argument is not a document
pub fn parse_update(expr: &Document) -> LigniteResult<UpdateExpr> {
    let dollar_keys = expr.keys().filter(|k| k.starts_with('$')).count();
    if dollar_keys == 0 {
        return Ok(UpdateExpr::Replace(expr.clone()));
    }
    if dollar_keys != expr.len() {
        log::error!("Cannot mix modifiers and normal fields in an update");
        return Err(LigniteError::new(
            "You cannot mix modifiers and normal fields",
            ErrorKind::MixedUpdate,
        ));
    }

    let mut modifiers = Vec::with_capacity(expr.len());
    for (key, value) in expr.iter() {
        let kind = ModifierKind::parse(key)?;
        match value {
            Value::Document(args) => modifiers.push((kind, args.clone())),
            _ => {
                return Err(LigniteError::new(
                    &format!("Modifier {}'s argument must be a document", key),
                    ErrorKind::InvalidDataType,
                ))
            }
        }
    }
    Ok(UpdateExpr::Modify(modifiers))
}

/// Applies a parsed update expression to `original`, producing the updated
/// document. The result is validated against the key rules, and any change
/// to `_id` fails with `ImmutableId`.
pub fn apply_update(
    original: &Document,
    expr: &UpdateExpr,
    options: &CompareOptions,
) -> LigniteResult<Document> {
    let updated = match expr {
        UpdateExpr::Replace(replacement) => {
            if let (Some(new_id), Some(old_id)) = (replacement.id(), original.id()) {
                if !values_equal(new_id, old_id) {
                    log::error!("Replacement attempted to change a document's _id");
                    return Err(LigniteError::new(
                        "You cannot change a document's _id",
                        ErrorKind::ImmutableId,
                    ));
                }
            }
            let mut updated = replacement.clone();
            if let Some(old_id) = original.id() {
                updated.put(DOC_ID, old_id.clone());
            }
            updated
        }
        UpdateExpr::Modify(modifiers) => {
            let mut updated = original.clone();
            for (kind, args) in modifiers {
                for (path, value) in args.iter() {
                    let parts: SmallVec<[&str; 8]> = path.split('.').collect();
                    modify_document(&mut updated, *kind, &parts, value, options)?;
                }
            }
            updated
        }
    };

    if !ids_match(original, &updated, expr) {
        log::error!("Update attempted to change a document's _id");
        return Err(LigniteError::new(
            "You cannot change a document's _id",
            ErrorKind::ImmutableId,
        ));
    }
    validate_document_keys(&updated)?;
    Ok(updated)
}

fn ids_match(original: &Document, updated: &Document, expr: &UpdateExpr) -> bool {
    match (original.id(), updated.id()) {
        (Some(old), Some(new)) => values_equal(old, new),
        (Some(_), None) => false,
        (None, _) => {
            // a document without an id can only be updated before insertion
            // preparation; a replacement supplying one is then legitimate
            match expr {
                UpdateExpr::Replace(_) => true,
                UpdateExpr::Modify(_) => updated.id().is_none(),
            }
        }
    }
}

/// Sets `value` at a dotted path, creating intermediate documents.
pub(crate) fn set_path(doc: &mut Document, path: &str, value: Value) -> LigniteResult<()> {
    let parts: SmallVec<[&str; 8]> = path.split('.').collect();
    modify_document(
        doc,
        ModifierKind::Set,
        &parts,
        &value,
        &CompareOptions::default(),
    )
}

/// Removes the value at a dotted path; missing paths are a no-op.
pub(crate) fn unset_path(doc: &mut Document, path: &str) -> LigniteResult<()> {
    let parts: SmallVec<[&str; 8]> = path.split('.').collect();
    modify_document(
        doc,
        ModifierKind::Unset,
        &parts,
        &Value::Null,
        &CompareOptions::default(),
    )
}

/// What a last-step modifier decided to do with its target slot.
enum SlotOp {
    Set(Value),
    Remove,
    Noop,
}

fn modify_document(
    doc: &mut Document,
    kind: ModifierKind,
    parts: &[&str],
    arg: &Value,
    options: &CompareOptions,
) -> LigniteResult<()> {
    let head = parts[0];
    if parts.len() == 1 {
        let current = doc.get(head).cloned();
        match apply_last_step(current, kind, arg, options)? {
            SlotOp::Set(value) => doc.put(head, value),
            SlotOp::Remove => {
                doc.remove(head);
            }
            SlotOp::Noop => {}
        }
        return Ok(());
    }

    let mut child = match doc.get(head) {
        Some(value) => value.clone(),
        None => {
            // intermediate documents are auto-created, except for $unset
            if kind == ModifierKind::Unset {
                return Ok(());
            }
            Value::Document(Document::new())
        }
    };
    modify_value(&mut child, kind, &parts[1..], arg, options)?;
    doc.put(head, child);
    Ok(())
}

fn modify_value(
    value: &mut Value,
    kind: ModifierKind,
    parts: &[&str],
    arg: &Value,
    options: &CompareOptions,
) -> LigniteResult<()> {
    match value {
        Value::Document(doc) => modify_document(doc, kind, parts, arg, options),
        Value::Array(items) => {
            let index = match parts[0].parse::<usize>() {
                Ok(index) => index,
                Err(_) => {
                    // a named field inside an array is not addressable
                    log::debug!("Ignoring non-numeric path segment {} into an array", parts[0]);
                    return Ok(());
                }
            };
            if parts.len() == 1 {
                let current = items.get(index).cloned();
                match apply_last_step(current, kind, arg, options)? {
                    SlotOp::Set(new_value) => {
                        if index < items.len() {
                            items[index] = new_value;
                        } else if index == items.len() {
                            items.push(new_value);
                        } else {
                            return Err(LigniteError::new(
                                &format!("Array index {} is out of range", index),
                                ErrorKind::ModifierTypeError,
                            ));
                        }
                    }
                    SlotOp::Remove => {
                        // removing an element would shift its siblings
                        if index < items.len() {
                            items[index] = Value::Null;
                        }
                    }
                    SlotOp::Noop => {}
                }
                Ok(())
            } else {
                match items.get(index) {
                    Some(element) => {
                        let mut element = element.clone();
                        modify_value(&mut element, kind, &parts[1..], arg, options)?;
                        items[index] = element;
                        Ok(())
                    }
                    None if kind == ModifierKind::Unset => Ok(()),
                    None => Err(LigniteError::new(
                        &format!("Array index {} is out of range", index),
                        ErrorKind::ModifierTypeError,
                    )),
                }
            }
        }
        _ => {
            // descending through a scalar cannot store anything
            log::debug!("Ignoring modifier path through a scalar value");
            Ok(())
        }
    }
}

fn apply_last_step(
    current: Option<Value>,
    kind: ModifierKind,
    arg: &Value,
    options: &CompareOptions,
) -> LigniteResult<SlotOp> {
    match kind {
        ModifierKind::Set => Ok(SlotOp::Set(arg.clone())),
        ModifierKind::Unset => Ok(SlotOp::Remove),
        ModifierKind::Inc => {
            let increment = match arg {
                Value::Number(n) => *n,
                _ => {
                    return Err(LigniteError::new(
                        "$inc modifier used with a non-number value",
                        ErrorKind::ModifierTypeError,
                    ))
                }
            };
            match current {
                None | Some(Value::Undefined) => Ok(SlotOp::Set(Value::Number(increment))),
                Some(Value::Number(n)) => Ok(SlotOp::Set(Value::Number(n + increment))),
                Some(_) => Err(LigniteError::new(
                    "$inc can only be used on a number field",
                    ErrorKind::ModifierTypeError,
                )),
            }
        }
        ModifierKind::Min => match current {
            None | Some(Value::Undefined) => Ok(SlotOp::Set(arg.clone())),
            Some(existing) => {
                if compare_values(arg, &existing, options) == Ordering::Less {
                    Ok(SlotOp::Set(arg.clone()))
                } else {
                    Ok(SlotOp::Noop)
                }
            }
        },
        ModifierKind::Max => match current {
            None | Some(Value::Undefined) => Ok(SlotOp::Set(arg.clone())),
            Some(existing) => {
                if compare_values(arg, &existing, options) == Ordering::Greater {
                    Ok(SlotOp::Set(arg.clone()))
                } else {
                    Ok(SlotOp::Noop)
                }
            }
        },
        ModifierKind::Push => {
            let mut items = array_target(current, "$push")?;
            apply_push(&mut items, arg)?;
            Ok(SlotOp::Set(Value::Array(items)))
        }
        ModifierKind::AddToSet => {
            let mut items = array_target(current, "$addToSet")?;
            apply_add_to_set(&mut items, arg, options)?;
            Ok(SlotOp::Set(Value::Array(items)))
        }
        ModifierKind::Pop => {
            let mut items = match current {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(LigniteError::new(
                        "Can only use $pop on an array",
                        ErrorKind::ModifierTypeError,
                    ))
                }
            };
            let direction = match arg {
                Value::Number(n) => *n,
                _ => {
                    return Err(LigniteError::new(
                        "$pop modifier used with a non-number value",
                        ErrorKind::ModifierTypeError,
                    ))
                }
            };
            if !items.is_empty() {
                if direction > 0.0 {
                    items.pop();
                } else {
                    items.remove(0);
                }
            }
            Ok(SlotOp::Set(Value::Array(items)))
        }
        ModifierKind::Pull => {
            let mut items = match current {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(LigniteError::new(
                        "Can only use $pull on an array",
                        ErrorKind::ModifierTypeError,
                    ))
                }
            };
            let cond = parse_field_cond(arg)?;
            items.retain(|element| !matches_cond(element, &cond, options));
            Ok(SlotOp::Set(Value::Array(items)))
        }
    }
}

fn array_target(current: Option<Value>, modifier: &str) -> LigniteResult<Vec<Value>> {
    match current {
        None | Some(Value::Undefined) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(LigniteError::new(
            &format!("Can only use {} on an array", modifier),
            ErrorKind::ModifierTypeError,
        )),
    }
}

fn apply_push(items: &mut Vec<Value>, arg: &Value) -> LigniteResult<()> {
    if let Value::Document(spec) = arg {
        if spec.contains_key("$each") {
            let each = match spec.get("$each") {
                Some(Value::Array(values)) => values.clone(),
                _ => {
                    return Err(LigniteError::new(
                        "$each requires an array value",
                        ErrorKind::ModifierTypeError,
                    ))
                }
            };
            let slice = match spec.get("$slice") {
                None => None,
                Some(Value::Number(n)) if n.fract() == 0.0 => Some(*n as i64),
                Some(_) => {
                    return Err(LigniteError::new(
                        "$slice requires an integer value",
                        ErrorKind::ModifierTypeError,
                    ))
                }
            };
            for key in spec.keys() {
                if key != "$each" && key != "$slice" {
                    return Err(LigniteError::new(
                        &format!("Unsupported $push option {}", key),
                        ErrorKind::ModifierTypeError,
                    ));
                }
            }
            items.extend(each);
            if let Some(slice) = slice {
                apply_slice(items, slice);
            }
            return Ok(());
        }
        if spec.contains_key("$slice") {
            return Err(LigniteError::new(
                "$slice can only be used in conjunction with $each",
                ErrorKind::ModifierTypeError,
            ));
        }
    }
    items.push(arg.clone());
    Ok(())
}

fn apply_slice(items: &mut Vec<Value>, slice: i64) {
    if slice == 0 {
        items.clear();
    } else if slice > 0 {
        items.truncate(slice as usize);
    } else {
        let keep = (-slice) as usize;
        if items.len() > keep {
            let drop = items.len() - keep;
            items.drain(..drop);
        }
    }
}

fn apply_add_to_set(
    items: &mut Vec<Value>,
    arg: &Value,
    options: &CompareOptions,
) -> LigniteResult<()> {
    if let Value::Document(spec) = arg {
        if spec.contains_key("$each") {
            let each = match spec.get("$each") {
                Some(Value::Array(values)) => values.clone(),
                _ => {
                    return Err(LigniteError::new(
                        "$each requires an array value",
                        ErrorKind::ModifierTypeError,
                    ))
                }
            };
            for key in spec.keys() {
                if key != "$each" {
                    return Err(LigniteError::new(
                        &format!("Unsupported $addToSet option {}", key),
                        ErrorKind::ModifierTypeError,
                    ));
                }
            }
            for element in each {
                add_if_absent(items, element, options);
            }
            return Ok(());
        }
    }
    add_if_absent(items, arg.clone(), options);
    Ok(())
}

fn add_if_absent(items: &mut Vec<Value>, element: Value, options: &CompareOptions) {
    let present = items
        .iter()
        .any(|existing| compare_values(existing, &element, options) == Ordering::Equal);
    if !present {
        items.push(element);
    }
}
