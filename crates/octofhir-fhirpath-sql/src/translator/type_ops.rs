//! Type operations: `is`, `as`, `ofType`.
//!
//! Type names resolve against a fixed table of FHIR and System types mapped
//! to the JSON kind their values serialize as. On a choice element
//! (`value[x]`) `ofType` and friends remap the generic field name to its
//! type-suffixed JSON key (`value` + `Quantity` -> `valueQuantity`) instead
//! of probing JSON types.

use tracing::warn;

use super::{SqlEmitter, quoted_list};
use crate::ast::{ExpressionNode, SqlDataType, TypeOperationKind, TypeOperationNode};
use crate::context::TranslationContext;
use crate::dialect::JsonKind;
use crate::error::{Arity, Result, TranslationError};
use crate::fragment::{META_PRODUCED_BY, SqlFragment};

const STRING_TYPES: &[&str] = &[
    "string",
    "code",
    "id",
    "uri",
    "url",
    "canonical",
    "oid",
    "uuid",
    "markdown",
    "base64Binary",
    "xhtml",
    "date",
    "dateTime",
    "instant",
    "time",
    "String",
    "Date",
    "DateTime",
    "Time",
];

const INTEGER_TYPES: &[&str] = &["integer", "positiveInt", "unsignedInt", "integer64", "Integer"];

const COMPLEX_TYPES: &[&str] = &[
    "Quantity",
    "SimpleQuantity",
    "Age",
    "Count",
    "Distance",
    "Duration",
    "Money",
    "CodeableConcept",
    "CodeableReference",
    "Coding",
    "Reference",
    "Period",
    "Range",
    "Ratio",
    "RatioRange",
    "SampledData",
    "Identifier",
    "HumanName",
    "Address",
    "ContactPoint",
    "ContactDetail",
    "Attachment",
    "Annotation",
    "Timing",
    "Signature",
    "Dosage",
    "Meta",
    "Narrative",
    "Extension",
    "Expression",
    "BackboneElement",
    "Element",
];

/// Base names of the choice elements that occur across FHIR resources.
const CHOICE_ELEMENTS: &[&str] = &[
    "value",
    "effective",
    "onset",
    "abatement",
    "deceased",
    "multipleBirth",
    "occurrence",
    "performed",
    "timing",
    "asNeeded",
    "medication",
    "born",
    "age",
    "serviced",
    "product",
    "item",
    "subject",
    "reported",
    "defaultValue",
    "fixed",
    "pattern",
    "allowed",
    "used",
];

/// JSON kind of a FHIR or System type name; `None` for unknown types.
pub fn fhir_type_kind(name: &str) -> Option<JsonKind> {
    let name = name
        .strip_prefix("System.")
        .or_else(|| name.strip_prefix("FHIR."))
        .unwrap_or(name);

    if STRING_TYPES.contains(&name) {
        Some(JsonKind::String)
    } else if INTEGER_TYPES.contains(&name) {
        Some(JsonKind::Integer)
    } else if matches!(name, "decimal" | "Decimal") {
        Some(JsonKind::Number)
    } else if matches!(name, "boolean" | "Boolean") {
        Some(JsonKind::Boolean)
    } else if COMPLEX_TYPES.contains(&name) {
        Some(JsonKind::Object)
    } else {
        None
    }
}

/// Check if `field` is the base name of a choice element.
pub fn is_choice_element(field: &str) -> bool {
    CHOICE_ELEMENTS.contains(&field)
}

/// Type-suffixed JSON key of a choice element (`value`, `dateTime` -> `valueDateTime`).
fn choice_key(base: &str, type_name: &str) -> String {
    let type_name = type_name.rsplit('.').next().unwrap_or(type_name);
    let mut chars = type_name.chars();
    match chars.next() {
        Some(first) => format!("{base}{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => base.to_string(),
    }
}

/// Last navigated field of a plain navigation expression.
fn last_field(node: &ExpressionNode) -> Option<&str> {
    match node {
        ExpressionNode::Identifier(id) if !id.is_variable() => {
            id.name.rsplit('.').next().filter(|s| !s.contains('['))
        }
        ExpressionNode::Operator(op) if op.symbol == "." && op.children.len() == 2 => {
            last_field(&op.children[1])
        }
        _ => None,
    }
}

impl SqlEmitter<'_> {
    /// Check if a type operation on `operand` (or, without one, on the
    /// current path) resolves by remapping a choice element.
    pub(super) fn remaps_choice(
        &self,
        operand: Option<&ExpressionNode>,
        type_name: &str,
        ctx: &TranslationContext,
    ) -> bool {
        if fhir_type_kind(type_name).is_none() {
            return false;
        }
        let field = match operand {
            Some(node) => last_field(node),
            None => ctx.parent_path().last().map(String::as_str),
        };
        field.is_some_and(is_choice_element)
    }

    /// Focus on `operand` with its choice element replaced by the typed key.
    pub(super) fn focus_choice(
        &self,
        operand: Option<&ExpressionNode>,
        type_name: &str,
        ctx: &mut TranslationContext,
    ) -> Result<Vec<String>> {
        let dependencies = self.focus_target(operand, ctx)?;
        let base = ctx
            .parent_path()
            .last()
            .cloned()
            .ok_or_else(|| TranslationError::scope_discipline("choice remap without a field"))?;
        ctx.replace_top(choice_key(&base, type_name))?;
        Ok(dependencies)
    }

    pub(super) fn translate_type_operation(
        &self,
        node: &TypeOperationNode,
        ctx: &mut TranslationContext,
    ) -> Result<SqlFragment> {
        let operation = node.operation.as_str();
        let operand = match node.children.as_slice() {
            [] => None,
            [operand] => Some(operand),
            children => {
                return Err(TranslationError::arity(
                    operation,
                    Arity::Between(0, 1),
                    children.len(),
                ));
            }
        };

        let kind = fhir_type_kind(&node.target_type);
        let choice = self.remaps_choice(operand, &node.target_type, ctx);
        let requested = node.metadata.as_ref().and_then(|m| m.sql_type);

        let mut scope = ctx.scope();
        let dependencies = if choice {
            self.focus_choice(operand, &node.target_type, &mut scope)?
        } else {
            self.focus_target(operand, &mut scope)?
        };

        let Some(kind) = kind else {
            let expression = match node.operation {
                TypeOperationKind::Is => "FALSE".to_string(),
                TypeOperationKind::As => "NULL".to_string(),
                TypeOperationKind::OfType => {
                    warn!(
                        target_type = %node.target_type,
                        "unknown type in ofType, result is empty"
                    );
                    self.dialect.empty_json_array()
                }
            };
            return Ok(self
                .scalar(&scope, expression)
                .with_dependencies(dependencies)
                .with_metadata(META_PRODUCED_BY, operation));
        };

        let value_type = requested.unwrap_or(if kind == JsonKind::Object {
            SqlDataType::Json
        } else {
            SqlDataType::Text
        });

        let fragment = match node.operation {
            TypeOperationKind::Is if choice => {
                let value = self.extract(&scope, SqlDataType::Json);
                self.scalar(&scope, format!("({value} IS NOT NULL)"))
            }
            TypeOperationKind::Is => {
                let check = self.type_check(&scope, kind);
                self.scalar(&scope, check)
            }
            TypeOperationKind::As | TypeOperationKind::OfType if choice => {
                let value = self.extract(&scope, value_type);
                self.scalar(&scope, value)
            }
            TypeOperationKind::As => {
                let check = self.type_check(&scope, kind);
                let value = self.extract(&scope, value_type);
                self.scalar(&scope, format!("CASE WHEN {check} THEN {value} END"))
            }
            TypeOperationKind::OfType => {
                let alias = scope.next_alias("o");
                let source = self.iterate_focus(&scope, &alias);
                let element = format!("{alias}.value");
                let expression = format!(
                    "(SELECT {} FROM {} WHERE {} IN ({}))",
                    self.dialect.json_array_agg(&element, None),
                    source,
                    self.dialect.json_type(&element),
                    quoted_list(self.dialect.json_type_names(kind))
                );
                self.subquery(&scope, expression)
            }
        };

        Ok(fragment
            .with_dependencies(dependencies)
            .with_metadata(META_PRODUCED_BY, operation))
    }

    /// NULL-safe JSON type probe of the current focus.
    fn type_check(&self, ctx: &TranslationContext, kind: JsonKind) -> String {
        let value = self.extract(ctx, SqlDataType::Json);
        format!(
            "COALESCE({} IN ({}), FALSE)",
            self.dialect.json_type(&value),
            quoted_list(self.dialect.json_type_names(kind))
        )
    }
}
