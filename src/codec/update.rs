//! Update instructions.
//!
//! Each update field carries one token of the form `opcode,field,operand`:
//!
//! - `=` replaces the field (any type, the operand may be empty);
//! - `+` / `-` add to / subtract from a numeric field;
//! - `#` increments a numeric field in place. It is treated exactly like `+`
//!   and sent to the store as `+`.
//!
//! `field` is a 1-based number into the route's schema. Both commas are
//! mandatory even when the operand is empty (`=,3,`).

use serde_json::{Number, Value};

use crate::codec::format::{FieldType, FormatTemplate};
use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Set,
    Add,
    Subtract,
    Increment,
}

impl OpKind {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "=" => Some(OpKind::Set),
            "+" => Some(OpKind::Add),
            "-" => Some(OpKind::Subtract),
            "#" => Some(OpKind::Increment),
            _ => None,
        }
    }

    pub fn is_arithmetic(self) -> bool {
        !matches!(self, OpKind::Set)
    }

    /// Operator sent to the store.
    pub fn wire_operator(self) -> &'static str {
        match self {
            OpKind::Set => "=",
            OpKind::Add | OpKind::Increment => "+",
            OpKind::Subtract => "-",
        }
    }
}

/// One parsed update instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOp {
    pub kind: OpKind,
    /// 1-based field number.
    pub field_no: usize,
    pub operand: Value,
}

impl UpdateOp {
    /// Parse `token` against the schema of `template`.
    pub fn parse(token: &str, template: &FormatTemplate) -> Result<Self, GatewayError> {
        let mut parts = token.splitn(3, ',');
        let (Some(opcode), Some(index), Some(operand)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(GatewayError::invalid_params(format!(
                "update '{token}' must have the form opcode,field,operand"
            )));
        };

        let kind = OpKind::from_token(opcode).ok_or_else(|| {
            GatewayError::invalid_params(format!("unknown update opcode '{opcode}'"))
        })?;

        let field_no: usize = index.parse().map_err(|_| {
            GatewayError::invalid_params(format!("update field '{index}' is not a number"))
        })?;
        let field_type = field_no
            .checked_sub(1)
            .and_then(|position| template.schema_type(position))
            .ok_or_else(|| {
                GatewayError::invalid_params(format!(
                    "update field {field_no} is outside 1..={}",
                    template.schema_len()
                ))
            })?;

        let operand = if kind.is_arithmetic() {
            if !field_type.is_numeric() {
                return Err(GatewayError::invalid_params(format!(
                    "'{opcode}' needs a numeric field, field {field_no} is {field_type}"
                )));
            }
            numeric_operand(operand, field_type)?
        } else {
            field_type
                .coerce(operand)
                .map_err(|e| GatewayError::invalid_params(format!("update field {field_no}: {e}")))?
        };

        Ok(Self {
            kind,
            field_no,
            operand,
        })
    }

    /// Store representation: `[operator, field_no, operand]`.
    pub fn to_wire(&self) -> Value {
        Value::Array(vec![
            Value::from(self.kind.wire_operator()),
            Value::from(self.field_no),
            self.operand.clone(),
        ])
    }
}

fn numeric_operand(raw: &str, field_type: FieldType) -> Result<Value, GatewayError> {
    let coerced = match field_type {
        // Subtraction makes a signed operand meaningful on unsigned fields.
        FieldType::Unsigned | FieldType::Int => FieldType::Int.coerce(raw),
        FieldType::Native => match FieldType::Native.coerce(raw) {
            Ok(v @ Value::Number(_)) => Ok(v),
            _ => Err(format!("'{raw}' is not a number")),
        },
        other => other.coerce(raw),
    };
    coerced.map_err(|e| GatewayError::invalid_params(format!("update operand: {e}")))
}

/// Apply `ops` to `tuple` in declared order.
///
/// Ops on distinct fields do not observe each other; ops repeating a field
/// apply in the order given. `=` may target one past the end to append.
pub fn apply_ops(tuple: &mut Vec<Value>, ops: &[UpdateOp]) -> Result<(), GatewayError> {
    for op in ops {
        let position = op.field_no - 1;
        if op.kind == OpKind::Set && position == tuple.len() {
            tuple.push(op.operand.clone());
            continue;
        }
        let current = tuple.get_mut(position).ok_or_else(|| {
            GatewayError::invalid_params(format!("field {} does not exist in tuple", op.field_no))
        })?;
        *current = match op.kind {
            OpKind::Set => op.operand.clone(),
            OpKind::Add | OpKind::Increment => arithmetic(current, &op.operand, 1)?,
            OpKind::Subtract => arithmetic(current, &op.operand, -1)?,
        };
    }
    Ok(())
}

fn arithmetic(current: &Value, operand: &Value, sign: i64) -> Result<Value, GatewayError> {
    let (Value::Number(a), Value::Number(b)) = (current, operand) else {
        return Err(GatewayError::invalid_params(
            "arithmetic update on a non-numeric value",
        ));
    };
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        if let Some(result) = b.checked_mul(sign).and_then(|b| a.checked_add(b)) {
            return Ok(Value::from(result));
        }
    }
    let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
        return Err(GatewayError::invalid_params("arithmetic overflow"));
    };
    Number::from_f64(a + b * sign as f64)
        .map(Value::Number)
        .ok_or_else(|| GatewayError::invalid_params("arithmetic result is not finite"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> FormatTemplate {
        // schema: 1 id (u), 2 name (s), 3 score (d), 4 hits (i)
        FormatTemplate::parse("id=%ku&name=%os&score=%od&hits=%oi").unwrap()
    }

    #[test]
    fn test_set_on_string_field() {
        let op = UpdateOp::parse("=,2,X", &template()).unwrap();
        assert_eq!(op.kind, OpKind::Set);
        assert_eq!(op.field_no, 2);
        assert_eq!(op.operand, json!("X"));
        assert_eq!(op.to_wire(), json!(["=", 2, "X"]));
    }

    #[test]
    fn test_set_to_empty_string() {
        let op = UpdateOp::parse("=,2,", &template()).unwrap();
        assert_eq!(op.operand, json!(""));
    }

    #[test]
    fn test_operand_may_contain_commas() {
        let op = UpdateOp::parse("=,2,a,b,c", &template()).unwrap();
        assert_eq!(op.operand, json!("a,b,c"));
    }

    #[test]
    fn test_arithmetic_ops() {
        let t = template();
        assert_eq!(UpdateOp::parse("+,4,10", &t).unwrap().operand, json!(10));
        assert_eq!(UpdateOp::parse("-,3,2.1", &t).unwrap().operand, json!(2.1));
        let inc = UpdateOp::parse("#,4,1", &t).unwrap();
        assert_eq!(inc.kind, OpKind::Increment);
        assert_eq!(inc.to_wire(), json!(["+", 4, 1]));
    }

    #[test]
    fn test_arithmetic_on_string_field_fails() {
        let result = UpdateOp::parse("+,2,10", &template());
        assert!(matches!(result, Err(GatewayError::InvalidParams { .. })));
    }

    #[test]
    fn test_structural_errors() {
        let t = template();
        for token in ["=,TEXT", "TEXT", "=,,TEXT", "", "=", "*,2,x", "==,2,x", "=,0,x", "=,5,x", "=,-1,x"] {
            assert!(
                matches!(UpdateOp::parse(token, &t), Err(GatewayError::InvalidParams { .. })),
                "{token:?} should fail"
            );
        }
    }

    #[test]
    fn test_set_coerces_to_field_type() {
        let t = template();
        assert_eq!(UpdateOp::parse("=,3,4.5", &t).unwrap().operand, json!(4.5));
        assert!(UpdateOp::parse("=,4,abc", &t).is_err());
    }

    #[test]
    fn test_apply_independent_and_repeated() {
        let t = template();
        let mut tuple = vec![json!(1), json!("old"), json!(1.5), json!(10)];
        let ops = vec![
            UpdateOp::parse("=,2,new value", &t).unwrap(),
            UpdateOp::parse("+,4,5", &t).unwrap(),
            UpdateOp::parse("-,4,2", &t).unwrap(),
            UpdateOp::parse("#,3,1", &t).unwrap(),
        ];
        apply_ops(&mut tuple, &ops).unwrap();
        assert_eq!(tuple, vec![json!(1), json!("new value"), json!(2.5), json!(13)]);
    }

    #[test]
    fn test_apply_set_appends_next_field() {
        let t = template();
        let mut tuple = vec![json!(2), json!("k")];
        apply_ops(&mut tuple, &[UpdateOp::parse("=,3,7", &t).unwrap()]).unwrap();
        assert_eq!(tuple, vec![json!(2), json!("k"), json!(7.0)]);
    }
}
