//! Pure builtin functions available to every program.

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFunction {
    Len,
    Range,
    Abs,
}

impl BuiltinFunction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Len => "len",
            Self::Range => "range",
            Self::Abs => "abs",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "len" => Some(Self::Len),
            "range" => Some(Self::Range),
            "abs" => Some(Self::Abs),
            _ => None,
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::Len, Self::Range, Self::Abs]
    }

    /// Evaluates the builtin. Errors surface as TypeErrors in the VM.
    pub fn call(self, args: &[Value]) -> Result<Value, String> {
        match self {
            Self::Len => {
                let [arg] = args else {
                    return Err(format!("len() expected 1 argument, got {}", args.len()));
                };
                match arg {
                    Value::List(values) => Ok(Value::Number(values.len() as f64)),
                    Value::Str(value) => Ok(Value::Number(value.chars().count() as f64)),
                    other => Err(format!("len() argument must be a list or string, got {}", other.type_name())),
                }
            }
            Self::Range => {
                let (start, stop) = match args {
                    [stop] => (0.0, number_arg("range", stop)?),
                    [start, stop] => (number_arg("range", start)?, number_arg("range", stop)?),
                    _ => {
                        return Err(format!(
                            "range() expected 1 or 2 arguments, got {}",
                            args.len()
                        ));
                    }
                };
                let mut values = Vec::new();
                let mut current = start.floor();
                while current < stop {
                    values.push(Value::Number(current));
                    current += 1.0;
                }
                Ok(Value::List(values))
            }
            Self::Abs => {
                let [arg] = args else {
                    return Err(format!("abs() expected 1 argument, got {}", args.len()));
                };
                Ok(Value::Number(number_arg("abs", arg)?.abs()))
            }
        }
    }
}

fn number_arg(name: &str, value: &Value) -> Result<f64, String> {
    value
        .as_number()
        .ok_or_else(|| format!("{name}() argument must be a number, got {}", value.type_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_counts_lists_and_strings() {
        let list = Value::List(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(BuiltinFunction::Len.call(&[list]).unwrap(), Value::Number(2.0));
        let text = Value::Str("abc".to_string());
        assert_eq!(BuiltinFunction::Len.call(&[text]).unwrap(), Value::Number(3.0));
        assert!(BuiltinFunction::Len.call(&[Value::Number(1.0)]).is_err());
    }

    #[test]
    fn range_builds_number_lists() {
        let result = BuiltinFunction::Range.call(&[Value::Number(3.0)]).unwrap();
        assert_eq!(
            result,
            Value::List(vec![
                Value::Number(0.0),
                Value::Number(1.0),
                Value::Number(2.0)
            ])
        );
        let result = BuiltinFunction::Range
            .call(&[Value::Number(2.0), Value::Number(4.0)])
            .unwrap();
        assert_eq!(
            result,
            Value::List(vec![Value::Number(2.0), Value::Number(3.0)])
        );
        let empty = BuiltinFunction::Range.call(&[Value::Number(0.0)]).unwrap();
        assert_eq!(empty, Value::List(vec![]));
    }

    #[test]
    fn abs_negates_negative_numbers() {
        assert_eq!(
            BuiltinFunction::Abs.call(&[Value::Number(-4.5)]).unwrap(),
            Value::Number(4.5)
        );
    }
}
