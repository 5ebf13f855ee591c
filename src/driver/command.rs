//! Named command tables.
//!
//! Init steps name driver commands as strings. Each driver publishes a static
//! table of [`CommandSpec`]s describing the commands it accepts by name and
//! the typed parameters each one takes. Arguments from the configuration are
//! checked against that table with [`CommandSpec::bind`] before the driver is
//! called, so drivers only ever see well-typed [`BoundArguments`].
//!
//! Values are never coerced: a string `"5"` does not satisfy a number
//! parameter and `1` does not satisfy a boolean one.

use crate::error::DriverError;
use serde_json::Value;

/// Named arguments of one init step.
pub type Arguments = serde_json::Map<String, Value>;

/// Expected type of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// JSON string
    String,
    /// Any JSON number
    Number,
    /// JSON number without a fractional part that fits in an `i64`
    Integer,
    /// JSON boolean
    Boolean,
}

impl ArgKind {
    /// Whether `value` has this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            ArgKind::Number => value.is_number(),
            ArgKind::Integer => value.is_i64(),
            ArgKind::Boolean => value.is_boolean(),
        }
    }

    /// Lowercase type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Number => "number",
            ArgKind::Integer => "integer",
            ArgKind::Boolean => "boolean",
        }
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// One parameter of a command.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Parameter name as written in the configuration
    pub name: &'static str,
    /// Expected value type
    pub kind: ArgKind,
    /// Whether the argument must be supplied
    pub required: bool,
}

impl ParamSpec {
    /// A parameter that must be supplied.
    pub const fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    /// A parameter that may be omitted.
    pub const fn optional(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// A command callable by name.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    /// Command name used in `init` steps
    pub name: &'static str,
    /// Accepted parameters
    pub params: &'static [ParamSpec],
}

impl CommandSpec {
    /// Declare a command.
    pub const fn new(name: &'static str, params: &'static [ParamSpec]) -> Self {
        Self { name, params }
    }

    /// Check `args` against this command's parameters.
    ///
    /// Fails when a required argument is missing, a value has the wrong type,
    /// or an argument names no parameter. The error string says which.
    pub fn bind<'a>(&self, args: &'a Arguments) -> Result<BoundArguments<'a>, String> {
        for param in self.params {
            match args.get(param.name) {
                None if param.required => {
                    return Err(format!("missing required argument '{}'", param.name));
                }
                None => {}
                Some(value) if !param.kind.accepts(value) => {
                    return Err(format!(
                        "argument '{}' expects {}, got {}",
                        param.name,
                        param.kind.as_str(),
                        json_type(value)
                    ));
                }
                Some(_) => {}
            }
        }

        if let Some(extra) = args
            .keys()
            .find(|key| !self.params.iter().any(|p| p.name == key.as_str()))
        {
            return Err(format!("unexpected argument '{}'", extra));
        }

        Ok(BoundArguments { args })
    }

    /// `name(param: kind, [optional: kind])`, for listings.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| {
                let param = format!("{}: {}", p.name, p.kind.as_str());
                if p.required {
                    param
                } else {
                    format!("[{param}]")
                }
            })
            .collect();
        format!("{}({})", self.name, params.join(", "))
    }
}

/// Find a command by name in a set of tables.
pub fn find_command(
    tables: &[&'static [CommandSpec]],
    name: &str,
) -> Option<&'static CommandSpec> {
    tables
        .iter()
        .flat_map(|&table| table.iter())
        .find(|command| command.name == name)
}

/// Arguments that passed [`CommandSpec::bind`].
#[derive(Debug, Clone, Copy)]
pub struct BoundArguments<'a> {
    args: &'a Arguments,
}

impl<'a> BoundArguments<'a> {
    /// Numeric argument.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.args.get(name).and_then(Value::as_f64)
    }

    /// Integer argument.
    pub fn integer(&self, name: &str) -> Option<i64> {
        self.args.get(name).and_then(Value::as_i64)
    }

    /// Boolean argument.
    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.args.get(name).and_then(Value::as_bool)
    }

    /// String argument.
    pub fn string(&self, name: &str) -> Option<&'a str> {
        self.args.get(name).and_then(Value::as_str)
    }

    /// Raw access for drivers that record their calls.
    pub fn raw(&self) -> &'a Arguments {
        self.args
    }
}

/// Unwrap an argument a driver cannot work without.
pub fn require<T>(driver: &str, name: &str, value: Option<T>) -> Result<T, DriverError> {
    value.ok_or_else(|| DriverError::invalid_parameter(driver, format!("missing argument '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SET_VOLTAGE_PARAMS: &[ParamSpec] = &[
        ParamSpec::required("voltage", ArgKind::Number),
        ParamSpec::optional("channel", ArgKind::Integer),
    ];
    static SET_VOLTAGE: CommandSpec = CommandSpec::new("set_voltage", SET_VOLTAGE_PARAMS);

    fn args(value: Value) -> Arguments {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_bind_accepts_int_for_number() {
        let a = args(json!({"voltage": 0}));
        let bound = SET_VOLTAGE.bind(&a).unwrap();
        assert_eq!(bound.number("voltage"), Some(0.0));
        assert_eq!(bound.integer("channel"), None);
    }

    #[test]
    fn test_bind_rejects_missing_required() {
        let a = Arguments::new();
        let err = SET_VOLTAGE.bind(&a).unwrap_err();
        assert_eq!(err, "missing required argument 'voltage'");
    }

    #[test]
    fn test_bind_does_not_coerce_strings() {
        let a = args(json!({"voltage": "5"}));
        let err = SET_VOLTAGE.bind(&a).unwrap_err();
        assert_eq!(err, "argument 'voltage' expects number, got string");
    }

    #[test]
    fn test_bind_rejects_float_for_integer() {
        let a = args(json!({"voltage": 1.0, "channel": 1.5}));
        let err = SET_VOLTAGE.bind(&a).unwrap_err();
        assert!(err.contains("'channel' expects integer"));
    }

    #[test]
    fn test_bind_rejects_integer_beyond_i64() {
        let a = args(json!({"voltage": 1.0, "channel": u64::MAX}));
        let err = SET_VOLTAGE.bind(&a).unwrap_err();
        assert!(err.contains("'channel' expects integer"));

        let a = args(json!({"voltage": 1.0, "channel": i64::MAX}));
        let bound = SET_VOLTAGE.bind(&a).unwrap();
        assert_eq!(bound.integer("channel"), Some(i64::MAX));
    }

    #[test]
    fn test_bind_rejects_unexpected_argument() {
        let a = args(json!({"voltage": 1.0, "volts": 2}));
        let err = SET_VOLTAGE.bind(&a).unwrap_err();
        assert_eq!(err, "unexpected argument 'volts'");
    }

    #[test]
    fn test_null_is_not_a_value() {
        assert!(!ArgKind::Boolean.accepts(&Value::Null));
        assert!(!ArgKind::String.accepts(&Value::Null));
    }

    #[test]
    fn test_signature_marks_optional_params() {
        assert_eq!(
            SET_VOLTAGE.signature(),
            "set_voltage(voltage: number, [channel: integer])"
        );
    }

    #[test]
    fn test_find_command_searches_all_tables() {
        static EXTRA: &[CommandSpec] = &[CommandSpec::new("off", &[])];
        let first: &'static [CommandSpec] = std::slice::from_ref(&SET_VOLTAGE);

        assert!(find_command(&[first, EXTRA], "off").is_some());
        assert!(find_command(&[first, EXTRA], "set_voltage").is_some());
        assert!(find_command(&[first, EXTRA], "on").is_none());
    }
}
