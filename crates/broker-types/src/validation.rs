//! Configuration validation utilities for the broker system.
//!
//! Every pluggable implementation validates its own slice of the TOML
//! configuration before it is constructed. This module provides the shared
//! schema framework for that: typed fields, optional custom validators, and
//! nested tables with detailed error reporting.

use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
	/// A required field is missing.
	#[error("Missing required field: {0}")]
	MissingField(String),
	/// A field has an invalid value.
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	/// A field has the wrong TOML type.
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
}

/// The expected type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	/// A string value.
	String,
	/// An integer value with optional inclusive bounds.
	Integer { min: Option<i64>, max: Option<i64> },
	/// A boolean value.
	Boolean,
	/// An array whose elements all share one type.
	Array(Box<FieldType>),
	/// A nested table validated by its own schema.
	Table(Schema),
}

/// Custom validator function run after type checking.
///
/// Receives the field's TOML value and returns an error message on failure.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// One field in a configuration schema.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	/// Creates a new field with the given name and expected type.
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	/// Adds a custom validator to this field, run after type checking.
	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}
}

/// A validation schema for one TOML table: required fields that must be
/// present and optional fields that may be. Schemas nest through
/// [`FieldType::Table`].
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	/// Creates a new schema from required and optional fields.
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Validates a TOML value against this schema: presence of required
	/// fields, field types, custom validators, and nested tables.
	pub fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let table = config
			.as_table()
			.ok_or_else(|| ValidationError::TypeMismatch {
				field: "root".to_string(),
				expected: "table".to_string(),
				actual: config.type_str().to_string(),
			})?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| ValidationError::MissingField(field.name.clone()))?;
			check_field(&field.name, value, field)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				check_field(&field.name, value, field)?;
			}
		}

		Ok(())
	}
}

fn check_field(name: &str, value: &toml::Value, field: &Field) -> Result<(), ValidationError> {
	validate_field_type(name, value, &field.field_type)?;
	if let Some(validator) = &field.validator {
		validator(value).map_err(|message| ValidationError::InvalidValue {
			field: name.to_string(),
			message,
		})?;
	}
	Ok(())
}

/// Checks that a value matches the expected field type, recursing into
/// arrays and nested tables and enforcing integer bounds.
fn validate_field_type(
	field_name: &str,
	value: &toml::Value,
	expected_type: &FieldType,
) -> Result<(), ValidationError> {
	let mismatch = |expected: &str| ValidationError::TypeMismatch {
		field: field_name.to_string(),
		expected: expected.to_string(),
		actual: value.type_str().to_string(),
	};

	match expected_type {
		FieldType::String => {
			if !value.is_str() {
				return Err(mismatch("string"));
			}
		},
		FieldType::Integer { min, max } => {
			let int_val = value.as_integer().ok_or_else(|| mismatch("integer"))?;
			if let Some(min_val) = min {
				if int_val < *min_val {
					return Err(ValidationError::InvalidValue {
						field: field_name.to_string(),
						message: format!("Value {} is less than minimum {}", int_val, min_val),
					});
				}
			}
			if let Some(max_val) = max {
				if int_val > *max_val {
					return Err(ValidationError::InvalidValue {
						field: field_name.to_string(),
						message: format!("Value {} is greater than maximum {}", int_val, max_val),
					});
				}
			}
		},
		FieldType::Boolean => {
			if !value.is_bool() {
				return Err(mismatch("boolean"));
			}
		},
		FieldType::Array(inner_type) => {
			let array = value.as_array().ok_or_else(|| mismatch("array"))?;
			for (i, item) in array.iter().enumerate() {
				validate_field_type(&format!("{}[{}]", field_name, i), item, inner_type)?;
			}
		},
		FieldType::Table(schema) => {
			schema.validate(value).map_err(|e| prefix_field(field_name, e))?;
		},
	}

	Ok(())
}

fn prefix_field(prefix: &str, error: ValidationError) -> ValidationError {
	match error {
		ValidationError::MissingField(f) => {
			ValidationError::MissingField(format!("{}.{}", prefix, f))
		},
		ValidationError::InvalidValue { field, message } => ValidationError::InvalidValue {
			field: format!("{}.{}", prefix, field),
			message,
		},
		ValidationError::TypeMismatch {
			field,
			expected,
			actual,
		} => ValidationError::TypeMismatch {
			field: format!("{}.{}", prefix, field),
			expected,
			actual,
		},
	}
}

/// Trait implemented by each pluggable implementation's configuration schema.
///
/// Implementations return a boxed ConfigSchema from their `config_schema()`
/// method, letting the builder validate configuration before construction.
pub trait ConfigSchema: Send + Sync {
	/// Validates a TOML configuration value against this schema.
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn parse(s: &str) -> toml::Value {
		toml::from_str(s).unwrap()
	}

	#[test]
	fn required_field_missing() {
		let schema = Schema::new(vec![Field::new("path", FieldType::String)], vec![]);
		let err = schema.validate(&parse("other = 1")).unwrap_err();
		assert!(matches!(err, ValidationError::MissingField(f) if f == "path"));
	}

	#[test]
	fn integer_bounds_are_enforced() {
		let schema = Schema::new(
			vec![Field::new(
				"spawn_polls",
				FieldType::Integer {
					min: Some(0),
					max: Some(100),
				},
			)],
			vec![],
		);
		assert!(schema.validate(&parse("spawn_polls = 3")).is_ok());
		assert!(schema.validate(&parse("spawn_polls = -1")).is_err());
		assert!(schema.validate(&parse("spawn_polls = 101")).is_err());
	}

	#[test]
	fn nested_table_errors_carry_the_path() {
		let inner = Schema::new(vec![Field::new("cidr", FieldType::String)], vec![]);
		let schema = Schema::new(
			vec![Field::new("network", FieldType::Table(inner))],
			vec![],
		);
		let err = schema.validate(&parse("[network]\nother = 1")).unwrap_err();
		assert!(matches!(err, ValidationError::MissingField(f) if f == "network.cidr"));
	}

	#[test]
	fn custom_validator_runs_after_type_check() {
		let schema = Schema::new(
			vec![
				Field::new("provider", FieldType::String).with_validator(|v| {
					if v.as_str() == Some("") {
						Err("must not be empty".into())
					} else {
						Ok(())
					}
				}),
			],
			vec![],
		);
		assert!(schema.validate(&parse("provider = \"emulated\"")).is_ok());
		assert!(schema.validate(&parse("provider = \"\"")).is_err());
	}
}
