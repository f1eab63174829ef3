//! Template loading and writing.
//!
//! Input templates are YAML following the SAM schema; output is
//! pretty-printed JSON. Loading expands CloudFormation short-form intrinsic
//! tags (`!Ref`, `!GetAtt`, ...) into their long-form mapping equivalents so
//! the rest of the pipeline only ever sees plain JSON values.
use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Number, Value};
use std::fs;
use std::path::Path;

/// Parse a YAML template from disk into a JSON document.
pub fn load(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("read template {}", path.display()))?;
    let parsed: serde_yaml::Value = serde_yaml::from_str(&text)
        .with_context(|| format!("parse template {}", path.display()))?;
    yaml_to_json(parsed).with_context(|| format!("convert template {}", path.display()))
}

/// Serialize a document as indented JSON, fully overwriting `path`.
pub fn write(path: &Path, document: &Value) -> Result<()> {
    let json = serde_json::to_string_pretty(document)
        .context("serialize transformed template")?;
    fs::write(path, json).with_context(|| format!("write template {}", path.display()))?;
    Ok(())
}

fn yaml_to_json(value: serde_yaml::Value) -> Result<Value> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(value) => Value::Bool(value),
        serde_yaml::Value::Number(number) => Value::Number(convert_number(&number)?),
        serde_yaml::Value::String(text) => Value::String(text),
        serde_yaml::Value::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        serde_yaml::Value::Mapping(mapping) => {
            let mut object = Map::new();
            for (key, item) in mapping {
                object.insert(key_string(&key)?, yaml_to_json(item)?);
            }
            Value::Object(object)
        }
        serde_yaml::Value::Tagged(tagged) => expand_tag(*tagged)?,
    })
}

fn key_string(key: &serde_yaml::Value) -> Result<String> {
    match key {
        serde_yaml::Value::String(text) => Ok(text.clone()),
        serde_yaml::Value::Bool(value) => Ok(value.to_string()),
        serde_yaml::Value::Number(number) => Ok(number.to_string()),
        other => bail!("unsupported mapping key: {other:?}"),
    }
}

fn convert_number(number: &serde_yaml::Number) -> Result<Number> {
    if let Some(value) = number.as_i64() {
        return Ok(Number::from(value));
    }
    if let Some(value) = number.as_u64() {
        return Ok(Number::from(value));
    }
    number
        .as_f64()
        .and_then(Number::from_f64)
        .ok_or_else(|| anyhow!("non-finite number in template: {number}"))
}

/// Expand a short-form intrinsic tag into its long-form mapping.
///
/// `!Ref x` becomes `{"Ref": x}`, `!GetAtt a.b` becomes
/// `{"Fn::GetAtt": ["a", "b"]}`, `!Condition c` becomes `{"Condition": c}`,
/// and any other `!Name v` becomes `{"Fn::Name": v}`.
fn expand_tag(tagged: serde_yaml::value::TaggedValue) -> Result<Value> {
    let tag = tagged.tag.to_string();
    let name = tag.trim_start_matches('!');
    let inner = yaml_to_json(tagged.value)?;

    let (key, inner) = match name {
        "Ref" => ("Ref".to_string(), inner),
        "Condition" => ("Condition".to_string(), inner),
        "GetAtt" => ("Fn::GetAtt".to_string(), get_att_arguments(inner)?),
        other => (format!("Fn::{other}"), inner),
    };

    let mut object = Map::new();
    object.insert(key, inner);
    Ok(Value::Object(object))
}

fn get_att_arguments(value: Value) -> Result<Value> {
    match value {
        Value::String(text) => {
            let (resource, attribute) = text
                .split_once('.')
                .ok_or_else(|| anyhow!("!GetAtt expects <resource>.<attribute>, got {text:?}"))?;
            Ok(Value::Array(vec![
                Value::String(resource.to_string()),
                Value::String(attribute.to_string()),
            ]))
        }
        Value::Array(_) => Ok(value),
        other => bail!("!GetAtt expects a string or list, got {other}"),
    }
}
