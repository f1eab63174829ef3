//! SAM-to-CloudFormation document transformation.
//!
//! The entry point is [`transform`]: it validates the parsed template,
//! expands the supported `AWS::Serverless::*` resource types into their
//! CloudFormation equivalents, resolves managed-policy names through the
//! [`PolicyLoader`] collaborator, and strips the `Transform` declaration.
//! Validation defects are aggregated across the whole document and returned
//! as one [`InvalidDocument`] rather than failing on the first defect.
use crate::policy::PolicyLoader;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Execution policy attached to every generated function role.
pub const LAMBDA_BASIC_EXECUTION_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

const SERVERLESS_PREFIX: &str = "AWS::Serverless::";

/// A template that failed validation: one top-level message plus the
/// individual defect messages, displayed with single-space separation.
#[derive(Debug, Error)]
#[error("{message}{}", join_causes(.causes))]
pub struct InvalidDocument {
    pub message: String,
    pub causes: Vec<String>,
}

fn join_causes(causes: &[String]) -> String {
    causes.iter().map(|cause| format!(" {cause}")).collect()
}

/// Failure modes of the transformation delegate.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The template violates transformation rules; never retried.
    #[error(transparent)]
    Invalid(#[from] InvalidDocument),
    /// The policy-loading collaborator failed (not a template defect).
    #[error(transparent)]
    Policy(anyhow::Error),
}

fn invalid(causes: Vec<String>) -> InvalidDocument {
    InvalidDocument {
        message: format!(
            "Invalid Serverless Application Specification document. Number of errors found: {}.",
            causes.len()
        ),
        causes,
    }
}

/// Transform a parsed SAM document into a CloudFormation document.
pub fn transform(
    document: &Value,
    parameter_overrides: &BTreeMap<String, Value>,
    policy_loader: &dyn PolicyLoader,
) -> Result<Value, TransformError> {
    let Some(root) = document.as_object() else {
        return Err(invalid(vec!["Document root must be a mapping.".to_string()]).into());
    };
    let mut output = root.clone();
    output.remove("Transform");

    let mut causes = Vec::new();
    apply_parameter_overrides(&mut output, parameter_overrides, &mut causes);

    let resources = match output.get("Resources").and_then(Value::as_object) {
        Some(resources) if !resources.is_empty() => resources.clone(),
        _ => {
            causes.push(
                "'Resources' section is required and must be a non-empty mapping.".to_string(),
            );
            return Err(invalid(causes).into());
        }
    };

    let mut expanded = Map::new();
    for (logical_id, resource) in &resources {
        match expand_resource(logical_id, resource, policy_loader) {
            Ok(expansion) => {
                expanded.insert(logical_id.clone(), expansion.resource);
                for (generated_id, generated) in expansion.generated {
                    expanded.insert(generated_id, generated);
                }
            }
            Err(ResourceFailure::Invalid(resource_causes)) => causes.extend(resource_causes),
            Err(ResourceFailure::Policy(err)) => return Err(TransformError::Policy(err)),
        }
    }

    if !causes.is_empty() {
        return Err(invalid(causes).into());
    }
    output.insert("Resources".to_string(), Value::Object(expanded));
    Ok(Value::Object(output))
}

/// One expanded resource plus any companion resources it generated.
struct Expansion {
    resource: Value,
    generated: Vec<(String, Value)>,
}

enum ResourceFailure {
    Invalid(Vec<String>),
    Policy(anyhow::Error),
}

fn fail(cause: String) -> Result<Expansion, ResourceFailure> {
    Err(ResourceFailure::Invalid(vec![cause]))
}

fn expand_resource(
    logical_id: &str,
    resource: &Value,
    policy_loader: &dyn PolicyLoader,
) -> Result<Expansion, ResourceFailure> {
    let Some(body) = resource.as_object() else {
        return fail(format!("Resource '{logical_id}' must be a mapping."));
    };
    let Some(type_name) = body.get("Type").and_then(Value::as_str) else {
        return fail(format!("Resource '{logical_id}' is missing a 'Type' string."));
    };
    match type_name {
        "AWS::Serverless::Function" => expand_function(logical_id, body, policy_loader),
        "AWS::Serverless::SimpleTable" => expand_simple_table(logical_id, body),
        name if name.starts_with(SERVERLESS_PREFIX) => fail(format!(
            "Resource '{logical_id}' has unsupported type '{name}'."
        )),
        _ => Ok(Expansion {
            resource: resource.clone(),
            generated: Vec::new(),
        }),
    }
}

fn expand_function(
    logical_id: &str,
    body: &Map<String, Value>,
    policy_loader: &dyn PolicyLoader,
) -> Result<Expansion, ResourceFailure> {
    let Some(properties) = body.get("Properties").and_then(Value::as_object) else {
        return fail(format!(
            "Resource '{logical_id}' is missing a 'Properties' mapping."
        ));
    };

    let mut causes = Vec::new();
    let mut out_properties = Map::new();
    for (key, value) in properties {
        // CodeUri, Policies, and Role are rewritten below.
        if key != "CodeUri" && key != "Policies" && key != "Role" {
            out_properties.insert(key.clone(), value.clone());
        }
    }

    match properties.get("CodeUri") {
        Some(code_uri) => match code_location(code_uri) {
            Ok(code) => {
                out_properties.insert("Code".to_string(), code);
            }
            Err(cause) => causes.push(format!("Resource '{logical_id}' is invalid. {cause}")),
        },
        None => causes.push(format!(
            "Resource '{logical_id}' is invalid. 'CodeUri' is required."
        )),
    }

    let mut generated = Vec::new();
    match (properties.get("Role"), properties.get("Policies")) {
        (Some(_), Some(_)) => causes.push(format!(
            "Resource '{logical_id}' is invalid. Specify either 'Role' or 'Policies', not both."
        )),
        (Some(role), None) => {
            out_properties.insert("Role".to_string(), role.clone());
        }
        (None, policies) => {
            let mut arns = vec![Value::String(LAMBDA_BASIC_EXECUTION_ARN.to_string())];
            for entry in policy_entries(policies) {
                match entry {
                    PolicyRef::Arn(arn) => arns.push(Value::String(arn)),
                    PolicyRef::Name(name) => match policy_loader.resolve(&name) {
                        Ok(Some(arn)) => arns.push(Value::String(arn)),
                        Ok(None) => causes.push(format!(
                            "Resource '{logical_id}' is invalid. Managed policy '{name}' could not be resolved."
                        )),
                        Err(err) => return Err(ResourceFailure::Policy(err)),
                    },
                    PolicyRef::Other(value) => causes.push(format!(
                        "Resource '{logical_id}' is invalid. Policy entries must be strings, got {value}."
                    )),
                }
            }
            let role_id = format!("{logical_id}Role");
            out_properties.insert(
                "Role".to_string(),
                json!({"Fn::GetAtt": [role_id.as_str(), "Arn"]}),
            );
            generated.push((role_id, execution_role(arns)));
        }
    }

    if !causes.is_empty() {
        return Err(ResourceFailure::Invalid(causes));
    }

    let mut out_body = body.clone();
    out_body.insert(
        "Type".to_string(),
        Value::String("AWS::Lambda::Function".to_string()),
    );
    out_body.insert("Properties".to_string(), Value::Object(out_properties));
    Ok(Expansion {
        resource: Value::Object(out_body),
        generated,
    })
}

enum PolicyRef {
    Arn(String),
    Name(String),
    Other(Value),
}

/// `Policies` accepts a single string or a list of strings; anything else in
/// a list position is a defect.
fn policy_entries(policies: Option<&Value>) -> Vec<PolicyRef> {
    let Some(policies) = policies else {
        return Vec::new();
    };
    let items: Vec<&Value> = match policies {
        Value::Array(items) => items.iter().collect(),
        single => vec![single],
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(text) if text.starts_with("arn:") => PolicyRef::Arn(text.clone()),
            Value::String(text) => PolicyRef::Name(text.clone()),
            other => PolicyRef::Other(other.clone()),
        })
        .collect()
}

fn execution_role(managed_policy_arns: Vec<Value>) -> Value {
    json!({
        "Type": "AWS::IAM::Role",
        "Properties": {
            "AssumeRolePolicyDocument": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": {"Service": ["lambda.amazonaws.com"]},
                    "Action": ["sts:AssumeRole"]
                }]
            },
            "ManagedPolicyArns": managed_policy_arns
        }
    })
}

/// Known limitation carried over from the original tool: local artifact
/// paths cannot be transformed in-process; they must be packaged first.
fn code_location(code_uri: &Value) -> Result<Value, String> {
    match code_uri {
        Value::String(uri) => {
            let Some(remainder) = uri.strip_prefix("s3://") else {
                return Err(format!(
                    "'CodeUri' {uri:?} is not a valid S3 Uri; package local artifacts first."
                ));
            };
            match remainder.split_once('/') {
                Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                    Ok(json!({"S3Bucket": bucket, "S3Key": key}))
                }
                _ => Err(format!("'CodeUri' {uri:?} is missing a bucket or object key.")),
            }
        }
        Value::Object(map) if map.contains_key("Bucket") && map.contains_key("Key") => {
            let mut code = Map::new();
            code.insert("S3Bucket".to_string(), map["Bucket"].clone());
            code.insert("S3Key".to_string(), map["Key"].clone());
            if let Some(version) = map.get("Version") {
                code.insert("S3ObjectVersion".to_string(), version.clone());
            }
            Ok(Value::Object(code))
        }
        other => Err(format!(
            "'CodeUri' must be an S3 Uri or an S3 location mapping, got {other}."
        )),
    }
}

fn expand_simple_table(
    logical_id: &str,
    body: &Map<String, Value>,
) -> Result<Expansion, ResourceFailure> {
    let empty = Map::new();
    let properties = body
        .get("Properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let (key_name, attribute_type) = match primary_key(properties) {
        Ok(pair) => pair,
        Err(cause) => return fail(format!("Resource '{logical_id}' is invalid. {cause}")),
    };

    let mut out_properties = Map::new();
    out_properties.insert(
        "AttributeDefinitions".to_string(),
        json!([{"AttributeName": key_name, "AttributeType": attribute_type}]),
    );
    out_properties.insert(
        "KeySchema".to_string(),
        json!([{"AttributeName": key_name, "KeyType": "HASH"}]),
    );
    let throughput = properties
        .get("ProvisionedThroughput")
        .cloned()
        .unwrap_or_else(|| json!({"ReadCapacityUnits": 5, "WriteCapacityUnits": 5}));
    out_properties.insert("ProvisionedThroughput".to_string(), throughput);
    for key in ["TableName", "Tags", "SSESpecification"] {
        if let Some(value) = properties.get(key) {
            out_properties.insert(key.to_string(), value.clone());
        }
    }

    let mut out_body = body.clone();
    out_body.insert(
        "Type".to_string(),
        Value::String("AWS::DynamoDB::Table".to_string()),
    );
    out_body.insert("Properties".to_string(), Value::Object(out_properties));
    Ok(Expansion {
        resource: Value::Object(out_body),
        generated: Vec::new(),
    })
}

fn primary_key(properties: &Map<String, Value>) -> Result<(String, String), String> {
    let Some(primary) = properties.get("PrimaryKey") else {
        return Ok(("id".to_string(), "S".to_string()));
    };
    let Some(primary) = primary.as_object() else {
        return Err("'PrimaryKey' must be a mapping.".to_string());
    };
    let name = primary
        .get("Name")
        .and_then(Value::as_str)
        .unwrap_or("id")
        .to_string();
    let attribute_type = match primary.get("Type").and_then(Value::as_str).unwrap_or("String") {
        "String" => "S",
        "Number" => "N",
        "Binary" => "B",
        other => {
            return Err(format!(
                "'PrimaryKey' type must be String, Number, or Binary, got '{other}'."
            ))
        }
    };
    Ok((name, attribute_type.to_string()))
}

fn apply_parameter_overrides(
    output: &mut Map<String, Value>,
    overrides: &BTreeMap<String, Value>,
    causes: &mut Vec<String>,
) {
    for (name, value) in overrides {
        let parameter = output
            .get_mut("Parameters")
            .and_then(Value::as_object_mut)
            .and_then(|parameters| parameters.get_mut(name))
            .and_then(Value::as_object_mut);
        match parameter {
            Some(parameter) => {
                parameter.insert("Default".to_string(), value.clone());
            }
            None => causes.push(format!(
                "Parameter override '{name}' does not match any template parameter."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct StubPolicies(BTreeMap<String, String>);

    impl StubPolicies {
        fn with(entries: &[(&str, &str)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(name, arn)| (name.to_string(), arn.to_string()))
                    .collect(),
            )
        }
    }

    impl PolicyLoader for StubPolicies {
        fn resolve(&self, name: &str) -> anyhow::Result<Option<String>> {
            Ok(self.0.get(name).cloned())
        }
    }

    struct BrokenPolicies;

    impl PolicyLoader for BrokenPolicies {
        fn resolve(&self, _name: &str) -> anyhow::Result<Option<String>> {
            Err(anyhow!("iam unavailable"))
        }
    }

    fn no_policies() -> StubPolicies {
        StubPolicies::with(&[])
    }

    fn transform_ok(document: Value, loader: &dyn PolicyLoader) -> Value {
        transform(&document, &BTreeMap::new(), loader).unwrap()
    }

    fn transform_invalid(document: Value) -> InvalidDocument {
        match transform(&document, &BTreeMap::new(), &no_policies()) {
            Err(TransformError::Invalid(err)) => err,
            other => panic!("expected InvalidDocument, got {other:?}"),
        }
    }

    #[test]
    fn serverless_function_expands_to_lambda_with_generated_role() {
        let loader = StubPolicies::with(&[(
            "AmazonDynamoDBReadOnlyAccess",
            "arn:aws:iam::aws:policy/AmazonDynamoDBReadOnlyAccess",
        )]);
        let document = json!({
            "Transform": "AWS::Serverless-2016-10-31",
            "Resources": {
                "MyFunction": {
                    "Type": "AWS::Serverless::Function",
                    "Properties": {
                        "Handler": "index.handler",
                        "Runtime": "python3.12",
                        "CodeUri": "s3://artifacts/app.zip",
                        "Policies": ["AmazonDynamoDBReadOnlyAccess"]
                    }
                }
            }
        });

        let output = transform_ok(document, &loader);

        assert!(output.get("Transform").is_none());
        let function = &output["Resources"]["MyFunction"];
        assert_eq!(function["Type"], "AWS::Lambda::Function");
        assert_eq!(function["Properties"]["Handler"], "index.handler");
        assert_eq!(
            function["Properties"]["Code"],
            json!({"S3Bucket": "artifacts", "S3Key": "app.zip"})
        );
        assert_eq!(
            function["Properties"]["Role"],
            json!({"Fn::GetAtt": ["MyFunctionRole", "Arn"]})
        );

        let role = &output["Resources"]["MyFunctionRole"];
        assert_eq!(role["Type"], "AWS::IAM::Role");
        assert_eq!(
            role["Properties"]["ManagedPolicyArns"],
            json!([
                LAMBDA_BASIC_EXECUTION_ARN,
                "arn:aws:iam::aws:policy/AmazonDynamoDBReadOnlyAccess"
            ])
        );
    }

    #[test]
    fn explicit_role_suppresses_role_generation() {
        let document = json!({
            "Resources": {
                "MyFunction": {
                    "Type": "AWS::Serverless::Function",
                    "Properties": {
                        "Handler": "index.handler",
                        "Runtime": "python3.12",
                        "CodeUri": "s3://artifacts/app.zip",
                        "Role": "arn:aws:iam::123456789012:role/existing"
                    }
                }
            }
        });

        let output = transform_ok(document, &no_policies());

        assert_eq!(
            output["Resources"]["MyFunction"]["Properties"]["Role"],
            "arn:aws:iam::123456789012:role/existing"
        );
        assert!(output["Resources"].get("MyFunctionRole").is_none());
    }

    #[test]
    fn role_and_policies_together_are_rejected() {
        let document = json!({
            "Resources": {
                "MyFunction": {
                    "Type": "AWS::Serverless::Function",
                    "Properties": {
                        "CodeUri": "s3://artifacts/app.zip",
                        "Role": "arn:aws:iam::123456789012:role/existing",
                        "Policies": ["Whatever"]
                    }
                }
            }
        });

        let err = transform_invalid(document);
        assert_eq!(err.causes.len(), 1);
        assert!(err.causes[0].contains("either 'Role' or 'Policies'"));
    }

    #[test]
    fn arn_policy_entries_skip_the_loader() {
        let document = json!({
            "Resources": {
                "MyFunction": {
                    "Type": "AWS::Serverless::Function",
                    "Properties": {
                        "CodeUri": "s3://artifacts/app.zip",
                        "Policies": "arn:aws:iam::aws:policy/AmazonS3ReadOnlyAccess"
                    }
                }
            }
        });

        // BrokenPolicies proves resolve() is never called for ARN entries.
        let output = transform_ok(document, &BrokenPolicies);
        assert_eq!(
            output["Resources"]["MyFunctionRole"]["Properties"]["ManagedPolicyArns"],
            json!([
                LAMBDA_BASIC_EXECUTION_ARN,
                "arn:aws:iam::aws:policy/AmazonS3ReadOnlyAccess"
            ])
        );
    }

    #[test]
    fn unresolvable_policy_name_is_a_defect() {
        let document = json!({
            "Resources": {
                "MyFunction": {
                    "Type": "AWS::Serverless::Function",
                    "Properties": {
                        "CodeUri": "s3://artifacts/app.zip",
                        "Policies": ["NoSuchManagedPolicy"]
                    }
                }
            }
        });

        let err = transform_invalid(document);
        assert!(err.causes[0].contains("'NoSuchManagedPolicy' could not be resolved"));
    }

    #[test]
    fn policy_loader_failure_is_not_a_validation_error() {
        let document = json!({
            "Resources": {
                "MyFunction": {
                    "Type": "AWS::Serverless::Function",
                    "Properties": {
                        "CodeUri": "s3://artifacts/app.zip",
                        "Policies": ["AnyName"]
                    }
                }
            }
        });

        match transform(&document, &BTreeMap::new(), &BrokenPolicies) {
            Err(TransformError::Policy(err)) => {
                assert!(err.to_string().contains("iam unavailable"));
            }
            other => panic!("expected Policy error, got {other:?}"),
        }
    }

    #[test]
    fn local_code_uri_is_rejected() {
        let document = json!({
            "Resources": {
                "MyFunction": {
                    "Type": "AWS::Serverless::Function",
                    "Properties": {"CodeUri": "./build/app.zip"}
                }
            }
        });

        let err = transform_invalid(document);
        assert!(err.causes[0].contains("not a valid S3 Uri"));
    }

    #[test]
    fn causes_are_concatenated_after_the_message_with_single_spaces() {
        let document = json!({
            "Resources": {
                "First": {"Type": "AWS::Serverless::Function", "Properties": {}},
                "Second": {"Properties": {}}
            }
        });

        let err = transform_invalid(document);
        assert_eq!(err.causes.len(), 2);
        assert_eq!(
            err.to_string(),
            format!("{} {} {}", err.message, err.causes[0], err.causes[1])
        );
        assert!(err
            .message
            .contains("Number of errors found: 2."));
    }

    #[test]
    fn missing_resources_section_is_rejected() {
        let err = transform_invalid(json!({"Description": "empty"}));
        assert!(err.causes[0].contains("'Resources' section is required"));
    }

    #[test]
    fn non_mapping_root_is_rejected() {
        let err = transform_invalid(json!(["not", "a", "template"]));
        assert_eq!(err.causes, vec!["Document root must be a mapping.".to_string()]);
    }

    #[test]
    fn unsupported_serverless_type_is_rejected() {
        let document = json!({
            "Resources": {
                "Api": {"Type": "AWS::Serverless::Api", "Properties": {}}
            }
        });

        let err = transform_invalid(document);
        assert!(err.causes[0].contains("unsupported type 'AWS::Serverless::Api'"));
    }

    #[test]
    fn plain_cloudformation_resources_pass_through() {
        let bucket = json!({
            "Type": "AWS::S3::Bucket",
            "Properties": {"BucketName": "my-bucket"},
            "DeletionPolicy": "Retain"
        });
        let document = json!({
            "Transform": "AWS::Serverless-2016-10-31",
            "Resources": {"Bucket": bucket}
        });

        let output = transform_ok(document, &no_policies());

        assert_eq!(output["Resources"]["Bucket"], bucket);
        assert!(output.get("Transform").is_none());
    }

    #[test]
    fn simple_table_expands_with_defaults() {
        let document = json!({
            "Resources": {
                "Table": {"Type": "AWS::Serverless::SimpleTable"}
            }
        });

        let output = transform_ok(document, &no_policies());

        let table = &output["Resources"]["Table"];
        assert_eq!(table["Type"], "AWS::DynamoDB::Table");
        assert_eq!(
            table["Properties"]["KeySchema"],
            json!([{"AttributeName": "id", "KeyType": "HASH"}])
        );
        assert_eq!(
            table["Properties"]["AttributeDefinitions"],
            json!([{"AttributeName": "id", "AttributeType": "S"}])
        );
        assert_eq!(
            table["Properties"]["ProvisionedThroughput"],
            json!({"ReadCapacityUnits": 5, "WriteCapacityUnits": 5})
        );
    }

    #[test]
    fn simple_table_honors_primary_key_and_throughput() {
        let document = json!({
            "Resources": {
                "Table": {
                    "Type": "AWS::Serverless::SimpleTable",
                    "Properties": {
                        "TableName": "orders",
                        "PrimaryKey": {"Name": "OrderId", "Type": "Number"},
                        "ProvisionedThroughput": {"ReadCapacityUnits": 10, "WriteCapacityUnits": 2}
                    }
                }
            }
        });

        let output = transform_ok(document, &no_policies());

        let properties = &output["Resources"]["Table"]["Properties"];
        assert_eq!(properties["TableName"], "orders");
        assert_eq!(
            properties["AttributeDefinitions"],
            json!([{"AttributeName": "OrderId", "AttributeType": "N"}])
        );
        assert_eq!(
            properties["ProvisionedThroughput"],
            json!({"ReadCapacityUnits": 10, "WriteCapacityUnits": 2})
        );
    }

    #[test]
    fn parameter_override_replaces_default() {
        let document = json!({
            "Parameters": {"Stage": {"Type": "String", "Default": "dev"}},
            "Resources": {"Bucket": {"Type": "AWS::S3::Bucket"}}
        });
        let overrides: BTreeMap<String, Value> =
            [("Stage".to_string(), json!("prod"))].into_iter().collect();

        let output = transform(&document, &overrides, &no_policies()).unwrap();

        assert_eq!(output["Parameters"]["Stage"]["Default"], "prod");
    }

    #[test]
    fn unknown_parameter_override_is_a_defect() {
        let document = json!({
            "Resources": {"Bucket": {"Type": "AWS::S3::Bucket"}}
        });
        let overrides: BTreeMap<String, Value> =
            [("Stage".to_string(), json!("prod"))].into_iter().collect();

        match transform(&document, &overrides, &no_policies()) {
            Err(TransformError::Invalid(err)) => {
                assert!(err.causes[0].contains("Parameter override 'Stage'"));
            }
            other => panic!("expected InvalidDocument, got {other:?}"),
        }
    }
}
