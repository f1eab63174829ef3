//! CLI argument parsing for the SAM translation pipeline.
//!
//! The CLI is intentionally thin: options are resolved once into `RootArgs`
//! and read-only thereafter. No cross-field validation happens here; a
//! missing `--s3-bucket` for `package` surfaces later as an `aws` CLI error.
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Root CLI entrypoint for the translation pipeline.
#[derive(Parser, Debug)]
#[command(
    name = "sam-translate",
    version,
    about = "Convert SAM templates to CloudFormation templates",
    after_help = "Commands:\n  (none)   Transform the template\n  package  Upload local artifacts to S3, then transform\n  deploy   Package, transform, then deploy the stack\n\nExamples:\n  sam-translate --template-file template.yaml\n  sam-translate package --template-file template.yaml --s3-bucket my-bucket\n  sam-translate deploy --s3-bucket my-bucket --capabilities CAPABILITY_IAM --stack-name my-stack"
)]
pub struct RootArgs {
    /// Pipeline command; omit to transform only
    #[arg(value_enum)]
    pub command: Option<PipelineCommand>,

    /// Location of SAM template to transform
    #[arg(long, value_name = "PATH", default_value = "template.yaml")]
    pub template_file: PathBuf,

    /// Location to store resulting CloudFormation template
    #[arg(long, value_name = "PATH", default_value = "transformed-template.json")]
    pub output_template: PathBuf,

    /// S3 bucket to use for SAM artifacts when using the `package` command
    #[arg(long, value_name = "BUCKET")]
    pub s3_bucket: Option<String>,

    /// Capabilities to acknowledge when deploying the stack
    #[arg(long, value_name = "CAPS")]
    pub capabilities: Option<String>,

    /// Unique name for your CloudFormation stack
    #[arg(long, value_name = "NAME")]
    pub stack_name: Option<String>,

    /// Enables verbose logging
    #[arg(long)]
    pub verbose: bool,
}

/// Pipeline commands beyond the default transform-only run.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineCommand {
    /// Package local artifacts to S3, then transform
    Package,
    /// Package, transform, then deploy the stack
    Deploy,
}
