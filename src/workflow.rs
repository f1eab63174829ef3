//! Pipeline orchestration: package, transform, deploy.
//!
//! One invocation walks an explicit stage machine. Stages run strictly in
//! sequence; the first failure stops the pipeline, and a failed child
//! process carries its exit code out of the whole run.
use crate::cli::{PipelineCommand, RootArgs};
use crate::exec::{path_arg, CommandRunner};
use crate::policy::IamPolicyLoader;
use crate::template;
use crate::translator::{self, TransformError};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Suffix appended to the input template path for packaged output.
pub const PACKAGED_SUFFIX: &str = "._sam_packaged_.yaml";

/// Stages of one pipeline invocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Packaging,
    Transforming,
    Deploying,
    Done,
}

/// First stage for the requested command.
pub fn initial_stage(command: Option<PipelineCommand>) -> Stage {
    match command {
        None => Stage::Transforming,
        Some(PipelineCommand::Package) | Some(PipelineCommand::Deploy) => Stage::Packaging,
    }
}

/// Next stage once `stage` completes successfully.
pub fn next_stage(command: Option<PipelineCommand>, stage: Stage) -> Stage {
    match (stage, command) {
        (Stage::Packaging, _) => Stage::Transforming,
        (Stage::Transforming, Some(PipelineCommand::Deploy)) => Stage::Deploying,
        (Stage::Transforming, _) => Stage::Done,
        (Stage::Deploying, _) | (Stage::Done, _) => Stage::Done,
    }
}

/// Path for the packaged intermediate template.
pub fn packaged_path(input: &Path) -> PathBuf {
    let mut packaged = input.as_os_str().to_os_string();
    packaged.push(PACKAGED_SUFFIX);
    PathBuf::from(packaged)
}

/// Sequences packaging, transformation, and deployment for one invocation.
pub struct Pipeline<'a, R: CommandRunner> {
    args: &'a RootArgs,
    runner: &'a R,
}

impl<'a, R: CommandRunner> Pipeline<'a, R> {
    pub fn new(args: &'a RootArgs, runner: &'a R) -> Self {
        Self { args, runner }
    }

    pub fn run(&self) -> Result<()> {
        let mut input = self.args.template_file.clone();
        let mut stage = initial_stage(self.args.command);
        while stage != Stage::Done {
            tracing::debug!(?stage, input = %input.display(), "entering stage");
            match stage {
                Stage::Packaging => input = self.package(&input)?,
                Stage::Transforming => self.transform(&input)?,
                Stage::Deploying => self.deploy()?,
                Stage::Done => break,
            }
            stage = next_stage(self.args.command, stage);
        }
        Ok(())
    }

    /// Upload local artifacts and rewrite template references, producing the
    /// packaged template that feeds the transform stage.
    fn package(&self, input: &Path) -> Result<PathBuf> {
        let packaged = packaged_path(input);
        let mut args = vec![
            "--template-file".to_string(),
            path_arg(input),
            "--output-template-file".to_string(),
            path_arg(&packaged),
        ];
        if let Some(bucket) = &self.args.s3_bucket {
            args.push("--s3-bucket".to_string());
            args.push(bucket.clone());
        }
        self.runner.run("cloudformation", "package", &args)?;
        Ok(packaged)
    }

    fn transform(&self, input: &Path) -> Result<()> {
        let document = template::load(input)?;
        let policy_loader = IamPolicyLoader::new(self.runner);
        let parameter_overrides = BTreeMap::new();
        let transformed = translator::transform(&document, &parameter_overrides, &policy_loader)
            .map_err(|err| match err {
                TransformError::Invalid(invalid) => anyhow::Error::new(invalid),
                TransformError::Policy(policy) => policy,
            })?;
        template::write(&self.args.output_template, &transformed)?;
        println!(
            "Wrote transformed CloudFormation template to {}",
            self.args.output_template.display()
        );
        Ok(())
    }

    fn deploy(&self) -> Result<()> {
        let mut args = vec![
            "--template-file".to_string(),
            path_arg(&self.args.output_template),
        ];
        if let Some(capabilities) = &self.args.capabilities {
            args.push("--capabilities".to_string());
            args.push(capabilities.clone());
        }
        if let Some(stack_name) = &self.args.stack_name {
            args.push("--stack-name".to_string());
            args.push(stack_name.clone());
        }
        self.runner.run("cloudformation", "deploy", &args)?;
        Ok(())
    }
}
