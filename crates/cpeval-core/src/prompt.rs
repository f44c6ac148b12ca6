//! Per-problem instruction prompts.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::error::{CpError, CpResult};
use crate::language::{EnvironmentCatalogue, LangCluster};
use crate::problem::Problem;

/// Whether a worked example precedes the problem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PromptStyle {
    #[default]
    ZeroShot,
    OneShot,
}

impl FromStr for PromptStyle {
    type Err = CpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zero-shot" | "zeroshot" | "zero_shot" => Ok(Self::ZeroShot),
            "one-shot" | "oneshot" | "one_shot" => Ok(Self::OneShot),
            _ => Err(CpError::Config(format!("invalid prompt style: {s}"))),
        }
    }
}

/// Wrapping applied around the finished prompt for chat-tuned local models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChatTemplate {
    #[default]
    Raw,
    /// `<s>[INST] ... [/INST]`
    Llama2,
}

impl ChatTemplate {
    pub fn wrap(self, prompt: &str) -> String {
        match self {
            Self::Raw => prompt.to_string(),
            Self::Llama2 => format!("<s>[INST] {} [/INST]", prompt.trim()),
        }
    }

    /// Strip the echoed instruction and end-of-sequence marker from a completion.
    pub fn clean_response(self, raw: &str) -> String {
        match self {
            Self::Raw => raw.to_string(),
            Self::Llama2 => raw
                .rsplit("[/INST]")
                .next()
                .unwrap_or(raw)
                .trim()
                .replace("</s>", ""),
        }
    }
}

impl FromStr for ChatTemplate {
    type Err = CpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "raw" | "none" => Ok(Self::Raw),
            "llama2" | "llama-2" | "inst" => Ok(Self::Llama2),
            _ => Err(CpError::Config(format!("invalid chat template: {s}"))),
        }
    }
}

pub const RESPONSE_SHAPE: &str = r#"[{"version": specific version used in the programming language, "target code": the code you produced in the respective programming language version.}]"#;

const ONE_SHOT_EXAMPLE: &str = r#"Worked example

Problem: Pete and Billy bought a watermelon weighing w kilos. They want to split it into two parts so that each part weighs an even, positive number of kilos. Decide whether this is possible.
Input: a single integer w (1 <= w <= 100).
Output: print YES if the split is possible, otherwise NO.
Sample input: 8
Sample output: YES

Reasoning:
1. Both parts are even, so their sum w must be even.
2. Both parts are positive, so each is at least 2 and w must be at least 4.
3. Any even w >= 4 splits as 2 + (w - 2), so the two conditions are sufficient.

Answer:
[{"version": "python3", "target code": "w = int(input())\nprint('YES' if w % 2 == 0 and w > 2 else 'NO')\n"}]

Now solve the following problem the same way, answering only with the JSON list.
"#;

/// Builds the instruction prompt for one problem.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    catalogue: EnvironmentCatalogue,
    style: PromptStyle,
    template: ChatTemplate,
}

impl PromptBuilder {
    pub fn new(catalogue: EnvironmentCatalogue) -> Self {
        Self {
            catalogue,
            style: PromptStyle::default(),
            template: ChatTemplate::default(),
        }
    }

    pub fn with_style(mut self, style: PromptStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_template(mut self, template: ChatTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn template(&self) -> ChatTemplate {
        self.template
    }

    /// Resolve the problem's cluster without building anything.
    pub fn validate(&self, problem: &Problem) -> CpResult<LangCluster> {
        self.catalogue
            .lookup(&problem.lang_cluster)
            .map(|(cluster, _)| cluster)
    }

    pub fn build(&self, problem: &Problem) -> CpResult<String> {
        let (cluster, versions) = self.catalogue.lookup(&problem.lang_cluster)?;
        let versions = versions
            .iter()
            .map(|v| format!("\"{v}\""))
            .collect::<Vec<_>>()
            .join(", ");

        let mut prompt = String::new();
        if self.style == PromptStyle::OneShot {
            prompt.push_str(
                "You are an expert competitive programmer. A fully worked example is shown first; \
                 use it as guidance for the expected reasoning and answer format.\n\n",
            );
            prompt.push_str(ONE_SHOT_EXAMPLE);
            prompt.push('\n');
        }

        prompt.push_str(
            "As an expert code developer with years of experience, provide the source code \
             that solves the problem below. Keep headers and imports to a minimum and follow \
             the input/output format exactly.\n",
        );
        // Writing into a String cannot fail.
        let _ = write!(
            prompt,
            "1. Problem description: {}\n\
             2. Input specification: {}\n\
             3. Output specification: {}\n\
             4. Sample inputs: {}\n\
             5. Sample outputs: {}\n\
             6. Sample explanations: {}\n\
             7. Programming language: {}\n\
             8. Supported programming language versions: [{}]\n",
            problem.description,
            problem.input_specification,
            problem.output_specification,
            problem.sample_inputs,
            problem.sample_outputs,
            problem.notes,
            cluster,
            versions,
        );
        prompt.push_str("Respond only with a string in the following JSON format:\n");
        prompt.push_str(RESPONSE_SHAPE);

        Ok(self.template.wrap(&prompt))
    }
}
