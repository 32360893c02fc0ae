//! Magic-line interpreter.
//!
//! Job parameters are given as `%key=value` lines anywhere in the code:
//!
//! ```text
//! %framework=tensorflow
//! %ps=2
//! %worker=3
//! ```
//!
//! Recognised keys are `framework` (`tensorflow`, `tf`, `pytorch`, `torch`),
//! `ps`, `worker` and `master`. Magic lines are removed from the code that
//! gets built into the image. Other `%` lines, such as notebook magics like
//! `%matplotlib inline`, are left alone.

use kfjob_core::{Error, Framework, Interpreter, JobConfiguration};

const MAGIC_PREFIX: char = '%';
const KEYS: [&str; 4] = ["framework", "ps", "worker", "master"];

/// A `%key=value` line, or a bare `%key` for one of `KEYS`.
struct Directive<'a> {
    key: &'a str,
    value: Option<&'a str>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MagicInterpreter;

impl MagicInterpreter {
    pub fn new() -> Self {
        MagicInterpreter
    }
}

impl Interpreter for MagicInterpreter {
    fn preprocess(&self, code: &str) -> Result<JobConfiguration, Error> {
        let mut framework = None;
        let mut ps = None;
        let mut worker = None;
        let mut master = None;

        for (idx, line) in code.lines().enumerate() {
            let Some(directive) = magic(line) else {
                continue;
            };
            let line_no = idx + 1;
            let value = directive.value.ok_or_else(|| {
                Error::preprocess(format!("line {line_no}: expected %key=value, got '{}'", line.trim()))
            })?;

            match directive.key {
                "framework" => framework = Some(parse_framework(value, line_no)?),
                "ps" => ps = Some(parse_count(value, line_no)?),
                "worker" => worker = Some(parse_count(value, line_no)?),
                "master" => master = Some(parse_count(value, line_no)?),
                other => {
                    return Err(Error::preprocess(format!(
                        "line {line_no}: unknown key '{other}'"
                    )));
                }
            }
        }

        let framework =
            framework.ok_or_else(|| Error::preprocess("missing %framework=<tensorflow|pytorch>"))?;

        let mut config = JobConfiguration::new(framework);
        match framework {
            Framework::TensorFlow => {
                if master.is_some() {
                    return Err(Error::preprocess("%master is not used by tensorflow jobs"));
                }
                config.ps_count = ps.unwrap_or(1);
                config.worker_count = worker.unwrap_or(1);
            }
            Framework::PyTorch => {
                if ps.is_some() {
                    return Err(Error::preprocess("%ps is not used by pytorch jobs"));
                }
                config.master_count = master.unwrap_or(1);
                config.worker_count = worker.unwrap_or(1);
            }
        }
        Ok(config)
    }

    fn preprocessed_code(&self, code: &str) -> String {
        let mut out: String = code
            .lines()
            .filter(|line| magic(line).is_none())
            .collect::<Vec<_>>()
            .join("\n");
        if code.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

fn magic(line: &str) -> Option<Directive<'_>> {
    let rest = line.trim_start().strip_prefix(MAGIC_PREFIX)?;
    let key_end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let key = &rest[..key_end];
    if key.is_empty() {
        return None;
    }

    match rest[key_end..].trim_start().strip_prefix('=') {
        Some(value) => Some(Directive {
            key,
            value: Some(value.trim()),
        }),
        None if KEYS.contains(&key) => Some(Directive { key, value: None }),
        None => None,
    }
}

fn parse_framework(value: &str, line_no: usize) -> Result<Framework, Error> {
    match value.to_ascii_lowercase().as_str() {
        "tensorflow" | "tf" => Ok(Framework::TensorFlow),
        "pytorch" | "torch" => Ok(Framework::PyTorch),
        _ => Err(Error::preprocess(format!(
            "line {line_no}: unsupported framework '{value}'"
        ))),
    }
}

fn parse_count(value: &str, line_no: usize) -> Result<u32, Error> {
    value.parse().map_err(|_| {
        Error::preprocess(format!(
            "line {line_no}: '{value}' is not a non-negative integer"
        ))
    })
}
