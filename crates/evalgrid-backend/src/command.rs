//! Task body command template and task files.
//!
//! The unit payload is written as JSON to `{work_dir}/tasks/{unit}.json`;
//! the command receives it through the `{task_file}` placeholder. Output of
//! each attempt goes to `{work_dir}/logs/{unit}.log`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use evalgrid_core::{ConfigError, WorkUnit};

use crate::error::SubmissionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCommand {
    program: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl TaskCommand {
    /// Build from an argv-style list; the first element is the program.
    pub fn from_argv(argv: &[String]) -> Result<Self, ConfigError> {
        let (program, args) = argv
            .split_first()
            .ok_or(ConfigError::Missing("backend.command"))?;
        if program.is_empty() {
            return Err(ConfigError::invalid("backend.command", "empty program name"));
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            env: HashMap::new(),
        })
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Arguments with `{unit_id}` and `{task_file}` substituted.
    pub fn render_args(&self, unit_id: &str, task_file: &Path) -> Vec<String> {
        let task_file = task_file.display().to_string();
        self.args
            .iter()
            .map(|a| a.replace("{unit_id}", unit_id).replace("{task_file}", &task_file))
            .collect()
    }

    /// The rendered command as a single shell line.
    pub fn shell_line(&self, unit_id: &str, task_file: &Path) -> String {
        std::iter::once(self.program.clone())
            .chain(self.render_args(unit_id, task_file))
            .map(|a| shell_quote(&a))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// File-name-safe form of a unit id.
///
/// Bytes outside `[A-Za-z0-9._+\[\]-]` are percent-encoded, `%` included, so
/// distinct ids always map to distinct stems.
pub fn file_stem(unit_id: &str) -> String {
    let mut stem = String::with_capacity(unit_id.len());
    for byte in unit_id.bytes() {
        if byte.is_ascii_alphanumeric() || b"-_.+[]".contains(&byte) {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

pub fn task_file_path(work_dir: &Path, unit_id: &str) -> PathBuf {
    work_dir.join("tasks").join(format!("{}.json", file_stem(unit_id)))
}

pub fn log_file_path(work_dir: &Path, unit_id: &str) -> PathBuf {
    work_dir.join("logs").join(format!("{}.log", file_stem(unit_id)))
}

/// Serialize `unit` into its task file, creating directories as needed.
pub async fn write_task_file(work_dir: &Path, unit: &WorkUnit) -> Result<PathBuf, SubmissionError> {
    let path = task_file_path(work_dir, unit.id());
    let prepare = |e: std::io::Error| SubmissionError::Prepare(format!("{}: {e}", path.display()));

    tokio::fs::create_dir_all(work_dir.join("tasks"))
        .await
        .map_err(prepare)?;
    tokio::fs::create_dir_all(work_dir.join("logs"))
        .await
        .map_err(prepare)?;
    let payload =
        serde_json::to_vec_pretty(unit).map_err(|e| SubmissionError::Prepare(e.to_string()))?;
    tokio::fs::write(&path, payload).await.map_err(prepare)?;
    Ok(path)
}

/// Quote `arg` for a POSIX shell unless it is made of safe characters only.
pub(crate) fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evalgrid_core::{Assignment, InferenceMode, ItemRange};

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn unit() -> WorkUnit {
        WorkUnit::new(
            vec![Assignment {
                model: "llama-7b".to_string(),
                dataset: "gsm8k".to_string(),
                mode: InferenceMode::Generative,
                range: ItemRange::new(0, 100),
            }],
            2000,
        )
        .unwrap()
    }

    #[test]
    fn empty_command_rejected() {
        assert_eq!(
            TaskCommand::from_argv(&[]).unwrap_err(),
            ConfigError::Missing("backend.command")
        );
    }

    #[test]
    fn placeholders_are_substituted() {
        let cmd = TaskCommand::from_argv(&argv(&["python", "run.py", "--task", "{task_file}", "--name={unit_id}"]))
            .unwrap();
        let args = cmd.render_args("u1", Path::new("/tmp/t.json"));
        assert_eq!(args, argv(&["run.py", "--task", "/tmp/t.json", "--name=u1"]));
    }

    #[test]
    fn shell_line_quotes_unsafe_args() {
        let cmd = TaskCommand::from_argv(&argv(&["echo", "{unit_id}", "it's"])).unwrap();
        let line = cmd.shell_line("m/d[0..10]", Path::new("/t.json"));
        assert_eq!(line, r"echo 'm/d[0..10]' 'it'\''s'");
    }

    #[test]
    fn file_stem_is_path_safe() {
        assert_eq!(file_stem("llama/gsm8k[0..100]+2"), "llama%2Fgsm8k[0..100]+2");
        assert_eq!(file_stem("m/50%25 x[0..1]"), "m%2F50%2525%20x[0..1]");
    }

    #[test]
    fn underscores_and_slashes_do_not_collide() {
        let unit = |model: &str, dataset: &str| {
            WorkUnit::new(
                vec![Assignment {
                    model: model.to_string(),
                    dataset: dataset.to_string(),
                    mode: InferenceMode::Generative,
                    range: ItemRange::new(0, 5),
                }],
                100,
            )
            .unwrap()
        };
        let a = unit("hf", "llama_mmlu");
        let b = unit("hf_llama", "mmlu");
        let work_dir = Path::new("/w");
        assert_ne!(
            task_file_path(work_dir, a.id()),
            task_file_path(work_dir, b.id())
        );
        assert_ne!(file_stem(a.id()), file_stem(b.id()));
    }

    #[tokio::test]
    async fn task_file_contains_unit() {
        let dir = tempfile::tempdir().unwrap();
        let unit = unit();
        let path = write_task_file(dir.path(), &unit).await.unwrap();

        assert!(path.starts_with(dir.path().join("tasks")));
        assert!(dir.path().join("logs").is_dir());
        let back: WorkUnit = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back.id(), unit.id());
    }
}
