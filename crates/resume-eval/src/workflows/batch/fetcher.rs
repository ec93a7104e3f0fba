use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{info, warn};

use super::domain::CandidateItem;
use crate::config::FetchConfig;
use crate::workflows::candidates::{OwnerId, RepositoryError};

pub const FETCH_DEADLINE: Duration = Duration::from_secs(300);

/// Opaque key/value pairs handed to the fetcher's environment.
pub type FetchCredentials = BTreeMap<String, String>;

/// Resolves the HR-system credentials stored for an owner.
pub trait CredentialStore: Send + Sync {
    fn credentials(&self, owner: OwnerId) -> Result<Option<FetchCredentials>, RepositoryError>;
}

/// Supplies the full candidate list from the upstream HR system.
#[async_trait]
pub trait ItemFetcher: Send + Sync {
    async fn fetch(&self, credentials: &FetchCredentials)
        -> Result<Vec<CandidateItem>, FetchError>;
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to launch fetch script: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("fetch script exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
    #[error("fetch script timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("fetch output is not valid JSON: {0}")]
    Output(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    name: String,
    #[serde(default)]
    apply_id: String,
    #[serde(default)]
    resume_id: String,
    #[serde(default)]
    jd: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    resume_pdf_b64: String,
}

impl RawItem {
    fn into_item(self) -> CandidateItem {
        let resume = if self.resume_pdf_b64.is_empty() {
            Vec::new()
        } else {
            STANDARD.decode(self.resume_pdf_b64.trim()).unwrap_or_else(|error| {
                warn!(apply_id = %self.apply_id, %error, "resume payload is not valid base64");
                Vec::new()
            })
        };

        CandidateItem {
            name: self.name,
            apply_id: self.apply_id,
            resume_id: self.resume_id,
            job: self.jd.unwrap_or_default(),
            resume,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FetchPayload {
    Page {
        #[serde(default)]
        total: usize,
        items: Vec<RawItem>,
    },
    Bare(Vec<RawItem>),
}

/// Accepts `{total, items}` as well as a bare item array.
pub fn parse_fetch_output(stdout: &[u8]) -> Result<Vec<CandidateItem>, FetchError> {
    let items = match serde_json::from_slice::<FetchPayload>(stdout)? {
        FetchPayload::Page { total, items } => {
            if total != 0 && total != items.len() {
                warn!(reported = total, received = items.len(), "fetch total mismatch");
            }
            items
        }
        FetchPayload::Bare(items) => items,
    };
    Ok(items.into_iter().map(RawItem::into_item).collect())
}

/// Runs the scraping script with `--json-out` and reads its stdout.
#[derive(Debug, Clone)]
pub struct ScriptItemFetcher {
    python: PathBuf,
    script: PathBuf,
    deadline: Duration,
}

impl ScriptItemFetcher {
    pub fn new(config: &FetchConfig) -> Self {
        Self {
            python: resolve_python(config.python.as_deref()),
            script: absolute(&config.script),
            deadline: FETCH_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Configured interpreter, else a local `venv/bin/python3`, else `python3` from `PATH`.
pub fn resolve_python(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }
    let venv = absolute(Path::new("venv/bin/python3"));
    if venv.exists() {
        return venv;
    }
    PathBuf::from("python3")
}

#[async_trait]
impl ItemFetcher for ScriptItemFetcher {
    async fn fetch(
        &self,
        credentials: &FetchCredentials,
    ) -> Result<Vec<CandidateItem>, FetchError> {
        let mut command = Command::new(&self.python);
        command
            .arg(&self.script)
            .arg("--json-out")
            .envs(credentials)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        info!(script = %self.script.display(), "running candidate fetch script");
        let output = tokio::time::timeout(self.deadline, command.output())
            .await
            .map_err(|_| FetchError::Timeout(self.deadline))??;

        if !output.status.success() {
            return Err(FetchError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let items = parse_fetch_output(&output.stdout)?;
        info!(items = items.len(), "candidate fetch finished");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paged_payload_and_decodes_resume() {
        let encoded = STANDARD.encode(b"%PDF-1.4");
        let stdout = format!(
            r#"{{"total":1,"items":[{{"name":"周七","apply_id":"AP-1","resume_id":"R-1","jd":{{"workContent":"写代码"}},"resume_pdf_b64":"{encoded}"}}]}}"#
        );

        let items = parse_fetch_output(stdout.as_bytes()).expect("payload parses");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].apply_id, "AP-1");
        assert_eq!(items[0].resume, b"%PDF-1.4");
        assert_eq!(items[0].job_description(), "写代码");
    }

    #[test]
    fn accepts_legacy_bare_array() {
        let items = parse_fetch_output(br#"[{"name":"A","apply_id":"1"},{"name":"B","apply_id":"2"}]"#)
            .expect("bare array parses");
        assert_eq!(items.len(), 2);
        assert!(items[1].resume.is_empty());
    }

    #[test]
    fn invalid_base64_degrades_to_empty_resume() {
        let items = parse_fetch_output(br#"[{"name":"A","apply_id":"1","resume_pdf_b64":"***"}]"#)
            .expect("payload parses");
        assert!(items[0].resume.is_empty());
    }

    #[test]
    fn configured_python_wins() {
        let python = resolve_python(Some(Path::new("/opt/py/bin/python3")));
        assert_eq!(python, PathBuf::from("/opt/py/bin/python3"));
    }

    #[tokio::test]
    async fn reports_missing_interpreter_as_spawn_error() {
        let fetcher = ScriptItemFetcher {
            python: PathBuf::from("/nonexistent/python3"),
            script: PathBuf::from("fetch.py"),
            deadline: Duration::from_secs(5),
        };
        let result = fetcher.fetch(&FetchCredentials::new()).await;
        assert!(matches!(result, Err(FetchError::Spawn(_))));
    }
}
