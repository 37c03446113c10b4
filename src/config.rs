//! 配置加载
//!
//! 优先级（后者覆盖前者）：
//! 1. 内置默认值
//! 2. `~/.config/empusa/config.json`
//! 3. 环境变量 `EMPUSA_PROGRAM` / `EMPUSA_AUTOSAVE_MS` / `EMPUSA_SNAPSHOT` / `EMPUSA_SESSION_LOG`
//! 4. 命令行参数（由 `cli::run` 应用）

use crate::capture::DEFAULT_AUTOSAVE_INTERVAL;
use crate::error::CaptureError;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;

/// 默认包装的程序
pub const DEFAULT_PROGRAM: &str = "claude";

/// 默认必需凭据
pub const DEFAULT_CREDENTIAL_VAR: &str = "CLAUDE_CODE_OAUTH_TOKEN";

pub const DEFAULT_SESSION_LOG: &str = ".empusa-session.log";
pub const DEFAULT_SNAPSHOT: &str = "MEMORY.md";
pub const DEFAULT_DEBUG_LOG: &str = ".empusa-debug.log";

/// 快照中保留的清洗后尾部字符数
pub const DEFAULT_TAIL_CHARS: usize = 2000;

/// 子进程 TERM
pub const DEFAULT_TERM: &str = "xterm-256color";

/// 捕获配置
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// 被包装的程序
    pub program: String,
    /// 透传给程序的参数
    pub args: Vec<String>,
    /// 启动前必须存在的环境变量，`None` 表示不检查
    pub credential_var: Option<String>,
    /// 追加写入的原始会话日志
    pub session_log: PathBuf,
    /// 定期覆盖的快照文档
    pub snapshot_path: PathBuf,
    /// 诊断日志
    pub debug_log: PathBuf,
    /// 自动保存间隔
    pub autosave_interval: Duration,
    /// 快照尾部长度
    pub tail_chars: usize,
    pub term: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args: Vec::new(),
            credential_var: Some(DEFAULT_CREDENTIAL_VAR.to_string()),
            session_log: PathBuf::from(DEFAULT_SESSION_LOG),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT),
            debug_log: PathBuf::from(DEFAULT_DEBUG_LOG),
            autosave_interval: DEFAULT_AUTOSAVE_INTERVAL,
            tail_chars: DEFAULT_TAIL_CHARS,
            term: DEFAULT_TERM.to_string(),
        }
    }
}

/// 配置文件内容，所有字段可选
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub program: Option<String>,
    pub credential_var: Option<String>,
    pub session_log: Option<PathBuf>,
    pub snapshot_path: Option<PathBuf>,
    pub debug_log: Option<PathBuf>,
    pub autosave_ms: Option<u64>,
    pub tail_chars: Option<usize>,
}

impl CaptureConfig {
    /// 配置文件路径
    pub fn config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/empusa/config.json"))
    }

    /// 从配置文件和环境变量加载
    pub fn load() -> Result<Self, CaptureError> {
        let mut config = Self::default();

        if let Some(path) = Self::config_path() {
            if path.exists() {
                let file = Self::read_file(&path)?;
                config.apply_file(file);
                debug!(path = %path.display(), "Loaded config file");
            }
        }

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// 读取并解析 JSON 配置文件
    pub fn read_file(path: &Path) -> Result<FileConfig, CaptureError> {
        let content = fs::read_to_string(path).map_err(|e| {
            CaptureError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            CaptureError::Config(format!("invalid config {}: {}", path.display(), e))
        })
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(program) = file.program.filter(|p| !p.is_empty()) {
            self.program = program;
        }
        if let Some(var) = file.credential_var {
            // 空字符串关闭凭据检查
            self.credential_var = Some(var).filter(|v| !v.is_empty());
        }
        if let Some(path) = file.session_log {
            self.session_log = path;
        }
        if let Some(path) = file.snapshot_path {
            self.snapshot_path = path;
        }
        if let Some(path) = file.debug_log {
            self.debug_log = path;
        }
        if let Some(ms) = file.autosave_ms {
            self.autosave_interval = Duration::from_millis(ms);
        }
        if let Some(chars) = file.tail_chars {
            self.tail_chars = chars;
        }
    }

    /// 应用环境变量覆盖
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(program) = lookup("EMPUSA_PROGRAM").filter(|p| !p.is_empty()) {
            self.program = program;
        }
        if let Some(ms) = lookup("EMPUSA_AUTOSAVE_MS").and_then(|v| v.trim().parse::<u64>().ok()) {
            self.autosave_interval = Duration::from_millis(ms);
        }
        if let Some(path) = lookup("EMPUSA_SNAPSHOT").filter(|p| !p.is_empty()) {
            self.snapshot_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("EMPUSA_SESSION_LOG").filter(|p| !p.is_empty()) {
            self.session_log = PathBuf::from(path);
        }
    }

    /// 检查必需凭据，返回需要显式传给子进程的 (变量名, 值)
    pub fn credential(&self) -> Result<Option<(String, String)>, CaptureError> {
        self.credential_from(|key| std::env::var(key).ok())
    }

    pub fn credential_from<F>(&self, lookup: F) -> Result<Option<(String, String)>, CaptureError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(var) = &self.credential_var else {
            return Ok(None);
        };
        match lookup(var).filter(|v| !v.trim().is_empty()) {
            Some(value) => Ok(Some((var.clone(), value))),
            None => Err(CaptureError::Config(format!(
                "{} not found in environment or .env",
                var
            ))),
        }
    }

    /// 原始日志文件名（用于快照文档中的提示）
    pub fn session_log_name(&self) -> String {
        self.session_log
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.session_log.display().to_string())
    }
}

static DOTENV_LINE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([^=:#]+)=(.*)$").ok());

/// 解析 `.env` 内容
pub fn parse_dotenv(content: &str) -> Vec<(String, String)> {
    let Some(re) = DOTENV_LINE.as_ref() else {
        return Vec::new();
    };
    content
        .lines()
        .filter_map(|line| re.captures(line.trim_end_matches('\r')))
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().trim().to_string();
            let value = caps.get(2)?.as_str().trim().to_string();
            (!key.is_empty()).then_some((key, value))
        })
        .collect()
}

/// 加载 `.env`，只设置尚未存在的变量，返回设置的数量
pub fn load_dotenv(path: &Path) -> usize {
    let Ok(content) = fs::read_to_string(path) else {
        return 0;
    };

    let mut applied = 0;
    for (key, value) in parse_dotenv(&content) {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            applied += 1;
        }
    }
    debug!(path = %path.display(), applied, "Loaded .env");
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::default();
        assert_eq!(config.program, "claude");
        assert_eq!(config.credential_var.as_deref(), Some("CLAUDE_CODE_OAUTH_TOKEN"));
        assert_eq!(config.autosave_interval, Duration::from_secs(1));
        assert_eq!(config.tail_chars, 2000);
        assert_eq!(config.session_log_name(), ".empusa-session.log");
    }

    #[test]
    fn test_apply_file_and_env() {
        let mut config = CaptureConfig::default();
        let file: FileConfig = serde_json::from_str(
            r#"{"program": "codex", "credential_var": "", "autosave_ms": 250, "snapshot_path": "notes/MEMORY.md"}"#,
        )
        .unwrap();
        config.apply_file(file);
        assert_eq!(config.program, "codex");
        assert!(config.credential_var.is_none());
        assert_eq!(config.autosave_interval, Duration::from_millis(250));
        assert_eq!(config.snapshot_path, PathBuf::from("notes/MEMORY.md"));

        let env: HashMap<&str, &str> = [("EMPUSA_PROGRAM", "bash"), ("EMPUSA_AUTOSAVE_MS", "oops")]
            .into_iter()
            .collect();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.program, "bash");
        // 非法数值被忽略
        assert_eq!(config.autosave_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_credential_is_config_error() {
        let config = CaptureConfig::default();
        let err = config.credential_from(|_| None).unwrap_err();
        assert!(matches!(err, CaptureError::Config(_)));
        assert!(err.to_string().contains("CLAUDE_CODE_OAUTH_TOKEN"));

        let blank = config.credential_from(|_| Some("  ".to_string()));
        assert!(blank.is_err());

        let ok = config.credential_from(|_| Some("tok".to_string())).unwrap();
        assert_eq!(ok, Some(("CLAUDE_CODE_OAUTH_TOKEN".to_string(), "tok".to_string())));
    }

    #[test]
    fn test_parse_dotenv() {
        let parsed = parse_dotenv("# comment\nA = 1\r\nB=two=2\nnot a pair\nURL=http://x:1\n");
        assert_eq!(
            parsed,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two=2".to_string()),
                ("URL".to_string(), "http://x:1".to_string()),
            ]
        );
    }

    #[test]
    fn test_load_dotenv_does_not_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "EMPUSA_TEST_DOTENV_NEW=fresh\nPATH=/nope\n").unwrap();

        let applied = load_dotenv(&path);

        assert_eq!(applied, 1);
        assert_eq!(std::env::var("EMPUSA_TEST_DOTENV_NEW").unwrap(), "fresh");
        assert_ne!(std::env::var("PATH").unwrap(), "/nope");
        assert_eq!(load_dotenv(&dir.path().join("missing.env")), 0);
    }
}
