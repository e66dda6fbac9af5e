use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// ログレベル (trace, debug, info, warn, error) または EnvFilter 構文
    pub level: String,
    /// コンソール出力形式
    pub format: LogFormat,
    /// コンソール出力有効
    pub console_enabled: bool,
    /// ファイル出力有効
    pub file_enabled: bool,
    /// ログディレクトリ
    pub log_dir: PathBuf,
    /// ファイルローテーション設定
    pub rotation: LogRotation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 人間向けの複数行出力
    Pretty,
    /// 1行出力
    Compact,
    /// 構造化JSON（本番推奨）
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// 日次ローテーション
    Daily,
    /// 時間毎ローテーション
    Hourly,
    /// ローテーションなし
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
            console_enabled: true,
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
            rotation: LogRotation::Daily,
        }
    }
}

impl LogConfig {
    /// ログレベルを上書き
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    /// カスタムログディレクトリを設定
    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self.file_enabled = true;
        self
    }

    /// ファイル名プレフィックス
    pub fn file_prefix(&self) -> &'static str {
        "cloudlens.log"
    }
}

/// ログディレクトリを確保
fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    }
    Ok(())
}

/// EnvFilterを作成（不正な指定は info にフォールバック）
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// ログシステムを初期化
///
/// ファイル出力が有効な場合、返される [`WorkerGuard`] をプロセス終了まで
/// 保持すること。ドロップすると未書き込みのログが失われる。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console_enabled {
        let console = match config.format {
            LogFormat::Pretty => fmt::layer().pretty().boxed(),
            LogFormat::Compact => fmt::layer().compact().boxed(),
            LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        };
        layers.push(console);
    }

    let mut guard = None;
    if config.file_enabled {
        ensure_log_dir(&config.log_dir)?;
        let appender = match config.rotation {
            LogRotation::Daily => rolling::daily(&config.log_dir, config.file_prefix()),
            LogRotation::Hourly => rolling::hourly(&config.log_dir, config.file_prefix()),
            LogRotation::Never => rolling::never(&config.log_dir, config.file_prefix()),
        };
        let (writer, worker_guard) = non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(worker_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(build_filter(&config.level))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        level = %config.level,
        format = ?config.format,
        file = config.file_enabled,
        log_dir = %config.log_dir.display(),
        "logging initialized"
    );

    Ok(guard)
}
