use thiserror::Error;

/// 应用程序错误类型
///
/// 每个变体对应一个稳定的错误标签（见 [`AppError::kind`]），
/// 该标签会写入 `ErrorRecord.error_kind`。
#[derive(Debug, Error)]
pub enum AppError {
    /// 配置错误（未知县等），致命，终止计划生成
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 导航能力初始化失败，致命，任何步骤都不会执行
    #[error("导航能力初始化失败: {0}")]
    CapabilityInit(#[source] NavigatorError),

    /// 步骤执行期间导航能力返回的错误
    #[error(transparent)]
    Capability(#[from] NavigatorError),

    /// 步骤执行期间存储协作者返回的错误
    #[error("存储错误: {0}")]
    Storage(#[from] StorageError),

    /// 单个步骤失败（能力返回 false）
    #[error("步骤 {step_id} 执行失败: {message}")]
    StepExecution { step_id: String, message: String },

    /// 无法识别的步骤类型
    #[error("未知的步骤类型: {0}")]
    UnknownStepKind(String),

    /// 无法识别的文档类型
    #[error("未知的文档类型: {0}")]
    UnknownDocumentKind(String),

    /// 计划 JSON 无法解析
    #[error("计划格式错误: {0}")]
    InvalidPlan(String),

    /// 步骤超出超时预算
    #[error("步骤 {step_id} 超时 ({timeout_ms} ms)")]
    Timeout { step_id: String, timeout_ms: u64 },

    /// 执行摘要写入失败
    #[error("执行摘要持久化失败: {0}")]
    Persistence(#[source] StorageError),

    /// 能力实现内部 panic，在步骤边界被捕获
    #[error("步骤内部 panic: {0}")]
    Panic(String),
}

impl AppError {
    /// 写入错误记录的错误标签
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Config(_) => "ConfigError",
            AppError::CapabilityInit(_) => "CapabilityInitError",
            AppError::Capability(e) => e.kind(),
            AppError::Storage(_) => "StorageError",
            AppError::StepExecution { .. } => "StepExecutionError",
            AppError::UnknownStepKind(_) => "UnknownStepKindError",
            AppError::UnknownDocumentKind(_) => "UnknownDocumentKindError",
            AppError::InvalidPlan(_) => "InvalidPlanError",
            AppError::Timeout { .. } => "TimeoutError",
            AppError::Persistence(_) => "PersistenceError",
            AppError::Panic(_) => "PanicError",
        }
    }

    /// 创建步骤失败错误
    pub fn step_failed(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::StepExecution {
            step_id: step_id.into(),
            message: message.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout(step_id: impl Into<String>, timeout_ms: u64) -> Self {
        AppError::Timeout {
            step_id: step_id.into(),
            timeout_ms,
        }
    }
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 县不在配置表中
    #[error("不支持的县: {county}")]
    UnsupportedCounty { county: String },

    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    FileReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 配置文件解析失败
    #[error("配置文件解析失败 ({path}): {source}")]
    FileParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// 导航能力错误
#[derive(Debug, Error)]
pub enum NavigatorError {
    /// 启动或连接浏览器失败
    #[error("浏览器启动失败: {message}")]
    Launch { message: String },

    /// 页面导航失败
    #[error("导航到 {url} 失败: {message}")]
    Navigation { url: String, message: String },

    /// 执行页面脚本或操作 DOM 失败
    #[error("页面脚本执行失败: {message}")]
    Script { message: String },

    /// 下载文档失败
    #[error("下载 {url} 失败: {message}")]
    Download { url: String, message: String },

    /// 尚未初始化就调用了能力
    #[error("导航能力尚未初始化")]
    NotInitialized,
}

impl NavigatorError {
    pub fn kind(&self) -> &'static str {
        match self {
            NavigatorError::Launch { .. } => "LaunchError",
            NavigatorError::Navigation { .. } => "NavigationError",
            NavigatorError::Script { .. } => "ScriptError",
            NavigatorError::Download { .. } => "DownloadError",
            NavigatorError::NotInitialized => "NotInitializedError",
        }
    }

    pub fn script(message: impl Into<String>) -> Self {
        NavigatorError::Script {
            message: message.into(),
        }
    }
}

impl From<chromiumoxide::error::CdpError> for NavigatorError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        NavigatorError::Script {
            message: err.to_string(),
        }
    }
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 文件系统操作失败
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 摘要序列化失败
    #[error("JSON 序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StorageError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        let unsupported = AppError::from(ConfigError::UnsupportedCounty {
            county: "richland".into(),
        });
        assert_eq!(unsupported.kind(), "ConfigError");
        assert_eq!(AppError::timeout("step_001", 10).kind(), "TimeoutError");
        assert_eq!(
            AppError::CapabilityInit(NavigatorError::NotInitialized).kind(),
            "CapabilityInitError"
        );
        assert_eq!(
            AppError::from(NavigatorError::script("boom")).kind(),
            "ScriptError"
        );
        assert_eq!(AppError::UnknownStepKind("jump".into()).kind(), "UnknownStepKindError");
    }

    #[test]
    fn capability_errors_display_transparently() {
        let err = AppError::from(NavigatorError::Navigation {
            url: "https://example.org".into(),
            message: "net::ERR".into(),
        });
        assert_eq!(err.to_string(), "导航到 https://example.org 失败: net::ERR");
    }
}
