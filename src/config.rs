//! 程序配置
//!
//! 启动时构造一次：默认值 ← TOML 文件 ← 环境变量 ← 显式覆盖，
//! 之后以 `Arc<Config>` 只读共享。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::models::county::{builtin_counties, CountyConfig, CountyRegistry};

/// 浏览器配置
#[derive(Clone, Debug, PartialEq)]
pub struct BrowserSettings {
    /// 无头模式
    pub headless: bool,
    /// 浏览器可执行文件，为空时由 chromiumoxide 自动查找
    pub chrome_executable: Option<PathBuf>,
    /// 设置后连接到已打开的浏览器调试端口，而不是新启动
    pub debug_port: Option<u16>,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            debug_port: None,
            viewport_width: 1920,
            viewport_height: 1080,
            user_agent: Some(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            ),
        }
    }
}

/// 程序配置
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// 文档输出目录
    pub output_dir: PathBuf,
    pub log_level: String,
    /// 同时运行的采集任务上限
    pub max_concurrent_runs: usize,
    /// 进度通道容量
    pub progress_buffer: usize,
    /// 单步超时（毫秒）
    pub step_timeout_ms: u64,
    pub max_step_retries: u32,
    /// 失败步骤是否重试
    pub retry_failed_steps: bool,
    /// 预估耗时：每份文档秒数
    pub seconds_per_document: u64,
    pub browser: BrowserSettings,
    pub counties: BTreeMap<String, CountyConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            log_level: "info".to_string(),
            max_concurrent_runs: 3,
            progress_buffer: 64,
            step_timeout_ms: 30_000,
            max_step_retries: 3,
            retry_failed_steps: false,
            seconds_per_document: 180,
            browser: BrowserSettings::default(),
            counties: builtin_counties(),
        }
    }
}

/// 命令行等调用方给出的显式覆盖，优先级最高
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub log_level: Option<String>,
    pub max_concurrent_runs: Option<usize>,
    pub step_timeout_ms: Option<u64>,
    pub headless: Option<bool>,
}

/// TOML 配置文件结构，所有字段可缺省
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    output_dir: Option<PathBuf>,
    log_level: Option<String>,
    max_concurrent_runs: Option<usize>,
    progress_buffer: Option<usize>,
    step_timeout_ms: Option<u64>,
    max_step_retries: Option<u32>,
    retry_failed_steps: Option<bool>,
    seconds_per_document: Option<u64>,
    browser: BrowserFile,
    /// 同名条目替换内置县配置
    counties: BTreeMap<String, CountyConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BrowserFile {
    headless: Option<bool>,
    chrome_executable: Option<PathBuf>,
    debug_port: Option<u16>,
    viewport_width: Option<u32>,
    viewport_height: Option<u32>,
    user_agent: Option<String>,
}

impl Config {
    /// 从进程环境加载（含可选配置文件和覆盖项）
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        Self::load_with(overrides, |name| std::env::var(name).ok())
    }

    /// 同 [`Config::load`]，环境变量来源可替换
    pub fn load_with<F>(overrides: &ConfigOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(path) = &overrides.config_file {
            config = config.merge_file(path)?;
        }
        config = config.merge_env(env)?;
        Ok(config.merge_overrides(overrides))
    }

    /// 只读的县配置查询表
    pub fn county_registry(&self) -> CountyRegistry {
        CountyRegistry::new(self.counties.clone())
    }

    fn merge_file(self, path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        self.merge_toml(&content, path)
    }

    fn merge_toml(self, content: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|source| ConfigError::FileParseFailed {
                path: path.display().to_string(),
                source,
            })?;

        let mut counties = self.counties;
        counties.extend(file.counties);

        Ok(Self {
            output_dir: file.output_dir.unwrap_or(self.output_dir),
            log_level: file.log_level.unwrap_or(self.log_level),
            max_concurrent_runs: file.max_concurrent_runs.unwrap_or(self.max_concurrent_runs),
            progress_buffer: file.progress_buffer.unwrap_or(self.progress_buffer),
            step_timeout_ms: file.step_timeout_ms.unwrap_or(self.step_timeout_ms),
            max_step_retries: file.max_step_retries.unwrap_or(self.max_step_retries),
            retry_failed_steps: file.retry_failed_steps.unwrap_or(self.retry_failed_steps),
            seconds_per_document: file.seconds_per_document.unwrap_or(self.seconds_per_document),
            browser: BrowserSettings {
                headless: file.browser.headless.unwrap_or(self.browser.headless),
                chrome_executable: file.browser.chrome_executable.or(self.browser.chrome_executable),
                debug_port: file.browser.debug_port.or(self.browser.debug_port),
                viewport_width: file.browser.viewport_width.unwrap_or(self.browser.viewport_width),
                viewport_height: file
                    .browser
                    .viewport_height
                    .unwrap_or(self.browser.viewport_height),
                user_agent: file.browser.user_agent.or(self.browser.user_agent),
            },
            counties,
        })
    }

    fn merge_env<F>(self, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let browser = BrowserSettings {
            headless: parse_env(&env, "HEADLESS_MODE", "bool")?.unwrap_or(self.browser.headless),
            chrome_executable: env("CHROME_EXECUTABLE")
                .map(PathBuf::from)
                .or(self.browser.chrome_executable),
            debug_port: parse_env(&env, "BROWSER_DEBUG_PORT", "u16")?.or(self.browser.debug_port),
            viewport_width: parse_env(&env, "VIEWPORT_WIDTH", "u32")?
                .unwrap_or(self.browser.viewport_width),
            viewport_height: parse_env(&env, "VIEWPORT_HEIGHT", "u32")?
                .unwrap_or(self.browser.viewport_height),
            user_agent: env("USER_AGENT").or(self.browser.user_agent),
        };

        Ok(Self {
            output_dir: env("OUTPUT_DIR").map(PathBuf::from).unwrap_or(self.output_dir),
            log_level: env("LOG_LEVEL").unwrap_or(self.log_level),
            max_concurrent_runs: parse_env(&env, "MAX_CONCURRENT_RUNS", "usize")?
                .unwrap_or(self.max_concurrent_runs),
            step_timeout_ms: parse_env(&env, "STEP_TIMEOUT_MS", "u64")?
                .unwrap_or(self.step_timeout_ms),
            retry_failed_steps: parse_env(&env, "RETRY_FAILED_STEPS", "bool")?
                .unwrap_or(self.retry_failed_steps),
            browser,
            ..self
        })
    }

    fn merge_overrides(self, overrides: &ConfigOverrides) -> Self {
        let mut browser = self.browser;
        if let Some(headless) = overrides.headless {
            browser.headless = headless;
        }
        Self {
            output_dir: overrides.output_dir.clone().unwrap_or(self.output_dir),
            log_level: overrides.log_level.clone().unwrap_or(self.log_level),
            max_concurrent_runs: overrides
                .max_concurrent_runs
                .unwrap_or(self.max_concurrent_runs)
                .max(1),
            step_timeout_ms: overrides.step_timeout_ms.unwrap_or(self.step_timeout_ms),
            browser,
            ..self
        }
    }
}

fn parse_env<F, T>(env: &F, var_name: &str, expected_type: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match env(var_name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: expected_type.to_string(),
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::load_with(&ConfigOverrides::default(), env_of(&[])).unwrap();
        assert_eq!(config.max_concurrent_runs, 3);
        assert_eq!(config.step_timeout_ms, 30_000);
        assert!(config.browser.headless);
        assert!(config.counties.contains_key("charleston"));
        assert!(config.counties.contains_key("berkeley"));
    }

    #[test]
    fn env_overrides_defaults_and_explicit_overrides_win() {
        let overrides = ConfigOverrides {
            max_concurrent_runs: Some(5),
            ..Default::default()
        };
        let env = env_of(&[
            ("MAX_CONCURRENT_RUNS", "2"),
            ("OUTPUT_DIR", "/tmp/docs"),
            ("HEADLESS_MODE", "false"),
        ]);
        let config = Config::load_with(&overrides, env).unwrap();
        assert_eq!(config.max_concurrent_runs, 5);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/docs"));
        assert!(!config.browser.headless);
    }

    #[test]
    fn cli_timeout_and_headless_beat_env() {
        let overrides = ConfigOverrides {
            step_timeout_ms: Some(5_000),
            headless: Some(false),
            ..Default::default()
        };
        let env = env_of(&[("STEP_TIMEOUT_MS", "12000"), ("HEADLESS_MODE", "true")]);
        let config = Config::load_with(&overrides, env).unwrap();
        assert_eq!(config.step_timeout_ms, 5_000);
        assert!(!config.browser.headless);
    }

    #[test]
    fn bad_env_value_is_an_error() {
        let err = Config::load_with(
            &ConfigOverrides::default(),
            env_of(&[("STEP_TIMEOUT_MS", "soon")]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvVarParseFailed { ref var_name, .. } if var_name == "STEP_TIMEOUT_MS"
        ));
    }

    #[test]
    fn toml_file_layers_between_defaults_and_env() {
        let toml = r##"
            step_timeout_ms = 1000
            max_concurrent_runs = 4

            [browser]
            debug_port = 9222

            [counties.dorchester]
            name = "Dorchester County"
            base_url = "https://example.org"
            search_url = "https://example.org/search"
            selectors = { search_input = "#q" }
        "##;
        let config = Config::default()
            .merge_toml(toml, Path::new("agent.toml"))
            .unwrap()
            .merge_env(env_of(&[("STEP_TIMEOUT_MS", "2000")]))
            .unwrap();

        assert_eq!(config.step_timeout_ms, 2000);
        assert_eq!(config.max_concurrent_runs, 4);
        assert_eq!(config.browser.debug_port, Some(9222));
        let registry = config.county_registry();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.lookup("dorchester").unwrap().rate_limit.delay_between_requests, 2);
    }

    #[test]
    fn unreadable_file_is_reported_with_path() {
        let overrides = ConfigOverrides {
            config_file: Some(PathBuf::from("/definitely/not/here.toml")),
            ..Default::default()
        };
        let err = Config::load_with(&overrides, env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::FileReadFailed { .. }));
    }
}
