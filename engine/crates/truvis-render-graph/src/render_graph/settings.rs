use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// RenderGraph 配置
///
/// 从 TOML 加载，缺失的字段使用默认值：
///
/// ```toml
/// frames_in_flight = 3
/// max_temporal_layers = 4
/// dump_schedule = false
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RgSettings {
    /// 延迟销毁需要等待的帧数
    pub frames_in_flight: u64,
    /// temporal 资源最多的 layer 数
    pub max_temporal_layers: usize,
    /// build 之后打印调度结果
    pub dump_schedule: bool,
}

impl Default for RgSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            max_temporal_layers: 4,
            dump_schedule: false,
        }
    }
}

impl RgSettings {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let settings: RgSettings = toml::from_str(content).context("failed to parse render graph settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("failed to read settings file: {path:?}"))?;
        Self::from_toml_str(&content).with_context(|| format!("invalid settings file: {path:?}"))
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.frames_in_flight > 0, "frames_in_flight must be at least 1");
        anyhow::ensure!(self.max_temporal_layers > 0, "max_temporal_layers must be at least 1");
        Ok(())
    }
}
