use std::path::{Path, PathBuf};
use std::time::Duration;

use ash::vk;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vireo_gfx::adapter::DevicePreferences;
use vireo_gfx::types::PresentMode;
use vireo_render_interface::frame_counter::FrameCounter;
use vireo_render_interface::gpu_resource_manager::ResourceManagerConfig;
use vireo_scene::gltf_loader::SceneLoadConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// in-flight 的帧数，只能是 2 或者 3
    pub frames_in_flight: usize,
    /// 等待 fence 的最长时间，超过之后视为设备丢失
    pub fence_timeout_ms: u64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            fence_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    /// 初始的窗口尺寸
    pub width: u32,
    pub height: u32,
    pub present_mode: PresentMode,
    pub clear_color: [f32; 4],
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            present_mode: PresentMode::Fifo,
            clear_color: [0.1, 0.1, 0.12, 1.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// 启动时加载的 gltf/glb，相对路径基于工作区根目录
    pub path: Option<PathBuf>,
    pub decode_threads: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            path: None,
            decode_threads: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub max_pooled_per_class: usize,
    pub scratch_initial_bytes: u64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        let defaults = ResourceManagerConfig::default();
        Self {
            max_pooled_per_class: defaults.max_pooled_per_class,
            scratch_initial_bytes: defaults.scratch_initial_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// SPIR-V 所在的目录，相对路径基于工作区根目录
    pub dir: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("shader/.build"),
        }
    }
}

/// `vireo.toml` 的内容，所有字段都有默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub log_level: String,
    pub device: DevicePreferences,
    pub frame: FrameConfig,
    pub swapchain: SwapchainConfig,
    pub scene: SceneConfig,
    pub resources: ResourceConfig,
    pub shaders: ShaderConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            device: DevicePreferences::default(),
            frame: FrameConfig::default(),
            swapchain: SwapchainConfig::default(),
            scene: SceneConfig::default(),
            resources: ResourceConfig::default(),
            shaders: ShaderConfig::default(),
        }
    }
}

// new & init
impl RendererConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 文件不存在时使用默认配置，其他错误照常返回
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::warn!("config {:?} not found, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fif = self.frame.frames_in_flight;
        if !(FrameCounter::MIN_FIF_COUNT..=FrameCounter::MAX_FIF_COUNT).contains(&fif) {
            return Err(ConfigError::Invalid(format!(
                "frame.frames_in_flight must be {}..={}, got {}",
                FrameCounter::MIN_FIF_COUNT,
                FrameCounter::MAX_FIF_COUNT,
                fif
            )));
        }
        if self.frame.fence_timeout_ms == 0 {
            return Err(ConfigError::Invalid("frame.fence_timeout_ms must be positive".to_string()));
        }
        if self.resources.scratch_initial_bytes == 0 {
            return Err(ConfigError::Invalid("resources.scratch_initial_bytes must be positive".to_string()));
        }
        Ok(())
    }
}
// getters
impl RendererConfig {
    #[inline]
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.frame.fence_timeout_ms)
    }

    #[inline]
    pub fn window_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.swapchain.width,
            height: self.swapchain.height,
        }
    }

    pub fn resource_manager_config(&self) -> ResourceManagerConfig {
        ResourceManagerConfig {
            max_pooled_per_class: self.resources.max_pooled_per_class,
            scratch_initial_bytes: self.resources.scratch_initial_bytes,
            frames_in_flight: self.frame.frames_in_flight,
        }
    }

    /// 场景上传和帧使用同一个超时
    pub fn scene_load_config(&self) -> SceneLoadConfig {
        SceneLoadConfig {
            decode_threads: self.scene.decode_threads,
            upload_timeout: self.fence_timeout(),
        }
    }

    /// 相对路径基于 `root`
    pub fn shader_dir(&self, root: &Path) -> PathBuf {
        if self.shaders.dir.is_absolute() { self.shaders.dir.clone() } else { root.join(&self.shaders.dir) }
    }

    pub fn scene_path(&self, root: &Path) -> Option<PathBuf> {
        self.scene.path.as_ref().map(|path| if path.is_absolute() { path.clone() } else { root.join(path) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_is_default() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
        assert_eq!(config.fence_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_parse_full_config() {
        let text = r#"
            log_level = "debug"

            [device]
            preferred_gpu_vendor = "nvidia"
            require_discrete = true
            min_vram_mb = 2048

            [frame]
            frames_in_flight = 2
            fence_timeout_ms = 500

            [swapchain]
            width = 800
            height = 600
            present_mode = "mailbox"
            clear_color = [0.0, 0.0, 0.0, 1.0]

            [scene]
            path = "assets/box.glb"
            decode_threads = 4

            [resources]
            max_pooled_per_class = 4
            scratch_initial_bytes = 1024

            [shaders]
            dir = "/opt/vireo/spv"
        "#;
        let config = RendererConfig::from_toml_str(text).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.device.preferred_vendor_id(), Some(0x10DE));
        assert!(config.device.require_discrete);
        assert_eq!(config.device.min_vram_mb, 2048);
        assert_eq!(config.frame.frames_in_flight, 2);
        assert_eq!(config.swapchain.present_mode, PresentMode::Mailbox);
        assert_eq!(config.window_extent(), vk::Extent2D { width: 800, height: 600 });

        let root = Path::new("/work");
        assert_eq!(config.scene_path(root), Some(PathBuf::from("/work/assets/box.glb")));
        assert_eq!(config.shader_dir(root), PathBuf::from("/opt/vireo/spv"));

        let rm = config.resource_manager_config();
        assert_eq!((rm.max_pooled_per_class, rm.scratch_initial_bytes, rm.frames_in_flight), (4, 1024, 2));
        let scene = config.scene_load_config();
        assert_eq!(scene.decode_threads, 4);
        assert_eq!(scene.upload_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = RendererConfig::from_toml_str("[frame]\nframes_in_flight = 2\n").unwrap();
        assert_eq!(config.frame.frames_in_flight, 2);
        assert_eq!(config.frame.fence_timeout_ms, FrameConfig::default().fence_timeout_ms);
        assert_eq!(config.swapchain, SwapchainConfig::default());
    }

    #[test]
    fn test_reject_invalid_frames_in_flight() {
        for fif in [0, 1, 4] {
            let text = format!("[frame]\nframes_in_flight = {fif}\n");
            assert!(matches!(RendererConfig::from_toml_str(&text), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_reject_unknown_present_mode() {
        let result = RendererConfig::from_toml_str("[swapchain]\npresent_mode = \"vsync\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_default_config_serializes_back() {
        let text = toml::to_string(&RendererConfig::default()).unwrap();
        assert_eq!(RendererConfig::from_toml_str(&text).unwrap(), RendererConfig::default());
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = RendererConfig::from_toml_str(include_str!("../../../../vireo.toml")).unwrap();
        assert_eq!(config.frame, FrameConfig::default());
        assert_eq!(config.resources, ResourceConfig::default());
        assert!(config.device.enable_validation);
    }

    #[test]
    fn test_missing_file() {
        let path = Path::new("/definitely/not/here/vireo.toml");
        assert!(matches!(RendererConfig::load(path), Err(ConfigError::Io { .. })));
        assert_eq!(RendererConfig::load_or_default(path).unwrap(), RendererConfig::default());
    }
}
