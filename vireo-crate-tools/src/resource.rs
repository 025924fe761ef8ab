use std::{
    env,
    path::{Path, PathBuf},
};

/// 统一资源路径管理
///
/// 所有路径基于工作区根目录（通过 `CARGO_MANIFEST_DIR` 推导）。
/// 可以通过环境变量 `VIREO_ROOT` 覆盖，用于发布后的目录结构。
///
/// # 使用示例
/// ```ignore
/// let config = VireoPath::config_path("vireo.toml");   // vireo.toml
/// let shader = VireoPath::shader_path("imgui.vert");   // shader/.build/imgui.vert.spv
/// ```
pub struct VireoPath {}
// 核心路径
impl VireoPath {
    /// 获取工作区根目录
    pub fn workspace_path() -> PathBuf {
        if let Ok(root) = env::var("VIREO_ROOT") {
            return PathBuf::from(root);
        }
        // 从当前包的位置推导 workspace 目录
        let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
        manifest_dir.parent().map(Path::to_path_buf).unwrap_or_else(|| manifest_dir.to_path_buf())
    }
}
// 根目录下
impl VireoPath {
    /// 获取 `assets/` 目录下的文件路径
    pub fn assets_path(filename: &str) -> PathBuf {
        Self::workspace_path().join("assets").join(filename)
    }

    /// 配置文件放在工作区根目录
    pub fn config_path(filename: &str) -> PathBuf {
        Self::workspace_path().join(filename)
    }

    pub fn shader_root_path() -> PathBuf {
        Self::workspace_path().join("shader")
    }

    /// 获取 `shader/.build/` 目录下的着色器路径（编译后的 SPIR-V）
    pub fn shader_path(filename: &str) -> PathBuf {
        Self::shader_root_path().join(".build").join(format!("{filename}.spv"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_path_suffix() {
        let path = VireoPath::shader_path("imgui.vert");
        assert!(path.ends_with("shader/.build/imgui.vert.spv"));
    }
}
